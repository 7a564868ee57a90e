pub mod error;
pub mod types;
pub mod value;

pub use error::{Result, StoreError, UowError, WriteFailure};
pub use types::{EntityId, KeySchema, Shared, shared};
pub use value::{AttributeMap, ItemKey};
