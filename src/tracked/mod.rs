pub mod item;
pub mod set;

pub use item::{
    CapturedItem, CreatedItem, DeletedItem, EntityHandle, TrackedEntity, TrackedItem,
    TrackedState, UpdatedItem, bind,
};
pub use set::TrackedSet;
