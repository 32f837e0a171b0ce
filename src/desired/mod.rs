//! Caller-declared target state: the desired epic/story forest, the
//! duplicate set, and file loading for both.

pub mod item;
pub mod state;
pub mod tier;

pub use item::{DesiredItem, ItemKey};
pub use state::{DesiredState, DesiredStateError, DuplicateEntry, DuplicateSet};
pub use tier::Tier;
