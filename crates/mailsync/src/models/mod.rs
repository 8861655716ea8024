//! Domain models for cached mail entities

mod message;
mod sync_state;

pub use message::{CachedItem, ItemHeaders, MessageId};
pub use sync_state::SyncState;
