//! Local cache storage
//!
//! The cache lives in memory only; persistence across restarts is not
//! provided.

mod memory;

pub use memory::ItemCache;
