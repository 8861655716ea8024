//! Sync engine for keeping the local cache in step with the remote mailbox
//!
//! Full sync rebuilds the cache from a complete listing; partial sync appends
//! additions reported by the change log since the stored history id.

mod context;
mod engine;
mod fetcher;

pub use context::SyncContext;
pub use engine::{SyncEngine, SyncMode, SyncStats};
pub use fetcher::{DetailFetcher, FetchOutcome};
