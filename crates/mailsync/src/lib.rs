//! Mailsync crate - incremental mailbox synchronization
//!
//! This crate keeps a local cache of message metadata consistent with a
//! remote mailbox that exposes a monotonically increasing history id:
//! - Domain models (CachedItem, MessageId, SyncState)
//! - Error taxonomy shared by every remote call site
//! - Transport trait plus the Gmail API implementation and OAuth provider
//! - Bounded-concurrency detail fetcher
//! - Sync engine with full/partial strategies and resync fallback
//!
//! The crate uses blocking I/O only and does not depend on an async runtime.

pub mod config;
pub mod error;
pub mod gmail;
pub mod models;
pub mod storage;
pub mod sync;
pub mod transport;

pub use config::{GmailCredentials, SyncSettings};
pub use error::{CallSite, ErrorKind, SyncError, classify_status, classify_status_with_reason};
pub use gmail::{AccessTokenProvider, GmailAuth, GmailClient};
pub use models::{CachedItem, ItemHeaders, MessageId, SyncState};
pub use storage::ItemCache;
pub use sync::{DetailFetcher, FetchOutcome, SyncContext, SyncEngine, SyncMode, SyncStats};
pub use transport::{ChangePage, ListPage, MailboxTransport};
