//! Transport trait definitions
//!
//! The sync engine talks to the remote mailbox only through
//! [`MailboxTransport`]. Implementations receive an already-authenticated
//! channel and must classify their failures into [`SyncError`] before
//! returning.

use crate::error::SyncError;
use crate::models::{ItemHeaders, MessageId};
use crate::sync::SyncContext;

/// One page of the full mailbox listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub ids: Vec<MessageId>,
    pub next_page_token: Option<String>,
    /// Sequence number associated with the listing, if the remote reports one
    pub sequence: Option<u64>,
}

/// One page of the "changes since" log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangePage {
    pub added: Vec<MessageId>,
    pub next_page_token: Option<String>,
    /// Highest sequence number covered by this page, if reported
    pub max_sequence: Option<u64>,
}

/// Remote mailbox operations used by the sync engine
///
/// Every call must honour `ctx`: fail with the cancellation error when it is
/// cancelled and bound network waits by its deadline.
pub trait MailboxTransport: Send + Sync {
    /// List one page of every item in the mailbox
    fn list_items(&self, ctx: &SyncContext, page_token: Option<&str>)
    -> Result<ListPage, SyncError>;

    /// List one page of additions since `since`
    ///
    /// Returns [`SyncError::ResyncRequired`] if `since` is outside the
    /// remote's retained window.
    fn list_changes(
        &self,
        ctx: &SyncContext,
        since: u64,
        page_token: Option<&str>,
    ) -> Result<ChangePage, SyncError>;

    /// Fetch the header fields of a single item
    fn get_item_headers(&self, ctx: &SyncContext, id: &MessageId)
    -> Result<ItemHeaders, SyncError>;

    /// Current head of the remote change log
    fn get_current_sequence(&self, ctx: &SyncContext) -> Result<u64, SyncError>;
}
