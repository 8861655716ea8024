//! Sync state tracking for incremental sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cursor into the remote change log
///
/// Owned by the sync engine and only mutated while its lock is held.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Highest history id observed; `None` means never synced
    pub sequence: Option<u64>,
    /// Whether a sequence number has been established (profile call or full listing)
    pub initialized: bool,
    /// History id captured by `initialize`, consumed by the next full sync
    ///
    /// Captured before listing so messages arriving during the listing are
    /// picked up by the following partial sync.
    pub pending_baseline: Option<u64>,
    /// When the last successful cycle committed
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Create an empty, never-synced state
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a known history id
    pub fn with_sequence(sequence: u64) -> Self {
        Self {
            sequence: Some(sequence),
            initialized: true,
            pending_baseline: None,
            last_sync_at: None,
        }
    }

    /// Record the history id reported by the profile endpoint
    ///
    /// Only a never-synced state keeps it as the next full sync's baseline;
    /// once a cursor exists, later full syncs capture their own.
    pub fn initialize(&mut self, baseline: u64) {
        self.initialized = true;
        if self.sequence.is_none() {
            self.pending_baseline = Some(baseline);
        }
    }

    /// Whether partial sync may run from this state
    pub fn can_sync_partially(&self) -> bool {
        self.initialized && self.sequence.is_some()
    }

    /// Commit a full sync: the cursor jumps to the listing's baseline
    pub fn reset(&mut self, baseline: u64) {
        self.sequence = Some(baseline);
        self.initialized = true;
        self.pending_baseline = None;
        self.last_sync_at = Some(Utc::now());
    }

    /// Commit a partial sync, moving the cursor forward to `observed`
    ///
    /// Never regresses; `None` leaves the cursor where it was.
    /// Returns true if the cursor moved.
    pub fn advance(&mut self, observed: Option<u64>) -> bool {
        self.last_sync_at = Some(Utc::now());
        self.pending_baseline = None;
        match (self.sequence, observed) {
            (Some(current), Some(new)) if new > current => {
                self.sequence = Some(new);
                true
            }
            (None, Some(new)) => {
                self.sequence = Some(new);
                true
            }
            _ => false,
        }
    }
}
