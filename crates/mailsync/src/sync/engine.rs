//! Incremental sync engine
//!
//! Keeps the in-memory cache consistent with the remote mailbox. The first
//! cycle lists the whole mailbox (full sync); later cycles read the change
//! log since the stored history id (partial sync). When the change log has
//! been pruned past our cursor, the cycle falls back to exactly one full
//! sync.
//!
//! A single lock guards the sync state and the cache for the whole cycle, so
//! cycles are serialized and a full sync's replacement is never observed
//! half-applied.

use anyhow::Result;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fmt;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::SyncContext;
use super::fetcher::{DetailFetcher, FetchOutcome};
use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::models::{CachedItem, MessageId, SyncState};
use crate::storage::ItemCache;
use crate::transport::MailboxTransport;

/// Strategy a completed cycle ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Whole-mailbox listing (first sync)
    Full,
    /// Change log since the stored history id
    Partial,
    /// Full sync run because the change log had expired
    ResyncFallback,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncMode::Full => "full",
            SyncMode::Partial => "partial",
            SyncMode::ResyncFallback => "resync",
        };
        f.write_str(name)
    }
}

/// Statistics from a sync cycle
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStats {
    pub mode: SyncMode,
    /// Distinct ids the cycle tried to fetch
    pub listed: usize,
    /// Ids whose details were fetched and committed
    pub fetched: usize,
    /// Ids omitted because their detail fetch failed
    pub failed: usize,
    /// Items sent on the output channel
    pub emitted: usize,
    /// Items not delivered because the channel was full or closed
    pub dropped: usize,
    /// History id stored at the end of the cycle
    pub sequence: Option<u64>,
    pub duration_ms: u64,
}

impl SyncStats {
    fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            listed: 0,
            fetched: 0,
            failed: 0,
            emitted: 0,
            dropped: 0,
            sequence: None,
            duration_ms: 0,
        }
    }
}

/// State guarded by the engine lock
struct Inner {
    state: SyncState,
    cache: ItemCache,
}

/// Sync engine over a [`MailboxTransport`]
pub struct SyncEngine {
    transport: Arc<dyn MailboxTransport>,
    fetcher: DetailFetcher,
    settings: SyncSettings,
    inner: Mutex<Inner>,
    output: SyncSender<CachedItem>,
}

impl SyncEngine {
    /// Create an engine and the receiving end of its new-item channel
    pub fn new(
        transport: Arc<dyn MailboxTransport>,
        settings: SyncSettings,
    ) -> Result<(Self, Receiver<CachedItem>)> {
        settings.validate()?;
        let fetcher = DetailFetcher::new(&settings)?;
        let (output, receiver) = sync_channel(settings.channel_capacity);

        let engine = Self {
            transport,
            fetcher,
            settings,
            inner: Mutex::new(Inner {
                state: SyncState::new(),
                cache: ItemCache::new(),
            }),
            output,
        };
        Ok((engine, receiver))
    }

    /// Start from a previously known state instead of an empty one
    pub fn with_state(self, state: SyncState) -> Self {
        {
            let mut inner = self.lock();
            inner.state = state;
        }
        self
    }

    /// Establish the remote's current history id
    ///
    /// Must succeed before the first [`sync`](Self::sync) when no history id
    /// is known. On a never-synced engine the value becomes the baseline of
    /// the next full sync.
    pub fn initialize(&self, ctx: &SyncContext) -> Result<u64, SyncError> {
        let mut inner = self.lock();
        let sequence = self.transport.get_current_sequence(ctx)?;
        inner.state.initialize(sequence);
        info!("[SYNC] Initialized at history id {}", sequence);
        Ok(sequence)
    }

    /// Run one sync cycle
    ///
    /// Blocks while another cycle is in flight. On error the stored history id
    /// is unchanged; [`SyncError::ResyncRequired`] is never returned.
    pub fn sync(&self, ctx: &SyncContext) -> Result<SyncStats, SyncError> {
        let start = Instant::now();
        let mut guard = self.lock();
        let inner = &mut *guard;

        let result = if inner.state.sequence.is_none() {
            self.full_sync(inner, ctx, SyncMode::Full)
        } else {
            match self.partial_sync(inner, ctx) {
                Err(SyncError::ResyncRequired) => {
                    info!(
                        "[SYNC] History id {:?} expired, falling back to full sync",
                        inner.state.sequence
                    );
                    self.full_sync(inner, ctx, SyncMode::ResyncFallback)
                }
                other => other,
            }
        };

        // A listing endpoint has no window to expire; never let this escape.
        let mut stats = result.map_err(|err| match err {
            SyncError::ResyncRequired => {
                SyncError::Fatal("full listing reported an expired history id".to_string())
            }
            other => other,
        })?;

        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "[SYNC] {} sync complete: {} fetched, {} failed, {} new, history id {:?} ({}ms)",
            stats.mode, stats.fetched, stats.failed, stats.emitted, stats.sequence, stats.duration_ms
        );
        Ok(stats)
    }

    /// Copy of the cached items in insertion order
    pub fn snapshot(&self) -> Vec<CachedItem> {
        self.lock().cache.items().to_vec()
    }

    pub fn len(&self) -> usize {
        self.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().cache.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.lock().cache.contains(id)
    }

    /// Copy of the current sync state
    pub fn state(&self) -> SyncState {
        self.lock().state.clone()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.lock().state.sequence
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// List the whole mailbox and replace the cache with it
    ///
    /// The cache is only touched after every detail fetch has been attempted.
    fn full_sync(
        &self,
        inner: &mut Inner,
        ctx: &SyncContext,
        mode: SyncMode,
    ) -> Result<SyncStats, SyncError> {
        let mut stats = SyncStats::new(mode);

        // Captured before listing so nothing that arrives mid-listing is lost.
        let captured = match inner.state.pending_baseline {
            Some(baseline) => baseline,
            None => self.transport.get_current_sequence(ctx)?,
        };

        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut listed_sequence = None;
        let mut page_token: Option<String> = None;

        loop {
            ctx.check()?;
            let page = self.transport.list_items(ctx, page_token.as_deref())?;
            listed_sequence = max_sequence(listed_sequence, page.sequence);

            for id in page.ids {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
            debug!("[SYNC] Listed {} messages so far", ids.len());

            if let Some(max) = self.settings.max_full_sync_items
                && ids.len() >= max
            {
                ids.truncate(max);
                break;
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        let mut baseline = listed_sequence.unwrap_or(captured);
        stats.listed = ids.len();

        let outcomes = self.fetcher.fetch_details(self.transport.as_ref(), ctx, &ids)?;
        let (items, failed) = collect_successes(outcomes)?;
        stats.fetched = items.len();
        stats.failed = failed;

        let first_population = inner.state.sequence.is_none() && inner.cache.is_empty();
        if let Some(previous) = inner.state.sequence
            && baseline < previous
        {
            warn!(
                "[SYNC] Full sync baseline {} is behind history id {}, keeping {}",
                baseline, previous, previous
            );
            baseline = previous;
        }

        let new_items: Vec<CachedItem> = items
            .iter()
            .filter(|item| !inner.cache.contains(&item.id))
            .cloned()
            .collect();

        inner.cache.replace_all(items);
        inner.state.reset(baseline);
        stats.sequence = inner.state.sequence;

        if first_population && !self.settings.notify_on_initial_sync {
            debug!(
                "[SYNC] Initial population of {} messages, not emitting",
                new_items.len()
            );
        } else {
            self.emit(&new_items, &mut stats);
        }

        Ok(stats)
    }

    /// Fetch additions since the stored history id and append them
    ///
    /// Returns [`SyncError::ResyncRequired`] without touching the cache or
    /// the history id when the remote no longer has our starting point.
    fn partial_sync(&self, inner: &mut Inner, ctx: &SyncContext) -> Result<SyncStats, SyncError> {
        let since = match inner.state.sequence {
            Some(sequence) if inner.state.initialized => sequence,
            _ => panic!("partial sync requires an initialized history id; call initialize() first"),
        };
        let mut stats = SyncStats::new(SyncMode::Partial);

        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut observed = None;
        let mut page_token: Option<String> = None;

        loop {
            ctx.check()?;
            let page = self
                .transport
                .list_changes(ctx, since, page_token.as_deref())?;
            observed = max_sequence(observed, page.max_sequence);

            for id in page.added {
                if !inner.cache.contains(&id) && seen.insert(id.clone()) {
                    ids.push(id);
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            "[SYNC] {} new messages since history id {} (max observed {:?})",
            ids.len(),
            since,
            observed
        );
        stats.listed = ids.len();

        let outcomes = self.fetcher.fetch_details(self.transport.as_ref(), ctx, &ids)?;
        let (items, failed) = collect_successes(outcomes)?;
        stats.failed = failed;

        let added = inner.cache.append(items);
        stats.fetched = added.len();
        if inner.state.advance(observed) {
            debug!("[SYNC] History id {} -> {:?}", since, inner.state.sequence);
        }
        stats.sequence = inner.state.sequence;

        self.emit(&added, &mut stats);
        Ok(stats)
    }

    /// Send committed items to the output channel, dropping when full
    fn emit(&self, items: &[CachedItem], stats: &mut SyncStats) {
        let mut disconnected = false;

        for item in items {
            match self.output.try_send(item.clone()) {
                Ok(()) => stats.emitted += 1,
                Err(TrySendError::Full(item)) => {
                    warn!(
                        "[SYNC] Output channel full, dropping notification for message {}",
                        item.id
                    );
                    stats.dropped += 1;
                }
                Err(TrySendError::Disconnected(_)) => {
                    if !disconnected {
                        debug!("[SYNC] Output channel has no receiver");
                        disconnected = true;
                    }
                    stats.dropped += 1;
                }
            }
        }
    }
}

/// Keep successful fetches; abort on an authorization failure
///
/// Returns the committed items and the number of omitted failures.
fn collect_successes(outcomes: Vec<FetchOutcome>) -> Result<(Vec<CachedItem>, usize), SyncError> {
    let mut items = Vec::with_capacity(outcomes.len());
    let mut failed = 0;

    for outcome in outcomes {
        match outcome.result {
            Ok(headers) => items.push(CachedItem::new(outcome.id, headers)),
            Err(err @ SyncError::AuthorizationRequired(_)) => return Err(err),
            Err(_) => failed += 1,
        }
    }

    Ok((items, failed))
}

fn max_sequence(current: Option<u64>, observed: Option<u64>) -> Option<u64> {
    match (current, observed) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemHeaders;

    #[test]
    fn test_max_sequence() {
        assert_eq!(max_sequence(None, None), None);
        assert_eq!(max_sequence(Some(5), None), Some(5));
        assert_eq!(max_sequence(None, Some(7)), Some(7));
        assert_eq!(max_sequence(Some(9), Some(7)), Some(9));
    }

    #[test]
    fn test_collect_successes_counts_failures() {
        let outcomes = vec![
            FetchOutcome {
                id: MessageId::new("a"),
                result: Ok(ItemHeaders::new("to", "from", "A")),
            },
            FetchOutcome {
                id: MessageId::new("b"),
                result: Err(SyncError::Fatal("boom".into())),
            },
            FetchOutcome {
                id: MessageId::new("c"),
                result: Err(SyncError::RetryLater("503".into())),
            },
        ];

        let (items, failed) = collect_successes(outcomes).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].subject, "A");
        assert_eq!(failed, 2);
    }

    #[test]
    fn test_collect_successes_aborts_on_authorization() {
        let outcomes = vec![
            FetchOutcome {
                id: MessageId::new("a"),
                result: Ok(ItemHeaders::default()),
            },
            FetchOutcome {
                id: MessageId::new("b"),
                result: Err(SyncError::AuthorizationRequired("401".into())),
            },
        ];

        assert!(matches!(
            collect_successes(outcomes),
            Err(SyncError::AuthorizationRequired(_))
        ));
    }
}
