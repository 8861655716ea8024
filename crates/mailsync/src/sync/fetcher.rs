//! Bounded-concurrency detail fetching
//!
//! Runs per-message header fetches on a dedicated rayon pool sized to the
//! configured concurrency, so at most that many requests are in flight.
//! One message failing never stops its siblings.

use anyhow::{Context, Result, ensure};
use log::{debug, warn};
use rayon::prelude::*;
use std::time::Duration;

use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::models::{ItemHeaders, MessageId};
use crate::sync::SyncContext;
use crate::transport::MailboxTransport;

/// Result of fetching one message's headers
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub id: MessageId,
    pub result: Result<ItemHeaders, SyncError>,
}

/// Fetches message headers with at most `concurrency` requests in flight
pub struct DetailFetcher {
    pool: rayon::ThreadPool,
    concurrency: usize,
    max_attempts: u32,
    base_delay: Duration,
}

impl DetailFetcher {
    pub fn new(settings: &SyncSettings) -> Result<Self> {
        Self::with_limits(
            settings.fetch_concurrency,
            settings.detail_retries,
            settings.retry_base_delay(),
        )
    }

    /// # Arguments
    /// * `concurrency` - Maximum detail requests in flight (must be > 0)
    /// * `max_attempts` - Total attempts for a `RetryLater` failure
    /// * `base_delay` - Backoff before the second attempt, doubled afterwards
    pub fn with_limits(concurrency: usize, max_attempts: u32, base_delay: Duration) -> Result<Self> {
        ensure!(concurrency > 0, "detail fetch concurrency must be non-zero");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("detail-fetch-{}", i))
            .build()
            .context("Failed to build detail fetch pool")?;

        Ok(Self {
            pool,
            concurrency,
            max_attempts: max_attempts.max(1),
            base_delay,
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetch headers for every id, returning one outcome per input id
    ///
    /// Individual failures are reported in the outcome and do not affect
    /// other fetches. Cancellation of `ctx` stops new requests from starting
    /// and fails the whole batch.
    ///
    /// `ids` must not contain duplicates.
    pub fn fetch_details(
        &self,
        transport: &dyn MailboxTransport,
        ctx: &SyncContext,
        ids: &[MessageId],
    ) -> Result<Vec<FetchOutcome>, SyncError> {
        debug_assert!(
            {
                let mut seen = std::collections::HashSet::new();
                ids.iter().all(|id| seen.insert(id))
            },
            "duplicate ids passed to fetch_details"
        );

        ctx.check()?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "[FETCH] Fetching {} messages with concurrency {}",
            ids.len(),
            self.concurrency
        );

        let outcomes: Vec<FetchOutcome> = self.pool.install(|| {
            ids.par_iter()
                .map(|id| FetchOutcome {
                    id: id.clone(),
                    result: self.fetch_one(transport, ctx, id),
                })
                .collect()
        });

        ctx.check()?;
        Ok(outcomes)
    }

    /// Fetch one message, retrying `RetryLater` failures with backoff
    fn fetch_one(
        &self,
        transport: &dyn MailboxTransport,
        ctx: &SyncContext,
        id: &MessageId,
    ) -> Result<ItemHeaders, SyncError> {
        let mut delay = self.base_delay;
        let mut attempt = 1;

        loop {
            ctx.check()?;

            match transport.get_item_headers(ctx, id) {
                Ok(headers) => return Ok(headers),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    debug!(
                        "[FETCH] Message {} attempt {}/{} failed: {}",
                        id, attempt, self.max_attempts, err
                    );
                    ctx.sleep(delay + rand_jitter(delay))?;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        "[FETCH] Giving up on message {} after {} attempts: {}",
                        id, attempt, err
                    );
                    return Err(SyncError::Fatal(format!(
                        "retries exhausted for message {}: {}",
                        id, err
                    )));
                }
                Err(err) => {
                    if !ctx.is_cancelled() {
                        warn!("[FETCH] Failed to fetch message {}: {}", id, err);
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Random jitter between zero and `max`
fn rand_jitter(max: Duration) -> Duration {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let hasher = RandomState::new().build_hasher();
    Duration::from_millis(hasher.finish() % (max_ms + 1))
}
