//! Periodic sync scheduling
//!
//! One sync cycle runs per tick on the blocking pool, bounded by the cycle
//! timeout rather than the poll interval. A tick that fires while a cycle is
//! still running is skipped rather than queued.

use log::{debug, error, info, warn};
use mailsync::{GmailAuth, SyncContext, SyncEngine, SyncError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

pub struct Poller {
    engine: Arc<SyncEngine>,
    auth: Arc<GmailAuth>,
    ctx: SyncContext,
    interval: Duration,
    cycle_timeout: Duration,
}

impl Poller {
    pub fn new(engine: Arc<SyncEngine>, auth: Arc<GmailAuth>, ctx: SyncContext) -> Self {
        let interval = engine.settings().poll_interval();
        let cycle_timeout = engine.settings().cycle_timeout();
        Self {
            engine,
            auth,
            ctx,
            interval,
            cycle_timeout,
        }
    }

    /// Poll until Ctrl-C
    pub async fn run(self) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let signal_ctx = self.ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                signal_ctx.cancel();
                let _ = shutdown_tx.send(true);
            }
        });

        // First tick completes immediately
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                Ok(()) = shutdown_rx.changed() => break,
            }

            self.tick().await;

            if self.ctx.is_cancelled() {
                break;
            }
        }
    }

    /// Context for one cycle: shares the shutdown flag, expires after the cycle timeout
    fn cycle_context(&self) -> SyncContext {
        self.ctx.with_timeout(self.cycle_timeout)
    }

    async fn tick(&self) {
        let engine = Arc::clone(&self.engine);
        let ctx = self.cycle_context();

        match tokio::task::spawn_blocking(move || engine.sync(&ctx)).await {
            Ok(Ok(stats)) => {
                debug!(
                    "[SYNC] Tick done: mode={} new={} dropped={}",
                    stats.mode, stats.emitted, stats.dropped
                );
            }
            Ok(Err(err)) => self.handle_error(err).await,
            Err(e) => error!("[SYNC] Sync task failed: {}", e),
        }
    }

    async fn handle_error(&self, err: SyncError) {
        if self.ctx.is_cancelled() {
            debug!("[SYNC] Cycle interrupted by shutdown");
            return;
        }

        match err {
            SyncError::AuthorizationRequired(_) => {
                warn!("[SYNC] {}; re-authenticating", err);
                let auth = Arc::clone(&self.auth);
                match tokio::task::spawn_blocking(move || auth.reauthenticate()).await {
                    Ok(Ok(())) => info!("[SYNC] Re-authenticated, resuming on next tick"),
                    Ok(Err(e)) => error!("[SYNC] Re-authentication failed: {:#}", e),
                    Err(e) => error!("[SYNC] Re-authentication task failed: {}", e),
                }
            }
            SyncError::RetryLater(_) => {
                warn!("[SYNC] {} (kind={}), retrying next tick", err, err.kind());
            }
            _ => error!("[SYNC] {} (kind={})", err, err.kind()),
        }
    }
}
