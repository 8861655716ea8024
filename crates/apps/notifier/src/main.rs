//! mail-notify - polls a Gmail inbox and reports new messages
//!
//! This is the main entry point. Setup (credentials, OAuth, the initial
//! history id) runs synchronously; the periodic poll runs on a tokio runtime.

use anyhow::{Context, Result};
use log::{error, info, warn};
use mailsync::{GmailAuth, GmailClient, GmailCredentials, SyncContext, SyncEngine, SyncSettings};
use std::sync::Arc;

mod notify;
mod poller;

use poller::Poller;

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let creds = match GmailCredentials::load() {
        Ok(creds) => creds,
        Err(e) => {
            if let Some(path) = GmailCredentials::default_credentials_path() {
                warn!(
                    "To configure Gmail access, either:\n\
                     1. Place your Google OAuth credentials at: {}\n\
                     2. Or set environment variables: GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET",
                    path.display()
                );
            }
            return Err(e.context("Gmail credentials not found"));
        }
    };

    let settings = SyncSettings::load().context("Failed to load sync settings")?;
    info!(
        "Polling every {}s with {} concurrent fetches",
        settings.poll_interval_secs, settings.fetch_concurrency
    );

    let auth = Arc::new(GmailAuth::new(creds.client_id, creds.client_secret)?);
    auth.authenticate().context("Gmail authentication failed")?;

    let client = GmailClient::new(auth.clone(), &settings);
    let (engine, receiver) = SyncEngine::new(Arc::new(client), settings)?;

    let ctx = SyncContext::new();
    engine
        .initialize(&ctx)
        .context("Failed to read the mailbox history id")?;

    let consumer = notify::spawn(receiver);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    runtime.block_on(Poller::new(Arc::new(engine), auth, ctx).run());

    // The poller owned the engine and with it the channel's sender
    if consumer.join().is_err() {
        warn!("Notification consumer panicked");
    }
    info!("mail-notify stopped");
    Ok(())
}
