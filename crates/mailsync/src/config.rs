//! Configuration loading for mail services
//!
//! Sync tuning is read from `settings.json` in the mail-notify config
//! directory; every field has a default.
//!
//! OAuth credentials are loaded from (in order of priority):
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file (Google Cloud Console format)
//! 3. Runtime environment variables (fallback)

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Credentials filename in the config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Settings filename in the config directory
const SETTINGS_FILE: &str = "settings.json";

/// Gmail caps list and history pages at 500 entries
const MAX_PAGE_SIZE: u32 = 500;

/// Tuning for the sync engine and the polling loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Seconds between scheduled sync cycles
    pub poll_interval_secs: u64,
    /// Maximum detail fetches in flight at once
    pub fetch_concurrency: usize,
    /// Capacity of the new-item output channel
    pub channel_capacity: usize,
    /// Entries requested per listing/history page
    pub page_size: u32,
    /// Restrict listing and change log to this label (None = whole mailbox)
    pub label: Option<String>,
    /// Stop following listing pages after this many ids (None = all)
    pub max_full_sync_items: Option<usize>,
    /// Total attempts for a detail fetch that fails with `RetryLater`
    pub detail_retries: u32,
    /// Initial backoff between detail attempts, doubled each retry
    pub retry_base_delay_ms: u64,
    /// Upper bound on a single HTTP request
    pub request_timeout_secs: u64,
    /// Upper bound on one whole sync cycle
    ///
    /// Independent of the poll interval: a first full sync of a large mailbox
    /// may need many intervals, and ticks that fire meanwhile are skipped.
    pub cycle_timeout_secs: u64,
    /// Emit items discovered by the first population of an empty cache
    pub notify_on_initial_sync: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            fetch_concurrency: 16,
            channel_capacity: 32,
            page_size: MAX_PAGE_SIZE,
            label: Some("INBOX".to_string()),
            max_full_sync_items: None,
            detail_retries: 3,
            retry_base_delay_ms: 100,
            request_timeout_secs: 30,
            cycle_timeout_secs: 1800,
            notify_on_initial_sync: false,
        }
    }
}

impl SyncSettings {
    /// Load settings from the config directory, using defaults if the file is absent
    pub fn load() -> Result<Self> {
        let settings: Self = config::load_json_or_default(SETTINGS_FILE)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings: Self = config::load_json_file(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be greater than zero");
        }
        if self.fetch_concurrency == 0 {
            bail!("fetch_concurrency must be greater than zero");
        }
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be greater than zero");
        }
        if self.cycle_timeout_secs == 0 {
            bail!("cycle_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Page size clamped to what the API accepts
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Path of the settings file in the config directory
    pub fn default_settings_path() -> Option<PathBuf> {
        config::config_path(SETTINGS_FILE)
    }
}

/// OAuth credentials for Gmail API access
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format (installed app)
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials (for production builds)
    /// 2. JSON file (~/.config/mail-notify/google-credentials.json)
    /// 3. Runtime environment variables
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Load credentials embedded at compile time via environment variables.
    /// Build with: GOOGLE_CLIENT_ID=xxx GOOGLE_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// Get the default credentials file path (~/.config/mail-notify/google-credentials.json)
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}
