//! Scripted in-memory mailbox used by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mailsync::{
    ChangePage, ItemHeaders, ListPage, MailboxTransport, MessageId, SyncContext, SyncError,
    SyncSettings,
};

#[derive(Default)]
struct Remote {
    listing: Vec<Vec<String>>,
    listing_sequence: Option<u64>,
    listing_error: Option<SyncError>,
    current_sequence: u64,
    changes: HashMap<u64, Vec<(Vec<String>, Option<u64>)>>,
    changes_error: Option<SyncError>,
    cancel_after_changes: bool,
    detail_failures: HashMap<String, SyncError>,
}

/// Mailbox whose responses are set up by each test
#[derive(Default)]
pub struct MockMailbox {
    remote: Mutex<Remote>,
    detail_delay: Duration,
    listing_delay: Duration,
    pub list_calls: AtomicUsize,
    pub change_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
    details_in_flight: AtomicUsize,
    pub max_details_in_flight: AtomicUsize,
    listings_in_flight: AtomicUsize,
    pub max_listings_in_flight: AtomicUsize,
}

impl MockMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slow every detail fetch down so concurrency becomes observable
    pub fn with_detail_delay(mut self, delay: Duration) -> Self {
        self.detail_delay = delay;
        self
    }

    pub fn with_listing_delay(mut self, delay: Duration) -> Self {
        self.listing_delay = delay;
        self
    }

    /// Single-page listing
    pub fn set_listing(&self, ids: &[&str], sequence: Option<u64>) {
        self.set_listing_pages(&[ids], sequence);
    }

    pub fn set_listing_pages(&self, pages: &[&[&str]], sequence: Option<u64>) {
        let mut remote = self.remote.lock().unwrap();
        remote.listing = pages.iter().map(|p| to_strings(p)).collect();
        remote.listing_sequence = sequence;
        remote.listing_error = None;
    }

    pub fn fail_listing(&self, err: SyncError) {
        self.remote.lock().unwrap().listing_error = Some(err);
    }

    pub fn set_current_sequence(&self, sequence: u64) {
        self.remote.lock().unwrap().current_sequence = sequence;
    }

    /// Single-page change log starting at `since`
    pub fn set_changes(&self, since: u64, added: &[&str], max_sequence: Option<u64>) {
        self.set_change_pages(since, &[(added, max_sequence)]);
    }

    pub fn set_change_pages(&self, since: u64, pages: &[(&[&str], Option<u64>)]) {
        let mut remote = self.remote.lock().unwrap();
        remote.changes.insert(
            since,
            pages
                .iter()
                .map(|(ids, seq)| (to_strings(ids), *seq))
                .collect(),
        );
        remote.changes_error = None;
    }

    pub fn fail_changes(&self, err: SyncError) {
        self.remote.lock().unwrap().changes_error = Some(err);
    }

    /// Cancel the caller's context once a change page has been served
    pub fn cancel_after_changes(&self) {
        self.remote.lock().unwrap().cancel_after_changes = true;
    }

    pub fn fail_detail(&self, id: &str, err: SyncError) {
        self.remote
            .lock()
            .unwrap()
            .detail_failures
            .insert(id.to_string(), err);
    }

    pub fn clear_detail_failures(&self) {
        self.remote.lock().unwrap().detail_failures.clear();
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Headers the mock serves for `id`
pub fn headers_for(id: &str) -> ItemHeaders {
    ItemHeaders::new(
        "me@example.com",
        format!("{}@example.com", id.to_lowercase()),
        format!("Subject {}", id),
    )
}

/// Settings with instant retries, suitable for tests
pub fn test_settings() -> SyncSettings {
    SyncSettings {
        retry_base_delay_ms: 0,
        ..SyncSettings::default()
    }
}

fn to_strings(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

/// Page tokens are the index of the next page
fn page_index(token: Option<&str>) -> usize {
    token.map(|t| t.parse().unwrap()).unwrap_or(0)
}

fn next_token(index: usize, total: usize) -> Option<String> {
    if index + 1 < total {
        Some((index + 1).to_string())
    } else {
        None
    }
}

impl MailboxTransport for MockMailbox {
    fn list_items(&self, ctx: &SyncContext, page_token: Option<&str>) -> Result<ListPage, SyncError> {
        ctx.check()?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let now = self.listings_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_listings_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.listing_delay);
        self.listings_in_flight.fetch_sub(1, Ordering::SeqCst);

        let remote = self.remote.lock().unwrap();
        if let Some(err) = &remote.listing_error {
            return Err(err.clone());
        }

        let index = page_index(page_token);
        let ids = remote.listing.get(index).cloned().unwrap_or_default();
        Ok(ListPage {
            ids: ids.into_iter().map(MessageId::new).collect(),
            next_page_token: next_token(index, remote.listing.len()),
            sequence: remote.listing_sequence,
        })
    }

    fn list_changes(
        &self,
        ctx: &SyncContext,
        since: u64,
        page_token: Option<&str>,
    ) -> Result<ChangePage, SyncError> {
        ctx.check()?;
        self.change_calls.fetch_add(1, Ordering::SeqCst);

        let now = self.listings_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_listings_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.listing_delay);
        self.listings_in_flight.fetch_sub(1, Ordering::SeqCst);

        let remote = self.remote.lock().unwrap();
        if let Some(err) = &remote.changes_error {
            return Err(err.clone());
        }

        if remote.cancel_after_changes {
            ctx.cancel();
        }

        let Some(pages) = remote.changes.get(&since) else {
            // Nothing scripted: no changes, no new history id
            return Ok(ChangePage::default());
        };

        let index = page_index(page_token);
        let (added, max_sequence) = pages.get(index).cloned().unwrap_or_default();
        Ok(ChangePage {
            added: added.into_iter().map(MessageId::new).collect(),
            next_page_token: next_token(index, pages.len()),
            max_sequence,
        })
    }

    fn get_item_headers(&self, ctx: &SyncContext, id: &MessageId) -> Result<ItemHeaders, SyncError> {
        ctx.check()?;
        self.detail_calls.fetch_add(1, Ordering::SeqCst);

        let now = self.details_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_details_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.detail_delay);
        self.details_in_flight.fetch_sub(1, Ordering::SeqCst);

        let remote = self.remote.lock().unwrap();
        match remote.detail_failures.get(id.as_str()) {
            Some(err) => Err(err.clone()),
            None => Ok(headers_for(id.as_str())),
        }
    }

    fn get_current_sequence(&self, ctx: &SyncContext) -> Result<u64, SyncError> {
        ctx.check()?;
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.remote.lock().unwrap().current_sequence)
    }
}
