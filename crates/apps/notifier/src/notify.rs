//! Consumer side of the engine's new-message channel

use log::info;
use mailsync::CachedItem;
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};

/// Drain `receiver` on its own thread until every sender is gone
pub fn spawn(receiver: Receiver<CachedItem>) -> JoinHandle<()> {
    thread::spawn(move || {
        for item in receiver {
            report(&item);
        }
    })
}

fn report(item: &CachedItem) {
    info!("[NOTIFY] New message {}", item.id);
    println!("New mail from {}: {}", sender_label(&item.from), item.display_subject());
}

/// Display name of a From header, falling back to the raw value
///
/// `"Jane Doe <jane@example.com>"` becomes `Jane Doe`.
fn sender_label(from: &str) -> &str {
    match from.find('<') {
        Some(idx) if idx > 0 => from[..idx].trim().trim_matches('"'),
        _ => from.trim(),
    }
}
