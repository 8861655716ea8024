//! In-memory item cache
//!
//! Holds the messages the engine has successfully fetched, in insertion
//! order. Not persisted across restarts.

use std::collections::HashSet;

use crate::models::{CachedItem, MessageId};

/// Ordered set of cached items keyed by message id
///
/// Not internally synchronized: the sync engine owns it behind its lock.
#[derive(Debug, Default, Clone)]
pub struct ItemCache {
    items: Vec<CachedItem>,
    ids: HashSet<MessageId>,
}

impl ItemCache {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&CachedItem> {
        if !self.contains(id) {
            return None;
        }
        self.items.iter().find(|item| &item.id == id)
    }

    /// Items in insertion order
    pub fn items(&self) -> &[CachedItem] {
        &self.items
    }

    /// Ids currently cached
    pub fn ids(&self) -> &HashSet<MessageId> {
        &self.ids
    }

    /// Append items whose id is not already cached
    ///
    /// Existing entries are never altered. Returns the items that were added.
    pub fn append(&mut self, items: impl IntoIterator<Item = CachedItem>) -> Vec<CachedItem> {
        let mut added = Vec::new();
        for item in items {
            if self.ids.insert(item.id.clone()) {
                self.items.push(item.clone());
                added.push(item);
            }
        }
        added
    }

    /// Replace the whole cache with `items`
    ///
    /// Duplicate ids within `items` keep their first occurrence.
    pub fn replace_all(&mut self, items: impl IntoIterator<Item = CachedItem>) {
        self.items.clear();
        self.ids.clear();
        self.append(items);
    }
}
