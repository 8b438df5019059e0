// Page Cache - client-side reconciling list over the authoritative pages
//
// Local mutations (prepend/remove/patch) are guesses. The next authoritative
// version of an entity replaces whatever was guessed locally, unless it is
// older than the version already confirmed.

use crate::domain::{Cursor, Keyed, Page, SortKey, SortOrder};
use std::cmp::Ordering;
use std::collections::HashMap;

/// What `apply_authoritative` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUpdate {
    Inserted,
    Replaced,
    /// Not newer than the confirmed version
    Stale,
}

#[derive(Debug, Clone)]
struct Entry<T> {
    item: T,
    /// `updated_at` of the last authoritative version, `None` for pure guesses
    confirmed_at: Option<i64>,
    optimistic: bool,
}

#[derive(Debug, Clone)]
pub struct PageCache<T> {
    sort_by: SortKey,
    sort_order: SortOrder,
    entries: Vec<Entry<T>>,
    /// Locally removed ids and their last confirmed version
    removed: HashMap<String, Option<i64>>,
    has_more: bool,
    next_cursor: Option<String>,
}

impl<T: Keyed + Clone> PageCache<T> {
    pub fn new(sort_by: SortKey, sort_order: SortOrder) -> Self {
        Self {
            sort_by,
            sort_order,
            entries: Vec::new(),
            removed: HashMap::new(),
            has_more: false,
            next_cursor: None,
        }
    }

    /// Append a fetched page; ids already cached are refreshed in place
    pub fn extend(&mut self, page: Page<T>) {
        self.has_more = page.has_more;
        self.next_cursor = page.next_cursor;
        for item in page.data {
            let version = item.sort_value(SortKey::UpdatedAt);
            match self.position(item.key_id()) {
                Some(index) => {
                    let entry = &mut self.entries[index];
                    if entry.confirmed_at.map_or(true, |at| version > at) {
                        *entry = confirmed(item, version);
                    }
                }
                None => self.entries.push(confirmed(item, version)),
            }
        }
    }

    /// Show a freshly created item at the top before the server confirms it
    pub fn prepend(&mut self, item: T) {
        let id = item.key_id().to_string();
        self.removed.remove(&id);
        let confirmed_at = self
            .position(&id)
            .map(|index| self.entries.remove(index))
            .and_then(|entry| entry.confirmed_at);
        self.entries.insert(
            0,
            Entry {
                item,
                confirmed_at,
                optimistic: true,
            },
        );
    }

    /// Hide an item locally
    pub fn remove(&mut self, id: &str) -> Option<T> {
        let index = self.position(id)?;
        let entry = self.entries.remove(index);
        self.removed.insert(id.to_string(), entry.confirmed_at);
        Some(entry.item)
    }

    /// Edit fields of a cached item locally. Returns `false` if not cached.
    pub fn patch(&mut self, id: &str, edit: impl FnOnce(&mut T)) -> bool {
        match self.position(id) {
            Some(index) => {
                let entry = &mut self.entries[index];
                edit(&mut entry.item);
                entry.optimistic = true;
                true
            }
            None => false,
        }
    }

    /// Accept a server version of an entity as the truth
    ///
    /// Local guesses for the same id are discarded. Unknown items are placed
    /// according to the active sort.
    pub fn apply_authoritative(&mut self, item: T) -> CacheUpdate {
        let version = item.sort_value(SortKey::UpdatedAt);
        let id = item.key_id().to_string();

        if let Some(index) = self.position(&id) {
            let entry = &mut self.entries[index];
            if entry.confirmed_at.is_some_and(|at| at >= version) {
                return CacheUpdate::Stale;
            }
            if entry.optimistic {
                // The guess may sit out of sort order (prepend); re-place it
                self.entries.remove(index);
                self.insert_sorted(confirmed(item, version));
            } else {
                *entry = confirmed(item, version);
            }
            return CacheUpdate::Replaced;
        }

        if let Some(removed_at) = self.removed.get(&id) {
            if removed_at.is_some_and(|at| at >= version) {
                return CacheUpdate::Stale;
            }
            self.removed.remove(&id);
        }

        self.insert_sorted(confirmed(item, version));
        CacheUpdate::Inserted
    }

    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|entry| &entry.item)
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.position(id).map(|index| &self.entries[index].item)
    }

    /// Whether the cached version is a local guess
    pub fn is_optimistic(&self, id: &str) -> bool {
        self.position(id)
            .is_some_and(|index| self.entries[index].optimistic)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Cursor for fetching the next page
    pub fn next_cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.item.key_id() == id)
    }

    fn insert_sorted(&mut self, entry: Entry<T>) {
        let key = Cursor::new(entry.item.sort_value(self.sort_by), entry.item.key_id());
        let sort_by = self.sort_by;
        let descending = self.sort_order == SortOrder::Desc;

        let index = self
            .entries
            .iter()
            .position(|existing| {
                if existing.optimistic && existing.confirmed_at.is_none() {
                    return false;
                }
                let ord = key.compare(existing.item.sort_value(sort_by), existing.item.key_id());
                // `ord` compares `existing` against the new key
                if descending {
                    ord == Ordering::Less
                } else {
                    ord == Ordering::Greater
                }
            })
            .unwrap_or(self.entries.len());
        self.entries.insert(index, entry);
    }
}

fn confirmed<T>(item: T, version: i64) -> Entry<T> {
    Entry {
        item,
        confirmed_at: Some(version),
        optimistic: false,
    }
}
