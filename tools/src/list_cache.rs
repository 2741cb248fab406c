//! Short-lived cache of directory listings for the `List` tool.
//!
//! Owned by the tool instance. Writes through the `Write` tool invalidate the
//! parent directory's entry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_LIST_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub is_dir: bool,
}

pub type Listing = Arc<[ListingEntry]>;

#[derive(Debug)]
pub struct DirListingCache {
    ttl: Duration,
    entries: Mutex<HashMap<PathBuf, (Instant, Listing)>>,
}

impl Default for DirListingCache {
    fn default() -> Self {
        Self::new(DEFAULT_LIST_CACHE_TTL)
    }
}

impl DirListingCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh listing for `dir`, if any. Expired entries are evicted on lookup.
    pub fn get(&self, dir: &Path) -> Option<Listing> {
        let mut entries = self.lock();
        match entries.get(dir) {
            Some((stored_at, listing)) if stored_at.elapsed() < self.ttl => {
                Some(Arc::clone(listing))
            }
            Some(_) => {
                entries.remove(dir);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, dir: PathBuf, listing: Listing) {
        self.lock().insert(dir, (Instant::now(), listing));
    }

    pub fn invalidate(&self, dir: &Path) {
        self.lock().remove(dir);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, (Instant, Listing)>> {
        // A poisoned map only ever holds stale listings.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
