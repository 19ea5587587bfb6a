//! Reference-counted resource cache.
//!
//! `RefCountedCache` keeps at most `max_resource` resources resident, keyed by a
//! 64-bit identifier. Every `get` takes a reference and every `release` drops one;
//! a resource is written back through its [`CacheLoader`] when its last reference
//! goes away. A `max_resource` of zero disables the bound.
//!
//! The bookkeeping lives behind one mutex, but loader I/O always runs with that
//! mutex released. Keys whose fetch or write-back is underway are marked
//! in-flight; callers asking for such a key park on a condition variable until the
//! marker clears, so each key is fetched at most once at a time.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::storage::error::{StorageError, StorageResult};

/// Materializes and writes back the resources held by a [`RefCountedCache`].
pub trait CacheLoader: Send + Sync {
    type Resource: Clone + Send;

    /// Loads the resource for `key`. Called without the cache lock held.
    fn fetch(&self, key: u64) -> StorageResult<Self::Resource>;

    /// Persists a resource that is leaving the cache.
    ///
    /// There is no error channel: a loader that cannot write back must abort.
    fn evict(&self, key: u64, resource: &Self::Resource);
}

struct Entry<T> {
    resource: T,
    references: usize,
}

struct CacheState<T> {
    entries: HashMap<u64, Entry<T>>,
    in_flight: HashSet<u64>,
    /// Resident entries plus reserved slots for in-flight keys.
    count: usize,
}

pub struct RefCountedCache<L: CacheLoader> {
    loader: L,
    state: Mutex<CacheState<L::Resource>>,
    settled: Condvar,
    max_resource: usize,
}

impl<L: CacheLoader> RefCountedCache<L> {
    pub fn new(loader: L, max_resource: usize) -> Self {
        Self {
            loader,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                in_flight: HashSet::new(),
                count: 0,
            }),
            settled: Condvar::new(),
            max_resource,
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn max_resource(&self) -> usize {
        self.max_resource
    }

    /// Returns the resource for `key`, fetching it through the loader on a miss.
    pub fn get(&self, key: u64) -> StorageResult<L::Resource> {
        self.get_with(key, |key| self.loader.fetch(key))
    }

    /// Like [`get`](Self::get), but materializes a missing resource with `fetch`
    /// instead of the loader. Used to admit resources that do not exist on disk yet.
    pub fn get_with<F>(&self, key: u64, fetch: F) -> StorageResult<L::Resource>
    where
        F: FnOnce(u64) -> StorageResult<L::Resource>,
    {
        {
            let mut state = self.state.lock();
            loop {
                if state.in_flight.contains(&key) {
                    self.settled.wait(&mut state);
                    continue;
                }

                if let Some(entry) = state.entries.get_mut(&key) {
                    entry.references += 1;
                    return Ok(entry.resource.clone());
                }

                if self.max_resource > 0 && state.count >= self.max_resource {
                    debug!(
                        "cache full ({} of {}), rejecting key {}",
                        state.count, self.max_resource, key
                    );
                    return Err(StorageError::CacheFull);
                }

                state.count += 1;
                state.in_flight.insert(key);
                break;
            }
        }

        let fetched = fetch(key);

        let mut state = self.state.lock();
        state.in_flight.remove(&key);
        let result = match fetched {
            Ok(resource) => {
                state.entries.insert(
                    key,
                    Entry {
                        resource: resource.clone(),
                        references: 1,
                    },
                );
                Ok(resource)
            }
            Err(e) => {
                state.count -= 1;
                Err(e)
            }
        };
        drop(state);
        self.settled.notify_all();

        result
    }

    /// Drops one reference to `key`, writing the resource back when none remain.
    ///
    /// Must be paired with an earlier successful `get` of the same key.
    pub fn release(&self, key: u64) {
        let resource = {
            let mut state = self.state.lock();
            let Some(entry) = state.entries.get_mut(&key) else {
                warn!("release of key {} which is not resident", key);
                return;
            };

            entry.references -= 1;
            if entry.references > 0 {
                return;
            }

            let Some(entry) = state.entries.remove(&key) else {
                return;
            };
            // Keep the slot reserved and the key in flight until the write-back lands.
            state.in_flight.insert(key);
            entry.resource
        };

        self.loader.evict(key, &resource);

        let mut state = self.state.lock();
        state.in_flight.remove(&key);
        state.count -= 1;
        drop(state);
        self.settled.notify_all();
    }

    /// Writes back every resident resource, whatever its reference count, and
    /// empties the cache. Must not race with `get`.
    ///
    /// Waits first for fetches and write-backs already underway, so a `release`
    /// still writing back returns its slot before the cache is emptied.
    pub fn close(&self) {
        let mut state = self.state.lock();
        while !state.in_flight.is_empty() {
            self.settled.wait(&mut state);
        }

        let mut keys: Vec<u64> = state.entries.keys().copied().collect();
        keys.sort_unstable();

        for key in keys {
            if let Some(entry) = state.entries.remove(&key) {
                self.loader.evict(key, &entry.resource);
            }
        }

        state.in_flight.clear();
        state.count = 0;
        drop(state);
        self.settled.notify_all();
    }

    /// Number of resources currently resident.
    pub fn resident_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Outstanding references to `key`, or `None` if it is not resident.
    pub fn references(&self, key: u64) -> Option<usize> {
        self.state.lock().entries.get(&key).map(|e| e.references)
    }
}
