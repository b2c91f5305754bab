//! Hierarchical, ref-counted keyed locks.
//!
//! Four keyed tables — one per key-prefix width — plus a storage-wide root
//! lock. An operation acquires the chain from coarse to fine, shared at
//! every level above its own tier and exclusive at the tier itself, so two
//! writers meet exactly at the narrowest prefix they share and nowhere else.
//!
//! Lock-table entries are ref-counted and removed when the last holder
//! releases; without that, a random-key workload grows the tables without
//! bound.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use shared_types::{Id160, Key320, Key480, Key640, LockFootprint};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

struct Slot {
    lock: Arc<RwLock<()>>,
    holders: usize,
}

/// A table of per-key reader-writer locks with ref-counted slots.
pub struct KeyedRwLock<K: Eq + Hash + Clone> {
    table: Arc<Mutex<HashMap<K, Slot>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedRwLock<K> {
    fn default() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

enum Held {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

/// Holds one keyed lock; releasing it drops the table slot once the last
/// holder is gone.
pub struct KeyedGuard<K: Eq + Hash + Clone> {
    held: Option<Held>,
    table: Arc<Mutex<HashMap<K, Slot>>>,
    key: K,
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        // Release the lock before touching the ref count: removing the slot
        // while still holding its lock would let a new slot for the same key
        // grant a second, overlapping exclusive hold.
        self.held = None;
        let mut table = self.table.lock().expect("lock table poisoned");
        if let Some(slot) = table.get_mut(&self.key) {
            slot.holders -= 1;
            if slot.holders == 0 {
                table.remove(&self.key);
            }
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedRwLock<K> {
    fn checkout(&self, key: &K) -> Arc<RwLock<()>> {
        let mut table = self.table.lock().expect("lock table poisoned");
        let slot = table.entry(key.clone()).or_insert_with(|| Slot {
            lock: Arc::new(RwLock::new(())),
            holders: 0,
        });
        slot.holders += 1;
        slot.lock.clone()
    }

    pub async fn read(&self, key: K) -> KeyedGuard<K> {
        let lock = self.checkout(&key);
        let guard = lock.read_owned().await;
        KeyedGuard {
            held: Some(Held::Read(guard)),
            table: self.table.clone(),
            key,
        }
    }

    pub async fn write(&self, key: K) -> KeyedGuard<K> {
        let lock = self.checkout(&key);
        let guard = lock.write_owned().await;
        KeyedGuard {
            held: Some(Held::Write(guard)),
            table: self.table.clone(),
            key,
        }
    }

    /// Number of live slots; diagnostics and leak tests.
    pub fn slot_count(&self) -> usize {
        self.table.lock().expect("lock table poisoned").len()
    }
}

/// The storage lock hierarchy: root plus the 160/320/480/640 tables.
#[derive(Default)]
pub struct StorageLocks {
    root: Arc<RwLock<()>>,
    locations: KeyedRwLock<Id160>,
    domains: KeyedRwLock<Key320>,
    contents: KeyedRwLock<Key480>,
    points: KeyedRwLock<Key640>,
}

/// Guard for one acquired footprint. Fields drop fine-to-coarse.
pub struct FootprintGuard {
    _point: Option<KeyedGuard<Key640>>,
    _content: Option<KeyedGuard<Key480>>,
    _domain: Option<KeyedGuard<Key320>>,
    _location: Option<KeyedGuard<Id160>>,
    _root_read: Option<OwnedRwLockReadGuard<()>>,
    _root_write: Option<OwnedRwLockWriteGuard<()>>,
}

impl StorageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock chain for `footprint`, coarse to fine: shared above
    /// the operation's tier, exclusive at it. Suspends until every level is
    /// granted.
    pub async fn acquire(&self, footprint: LockFootprint) -> FootprintGuard {
        let mut guard = FootprintGuard {
            _point: None,
            _content: None,
            _domain: None,
            _location: None,
            _root_read: None,
            _root_write: None,
        };
        match footprint {
            LockFootprint::Global => {
                guard._root_write = Some(self.root.clone().write_owned().await);
            }
            LockFootprint::Location(location) => {
                guard._root_read = Some(self.root.clone().read_owned().await);
                guard._location = Some(self.locations.write(location).await);
            }
            LockFootprint::Domain(domain) => {
                guard._root_read = Some(self.root.clone().read_owned().await);
                guard._location = Some(self.locations.read(domain.location).await);
                guard._domain = Some(self.domains.write(domain).await);
            }
            LockFootprint::Content(content) => {
                guard._root_read = Some(self.root.clone().read_owned().await);
                guard._location = Some(self.locations.read(content.location).await);
                guard._domain = Some(self.domains.read(content.key320()).await);
                guard._content = Some(self.contents.write(content).await);
            }
            LockFootprint::Exact(point) => {
                guard._root_read = Some(self.root.clone().read_owned().await);
                guard._location = Some(self.locations.read(point.location).await);
                guard._domain = Some(self.domains.read(point.key320()).await);
                guard._content = Some(self.contents.read(point.key480()).await);
                guard._point = Some(self.points.write(point).await);
            }
        }
        guard
    }

    /// Live slot counts per tier `(160, 320, 480, 640)`; all zero when idle.
    pub fn slot_counts(&self) -> (usize, usize, usize, usize) {
        (
            self.locations.slot_count(),
            self.domains.slot_count(),
            self.contents.slot_count(),
            self.points.slot_count(),
        )
    }
}
