//! # Versioned Ordered Map
//!
//! A sorted multimap whose entries carry a `(created_at, removed_at]` version
//! interval, giving read-only point-in-time snapshots concurrent with a
//! single writer, with garbage collection deferred until handles drop.
//!
//! ## Handle Model
//!
//! ```text
//!  VersionedMap (writer, version advances on every mutation)
//!       │ snapshot()                       ┌──────────────────────────┐
//!       ├────────────► MapSnapshot v=7 ───►│          Group           │
//!       │ snapshot()                       │  data: BTreeMap<K, Vec>  │
//!       └────────────► MapSnapshot v=9 ───►│  removed_key_ranges      │
//!                                          │  readers, current_version│
//!                                          └──────────────────────────┘
//! ```
//!
//! Exactly one writer exists per group, enforced by type: only
//! [`VersionedMap`] has mutating methods, and cloning it deep-copies the live
//! view into a fresh group rather than aliasing the writer. Cloning a
//! [`MapSnapshot`] registers another reader at the same version.
//!
//! ## Visibility
//!
//! An entry is visible at version `v` iff
//! `created_at <= v && (removed_at == -1 || v < removed_at)`. `erase` never
//! destroys data while readers exist: it closes the interval and records the
//! erased key range for later collection.
//!
//! ## Garbage Collection
//!
//! GC runs when a handle drops:
//!
//! - *writer, readers remain*: entries created strictly after the newest
//!   reader can never be observed again and are erased; the group becomes
//!   permanently read-only.
//! - *reader*: if no other snapshot at or below its version remains, every
//!   recorded key-range removal that the next-oldest observer (or the writer
//!   frontier, if none) can no longer see is applied physically.
//! - *last handle*: the group's storage is dropped with its `Arc`.
//!
//! ## Iteration
//!
//! [`SnapshotRange`] is a lazy cursor: it pins its own snapshot, fetches one
//! key bucket at a time under the group lock, and caches `count()` on first
//! use. No lock is held while the consumer runs, and entries the cursor may
//! still yield are pinned by its snapshot membership.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

/// Monotonically increasing version stamp, local to one snapshot group.
/// `-1` denotes "unset" (an entry that was never removed).
pub type Version = i64;

const NO_VERSION: Version = -1;

#[derive(Debug, Clone)]
pub struct VersionedValue<V> {
    created_at: Version,
    removed_at: Version,
    val: V,
}

impl<V> VersionedValue<V> {
    fn new(created_at: Version, val: V) -> Self {
        debug_assert!(created_at >= 0);
        Self {
            created_at,
            removed_at: NO_VERSION,
            val,
        }
    }

    pub fn created_at(&self) -> Version {
        self.created_at
    }

    pub fn removed_at(&self) -> Version {
        self.removed_at
    }

    pub fn value(&self) -> &V {
        &self.val
    }

    pub fn valid_at(&self, v: Version) -> bool {
        self.created_at <= v && (self.removed_at == NO_VERSION || v < self.removed_at)
    }

    fn invalid_at_and_before(&self, v: Version) -> bool {
        v < self.created_at
    }

    fn invalid_at_and_after(&self, v: Version) -> bool {
        self.removed_at >= 0 && self.removed_at <= v
    }

    fn remove(&mut self, v: Version) {
        assert_eq!(self.removed_at, NO_VERSION, "entry removed twice");
        assert!(self.created_at < v);
        self.removed_at = v;
    }
}

struct GroupInner<K, V> {
    data: BTreeMap<K, Vec<VersionedValue<V>>>,
    removed_key_ranges: BTreeMap<Version, Vec<(K, K)>>,
    /// Highest version ever minted in this group; survives the writer.
    current_version: Version,
    writer_alive: bool,
    readers: HashMap<u64, Version>,
    next_reader_id: u64,
}

struct Group<K, V> {
    inner: Mutex<GroupInner<K, V>>,
}

impl<K: Ord + Clone, V: Clone> Group<K, V> {
    fn new() -> Arc<Self> {
        Arc::new(Group {
            inner: Mutex::new(GroupInner {
                data: BTreeMap::new(),
                removed_key_ranges: BTreeMap::new(),
                current_version: 0,
                writer_alive: true,
                readers: HashMap::new(),
                next_reader_id: 0,
            }),
        })
    }
}

/// The unique writer handle of a snapshot group.
pub struct VersionedMap<K: Ord + Clone, V: Clone> {
    version: Version,
    group: Arc<Group<K, V>>,
}

impl<K: Ord + Clone, V: Clone> VersionedMap<K, V> {
    pub fn new() -> Self {
        Self {
            version: 0,
            group: Group::new(),
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Number of physical entries, including closed intervals awaiting GC.
    pub fn storage_len(&self) -> usize {
        let inner = self.group.inner.lock();
        inner.data.values().map(Vec::len).sum()
    }

    pub fn has_readers(&self) -> bool {
        !self.group.inner.lock().readers.is_empty()
    }

    pub fn insert(&mut self, key: K, val: V) {
        self.version += 1;
        let mut inner = self.group.inner.lock();
        inner.current_version = self.version;
        inner
            .data
            .entry(key)
            .or_default()
            .push(VersionedValue::new(self.version, val));
    }

    /// Bulk insert under a single version bump.
    pub fn insert_many(&mut self, items: impl IntoIterator<Item = (K, V)>) {
        self.version += 1;
        let mut inner = self.group.inner.lock();
        inner.current_version = self.version;
        for (key, val) in items {
            let ver = inner.current_version;
            inner
                .data
                .entry(key)
                .or_default()
                .push(VersionedValue::new(ver, val));
        }
    }

    /// Removes every entry with exactly `key`. While readers exist this only
    /// closes the entries' intervals and records the range for deferred GC;
    /// the two paths are observationally identical.
    pub fn erase(&mut self, key: &K) {
        self.version += 1;
        let ver = self.version;
        let mut inner = self.group.inner.lock();
        inner.current_version = ver;
        if inner.readers.is_empty() {
            inner.data.remove(key);
        } else {
            if let Some(bucket) = inner.data.get_mut(key) {
                for entry in bucket.iter_mut().filter(|e| e.removed_at == NO_VERSION) {
                    entry.remove(ver);
                }
            }
            inner
                .removed_key_ranges
                .entry(ver)
                .or_default()
                .push((key.clone(), key.clone()));
        }
    }

    /// Registers a reader frozen at the writer's current version. O(1).
    pub fn snapshot(&self) -> MapSnapshot<K, V> {
        let mut inner = self.group.inner.lock();
        let reader_id = inner.next_reader_id;
        inner.next_reader_id += 1;
        inner.readers.insert(reader_id, self.version);
        MapSnapshot {
            reader_id,
            version: self.version,
            group: Arc::clone(&self.group),
        }
    }

    pub fn all(&self) -> SnapshotRange<K, V> {
        self.snapshot().all()
    }

    pub fn query(&self, key: &K) -> SnapshotRange<K, V> {
        self.snapshot().query(key)
    }

    pub fn query_lt(&self, key: &K) -> SnapshotRange<K, V> {
        self.snapshot().query_lt(key)
    }

    pub fn query_gt(&self, key: &K) -> SnapshotRange<K, V> {
        self.snapshot().query_gt(key)
    }

    /// Half-open range `[lo, hi)`.
    pub fn query_in(&self, lo: &K, hi: &K) -> SnapshotRange<K, V> {
        self.snapshot().query_in(lo, hi)
    }
}

impl<K: Ord + Clone, V: Clone> Default for VersionedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloning the writer deep-copies its live view into a fresh, independent
/// group (cloning a snapshot just adds a reader; see [`MapSnapshot`]).
impl<K: Ord + Clone, V: Clone> Clone for VersionedMap<K, V> {
    fn clone(&self) -> Self {
        let live: Vec<(K, V)> = {
            let inner = self.group.inner.lock();
            inner
                .data
                .iter()
                .flat_map(|(k, bucket)| {
                    bucket
                        .iter()
                        .filter(|e| e.valid_at(self.version))
                        .map(|e| (k.clone(), e.val.clone()))
                })
                .collect()
        };
        let mut fresh = Self::new();
        if !live.is_empty() {
            fresh.insert_many(live);
        }
        fresh
    }
}

impl<K: Ord + Clone, V: Clone> Drop for VersionedMap<K, V> {
    fn drop(&mut self) {
        let mut inner = self.group.inner.lock();
        inner.writer_alive = false;
        if inner.readers.is_empty() {
            return;
        }
        // Versions past the newest remaining reader are unobservable.
        let max_ver = inner.readers.values().copied().max().unwrap_or(NO_VERSION);
        let mut erased = 0usize;
        inner.data.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|e| !e.invalid_at_and_before(max_ver));
            erased += before - bucket.len();
            !bucket.is_empty()
        });
        if erased > 0 {
            debug!(erased, max_ver, "writer dropped, collected unobservable versions");
        }
    }
}

/// A read-only member of a snapshot group, frozen at its stamp version.
pub struct MapSnapshot<K: Ord + Clone, V: Clone> {
    reader_id: u64,
    version: Version,
    group: Arc<Group<K, V>>,
}

impl<K: Ord + Clone, V: Clone> MapSnapshot<K, V> {
    pub fn version(&self) -> Version {
        self.version
    }

    /// Whether the group's writer is still alive. A dropped writer leaves
    /// the group permanently read-only.
    pub fn has_writer(&self) -> bool {
        self.group.inner.lock().writer_alive
    }

    pub fn all(&self) -> SnapshotRange<K, V> {
        self.range(Bound::Unbounded, Bound::Unbounded)
    }

    pub fn query(&self, key: &K) -> SnapshotRange<K, V> {
        self.range(Bound::Included(key.clone()), Bound::Included(key.clone()))
    }

    pub fn query_lt(&self, key: &K) -> SnapshotRange<K, V> {
        self.range(Bound::Unbounded, Bound::Excluded(key.clone()))
    }

    pub fn query_gt(&self, key: &K) -> SnapshotRange<K, V> {
        self.range(Bound::Excluded(key.clone()), Bound::Unbounded)
    }

    /// Half-open range `[lo, hi)`.
    pub fn query_in(&self, lo: &K, hi: &K) -> SnapshotRange<K, V> {
        self.range(Bound::Included(lo.clone()), Bound::Excluded(hi.clone()))
    }

    fn range(&self, lo: Bound<K>, hi: Bound<K>) -> SnapshotRange<K, V> {
        SnapshotRange {
            snap: self.clone(),
            lo,
            hi,
            descending: false,
            cursor: None,
            done: false,
            buf: VecDeque::new(),
            count: None,
        }
    }
}

impl<K: Ord + Clone, V: Clone> Clone for MapSnapshot<K, V> {
    fn clone(&self) -> Self {
        let mut inner = self.group.inner.lock();
        let reader_id = inner.next_reader_id;
        inner.next_reader_id += 1;
        inner.readers.insert(reader_id, self.version);
        MapSnapshot {
            reader_id,
            version: self.version,
            group: Arc::clone(&self.group),
        }
    }
}

impl<K: Ord + Clone, V: Clone> Drop for MapSnapshot<K, V> {
    fn drop(&mut self) {
        let mut inner = self.group.inner.lock();
        inner.readers.remove(&self.reader_id);

        // An older (or same-age) observer still pins everything we saw.
        if inner.readers.values().any(|&v| v <= self.version) {
            return;
        }
        // The next observer strictly above us, or the group frontier.
        let v_next = inner
            .readers
            .values()
            .copied()
            .filter(|&v| v > self.version)
            .min()
            .unwrap_or(inner.current_version + 1);

        let stale: Vec<Version> = inner
            .removed_key_ranges
            .range(..=v_next)
            .map(|(v, _)| *v)
            .collect();
        if stale.is_empty() {
            return;
        }
        let mut erased = 0usize;
        for v in stale {
            let ranges = inner
                .removed_key_ranges
                .remove(&v)
                .expect("range record was just enumerated");
            for (lo, hi) in ranges {
                let keys: Vec<K> = inner
                    .data
                    .range(lo..=hi)
                    .map(|(k, _)| k.clone())
                    .collect();
                for k in keys {
                    let emptied = match inner.data.get_mut(&k) {
                        Some(bucket) => {
                            let before = bucket.len();
                            bucket.retain(|e| !e.invalid_at_and_after(v_next));
                            erased += before - bucket.len();
                            bucket.is_empty()
                        }
                        None => false,
                    };
                    if emptied {
                        inner.data.remove(&k);
                    }
                }
            }
        }
        if erased > 0 {
            debug!(erased, v_next, "reader dropped, collected removed entries");
        }
    }
}

/// Lazy range cursor over one snapshot. Fetches one key bucket per lock
/// acquisition; `count()` is computed on first use and cached.
pub struct SnapshotRange<K: Ord + Clone, V: Clone> {
    snap: MapSnapshot<K, V>,
    lo: Bound<K>,
    hi: Bound<K>,
    descending: bool,
    cursor: Option<K>,
    done: bool,
    buf: VecDeque<(K, V)>,
    count: Option<usize>,
}

fn bound_ref<K>(b: &Bound<K>) -> Bound<&K> {
    match b {
        Bound::Included(k) => Bound::Included(k),
        Bound::Excluded(k) => Bound::Excluded(k),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// `BTreeMap::range` rejects inverted bounds; detect them up front so an
/// empty or exhausted range is just empty.
fn bounds_are_empty<K: Ord>(lo: &Bound<K>, hi: &Bound<K>) -> bool {
    match (lo, hi) {
        (Bound::Included(l), Bound::Included(h)) => l > h,
        (Bound::Included(l), Bound::Excluded(h)) => l >= h,
        (Bound::Excluded(l), Bound::Included(h)) => l > h,
        (Bound::Excluded(l), Bound::Excluded(h)) => l >= h,
        _ => false,
    }
}

impl<K: Ord + Clone, V: Clone> SnapshotRange<K, V> {
    /// Flips the cursor to descending order. Must be called before the first
    /// element is consumed.
    pub fn descending(mut self) -> Self {
        assert!(
            self.cursor.is_none() && self.buf.is_empty(),
            "direction change after iteration started"
        );
        self.descending = true;
        self
    }

    pub fn version(&self) -> Version {
        self.snap.version()
    }

    /// Number of visible entries in the full range, independent of how far
    /// the cursor has advanced.
    pub fn count(&mut self) -> usize {
        if let Some(n) = self.count {
            return n;
        }
        if bounds_are_empty(&self.lo, &self.hi) {
            self.count = Some(0);
            return 0;
        }
        let inner = self.snap.group.inner.lock();
        let version = self.snap.version;
        let n = inner
            .data
            .range((bound_ref(&self.lo), bound_ref(&self.hi)))
            .map(|(_, bucket)| bucket.iter().filter(|e| e.valid_at(version)).count())
            .sum();
        self.count = Some(n);
        n
    }

    fn refill(&mut self) {
        let (lo, hi): (Bound<K>, Bound<K>) = if self.descending {
            let hi = match &self.cursor {
                Some(c) => Bound::Excluded(c.clone()),
                None => self.hi.clone(),
            };
            (self.lo.clone(), hi)
        } else {
            let lo = match &self.cursor {
                Some(c) => Bound::Excluded(c.clone()),
                None => self.lo.clone(),
            };
            (lo, self.hi.clone())
        };
        if bounds_are_empty(&lo, &hi) {
            self.done = true;
            return;
        }
        let inner = self.snap.group.inner.lock();
        let version = self.snap.version;
        let mut iter = inner.data.range((bound_ref(&lo), bound_ref(&hi)));
        loop {
            let next = if self.descending {
                iter.next_back()
            } else {
                iter.next()
            };
            let Some((k, bucket)) = next else {
                self.done = true;
                return;
            };
            self.cursor = Some(k.clone());
            let mut any = false;
            for entry in bucket.iter().filter(|e| e.valid_at(version)) {
                self.buf.push_back((k.clone(), entry.val.clone()));
                any = true;
            }
            if any {
                return;
            }
        }
    }
}

impl<K: Ord + Clone, V: Clone> Iterator for SnapshotRange<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        if self.buf.is_empty() && !self.done {
            self.refill();
        }
        self.buf.pop_front()
    }
}
