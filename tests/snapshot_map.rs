//! # Versioned Map Integration Tests
//!
//! Snapshot isolation, deferred garbage collection, and handle lifecycle of
//! the versioned ordered map.

use snapdb::{SnapshotRange, VersionedMap};

fn entries(map: &VersionedMap<String, i64>) -> Vec<(String, i64)> {
    map.all().collect()
}

fn key(s: &str) -> String {
    s.to_owned()
}

#[test]
fn test_snapshot_isolation_end_to_end() {
    let mut map: VersionedMap<String, i64> = VersionedMap::new();
    map.insert(key("a"), 1);
    map.insert(key("b"), 2);

    let snap = map.snapshot();

    map.insert(key("c"), 3);
    map.erase(&key("a"));

    assert_eq!(entries(&map), vec![(key("b"), 2), (key("c"), 3)]);
    assert_eq!(
        snap.all().collect::<Vec<_>>(),
        vec![(key("a"), 1), (key("b"), 2)]
    );

    // Dropping the only reader collects the tombstone for "a".
    drop(snap);
    assert_eq!(map.storage_len(), 2);
    assert_eq!(entries(&map), vec![(key("b"), 2), (key("c"), 3)]);
}

#[test]
fn test_snapshot_without_mutation_matches_writer() {
    let mut map: VersionedMap<String, i64> = VersionedMap::new();
    for (k, v) in [("x", 1), ("y", 2), ("z", 3)] {
        map.insert(key(k), v);
    }
    let snap = map.snapshot();
    assert_eq!(snap.all().collect::<Vec<_>>(), entries(&map));
}

#[test]
fn test_group_outlives_writer_and_stays_readable() {
    let mut map: VersionedMap<String, i64> = VersionedMap::new();
    map.insert(key("a"), 1);
    let snap = map.snapshot();
    map.insert(key("b"), 2);
    drop(map);

    assert!(!snap.has_writer());
    assert_eq!(snap.all().collect::<Vec<_>>(), vec![(key("a"), 1)]);
    // Readers of the orphaned group still snapshot freely.
    let twin = snap.clone();
    assert_eq!(twin.all().collect::<Vec<_>>(), vec![(key("a"), 1)]);
}

#[test]
fn test_writer_drop_gc_spares_reader_at_exact_boundary() {
    let mut map: VersionedMap<i64, i64> = VersionedMap::new();
    map.insert(1, 10); // version 1
    map.insert(2, 20); // version 2
    let boundary = map.snapshot(); // stamped at version 2
    map.insert(3, 30); // version 3, unobservable once the writer goes
    drop(map);

    // Entry created exactly at the boundary version survives; later ones do
    // not.
    assert_eq!(
        boundary.all().collect::<Vec<_>>(),
        vec![(1, 10), (2, 20)]
    );
    let mut q = boundary.query_gt(&2);
    assert_eq!(SnapshotRange::count(&mut q), 0);
}

#[test]
fn test_reader_gc_waits_for_oldest_observer() {
    let mut map: VersionedMap<i64, i64> = VersionedMap::new();
    map.insert(1, 10);
    let oldest = map.snapshot();
    map.insert(2, 20);
    let middle = map.snapshot();
    map.erase(&1);
    map.erase(&2);
    assert_eq!(map.storage_len(), 2);

    // The middle reader dying changes nothing: the oldest still pins both.
    drop(middle);
    assert_eq!(map.storage_len(), 2);

    drop(oldest);
    assert_eq!(map.storage_len(), 0);
}

#[test]
fn test_erase_paths_are_observationally_equivalent() {
    // Path one: no readers, physical removal.
    let mut bare: VersionedMap<i64, i64> = VersionedMap::new();
    bare.insert(1, 10);
    bare.insert(2, 20);
    bare.erase(&1);

    // Path two: a reader forces deferred removal.
    let mut pinned: VersionedMap<i64, i64> = VersionedMap::new();
    pinned.insert(1, 10);
    pinned.insert(2, 20);
    let snap = pinned.snapshot();
    pinned.erase(&1);

    assert_eq!(
        bare.all().collect::<Vec<_>>(),
        pinned.all().collect::<Vec<_>>()
    );
    drop(snap);
    assert_eq!(bare.storage_len(), pinned.storage_len());
}

#[test]
fn test_writer_clone_deep_copies_live_view() {
    let mut map: VersionedMap<i64, i64> = VersionedMap::new();
    map.insert(1, 10);
    map.insert(2, 20);
    map.erase(&1);
    let snap = map.snapshot();

    let copy = map.clone();
    assert_eq!(copy.all().collect::<Vec<_>>(), vec![(2, 20)]);
    assert!(!copy.has_readers(), "copy starts its own group");
    assert_eq!(snap.all().collect::<Vec<_>>(), vec![(2, 20)]);
}

#[test]
fn test_range_queries_filter_by_version() {
    let mut map: VersionedMap<i64, i64> = VersionedMap::new();
    for k in 1..=6 {
        map.insert(k, k * 10);
    }
    let snap = map.snapshot();
    map.erase(&3);
    map.insert(7, 70);

    assert_eq!(
        snap.query_in(&2, &5).collect::<Vec<_>>(),
        vec![(2, 20), (3, 30), (4, 40)]
    );
    assert_eq!(
        map.query_in(&2, &5).collect::<Vec<_>>(),
        vec![(2, 20), (4, 40)]
    );
    assert_eq!(map.query_gt(&5).collect::<Vec<_>>(), vec![(6, 60), (7, 70)]);
    assert_eq!(
        snap.query_lt(&3).descending().collect::<Vec<_>>(),
        vec![(2, 20), (1, 10)]
    );
}

#[test]
fn test_count_is_version_scoped_and_cached() {
    let mut map: VersionedMap<i64, i64> = VersionedMap::new();
    map.insert(1, 10);
    map.insert(2, 20);
    let mut before = map.snapshot().all();
    map.insert(3, 30);
    let mut after = map.all();
    assert_eq!(SnapshotRange::count(&mut before), 2);
    assert_eq!(SnapshotRange::count(&mut after), 3);
    // Consuming the cursor does not disturb the cached count.
    after.next();
    assert_eq!(SnapshotRange::count(&mut after), 3);
}
