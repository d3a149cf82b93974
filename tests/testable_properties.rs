// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! End-to-end scenarios from spec.md §8.

use alt_index::Index;
use std::sync::Arc;
use std::thread;
use test_log::test;

#[test]
fn bulk_then_point_queries() {
    let pairs: Vec<(u64, u64)> = (0..10_000).map(|i| (i, i + 1)).collect();
    let index = Index::bulk_load(&pairs);

    for i in 0..10_000u64 {
        assert_eq!(index.find(i), Some(i + 1), "key {i} should be findable");
    }
    assert_eq!(index.find(10_000), None);
}

#[test]
fn bulk_then_insert_then_lookup() {
    let pairs: Vec<(u64, u64)> = (0..5_000).map(|i| (2 * i, 2 * i + 1)).collect();
    let index = Index::bulk_load(&pairs);

    for i in 0..5_000u64 {
        index.insert(2 * i + 1, 2 * i + 2);
    }

    for k in 0..10_000u64 {
        assert_eq!(index.find(k), Some(k + 1), "key {k} should map to k+1");
    }
}

#[test]
fn duplicate_insert_overwrites() {
    let pairs = [(1u64, 10u64), (2, 20), (3, 30)];
    let index = Index::bulk_load(&pairs);

    index.insert(2, 200);
    assert_eq!(index.find(2), Some(200));
}

#[test]
fn remove_then_reinsert() {
    let pairs = [(1u64, 11u64), (2, 22), (3, 33)];
    let index = Index::bulk_load(&pairs);

    assert!(index.remove(2));
    assert_eq!(index.find(2), None);

    index.insert(2, 222);
    assert_eq!(index.find(2), Some(222));
}

#[test]
fn range_scan_returns_contiguous_window() {
    let pairs: Vec<(u64, u64)> = (0..1_000).map(|i| (i, i)).collect();
    let index = Index::bulk_load(&pairs);

    let mut results = Vec::new();
    index.range_scan(&mut results, 500, 10);

    let expected: Vec<(u64, u64)> = (500..510).map(|i| (i, i)).collect();
    assert_eq!(results, expected);
}

#[test]
fn concurrent_writers_disjoint_partitions() {
    const THREADS: u64 = 12;
    const PER_THREAD: u64 = 2_000;
    const N: u64 = THREADS * PER_THREAD;

    let pairs: Vec<(u64, u64)> = vec![(0u64, 0u64)];
    let index = Arc::new(Index::bulk_load(&pairs));

    thread::scope(|scope| {
        for t in 0..THREADS {
            let index = Arc::clone(&index);
            scope.spawn(move || {
                for i in 0..PER_THREAD {
                    let key = t * PER_THREAD + i;
                    if key == 0 {
                        continue;
                    }
                    index.insert(key, key * 2);
                }
            });
        }
    });

    for key in 1..N {
        assert_eq!(index.find(key), Some(key * 2), "key {key} should be findable after concurrent insert");
    }
}
