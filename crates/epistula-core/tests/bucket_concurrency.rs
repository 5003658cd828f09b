// Copyright (c) 2026 Epistula Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use epistula_core::bucket::LeasedBucketCache;
use epistula_core::{Clock, ExchangeRecord, RecordStore, StoreError};

struct FixedClock(AtomicU64);

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Store that sleeps inside `select_unscored` so concurrent callers pile up
/// on the cache lock while one materialization is in flight.
struct SlowStore {
    rows: Mutex<Vec<ExchangeRecord>>,
    scored: Mutex<BTreeSet<i64>>,
    fetch_cycles: AtomicU64,
}

impl SlowStore {
    fn with_rows(count: usize) -> Self {
        let rows = (0..count)
            .map(|i| ExchangeRecord {
                id: i as i64 + 1,
                model: "modelA".to_string(),
                uid: 7,
                pubkey: "0xbb".to_string(),
                endpoint: "chat".to_string(),
                success: true,
                request: json!({"model": "modelA"}),
                response: json!([{"text": "ok"}]),
            })
            .collect();
        Self {
            rows: Mutex::new(rows),
            scored: Mutex::new(BTreeSet::new()),
            fetch_cycles: AtomicU64::new(0),
        }
    }
}

impl RecordStore for SlowStore {
    fn select_unscored(
        &self,
        model: &str,
        limit: usize,
    ) -> Result<Vec<ExchangeRecord>, StoreError> {
        self.fetch_cycles.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(25));
        let rows = self.rows.lock();
        let scored = self.scored.lock();
        let mut out: Vec<ExchangeRecord> = rows
            .iter()
            .filter(|r| r.model == model && !scored.contains(&r.id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.id.cmp(&a.id));
        out.truncate(limit);
        Ok(out)
    }

    fn mark_scored(&self, ids: &[i64]) -> Result<(), StoreError> {
        let mut scored = self.scored.lock();
        for id in ids {
            // A row may be marked at most once, ever.
            assert!(scored.insert(*id), "record {id} marked scored twice");
        }
        Ok(())
    }
}

#[test]
fn concurrent_fetches_materialize_exactly_once() {
    let store = Arc::new(SlowStore::with_rows(40));
    let clock = Arc::new(FixedClock(AtomicU64::new(1_000)));
    let cache = Arc::new(LeasedBucketCache::new(
        store.clone(),
        clock,
        Duration::from_secs(1_200),
        20,
    ));

    let workers = 16;
    let barrier = Arc::new(Barrier::new(workers));
    let mut handles = Vec::new();
    for _ in 0..workers {
        let cache = cache.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            cache.fetch_batch(&["modelA".to_string()]).unwrap()
        }));
    }

    let views: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(store.fetch_cycles.load(Ordering::SeqCst), 1);
    let first = &views[0];
    for view in &views {
        assert_eq!(view.bucket_id, first.bucket_id);
        assert_eq!(view.records, first.records);
    }
    assert_eq!(first.records["modelA"].len(), 20);
    assert_eq!(store.scored.lock().len(), 20);
}

#[test]
fn sequential_leases_hand_out_disjoint_records() {
    let store = Arc::new(SlowStore::with_rows(50));
    let clock = Arc::new(FixedClock(AtomicU64::new(1_000)));
    let cache = LeasedBucketCache::new(store, clock.clone(), Duration::from_secs(1_200), 20);

    let mut seen = BTreeSet::new();
    for _ in 0..3 {
        let view = cache.fetch_batch(&["modelA".to_string()]).unwrap();
        for record in &view.records["modelA"] {
            assert!(seen.insert(record.id), "record {} delivered twice", record.id);
        }
        clock.0.fetch_add(1_200_001, Ordering::SeqCst);
    }
    // 50 rows at page size 20: 20 + 20 + 10.
    assert_eq!(seen.len(), 50);
}
