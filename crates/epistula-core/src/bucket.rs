// Copyright (c) 2026 Epistula Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use crate::clock::Clock;
use crate::record::{ExchangeRecord, RecordStore, StoreError};

pub const DEFAULT_BUCKET_TTL: Duration = Duration::from_secs(1_200);
pub const DEFAULT_PAGE_SIZE: usize = 20;

const BUCKET_ID_LEN: usize = 14;
const BUCKET_ID_ALPHABET: &[u8] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("bucket materialization failed: {0}")]
    Storage(#[from] StoreError),
}

/// Read-only projection of the live bucket down to the models a caller
/// asked for. Models absent from the bucket project to an empty list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketView {
    pub bucket_id: String,
    pub records: BTreeMap<String, Vec<ExchangeRecord>>,
}

#[derive(Debug)]
struct Bucket {
    bucket_id: String,
    records: BTreeMap<String, Vec<ExchangeRecord>>,
}

#[derive(Debug)]
struct Lease {
    bucket: Bucket,
    expires_at_ms: u64,
}

/// Hands out at most one fresh materialization of "the next batch of
/// unscored records" per lease period, no matter how many consumers poll.
///
/// The whole read-check / fetch / mark / publish sequence runs under one
/// cache-wide lock. That is deliberate: correctness (no double
/// materialization) over per-model parallelism. Records are marked scored
/// before the lock releases, so a record handed out once can never appear
/// in a later materialization; a consumer that crashes mid-processing
/// forfeits its batch until the lease expires or `invalidate` is called.
///
/// Process-local. Replicated daemons each run an independent lease, which
/// can duplicate delivery across processes.
pub struct LeasedBucketCache<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ttl_ms: u64,
    page_size: usize,
    state: Mutex<Option<Lease>>,
}

impl<S: RecordStore> LeasedBucketCache<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, ttl: Duration, page_size: usize) -> Self {
        Self {
            store,
            clock,
            ttl_ms: ttl.as_millis() as u64,
            page_size,
            state: Mutex::new(None),
        }
    }

    /// Returns the live bucket projected to `models`, materializing a new
    /// one first if no live bucket exists. Concurrent callers block on the
    /// lock and are served the same bucket; none of them trigger a second
    /// materialization.
    pub fn fetch_batch(&self, models: &[String]) -> Result<BucketView, CacheError> {
        let mut state = self.state.lock();
        let now_ms = self.clock.now_ms();

        if let Some(lease) = state.as_ref() {
            if now_ms < lease.expires_at_ms {
                return Ok(project(&lease.bucket, models));
            }
        }

        // Expired or empty. Drop the old lease before materializing so a
        // storage failure leaves the cache Empty, never half-published.
        *state = None;
        let bucket = self.materialize(models)?;
        tracing::debug!(bucket_id = %bucket.bucket_id, models = ?models, "materialized bucket");
        let view = project(&bucket, models);
        // The lease starts when the bucket goes Live, not at lock entry; a
        // slow store round trip must not eat into the TTL.
        let live_at_ms = self.clock.now_ms();
        *state = Some(Lease {
            bucket,
            expires_at_ms: live_at_ms.saturating_add(self.ttl_ms),
        });
        Ok(view)
    }

    /// Drops the live bucket early. Escape hatch for the accepted failure
    /// mode where a consumer died mid-processing and its records would
    /// otherwise sit out the rest of the lease.
    pub fn invalidate(&self) {
        *self.state.lock() = None;
    }

    /// The live bucket's id, if a lease is currently running.
    pub fn live_bucket_id(&self) -> Option<String> {
        let state = self.state.lock();
        let lease = state.as_ref()?;
        if self.clock.now_ms() < lease.expires_at_ms {
            Some(lease.bucket.bucket_id.clone())
        } else {
            None
        }
    }

    fn materialize(&self, models: &[String]) -> Result<Bucket, CacheError> {
        let mut records = BTreeMap::new();
        for model in models {
            if records.contains_key(model) {
                continue;
            }
            let fetched = self.store.select_unscored(model, self.page_size)?;
            records.insert(model.clone(), fetched);
        }
        // Mark only after every select succeeded. Marking per model would
        // let a later select failure abort the materialization with earlier
        // models' rows already flipped scored yet never delivered. Marking
        // still happens inside the critical section, so a second
        // materialization can never re-fetch these rows.
        let ids: Vec<i64> = records.values().flatten().map(|r| r.id).collect();
        if !ids.is_empty() {
            self.store.mark_scored(&ids)?;
        }
        Ok(Bucket {
            bucket_id: fresh_bucket_id(),
            records,
        })
    }
}

fn project(bucket: &Bucket, models: &[String]) -> BucketView {
    let mut records = BTreeMap::new();
    for model in models {
        records.insert(
            model.clone(),
            bucket.records.get(model).cloned().unwrap_or_default(),
        );
    }
    BucketView {
        bucket_id: bucket.bucket_id.clone(),
        records,
    }
}

fn fresh_bucket_id() -> String {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(2 + BUCKET_ID_LEN);
    id.push_str("b_");
    for _ in 0..BUCKET_ID_LEN {
        let idx = rng.gen_range(0..BUCKET_ID_ALPHABET.len());
        id.push(BUCKET_ID_ALPHABET[idx] as char);
    }
    id
}
