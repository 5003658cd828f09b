// Copyright (c) 2026 Epistula Contributors
// SPDX-License-Identifier: Apache-2.0

//! epistula-core
//!
//! The bucket protocol: a leased batch-dequeue cache that hands out a
//! consistent, non-overlapping slice of not-yet-scored records to polling
//! scoring consumers. One materialization per lease, records marked
//! consumed at materialization time, identical re-delivery to retried polls
//! within the lease window.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod bucket;
pub mod clock;
pub mod record;

pub use crate::bucket::{BucketView, CacheError, LeasedBucketCache};
pub use crate::clock::{Clock, SystemClock};
pub use crate::record::{ExchangeRecord, RecordStore, StoreError};
