// Copyright (c) 2026 Epistula Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process-local counters, rendered as Prometheus text on `GET /metrics`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct TelemetryState {
    ingest_accepted_total: u64,
    ingest_rejected_total: u64,
    organics_requests_total: u64,
    auth_rejects_total: BTreeMap<String, u64>,
    storage_failures_total: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    state: Arc<Mutex<TelemetryState>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ingest_accepted(&self) {
        let mut state = self.state.lock();
        state.ingest_accepted_total = state.ingest_accepted_total.saturating_add(1);
    }

    pub fn record_ingest_rejected(&self) {
        let mut state = self.state.lock();
        state.ingest_rejected_total = state.ingest_rejected_total.saturating_add(1);
    }

    pub fn record_organics_request(&self) {
        let mut state = self.state.lock();
        state.organics_requests_total = state.organics_requests_total.saturating_add(1);
    }

    pub fn record_auth_reject(&self, reason: &str) {
        let mut state = self.state.lock();
        let count = state.auth_rejects_total.entry(reason.to_string()).or_insert(0);
        *count = count.saturating_add(1);
    }

    pub fn record_storage_failure(&self) {
        let mut state = self.state.lock();
        state.storage_failures_total = state.storage_failures_total.saturating_add(1);
    }

    pub fn render(&self) -> String {
        let state = self.state.lock();
        let mut out = String::new();
        let _ = writeln!(out, "# TYPE epistula_ingest_accepted_total counter");
        let _ = writeln!(
            out,
            "epistula_ingest_accepted_total {}",
            state.ingest_accepted_total
        );
        let _ = writeln!(out, "# TYPE epistula_ingest_rejected_total counter");
        let _ = writeln!(
            out,
            "epistula_ingest_rejected_total {}",
            state.ingest_rejected_total
        );
        let _ = writeln!(out, "# TYPE epistula_organics_requests_total counter");
        let _ = writeln!(
            out,
            "epistula_organics_requests_total {}",
            state.organics_requests_total
        );
        let _ = writeln!(out, "# TYPE epistula_auth_rejects_total counter");
        for (reason, count) in &state.auth_rejects_total {
            let _ = writeln!(
                out,
                "epistula_auth_rejects_total{{reason=\"{}\"}} {}",
                reason.replace('"', "'"),
                count
            );
        }
        let _ = writeln!(out, "# TYPE epistula_storage_failures_total counter");
        let _ = writeln!(
            out,
            "epistula_storage_failures_total {}",
            state.storage_failures_total
        );
        out
    }
}
