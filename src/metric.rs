// Copyright 2024 Vista Labs Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use prometheus::core::{AtomicF64, GenericCounter, GenericGauge};
use prometheus::{register_counter, register_gauge, Encoder, TextEncoder};

/// A struct definition for collecting metrics in the bridge relay.
#[derive(Debug, Clone)]
pub struct Metrics {
    /// Deposit events decoded from the source stream.
    pub deposits_detected: GenericCounter<AtomicF64>,
    /// Deposits that passed validation and were published.
    pub deposits_accepted: GenericCounter<AtomicF64>,
    /// Deposits dropped by validation.
    pub deposits_rejected: GenericCounter<AtomicF64>,
    /// Mirror transactions handed to the destination ledger.
    pub mirrors_submitted: GenericCounter<AtomicF64>,
    /// Mirror transactions confirmed on the destination ledger.
    pub mirrors_confirmed: GenericCounter<AtomicF64>,
    /// Mirror attempts that failed.
    pub mirrors_failed: GenericCounter<AtomicF64>,
    /// Deposits currently awaiting a mirror.
    pub pending_mirrors: GenericGauge<AtomicF64>,
    /// How many times the source watcher backed off.
    pub source_watcher_back_off: GenericCounter<AtomicF64>,
    /// How many times the mirror worker backed off.
    pub mirror_worker_back_off: GenericCounter<AtomicF64>,
}

impl Metrics {
    /// Instantiates the various metrics and their counters, and registers
    /// them with the process-wide registry.
    pub fn new() -> crate::Result<Self> {
        let deposits_detected = register_counter!(
            "bridge_deposits_detected",
            "The total number of deposit events decoded from the source stream"
        )?;

        let deposits_accepted = register_counter!(
            "bridge_deposits_accepted",
            "The total number of deposits accepted and published"
        )?;

        let deposits_rejected = register_counter!(
            "bridge_deposits_rejected",
            "The total number of deposits dropped by validation"
        )?;

        let mirrors_submitted = register_counter!(
            "bridge_mirrors_submitted",
            "The total number of mirror transactions submitted"
        )?;

        let mirrors_confirmed = register_counter!(
            "bridge_mirrors_confirmed",
            "The total number of mirror transactions confirmed"
        )?;

        let mirrors_failed = register_counter!(
            "bridge_mirrors_failed",
            "The total number of failed mirror attempts"
        )?;

        let pending_mirrors = register_gauge!(
            "bridge_pending_mirrors",
            "The number of deposits currently awaiting a mirror"
        )?;

        let source_watcher_back_off = register_counter!(
            "bridge_source_watcher_back_off",
            "How many times the source deposit watcher backed off"
        )?;

        let mirror_worker_back_off = register_counter!(
            "bridge_mirror_worker_back_off",
            "How many times the mirror worker backed off"
        )?;

        Ok(Self {
            deposits_detected,
            deposits_accepted,
            deposits_rejected,
            mirrors_submitted,
            mirrors_confirmed,
            mirrors_failed,
            pending_mirrors,
            source_watcher_back_off,
            mirror_worker_back_off,
        })
    }

    /// Gathers the whole bridge metrics in the prometheus text format.
    pub fn gather_metrics() -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        // Gather the metrics.
        let metric_families = prometheus::gather();
        // Encode them to send.
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
