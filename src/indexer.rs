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
//! # Deposit Indexer Module 🌉
//!
//! Drives the source ledger's deposit stream, validates each event, and
//! hands the survivors to the relayer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::Mutex;

use crate::adapters::SourceChain;
use crate::config::{BridgeLimitsConfig, BridgeRelayerConfig};
use crate::error::Error;
use crate::metric::Metrics;
use crate::probe;
use crate::relayer::Relayer;
use crate::store::BridgeStore;
use crate::types::DepositEvent;

/// The deposit indexer. Holds a per-boot set of seen tx hashes so a
/// re-delivered event is absorbed without touching the relayer; across
/// boots the relayer's upsert keeps publication idempotent.
pub struct DepositIndexer<S, A> {
    relayer: Arc<Relayer<S>>,
    source: A,
    addresses: Vec<String>,
    limits: BridgeLimitsConfig,
    retry_delay: Duration,
    seen: parking_lot::Mutex<HashSet<String>>,
    metrics: Arc<Mutex<Metrics>>,
}

impl<S, A> DepositIndexer<S, A>
where
    S: BridgeStore,
    A: SourceChain,
{
    /// Creates an indexer for the configured deposit addresses.
    pub fn new(
        relayer: Arc<Relayer<S>>,
        source: A,
        config: &BridgeRelayerConfig,
        metrics: Arc<Mutex<Metrics>>,
    ) -> Self {
        Self {
            relayer,
            source,
            addresses: config.source.deposit_addresses.clone(),
            limits: config.bridge.clone(),
            retry_delay: Duration::from_millis(config.security.retry_delay_ms),
            seen: parking_lot::Mutex::new(HashSet::new()),
            metrics,
        }
    }

    /// Runs the intake loop until an authentication failure. A broken
    /// stream is re-subscribed after the configured retry delay; the seen
    /// set carries over, so nothing is published twice within this boot.
    pub async fn run(&self) -> crate::Result<()> {
        let backoff = backoff::backoff::Constant::new(self.retry_delay);
        let task = || async {
            match self.watch_stream().await {
                Ok(()) => Ok(()),
                Err(e) if e.is_unauthorized() => {
                    tracing::error!(
                        error = %e,
                        "source ledger rejected our credentials; giving up"
                    );
                    Err(backoff::Error::permanent(e))
                }
                Err(e) => {
                    self.metrics.lock().await.source_watcher_back_off.inc();
                    tracing::warn!(
                        error = %e,
                        delay = ?self.retry_delay,
                        "deposit stream failed; re-subscribing after delay"
                    );
                    Err(backoff::Error::transient(e))
                }
            }
        };
        backoff::future::retry(backoff, task).await
    }

    async fn watch_stream(&self) -> crate::Result<()> {
        let mut deposits =
            self.source.watch_deposits(&self.addresses).await?;
        tracing::info!(
            target: probe::TARGET,
            kind = %probe::Kind::Sync,
            addresses = self.addresses.len(),
            "watching source deposit addresses"
        );
        while let Some(item) = deposits.next().await {
            self.process_event(item?).await?;
        }
        Err(Error::DepositStreamEnded)
    }

    /// Handles one decoded deposit event: dedup, validate, publish.
    pub async fn process_event(
        &self,
        event: DepositEvent,
    ) -> crate::Result<()> {
        self.metrics.lock().await.deposits_detected.inc();
        if self.seen.lock().contains(&event.tx_hash) {
            tracing::trace!(
                tx_hash = %event.tx_hash,
                "deposit already handled this boot; skipping"
            );
            return Ok(());
        }
        if let Err(e) = self.validate(&event) {
            tracing::warn!(
                tx_hash = %event.tx_hash,
                error = %e,
                "dropping invalid deposit"
            );
            self.metrics.lock().await.deposits_rejected.inc();
            return Ok(());
        }
        self.seen.lock().insert(event.tx_hash.clone());

        let tx_hash = event.tx_hash.clone();
        let block_slot = event.block_slot;
        let block_hash = event.block_hash.clone();
        match self.relayer.publish_deposit(event).await {
            Ok(receipt) => {
                self.metrics.lock().await.deposits_accepted.inc();
                tracing::debug!(
                    tx_hash = %tx_hash,
                    message_id = %receipt.message_id,
                    "deposit published"
                );
                // the watermark is a restart hint; events without block
                // info do not move it.
                if block_slot > 0 {
                    self.relayer.save_watermark(block_slot, &block_hash)?;
                }
                Ok(())
            }
            Err(e) => {
                // let a future re-delivery retry this deposit.
                self.seen.lock().remove(&tx_hash);
                Err(e)
            }
        }
    }

    fn validate(&self, event: &DepositEvent) -> crate::Result<()> {
        if event.amount < self.limits.min_deposit_amount as u128 {
            return Err(Error::InvalidDeposit {
                reason: format!(
                    "amount {} is below the minimum deposit of {}",
                    event.amount, self.limits.min_deposit_amount
                ),
            });
        }
        if event.amount > self.limits.max_transfer_amount as u128 {
            return Err(Error::InvalidDeposit {
                reason: format!(
                    "amount {} exceeds the transfer cap of {}",
                    event.amount, self.limits.max_transfer_amount
                ),
            });
        }
        if !self.limits.allowed_assets.contains(&event.asset_type) {
            return Err(Error::InvalidDeposit {
                reason: format!(
                    "asset {} is not on the allow list",
                    event.asset_type
                ),
            });
        }
        Ok(())
    }
}
