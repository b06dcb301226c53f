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
//! # Mirror Worker Module 🌉
//!
//! Settles pending deposits by issuing the destination-side transaction
//! that returns the funds, net of the bridge fee, to the depositor.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};

use crate::adapters::types::MirrorDraft;
use crate::adapters::DestinationChain;
use crate::config::BridgeRelayerConfig;
use crate::error::Error;
use crate::metric::Metrics;
use crate::probe;
use crate::relayer::Relayer;
use crate::store::BridgeStore;
use crate::types::{now_ms, DepositEvent, MirrorStatus};

/// The metadata label mirror transactions are tagged with.
pub const MIRROR_METADATA_LABEL: u64 = 1337;
/// The bridge version recorded in the mirror metadata.
pub const BRIDGE_VERSION: &str = "1.0.0";
/// The human-readable marker in the mirror metadata.
const MIRROR_MESSAGE: &str = "VISTA Bridge: Mirroring deposit";
/// Smallest value a destination output may carry. Deposits whose net
/// amount does not clear this are failed without a submission attempt.
const MIN_MIRROR_OUTPUT: u64 = 1_000_000;
/// How often the worker sweeps the store for pending deposits.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
/// How many mirrors one sweep builds in parallel.
const MAX_CONCURRENT_MIRRORS: usize = 3;

/// The mirror worker. Fed by the relayer's live subscription and by a
/// periodic sweep over the stored pending mirrors, so deposits survive
/// both a missed channel delivery and a process restart.
pub struct MirrorWorker<S, D> {
    relayer: Arc<Relayer<S>>,
    destination: D,
    sender_address: String,
    fee_amount: u64,
    required_confirmations: u32,
    retry_attempts: u32,
    deposit_rx: Mutex<mpsc::UnboundedReceiver<DepositEvent>>,
    metrics: Arc<Mutex<Metrics>>,
}

impl<S, D> MirrorWorker<S, D>
where
    S: BridgeStore,
    D: DestinationChain,
{
    /// Creates the worker and takes the relayer's deposit subscription.
    /// The first configured sender address pays the mirrors.
    pub fn new(
        relayer: Arc<Relayer<S>>,
        destination: D,
        config: &BridgeRelayerConfig,
        metrics: Arc<Mutex<Metrics>>,
    ) -> crate::Result<Self> {
        let deposit_rx = relayer.subscribe_to_deposits()?;
        let sender_address = config
            .destination
            .sender_addresses
            .first()
            .cloned()
            .ok_or(Error::Generic(
                "no destination sender addresses configured",
            ))?;
        Ok(Self {
            relayer,
            destination,
            sender_address,
            fee_amount: config.bridge.fee_amount,
            required_confirmations: config.security.required_confirmations,
            retry_attempts: config.security.retry_attempts,
            deposit_rx: Mutex::new(deposit_rx),
            metrics,
        })
    }

    /// Runs the worker forever. Crashes of the work loop (a closed channel,
    /// a store failure inside a sweep) restart it with an exponential
    /// backoff; failures of individual mirror attempts never get here, they
    /// are recorded on the pending mirror and retried data-driven.
    pub async fn run(&self) -> crate::Result<()> {
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: None,
            ..Default::default()
        };
        let task = || async {
            let e = match self.work().await {
                Err(e) => e,
                Ok(never) => return Ok(never),
            };
            self.metrics.lock().await.mirror_worker_back_off.inc();
            tracing::error!(error = %e, "mirror worker crashed; restarting");
            Err(backoff::Error::transient(e))
        };
        backoff::future::retry(backoff, task).await
    }

    async fn work(&self) -> crate::Result<()> {
        let mut deposits = self.deposit_rx.lock().await;
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(
            tokio::time::MissedTickBehavior::Delay,
        );
        loop {
            tokio::select! {
                maybe = deposits.recv() => match maybe {
                    Some(event) => {
                        if let Err(e) = self.mirror_deposit(&event).await {
                            tracing::error!(
                                deposit = %event.tx_hash,
                                error = %e,
                                "mirror attempt failed"
                            );
                        }
                    }
                    None => {
                        return Err(Error::Generic(
                            "deposit subscription closed",
                        ))
                    }
                },
                _ = sweep.tick() => self.sweep().await?,
            }
        }
    }

    /// One pass over the stored pending mirrors, with a bounded pool.
    async fn sweep(&self) -> crate::Result<()> {
        let pending = self
            .relayer
            .get_pending_deposits_for_retry(self.retry_attempts)?;
        if pending.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = pending.len(), "sweeping pending mirrors");
        futures::stream::iter(pending)
            .for_each_concurrent(MAX_CONCURRENT_MIRRORS, |mirror| async move {
                if let Err(e) = self.mirror_deposit(&mirror.deposit).await {
                    tracing::error!(
                        deposit = %mirror.deposit_tx_hash,
                        error = %e,
                        "mirror attempt failed"
                    );
                }
            })
            .await;
        Ok(())
    }

    /// Mirrors one deposit and reports the outcome to the relayer. A
    /// deposit whose pending mirror was settled concurrently degrades to a
    /// no-op, because the relayer refuses the status update.
    pub async fn mirror_deposit(
        &self,
        deposit: &DepositEvent,
    ) -> crate::Result<()> {
        match self.try_mirror(deposit).await {
            Ok(mirror_tx_hash) => {
                let existed = self
                    .relayer
                    .update_mirror_status(
                        &deposit.tx_hash,
                        &mirror_tx_hash,
                        MirrorStatus::Confirmed,
                        None,
                    )
                    .await?;
                if existed {
                    self.metrics.lock().await.mirrors_confirmed.inc();
                    tracing::info!(
                        target: probe::TARGET,
                        kind = %probe::Kind::MirrorTx,
                        deposit = %deposit.tx_hash,
                        mirror = %mirror_tx_hash,
                        "mirror confirmed"
                    );
                }
                Ok(())
            }
            Err(e) => {
                self.metrics.lock().await.mirrors_failed.inc();
                let recorded = self
                    .relayer
                    .update_mirror_status(
                        &deposit.tx_hash,
                        "",
                        MirrorStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await?;
                if recorded {
                    Err(e)
                } else {
                    // settled by a concurrent attempt; nothing to record.
                    Ok(())
                }
            }
        }
    }

    async fn try_mirror(
        &self,
        deposit: &DepositEvent,
    ) -> crate::Result<String> {
        let net = self.net_amount(deposit.amount)?;
        let draft = MirrorDraft {
            pay_to_address: deposit.sender_address.clone(),
            amount: net,
            metadata_label: MIRROR_METADATA_LABEL,
            metadata: serde_json::json!({
                "msg": [MIRROR_MESSAGE, deposit.tx_hash],
                "originalTx": deposit.tx_hash,
                "bridgeVersion": BRIDGE_VERSION,
                "timestamp": now_ms(),
            }),
        };
        tracing::debug!(
            deposit = %deposit.tx_hash,
            sender = %self.sender_address,
            recipient = %draft.pay_to_address,
            net,
            "building mirror transaction"
        );
        let signed = self.destination.build_mirror(draft).await?;
        self.metrics.lock().await.mirrors_submitted.inc();
        let mirror_tx_hash = self.destination.submit(&signed).await?;
        self.destination
            .await_confirmation(&mirror_tx_hash, self.required_confirmations)
            .await?;
        Ok(mirror_tx_hash)
    }

    fn net_amount(&self, amount: u128) -> crate::Result<u64> {
        let net = amount.saturating_sub(self.fee_amount as u128);
        if net <= MIN_MIRROR_OUTPUT as u128 {
            return Err(Error::MirrorBuild {
                reason: "insufficient after fee".into(),
            });
        }
        u64::try_from(net).map_err(|_| Error::MirrorBuild {
            reason: "net amount exceeds the destination transfer width"
                .into(),
        })
    }
}
