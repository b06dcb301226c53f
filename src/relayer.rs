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
//! # Relayer Module 🌉
//!
//! The state broker of the bridge.
//!
//! ## Overview
//!
//! The relayer owns the durable store and is the single publication point
//! for deposits. A published deposit is persisted as a pending mirror
//! before any subscriber can see it; the transition to its terminal record
//! happens in one store transaction. All mutations are linearized behind
//! one write lock, so concurrent callers observe the store as if there were
//! a single writer.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::store::BridgeStore;
use crate::types::{
    now_ms, BridgeState, DepositEvent, MirrorStatus, PendingMirror,
    ProcessedDeposit,
};

/// The outcome of publishing a deposit.
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    /// Whether the deposit was accepted.
    pub success: bool,
    /// A deterministic id for log correlation, derived from the deposit tx
    /// hash and a local monotonic counter.
    pub message_id: String,
}

/// The bridge state broker. Generic over the [`BridgeStore`] backend.
pub struct Relayer<S> {
    store: S,
    retry_attempts: u32,
    deposit_tx: mpsc::UnboundedSender<DepositEvent>,
    deposit_rx:
        parking_lot::Mutex<Option<mpsc::UnboundedReceiver<DepositEvent>>>,
    write_guard: tokio::sync::Mutex<()>,
    message_counter: AtomicU64,
    last_mirror_tx: parking_lot::RwLock<Option<String>>,
}

impl<S: BridgeStore> Relayer<S> {
    /// Creates a relayer over the given store and re-emits every pending
    /// mirror that survived the previous run onto the subscriber channel,
    /// so the mirror worker resumes them without waiting for a sweep.
    pub fn new(store: S, retry_attempts: u32) -> crate::Result<Self> {
        let (deposit_tx, deposit_rx) = mpsc::unbounded_channel();
        let relayer = Self {
            store,
            retry_attempts,
            deposit_tx,
            deposit_rx: parking_lot::Mutex::new(Some(deposit_rx)),
            write_guard: tokio::sync::Mutex::new(()),
            message_counter: AtomicU64::new(0),
            last_mirror_tx: parking_lot::RwLock::new(None),
        };
        relayer.resume()?;
        Ok(relayer)
    }

    fn resume(&self) -> crate::Result<()> {
        let state = self.store.load_bridge_state()?;
        if state.pending_mirrors.is_empty() {
            return Ok(());
        }
        tracing::info!(
            count = state.pending_mirrors.len(),
            "re-emitting pending mirrors from a previous run"
        );
        let mut survivors: Vec<PendingMirror> =
            state.pending_mirrors.into_values().collect();
        survivors.sort_by_key(|pending| pending.last_retry_at);
        for pending in survivors {
            // the receiver still lives inside this relayer, the send cannot
            // fail.
            let _ = self.deposit_tx.send(pending.deposit);
        }
        Ok(())
    }

    /// Persists a pending mirror for the deposit, then offers it to the
    /// subscriber channel. Idempotent by deposit tx hash: a re-delivery
    /// upserts the same row, and a deposit that already reached its
    /// terminal record is not resurrected.
    pub async fn publish_deposit(
        &self,
        event: DepositEvent,
    ) -> crate::Result<PublishReceipt> {
        let _guard = self.write_guard.lock().await;
        let message_id = self.next_message_id(&event.tx_hash);
        if self
            .store
            .get_processed_deposit(&event.tx_hash)?
            .is_some()
        {
            tracing::debug!(
                tx_hash = %event.tx_hash,
                "deposit already settled; not publishing again"
            );
            return Ok(PublishReceipt {
                success: true,
                message_id,
            });
        }
        let pending = PendingMirror::new(event.clone());
        self.store.add_pending_mirror(&pending)?;
        tracing::debug!(
            tx_hash = %event.tx_hash,
            %message_id,
            "pending mirror persisted"
        );
        self.deposit_tx
            .send(event)
            .map_err(|_| crate::Error::SubscriberGone)?;
        Ok(PublishReceipt {
            success: true,
            message_id,
        })
    }

    /// Takes the single-consumer FIFO of published deposits. Fails on the
    /// second call.
    pub fn subscribe_to_deposits(
        &self,
    ) -> crate::Result<mpsc::UnboundedReceiver<DepositEvent>> {
        self.deposit_rx
            .lock()
            .take()
            .ok_or(crate::Error::AlreadySubscribed)
    }

    /// Records the outcome of a mirror attempt.
    ///
    /// `Confirmed` atomically promotes the pending mirror to its terminal
    /// record. `Failed` bumps the retry counter, promoting to a terminal
    /// failure once the configured retry budget is spent. Returns whether a
    /// matching pending mirror existed, so concurrent duplicate attempts
    /// degrade to no-ops.
    pub async fn update_mirror_status(
        &self,
        deposit_tx_hash: &str,
        mirror_tx_hash: &str,
        status: MirrorStatus,
        error_message: Option<&str>,
    ) -> crate::Result<bool> {
        let _guard = self.write_guard.lock().await;
        match status {
            MirrorStatus::Confirmed => {
                let processed = ProcessedDeposit {
                    deposit_tx_hash: deposit_tx_hash.to_string(),
                    processed_at: now_ms(),
                    mirror_tx_hash: mirror_tx_hash.to_string(),
                    status: MirrorStatus::Confirmed,
                };
                let existed = self
                    .store
                    .promote_to_processed(deposit_tx_hash, &processed)?;
                if existed {
                    *self.last_mirror_tx.write() =
                        Some(mirror_tx_hash.to_string());
                    tracing::info!(
                        deposit = %deposit_tx_hash,
                        mirror = %mirror_tx_hash,
                        "deposit mirrored"
                    );
                } else {
                    tracing::debug!(
                        deposit = %deposit_tx_hash,
                        "no pending mirror to confirm; ignoring"
                    );
                }
                Ok(existed)
            }
            MirrorStatus::Failed => {
                let pending =
                    match self.store.get_pending_mirror(deposit_tx_hash)? {
                        Some(pending) => pending,
                        None => {
                            tracing::debug!(
                                deposit = %deposit_tx_hash,
                                "no pending mirror to fail; ignoring"
                            );
                            return Ok(false);
                        }
                    };
                let retry_count = pending.retry_count + 1;
                if retry_count >= self.retry_attempts {
                    let processed = ProcessedDeposit {
                        deposit_tx_hash: deposit_tx_hash.to_string(),
                        processed_at: now_ms(),
                        mirror_tx_hash: mirror_tx_hash.to_string(),
                        status: MirrorStatus::Failed,
                    };
                    self.store
                        .promote_to_processed(deposit_tx_hash, &processed)?;
                    tracing::warn!(
                        deposit = %deposit_tx_hash,
                        attempts = retry_count,
                        error = error_message.unwrap_or("unknown"),
                        "retry budget spent; giving up on deposit"
                    );
                } else {
                    self.store.update_pending_mirror(
                        deposit_tx_hash,
                        retry_count,
                        now_ms(),
                        error_message,
                    )?;
                    tracing::warn!(
                        deposit = %deposit_tx_hash,
                        attempt = retry_count,
                        error = error_message.unwrap_or("unknown"),
                        "mirror attempt failed; deposit stays pending"
                    );
                }
                Ok(true)
            }
            other => {
                tracing::warn!(
                    deposit = %deposit_tx_hash,
                    status = ?other,
                    "unsupported mirror status update; ignoring"
                );
                Ok(false)
            }
        }
    }

    /// Returns the full bridge state snapshot.
    pub fn get_bridge_state(&self) -> crate::Result<BridgeState> {
        self.store.load_bridge_state()
    }

    /// Returns every deposit still awaiting a mirror, oldest retry first.
    pub fn get_pending_deposits(&self) -> crate::Result<Vec<PendingMirror>> {
        let state = self.store.load_bridge_state()?;
        let mut pending: Vec<PendingMirror> =
            state.pending_mirrors.into_values().collect();
        pending.sort_by_key(|mirror| mirror.last_retry_at);
        Ok(pending)
    }

    /// Returns the pending deposits that still have retry budget left.
    pub fn get_pending_deposits_for_retry(
        &self,
        max_retries: u32,
    ) -> crate::Result<Vec<PendingMirror>> {
        let mut pending = self.get_pending_deposits()?;
        pending.retain(|mirror| mirror.retry_count < max_retries);
        Ok(pending)
    }

    /// Records the last reliably observed source-chain position.
    pub fn save_watermark(
        &self,
        slot: u64,
        block_hash: &str,
    ) -> crate::Result<()> {
        self.store.save_watermark(slot, block_hash)
    }

    /// Flushes the store to disk.
    pub fn persist_state(&self) -> crate::Result<()> {
        self.store.flush()
    }

    /// Removes terminal records older than `max_age_ms`. Administrative;
    /// nothing in the bridge calls this on a timer.
    pub async fn cleanup_old_deposits(
        &self,
        max_age_ms: u64,
    ) -> crate::Result<usize> {
        let _guard = self.write_guard.lock().await;
        let cutoff = now_ms().saturating_sub(max_age_ms);
        let removed = self.store.prune_processed_before(cutoff)?;
        if removed > 0 {
            tracing::info!(removed, "pruned old processed deposits");
        }
        Ok(removed)
    }

    /// The hash of the most recently confirmed mirror transaction, for the
    /// status report.
    pub fn last_mirror_tx(&self) -> Option<String> {
        self.last_mirror_tx.read().clone()
    }

    fn next_message_id(&self, tx_hash: &str) -> String {
        let seq = self.message_counter.fetch_add(1, Ordering::Relaxed);
        let prefix = &tx_hash[..tx_hash.len().min(16)];
        format!("{}-{}", prefix, seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::collections::HashMap;

    fn deposit(tx_hash: &str) -> DepositEvent {
        DepositEvent {
            tx_hash: tx_hash.into(),
            sender_address: "addr1sender".into(),
            recipient_address: "addr1watched".into(),
            amount: 5_000_000,
            asset_type: "ADA".into(),
            block_slot: 10,
            block_hash: "ee".repeat(32),
            output_index: 0,
            metadata: HashMap::new(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn a_published_deposit_is_durable_before_it_is_visible() {
        let store = InMemoryStore::default();
        let relayer = Relayer::new(store.clone(), 3).unwrap();
        let mut rx = relayer.subscribe_to_deposits().unwrap();

        let hash = "aa".repeat(32);
        let receipt =
            relayer.publish_deposit(deposit(&hash)).await.unwrap();
        assert!(receipt.success);
        assert!(receipt.message_id.starts_with(&hash[..16]));

        // pending row first, channel second.
        assert!(store.get_pending_mirror(&hash).unwrap().is_some());
        let observed = rx.recv().await.unwrap();
        assert_eq!(observed.tx_hash, hash);
    }

    #[tokio::test]
    async fn publishing_twice_keeps_one_pending_row() {
        let relayer =
            Relayer::new(InMemoryStore::default(), 3).unwrap();
        let hash = "aa".repeat(32);
        relayer.publish_deposit(deposit(&hash)).await.unwrap();
        relayer.publish_deposit(deposit(&hash)).await.unwrap();
        let state = relayer.get_bridge_state().unwrap();
        assert_eq!(state.pending_mirrors.len(), 1);
        assert!(state.processed_deposits.is_empty());
    }

    #[tokio::test]
    async fn a_settled_deposit_is_not_resurrected() {
        let relayer =
            Relayer::new(InMemoryStore::default(), 3).unwrap();
        let hash = "aa".repeat(32);
        relayer.publish_deposit(deposit(&hash)).await.unwrap();
        relayer
            .update_mirror_status(
                &hash,
                &"bb".repeat(32),
                MirrorStatus::Confirmed,
                None,
            )
            .await
            .unwrap();

        relayer.publish_deposit(deposit(&hash)).await.unwrap();
        let state = relayer.get_bridge_state().unwrap();
        assert!(state.pending_mirrors.is_empty());
        assert_eq!(state.processed_deposits.len(), 1);
    }

    #[tokio::test]
    async fn confirming_moves_the_deposit_to_its_terminal_record() {
        let relayer =
            Relayer::new(InMemoryStore::default(), 3).unwrap();
        let hash = "aa".repeat(32);
        let mirror = "bb".repeat(32);
        relayer.publish_deposit(deposit(&hash)).await.unwrap();

        let existed = relayer
            .update_mirror_status(
                &hash,
                &mirror,
                MirrorStatus::Confirmed,
                None,
            )
            .await
            .unwrap();
        assert!(existed);
        assert_eq!(relayer.last_mirror_tx().as_deref(), Some(mirror.as_str()));

        let state = relayer.get_bridge_state().unwrap();
        assert!(state.pending_mirrors.is_empty());
        let processed = &state.processed_deposits[&hash];
        assert_eq!(processed.status, MirrorStatus::Confirmed);
        assert_eq!(processed.mirror_tx_hash, mirror);

        // duplicate confirmation is a no-op.
        let existed = relayer
            .update_mirror_status(
                &hash,
                &mirror,
                MirrorStatus::Confirmed,
                None,
            )
            .await
            .unwrap();
        assert!(!existed);
    }

    #[tokio::test]
    async fn failures_spend_the_retry_budget_then_turn_terminal() {
        let relayer =
            Relayer::new(InMemoryStore::default(), 2).unwrap();
        let hash = "aa".repeat(32);
        relayer.publish_deposit(deposit(&hash)).await.unwrap();

        let existed = relayer
            .update_mirror_status(
                &hash,
                "",
                MirrorStatus::Failed,
                Some("submit timed out"),
            )
            .await
            .unwrap();
        assert!(existed);
        let pending = relayer.get_pending_deposits().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, 1);
        assert_eq!(
            pending[0].error_message.as_deref(),
            Some("submit timed out")
        );
        assert_eq!(
            relayer.get_pending_deposits_for_retry(2).unwrap().len(),
            1
        );

        relayer
            .update_mirror_status(&hash, "", MirrorStatus::Failed, None)
            .await
            .unwrap();
        let state = relayer.get_bridge_state().unwrap();
        assert!(state.pending_mirrors.is_empty());
        assert_eq!(
            state.processed_deposits[&hash].status,
            MirrorStatus::Failed
        );
        assert!(relayer
            .get_pending_deposits_for_retry(2)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn surviving_pending_mirrors_are_re_emitted_on_boot() {
        let store = InMemoryStore::default();
        {
            let relayer = Relayer::new(store.clone(), 3).unwrap();
            relayer
                .publish_deposit(deposit(&"aa".repeat(32)))
                .await
                .unwrap();
        }
        // a new relayer over the same store stands in for a process
        // restart.
        let relayer = Relayer::new(store, 3).unwrap();
        let mut rx = relayer.subscribe_to_deposits().unwrap();
        let resumed = rx.recv().await.unwrap();
        assert_eq!(resumed.tx_hash, "aa".repeat(32));
    }

    #[tokio::test]
    async fn cleanup_prunes_only_aged_records() {
        let store = InMemoryStore::default();
        store
            .add_processed_deposit(&ProcessedDeposit {
                deposit_tx_hash: "old".into(),
                processed_at: 0,
                mirror_tx_hash: String::new(),
                status: MirrorStatus::Failed,
            })
            .unwrap();
        let relayer = Relayer::new(store, 3).unwrap();
        let removed = relayer.cleanup_old_deposits(60_000).await.unwrap();
        assert_eq!(removed, 1);
        assert!(relayer
            .get_bridge_state()
            .unwrap()
            .processed_deposits
            .is_empty());
    }
}
