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

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::BridgeStore;
use crate::types::{BridgeState, PendingMirror, ProcessedDeposit, Watermark};

#[derive(Default)]
struct MemState {
    processed: HashMap<String, ProcessedDeposit>,
    pending: HashMap<String, PendingMirror>,
    watermark: Option<Watermark>,
}

/// InMemoryStore is a [`BridgeStore`] over plain in-memory maps. It offers
/// the same atomicity as the sled store (one lock guards both tables) but
/// no durability, which makes it the store of choice for tests.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<MemState>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl BridgeStore for InMemoryStore {
    fn add_processed_deposit(
        &self,
        processed: &ProcessedDeposit,
    ) -> crate::Result<()> {
        let mut guard = self.inner.write();
        guard
            .processed
            .insert(processed.deposit_tx_hash.clone(), processed.clone());
        Ok(())
    }

    fn add_pending_mirror(
        &self,
        pending: &PendingMirror,
    ) -> crate::Result<()> {
        let mut guard = self.inner.write();
        guard
            .pending
            .insert(pending.deposit_tx_hash.clone(), pending.clone());
        Ok(())
    }

    fn get_pending_mirror(
        &self,
        deposit_tx_hash: &str,
    ) -> crate::Result<Option<PendingMirror>> {
        Ok(self.inner.read().pending.get(deposit_tx_hash).cloned())
    }

    fn get_processed_deposit(
        &self,
        deposit_tx_hash: &str,
    ) -> crate::Result<Option<ProcessedDeposit>> {
        Ok(self.inner.read().processed.get(deposit_tx_hash).cloned())
    }

    fn update_pending_mirror(
        &self,
        deposit_tx_hash: &str,
        retry_count: u32,
        last_retry_at: u64,
        error_message: Option<&str>,
    ) -> crate::Result<bool> {
        let mut guard = self.inner.write();
        match guard.pending.get_mut(deposit_tx_hash) {
            Some(pending) => {
                pending.retry_count = retry_count;
                pending.last_retry_at = last_retry_at;
                pending.error_message = error_message.map(String::from);
                Ok(true)
            }
            None => {
                tracing::warn!(
                    "No pending mirror for {}; nothing to update",
                    deposit_tx_hash
                );
                Ok(false)
            }
        }
    }

    fn remove_pending_mirror(
        &self,
        deposit_tx_hash: &str,
    ) -> crate::Result<bool> {
        let mut guard = self.inner.write();
        Ok(guard.pending.remove(deposit_tx_hash).is_some())
    }

    fn promote_to_processed(
        &self,
        deposit_tx_hash: &str,
        processed: &ProcessedDeposit,
    ) -> crate::Result<bool> {
        let mut guard = self.inner.write();
        if guard.pending.remove(deposit_tx_hash).is_none() {
            return Ok(false);
        }
        guard
            .processed
            .insert(deposit_tx_hash.to_string(), processed.clone());
        Ok(true)
    }

    fn load_bridge_state(&self) -> crate::Result<BridgeState> {
        let guard = self.inner.read();
        Ok(BridgeState {
            processed_deposits: guard.processed.clone(),
            pending_mirrors: guard.pending.clone(),
            watermark: guard.watermark.clone().unwrap_or_default(),
        })
    }

    fn save_watermark(
        &self,
        slot: u64,
        block_hash: &str,
    ) -> crate::Result<()> {
        let mut guard = self.inner.write();
        guard.watermark = Some(Watermark {
            last_processed_slot: slot,
            last_processed_block_hash: block_hash.to_string(),
        });
        Ok(())
    }

    fn prune_processed_before(&self, cutoff_ms: u64) -> crate::Result<usize> {
        let mut guard = self.inner.write();
        let before = guard.processed.len();
        guard
            .processed
            .retain(|_, processed| processed.processed_at >= cutoff_ms);
        Ok(before - guard.processed.len())
    }

    fn flush(&self) -> crate::Result<()> {
        Ok(())
    }
}
