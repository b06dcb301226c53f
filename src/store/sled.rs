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

use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;

use super::BridgeStore;
use crate::types::{BridgeState, PendingMirror, ProcessedDeposit};

/// Tree holding the terminal deposit records, keyed by deposit tx hash.
const PROCESSED_TREE: &str = "processed_deposits";
/// Tree holding the pending mirrors, keyed by deposit tx hash.
const PENDING_TREE: &str = "pending_mirrors";
/// Tree holding bridge-wide key/value state, such as the watermark.
const CONFIG_TREE: &str = "bridge_config";

const WATERMARK_SLOT_KEY: &str = "lastProcessedSlot";
const WATERMARK_HASH_KEY: &str = "lastProcessedBlockHash";

/// A [`BridgeStore`] over a local [Sled](https://sled.rs) database. Rows are
/// serde_json blobs; the big-integer sentinel in the deposit codec keeps
/// amounts lossless through the blob column.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Opens a persistent database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let db = sled::Config::new().path(path).open()?;
        Ok(Self { db })
    }

    /// Creates a temporary database that is removed when the process exits.
    pub fn temporary() -> crate::Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn tree(&self, name: &str) -> crate::Result<sled::Tree> {
        self.db.open_tree(name).map_err(Into::into)
    }
}

impl BridgeStore for SledStore {
    #[tracing::instrument(
        skip_all,
        fields(deposit = %processed.deposit_tx_hash)
    )]
    fn add_processed_deposit(
        &self,
        processed: &ProcessedDeposit,
    ) -> crate::Result<()> {
        let tree = self.tree(PROCESSED_TREE)?;
        tree.insert(
            processed.deposit_tx_hash.as_bytes(),
            serde_json::to_vec(processed)?,
        )?;
        self.db.flush()?;
        Ok(())
    }

    #[tracing::instrument(
        skip_all,
        fields(deposit = %pending.deposit_tx_hash)
    )]
    fn add_pending_mirror(
        &self,
        pending: &PendingMirror,
    ) -> crate::Result<()> {
        let tree = self.tree(PENDING_TREE)?;
        tree.insert(
            pending.deposit_tx_hash.as_bytes(),
            serde_json::to_vec(pending)?,
        )?;
        // a deposit must be on disk before any subscriber can see it.
        self.db.flush()?;
        Ok(())
    }

    fn get_pending_mirror(
        &self,
        deposit_tx_hash: &str,
    ) -> crate::Result<Option<PendingMirror>> {
        let tree = self.tree(PENDING_TREE)?;
        match tree.get(deposit_tx_hash.as_bytes())? {
            Some(blob) => Ok(Some(serde_json::from_slice(&blob)?)),
            None => Ok(None),
        }
    }

    fn get_processed_deposit(
        &self,
        deposit_tx_hash: &str,
    ) -> crate::Result<Option<ProcessedDeposit>> {
        let tree = self.tree(PROCESSED_TREE)?;
        match tree.get(deposit_tx_hash.as_bytes())? {
            Some(blob) => Ok(Some(serde_json::from_slice(&blob)?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, error_message))]
    fn update_pending_mirror(
        &self,
        deposit_tx_hash: &str,
        retry_count: u32,
        last_retry_at: u64,
        error_message: Option<&str>,
    ) -> crate::Result<bool> {
        let tree = self.tree(PENDING_TREE)?;
        let mut pending: PendingMirror =
            match tree.get(deposit_tx_hash.as_bytes())? {
                Some(blob) => serde_json::from_slice(&blob)?,
                None => {
                    tracing::warn!(
                        "No pending mirror for {}; nothing to update",
                        deposit_tx_hash
                    );
                    return Ok(false);
                }
            };
        pending.retry_count = retry_count;
        pending.last_retry_at = last_retry_at;
        pending.error_message = error_message.map(String::from);
        tree.insert(
            deposit_tx_hash.as_bytes(),
            serde_json::to_vec(&pending)?,
        )?;
        self.db.flush()?;
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    fn remove_pending_mirror(
        &self,
        deposit_tx_hash: &str,
    ) -> crate::Result<bool> {
        let tree = self.tree(PENDING_TREE)?;
        let existed = tree.remove(deposit_tx_hash.as_bytes())?.is_some();
        self.db.flush()?;
        Ok(existed)
    }

    #[tracing::instrument(
        skip_all,
        fields(deposit = %deposit_tx_hash, status = ?processed.status)
    )]
    fn promote_to_processed(
        &self,
        deposit_tx_hash: &str,
        processed: &ProcessedDeposit,
    ) -> crate::Result<bool> {
        let pending_tree = self.tree(PENDING_TREE)?;
        let processed_tree = self.tree(PROCESSED_TREE)?;
        let blob = serde_json::to_vec(processed)?;
        // both trees move in one transaction, so a crash can never leave a
        // deposit both pending and processed.
        let result = (&pending_tree, &processed_tree).transaction(
            |(pending, processed)| {
                match pending.remove(deposit_tx_hash.as_bytes())? {
                    Some(_) => {
                        processed.insert(
                            deposit_tx_hash.as_bytes(),
                            blob.clone(),
                        )?;
                        Ok(())
                    }
                    None => Err(ConflictableTransactionError::Abort(())),
                }
            },
        );
        match result {
            Ok(()) => {
                self.db.flush()?;
                Ok(true)
            }
            Err(TransactionError::Abort(())) => Ok(false),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    fn load_bridge_state(&self) -> crate::Result<BridgeState> {
        let mut state = BridgeState::default();
        for row in self.tree(PROCESSED_TREE)?.iter() {
            let (_, blob) = row?;
            let processed: ProcessedDeposit = serde_json::from_slice(&blob)?;
            state
                .processed_deposits
                .insert(processed.deposit_tx_hash.clone(), processed);
        }
        for row in self.tree(PENDING_TREE)?.iter() {
            let (_, blob) = row?;
            let pending: PendingMirror = serde_json::from_slice(&blob)?;
            state
                .pending_mirrors
                .insert(pending.deposit_tx_hash.clone(), pending);
        }
        let config = self.tree(CONFIG_TREE)?;
        // the watermark is a restart hint only; unreadable values fall back
        // to genesis.
        if let Some(slot) = config.get(WATERMARK_SLOT_KEY)? {
            state.watermark.last_processed_slot =
                std::str::from_utf8(&slot)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
        }
        if let Some(hash) = config.get(WATERMARK_HASH_KEY)? {
            if let Ok(hash) = std::str::from_utf8(&hash) {
                state.watermark.last_processed_block_hash = hash.to_string();
            }
        }
        Ok(state)
    }

    #[tracing::instrument(skip(self))]
    fn save_watermark(
        &self,
        slot: u64,
        block_hash: &str,
    ) -> crate::Result<()> {
        let tree = self.tree(CONFIG_TREE)?;
        let mut batch = sled::Batch::default();
        batch.insert(WATERMARK_SLOT_KEY, slot.to_string().as_bytes());
        batch.insert(WATERMARK_HASH_KEY, block_hash.as_bytes());
        tree.apply_batch(batch)?;
        Ok(())
    }

    fn prune_processed_before(&self, cutoff_ms: u64) -> crate::Result<usize> {
        let tree = self.tree(PROCESSED_TREE)?;
        let mut stale = Vec::new();
        for row in tree.iter() {
            let (key, blob) = row?;
            let processed: ProcessedDeposit = serde_json::from_slice(&blob)?;
            if processed.processed_at < cutoff_ms {
                stale.push(key);
            }
        }
        let removed = stale.len();
        for key in stale {
            tree.remove(key)?;
        }
        Ok(removed)
    }

    fn flush(&self) -> crate::Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MirrorStatus, Watermark};
    use std::collections::HashMap;

    fn deposit(tx_hash: &str, amount: u128) -> crate::types::DepositEvent {
        crate::types::DepositEvent {
            tx_hash: tx_hash.into(),
            sender_address: "addr1sender".into(),
            recipient_address: "addr1watched".into(),
            amount,
            asset_type: "ADA".into(),
            block_slot: 7,
            block_hash: "cc".repeat(32),
            output_index: 0,
            metadata: HashMap::new(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn a_fresh_database_loads_an_empty_state() {
        let store = SledStore::temporary().unwrap();
        let state = store.load_bridge_state().unwrap();
        assert!(state.processed_deposits.is_empty());
        assert!(state.pending_mirrors.is_empty());
        assert_eq!(state.watermark, Watermark::default());
    }

    #[test]
    fn pending_mirrors_upsert_by_deposit_hash() {
        let store = SledStore::temporary().unwrap();
        let hash = "aa".repeat(32);
        let first = PendingMirror::new(deposit(&hash, 5_000_000));
        store.add_pending_mirror(&first).unwrap();
        // a re-delivery upserts the same row instead of duplicating it.
        store.add_pending_mirror(&first).unwrap();
        let state = store.load_bridge_state().unwrap();
        assert_eq!(state.pending_mirrors.len(), 1);
        assert_eq!(
            store.get_pending_mirror(&hash).unwrap().unwrap(),
            first
        );
    }

    #[test]
    fn promotion_moves_the_deposit_in_one_step() {
        let store = SledStore::temporary().unwrap();
        let hash = "aa".repeat(32);
        store
            .add_pending_mirror(&PendingMirror::new(deposit(&hash, 5_000_000)))
            .unwrap();
        let processed = ProcessedDeposit {
            deposit_tx_hash: hash.clone(),
            processed_at: 1_700_000_000_000,
            mirror_tx_hash: "bb".repeat(32),
            status: MirrorStatus::Confirmed,
        };
        assert!(store.promote_to_processed(&hash, &processed).unwrap());

        let state = store.load_bridge_state().unwrap();
        assert!(state.pending_mirrors.is_empty());
        assert_eq!(state.processed_deposits.len(), 1);

        // a second promotion finds no pending row and stores nothing new.
        assert!(!store.promote_to_processed(&hash, &processed).unwrap());
    }

    #[test]
    fn updating_a_missing_pending_mirror_reports_false() {
        let store = SledStore::temporary().unwrap();
        let updated = store
            .update_pending_mirror("deadbeef", 1, 123, Some("boom"))
            .unwrap();
        assert!(!updated);
    }

    #[test]
    fn retry_metadata_updates_in_place() {
        let store = SledStore::temporary().unwrap();
        let hash = "aa".repeat(32);
        store
            .add_pending_mirror(&PendingMirror::new(deposit(&hash, 5_000_000)))
            .unwrap();
        assert!(store
            .update_pending_mirror(&hash, 2, 456, Some("submit timed out"))
            .unwrap());
        let pending = store.get_pending_mirror(&hash).unwrap().unwrap();
        assert_eq!(pending.retry_count, 2);
        assert_eq!(pending.last_retry_at, 456);
        assert_eq!(pending.error_message.as_deref(), Some("submit timed out"));
        // the deposit payload is untouched.
        assert_eq!(pending.deposit.amount, 5_000_000);
    }

    #[test]
    fn watermark_round_trips() {
        let store = SledStore::temporary().unwrap();
        store.save_watermark(42_000, "dd00").unwrap();
        let state = store.load_bridge_state().unwrap();
        assert_eq!(state.watermark.last_processed_slot, 42_000);
        assert_eq!(state.watermark.last_processed_block_hash, "dd00");
    }

    #[test]
    fn pruning_removes_only_old_records() {
        let store = SledStore::temporary().unwrap();
        for (hash, processed_at) in [("01", 1_000u64), ("02", 2_000)] {
            store
                .add_processed_deposit(&ProcessedDeposit {
                    deposit_tx_hash: hash.repeat(32),
                    processed_at,
                    mirror_tx_hash: String::new(),
                    status: MirrorStatus::Failed,
                })
                .unwrap();
        }
        assert_eq!(store.prune_processed_before(1_500).unwrap(), 1);
        let state = store.load_bridge_state().unwrap();
        assert_eq!(state.processed_deposits.len(), 1);
        assert!(state.processed_deposits.contains_key(&"02".repeat(32)));
    }
}
