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
//! # Bridge Store Module 🌉
//!
//! A module for managing the storage of the bridge.
//!
//! ## Overview
//!
//! The bridge store keeps the crash-safe record of processed deposits,
//! pending mirrors with their retry state, and the source-chain watermark.
//! Every mutation is durable before it returns, and the transition from
//! pending to processed happens inside one store transaction: that is the
//! boundary that makes mirror effects exactly-once.

use crate::types::{BridgeState, PendingMirror, ProcessedDeposit};

/// A module for managing in-memory storage of the bridge.
pub mod mem;
/// A module for setting up and managing a [Sled](https://sled.rs)-based
/// database.
pub mod sled;

/// A store that uses [`sled`](https://sled.rs) as the backend.
pub use self::sled::SledStore;
/// A store that uses in memory data structures as the backend.
pub use mem::InMemoryStore;

/// The durable record of the bridge. All mutations are keyed by the deposit
/// transaction hash; for any hash at most one of the pending and processed
/// rows exists at a time.
pub trait BridgeStore: Clone + Send + Sync {
    /// Upserts the terminal record of a deposit.
    fn add_processed_deposit(
        &self,
        processed: &ProcessedDeposit,
    ) -> crate::Result<()>;

    /// Upserts a pending mirror.
    fn add_pending_mirror(&self, pending: &PendingMirror)
        -> crate::Result<()>;

    /// Fetches a pending mirror by deposit tx hash.
    fn get_pending_mirror(
        &self,
        deposit_tx_hash: &str,
    ) -> crate::Result<Option<PendingMirror>>;

    /// Fetches a terminal record by deposit tx hash.
    fn get_processed_deposit(
        &self,
        deposit_tx_hash: &str,
    ) -> crate::Result<Option<ProcessedDeposit>>;

    /// Updates only the retry metadata of a pending mirror. Returns `false`
    /// without touching anything when no row exists for the hash.
    fn update_pending_mirror(
        &self,
        deposit_tx_hash: &str,
        retry_count: u32,
        last_retry_at: u64,
        error_message: Option<&str>,
    ) -> crate::Result<bool>;

    /// Deletes a pending mirror. Returns whether a row existed.
    fn remove_pending_mirror(
        &self,
        deposit_tx_hash: &str,
    ) -> crate::Result<bool>;

    /// Atomically removes the pending mirror and inserts the terminal
    /// record, in one transaction. Returns `false` and stores nothing when
    /// no pending row exists for the hash.
    fn promote_to_processed(
        &self,
        deposit_tx_hash: &str,
        processed: &ProcessedDeposit,
    ) -> crate::Result<bool>;

    /// Returns the full state snapshot. A fresh database yields empty
    /// collections and the genesis watermark.
    fn load_bridge_state(&self) -> crate::Result<BridgeState>;

    /// Records the last reliably observed source-chain position.
    fn save_watermark(&self, slot: u64, block_hash: &str)
        -> crate::Result<()>;

    /// Deletes terminal records older than the cutoff and returns how many
    /// were removed.
    fn prune_processed_before(&self, cutoff_ms: u64) -> crate::Result<usize>;

    /// Flushes any buffered writes to disk.
    fn flush(&self) -> crate::Result<()>;
}
