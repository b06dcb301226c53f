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
//! The bridge data model: deposit events, mirror state, and the persisted
//! bridge snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The largest integer that survives a JSON round-trip in every consumer of
/// the stored blobs. Amounts above this are serialized with the big-integer
/// sentinel.
pub const MAX_SAFE_JSON_INTEGER: u128 = (1 << 53) - 1;

/// Returns the current unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}

/// A value transfer observed on the source chain to one of the watched
/// addresses. Immutable once emitted by the indexer; `tx_hash` is the
/// primary key of the deposit within the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositEvent {
    /// Lowercase hex encoding of the source transaction id.
    pub tx_hash: String,
    /// Bech32 form of the first input's source address, or
    /// `"unknown_sender"` when it cannot be resolved.
    pub sender_address: String,
    /// Bech32 form of the watched output's address.
    pub recipient_address: String,
    /// Native value of the output in the smallest ledger unit.
    #[serde(with = "amount")]
    pub amount: u128,
    /// The asset carried by the deposit.
    pub asset_type: String,
    /// Slot of the enclosing block, or `0` when not attached to the event.
    pub block_slot: u64,
    /// Hash of the enclosing block, or `"unknown_block"`.
    pub block_hash: String,
    /// Index of the matching output within the transaction.
    pub output_index: u32,
    /// Flattened `{label -> value}` auxiliary metadata of the transaction.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// When the bridge observed the deposit, unix millis.
    pub timestamp: u64,
}

/// The mirroring state of a deposit. Monotonic per deposit, except that
/// `Failed` re-enters the retry pool as a new pending attempt until the
/// retry cap is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MirrorStatus {
    /// No status recorded.
    Unspecified,
    /// The bridge still owes a destination transaction.
    Pending,
    /// The mirror transaction was handed to the destination ledger.
    Submitted,
    /// The mirror transaction is confirmed on the destination ledger.
    Confirmed,
    /// The mirror attempt failed; terminal once the retry cap is reached.
    Failed,
}

/// A deposit the bridge still owes a destination transaction for. Exists in
/// the store iff no terminal decision has been reached; unique by
/// `deposit_tx_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMirror {
    /// The deposit this mirror settles.
    pub deposit_tx_hash: String,
    /// The full deposit event, kept so attempts can be rebuilt after a
    /// restart.
    pub deposit: DepositEvent,
    /// How many mirror attempts have failed so far.
    pub retry_count: u32,
    /// When the last attempt failed, unix millis. `0` before the first
    /// failure.
    pub last_retry_at: u64,
    /// The failure message of the last attempt.
    pub error_message: Option<String>,
}

impl PendingMirror {
    /// Creates a fresh pending mirror for the given deposit.
    pub fn new(deposit: DepositEvent) -> Self {
        Self {
            deposit_tx_hash: deposit.tx_hash.clone(),
            deposit,
            retry_count: 0,
            last_retry_at: 0,
            error_message: None,
        }
    }
}

/// The terminal record of a deposit: either mirrored successfully or given
/// up on after exhausting the retry budget. Unique by `deposit_tx_hash`,
/// retained for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDeposit {
    /// The deposit this record settles.
    pub deposit_tx_hash: String,
    /// When the terminal decision was reached, unix millis.
    pub processed_at: u64,
    /// The destination transaction hash, empty for failed deposits that
    /// never reached submission.
    pub mirror_tx_hash: String,
    /// `Confirmed` or terminal `Failed`.
    pub status: MirrorStatus,
}

/// The last source-chain position the bridge has reliably observed. A
/// restart hint only, never a correctness condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    /// The last processed slot.
    pub last_processed_slot: u64,
    /// The hash of the last processed block.
    pub last_processed_block_hash: String,
}

impl Default for Watermark {
    fn default() -> Self {
        Self {
            last_processed_slot: 0,
            last_processed_block_hash: "genesis".into(),
        }
    }
}

/// A full snapshot of the bridge state as loaded from the durable store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeState {
    /// Terminal deposits, keyed by deposit tx hash.
    pub processed_deposits: HashMap<String, ProcessedDeposit>,
    /// Deposits still owed a mirror, keyed by deposit tx hash.
    pub pending_mirrors: HashMap<String, PendingMirror>,
    /// The source-chain restart hint.
    pub watermark: Watermark,
}

/// Serde codec for deposit amounts.
///
/// Values above [`MAX_SAFE_JSON_INTEGER`] are written as the string
/// `"__BIGINT__<decimal>"` so the stored blobs round-trip losslessly for
/// any amount in `[0, 2^128)`, including through consumers that read JSON
/// numbers as doubles.
pub(crate) mod amount {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    const SENTINEL: &str = "__BIGINT__";

    pub fn serialize<S>(value: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if *value > super::MAX_SAFE_JSON_INTEGER {
            serializer.serialize_str(&format!("{}{}", SENTINEL, value))
        } else {
            serializer.serialize_u64(*value as u64)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = u128;

            fn expecting(
                &self,
                formatter: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                formatter.write_str(
                    "an unsigned integer or a __BIGINT__-tagged decimal string",
                )
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v as u128)
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u128::try_from(v).map_err(|_| {
                    E::custom(format!("negative deposit amount: {}", v))
                })
            }

            fn visit_u128<E>(self, v: u128) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v)
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let digits = v.strip_prefix(SENTINEL).unwrap_or(v);
                digits.parse::<u128>().map_err(|e| {
                    E::custom(format!("invalid deposit amount {}: {}", v, e))
                })
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}
