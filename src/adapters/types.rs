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
//! The raw wire model of the ledger streaming RPC, as handed over by the
//! embedding SDK before any bridge-level decoding.

use serde::Serialize;

/// The two kinds of events the per-address transaction stream emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAction {
    /// A new transaction entered the ledger.
    Apply,
    /// A previously applied transaction was rolled back.
    Undo,
}

/// One event drawn from the per-address transaction stream.
#[derive(Debug, Clone)]
pub struct TxEvent {
    /// Whether the transaction is being applied or rolled back.
    pub action: TxAction,
    /// The transaction body.
    pub tx: ChainTx,
    /// The enclosing block, when the stream attaches it to the event.
    pub block: Option<BlockRef>,
}

/// A transaction as the stream client delivers it.
#[derive(Debug, Clone, Default)]
pub struct ChainTx {
    /// The raw transaction id bytes.
    pub hash: Vec<u8>,
    /// The transaction inputs, with their source outputs resolved when the
    /// stream can do so.
    pub inputs: Vec<TxInput>,
    /// The transaction outputs.
    pub outputs: Vec<TxOutput>,
    /// Auxiliary metadata entries attached to the transaction.
    pub metadata: Vec<AuxMetadata>,
}

/// A transaction input.
#[derive(Debug, Clone, Default)]
pub struct TxInput {
    /// The output this input spends, when resolvable.
    pub as_output: Option<TxOutput>,
}

/// A transaction output.
#[derive(Debug, Clone)]
pub struct TxOutput {
    /// The bech32 form of the output address.
    pub address: String,
    /// The native value of the output in the smallest ledger unit.
    pub coin: u64,
}

/// One auxiliary metadata entry.
#[derive(Debug, Clone)]
pub struct AuxMetadata {
    /// The metadata label.
    pub label: u64,
    /// The metadata payload.
    pub value: MetadataValue,
}

/// The payload cases of an auxiliary metadata entry.
#[derive(Debug, Clone)]
pub enum MetadataValue {
    /// A text value.
    Text(String),
    /// An integer value.
    Int(i128),
    /// A byte-string value.
    Bytes(Vec<u8>),
    /// A composite (map or list) value.
    Composite(serde_json::Value),
}

/// A block position reference.
#[derive(Debug, Clone)]
pub struct BlockRef {
    /// The slot of the block.
    pub slot: u64,
    /// The hash of the block, lowercase hex.
    pub hash: String,
}

/// The stages reported while awaiting a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStage {
    /// The ledger accepted the transaction into its mempool.
    Acknowledged,
    /// The transaction is included in a block.
    Confirmed,
    /// The transaction can no longer be rolled back.
    Finalized,
}

/// A mirror transaction draft handed to the assembler seam: one payment
/// output plus one metadata entry.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorDraft {
    /// The destination address of the payment output.
    pub pay_to_address: String,
    /// The native value of the payment output.
    pub amount: u64,
    /// The label of the attached metadata entry.
    pub metadata_label: u64,
    /// The metadata payload.
    pub metadata: serde_json::Value,
}

/// A signed, submit-ready mirror transaction. The hash is known before
/// submission, which is what makes submission retries idempotent.
#[derive(Debug, Clone)]
pub struct SignedMirrorTx {
    /// The transaction hash, lowercase hex.
    pub hash: String,
    /// The CBOR bytes to submit.
    pub cbor: Vec<u8>,
}
