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
//! # Ledger Adapter Module 🌉
//!
//! The capability seams between the bridge core and the two ledgers.
//!
//! ## Overview
//!
//! The bridge core never talks to a ledger SDK directly. It consumes two
//! capability sets: [`SourceChain`] (watch deposits) and
//! [`DestinationChain`] (build, submit, confirm mirrors). Below those sit
//! the seams the embedding SDKs plug into: [`LedgerStreamClient`] wraps the
//! streaming/submission RPC surface and [`MirrorTxAssembler`] wraps the
//! CBOR transaction builder. Implementations are substitutable variants;
//! [`inmemory`] ships a loopback pair used by local runs and the test
//! suite.

use futures::stream::BoxStream;

use crate::types::DepositEvent;

/// A module for the in-memory loopback ledger.
pub mod inmemory;
/// The raw wire model of the ledger streaming RPC.
pub mod types;

mod destination;
mod source;

pub use destination::StreamingDestination;
pub use source::{StreamingSource, NATIVE_ASSET, UNKNOWN_BLOCK, UNKNOWN_SENDER};

use types::{ConfirmationStage, MirrorDraft, SignedMirrorTx, TxEvent};

/// The source-ledger capability set: an infinite stream of decoded deposit
/// events for a set of watched addresses. The stream ends only on an
/// unrecoverable authentication failure; transient errors are passed
/// through as items so the caller can back off and re-subscribe.
#[async_trait::async_trait]
pub trait SourceChain: Send + Sync {
    /// Watches the given addresses and yields one [`DepositEvent`] per
    /// matching output of every applied transaction, in ledger order.
    async fn watch_deposits(
        &self,
        addresses: &[String],
    ) -> crate::Result<BoxStream<'static, crate::Result<DepositEvent>>>;
}

/// The destination-ledger capability set: build and sign a mirror
/// transaction, submit it, and await its confirmation.
#[async_trait::async_trait]
pub trait DestinationChain: Send + Sync {
    /// Assembles and signs a mirror transaction. The returned hash is
    /// computed before any submission happens.
    async fn build_mirror(
        &self,
        draft: MirrorDraft,
    ) -> crate::Result<SignedMirrorTx>;

    /// Submits a signed mirror transaction and returns the hash the ledger
    /// reports, which is authoritative.
    async fn submit(&self, tx: &SignedMirrorTx) -> crate::Result<String>;

    /// Awaits the given number of confirmation stages for a submitted
    /// transaction.
    async fn await_confirmation(
        &self,
        tx_hash: &str,
        required: u32,
    ) -> crate::Result<()>;
}

/// The seam the embedding streaming SDK plugs into: raw per-address
/// transaction events, CBOR submission, and confirmation tracking.
/// Authentication (the `dmtr-api-key` header) is owned by the
/// implementation and surfaces here only as the
/// [`Unauthorized`](crate::Error::Unauthorized) error class.
#[async_trait::async_trait]
pub trait LedgerStreamClient: Send + Sync {
    /// Streams raw transaction events for the given addresses.
    async fn watch_txs(
        &self,
        addresses: &[String],
    ) -> crate::Result<BoxStream<'static, crate::Result<TxEvent>>>;

    /// Submits a CBOR-encoded transaction and returns its id bytes.
    async fn submit_tx(&self, cbor: &[u8]) -> crate::Result<Vec<u8>>;

    /// Streams the confirmation stages of a submitted transaction.
    async fn wait_for_tx(
        &self,
        tx_hash: &str,
    ) -> crate::Result<BoxStream<'static, crate::Result<ConfirmationStage>>>;
}

/// The seam the embedding CBOR transaction builder plugs into. One call
/// covers the whole pay-to-address, attach-metadata, sign, and hash
/// pipeline; the signing key lives behind the implementation.
#[async_trait::async_trait]
pub trait MirrorTxAssembler: Send + Sync {
    /// Builds and signs a transaction for the draft, returning its hash and
    /// CBOR bytes.
    async fn assemble(
        &self,
        draft: &MirrorDraft,
    ) -> crate::Result<SignedMirrorTx>;
}
