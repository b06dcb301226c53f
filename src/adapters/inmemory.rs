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
//! An in-process loopback ledger.
//!
//! [`InMemoryLedger`] implements the raw stream-client seam over plain
//! channels, and [`InMemoryAssembler`] stands in for the CBOR transaction
//! builder with a deterministic hash over the draft. Together they are the
//! `inmemory` provider: local runs and the test suite drive the whole
//! pipeline through them without any network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::stream::{self, BoxStream};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::Notify;

use super::types::{ConfirmationStage, MirrorDraft, SignedMirrorTx, TxEvent};
use super::{LedgerStreamClient, MirrorTxAssembler};
use crate::error::Error;

#[derive(Default)]
struct Inner {
    events: Mutex<VecDeque<crate::Result<TxEvent>>>,
    notify: Notify,
    submissions: Mutex<Vec<Vec<u8>>>,
    fail_submissions: AtomicU32,
}

/// A [`LedgerStreamClient`] backed by an in-process event queue. Injected
/// events are replayed to the watcher regardless of the watched address
/// set; the source adapter's own filtering takes care of the rest.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    inner: Arc<Inner>,
}

impl InMemoryLedger {
    /// Creates an empty loopback ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects a raw transaction event into the watch stream.
    pub fn push_event(&self, event: TxEvent) {
        self.inner.events.lock().push_back(Ok(event));
        self.inner.notify.notify_one();
    }

    /// Injects a stream error, as a network hiccup or an authentication
    /// rejection would surface it.
    pub fn push_error(&self, error: Error) {
        self.inner.events.lock().push_back(Err(error));
        self.inner.notify.notify_one();
    }

    /// Makes the next `count` submissions fail.
    pub fn fail_next_submissions(&self, count: u32) {
        self.inner
            .fail_submissions
            .store(count, Ordering::SeqCst);
    }

    /// Returns the CBOR payloads submitted so far.
    pub fn submissions(&self) -> Vec<Vec<u8>> {
        self.inner.submissions.lock().clone()
    }

    async fn next_event(inner: &Inner) -> crate::Result<TxEvent> {
        loop {
            if let Some(item) = inner.events.lock().pop_front() {
                return item;
            }
            inner.notify.notified().await;
        }
    }
}

#[async_trait::async_trait]
impl LedgerStreamClient for InMemoryLedger {
    async fn watch_txs(
        &self,
        _addresses: &[String],
    ) -> crate::Result<BoxStream<'static, crate::Result<TxEvent>>> {
        let inner = self.inner.clone();
        // the stream never ends on its own; it drains the queue and then
        // parks until the next injection.
        Ok(Box::pin(stream::unfold(inner, |inner| async move {
            let item = Self::next_event(&inner).await;
            Some((item, inner))
        })))
    }

    async fn submit_tx(&self, cbor: &[u8]) -> crate::Result<Vec<u8>> {
        if self.inner.fail_submissions.load(Ordering::SeqCst) > 0 {
            self.inner.fail_submissions.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::MirrorSubmit {
                reason: "injected submission failure".into(),
            });
        }
        self.inner.submissions.lock().push(cbor.to_vec());
        Ok(Sha256::digest(cbor).to_vec())
    }

    async fn wait_for_tx(
        &self,
        _tx_hash: &str,
    ) -> crate::Result<BoxStream<'static, crate::Result<ConfirmationStage>>>
    {
        Ok(Box::pin(stream::iter(vec![
            Ok(ConfirmationStage::Acknowledged),
            Ok(ConfirmationStage::Confirmed),
            Ok(ConfirmationStage::Finalized),
        ])))
    }
}

/// A [`MirrorTxAssembler`] that envelopes the draft as JSON and hashes it
/// with sha256. The hash is stable across re-assembly of the same draft,
/// matching what the real builder guarantees.
#[derive(Clone, Copy, Debug, Default)]
pub struct InMemoryAssembler;

#[async_trait::async_trait]
impl MirrorTxAssembler for InMemoryAssembler {
    async fn assemble(
        &self,
        draft: &MirrorDraft,
    ) -> crate::Result<SignedMirrorTx> {
        let cbor = serde_json::to_vec(draft)?;
        let hash = hex::encode(Sha256::digest(&cbor));
        Ok(SignedMirrorTx { hash, cbor })
    }
}
