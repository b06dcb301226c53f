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

use futures::StreamExt;

use super::types::{ConfirmationStage, MirrorDraft, SignedMirrorTx};
use super::{DestinationChain, LedgerStreamClient, MirrorTxAssembler};
use crate::error::Error;

/// A [`DestinationChain`] that assembles mirror transactions through a
/// [`MirrorTxAssembler`] and moves them through a [`LedgerStreamClient`].
pub struct StreamingDestination<A, C> {
    assembler: A,
    client: C,
}

impl<A, C> StreamingDestination<A, C> {
    /// Creates a destination adapter over the given assembler and client.
    pub fn new(assembler: A, client: C) -> Self {
        Self { assembler, client }
    }
}

#[async_trait::async_trait]
impl<A, C> DestinationChain for StreamingDestination<A, C>
where
    A: MirrorTxAssembler,
    C: LedgerStreamClient,
{
    async fn build_mirror(
        &self,
        draft: MirrorDraft,
    ) -> crate::Result<SignedMirrorTx> {
        self.assembler.assemble(&draft).await
    }

    #[tracing::instrument(skip_all, fields(tx_hash = %tx.hash))]
    async fn submit(&self, tx: &SignedMirrorTx) -> crate::Result<String> {
        let returned = self.client.submit_tx(&tx.cbor).await?;
        let returned_hash = hex::encode(returned);
        if returned_hash != tx.hash {
            // the ledger's hash is authoritative.
            tracing::warn!(
                signed = %tx.hash,
                returned = %returned_hash,
                "ledger reported a different mirror tx hash"
            );
        }
        Ok(returned_hash)
    }

    #[tracing::instrument(skip(self))]
    async fn await_confirmation(
        &self,
        tx_hash: &str,
        required: u32,
    ) -> crate::Result<()> {
        let mut stages = self.client.wait_for_tx(tx_hash).await?;
        let mut confirmed = 0u32;
        while let Some(stage) = stages.next().await {
            match stage? {
                ConfirmationStage::Acknowledged => {
                    tracing::trace!("mirror tx acknowledged");
                }
                ConfirmationStage::Confirmed => {
                    confirmed += 1;
                    if confirmed >= required.max(1) {
                        return Ok(());
                    }
                }
                ConfirmationStage::Finalized => return Ok(()),
            }
        }
        Err(Error::MirrorSubmit {
            reason: format!(
                "confirmation stream for {} ended after {} of {} stages",
                tx_hash, confirmed, required
            ),
        })
    }
}
