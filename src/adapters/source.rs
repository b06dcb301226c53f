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

use std::collections::{HashMap, HashSet};

use futures::stream::{self, BoxStream};
use futures::StreamExt;

use super::types::{AuxMetadata, MetadataValue, TxAction, TxEvent};
use super::{LedgerStreamClient, SourceChain};
use crate::types::{now_ms, DepositEvent};

/// The sender recorded when the first input's source address cannot be
/// resolved.
pub const UNKNOWN_SENDER: &str = "unknown_sender";
/// The block hash recorded when the stream does not attach block info to
/// the event.
pub const UNKNOWN_BLOCK: &str = "unknown_block";
/// The asset symbol of the native coin.
pub const NATIVE_ASSET: &str = "ADA";

/// A [`SourceChain`] over a raw [`LedgerStreamClient`]: filters the
/// transaction stream down to applied transactions paying a watched
/// address and decodes each matching output into a [`DepositEvent`].
///
/// Decoding never kills the stream: entries that cannot be represented are
/// dropped, and only errors surfaced by the client itself (transient or
/// authentication) reach the consumer.
pub struct StreamingSource<C> {
    client: C,
}

impl<C> StreamingSource<C> {
    /// Creates a source adapter over the given stream client.
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl<C: LedgerStreamClient> SourceChain for StreamingSource<C> {
    async fn watch_deposits(
        &self,
        addresses: &[String],
    ) -> crate::Result<BoxStream<'static, crate::Result<DepositEvent>>> {
        let watched: HashSet<String> = addresses.iter().cloned().collect();
        let raw = self.client.watch_txs(addresses).await?;
        let deposits = raw.flat_map(move |item| match item {
            Ok(event) => stream::iter(
                decode_deposit_events(event, &watched)
                    .into_iter()
                    .map(Ok)
                    .collect::<Vec<_>>(),
            ),
            Err(e) => stream::iter(vec![Err(e)]),
        });
        Ok(Box::pin(deposits))
    }
}

/// Decodes one stream event into the deposit events it carries: one per
/// output paying a watched address, in ledger order. Rollback events decode
/// to nothing.
pub fn decode_deposit_events(
    event: TxEvent,
    watched: &HashSet<String>,
) -> Vec<DepositEvent> {
    if event.action != TxAction::Apply {
        return Vec::new();
    }
    let tx_hash = hex::encode(&event.tx.hash);
    let sender_address = event
        .tx
        .inputs
        .first()
        .and_then(|input| input.as_output.as_ref())
        .map(|output| output.address.clone())
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
    let (block_slot, block_hash) = match event.block {
        Some(block) => (block.slot, block.hash),
        None => (0, UNKNOWN_BLOCK.to_string()),
    };
    let metadata = flatten_metadata(&event.tx.metadata);
    event
        .tx
        .outputs
        .iter()
        .enumerate()
        .filter(|(_, output)| watched.contains(&output.address))
        .map(|(index, output)| DepositEvent {
            tx_hash: tx_hash.clone(),
            sender_address: sender_address.clone(),
            recipient_address: output.address.clone(),
            amount: output.coin as u128,
            asset_type: NATIVE_ASSET.to_string(),
            block_slot,
            block_hash: block_hash.clone(),
            output_index: index as u32,
            metadata: metadata.clone(),
            timestamp: now_ms(),
        })
        .collect()
}

/// Flattens the auxiliary metadata into a `{label -> value}` string map.
/// Text passes through, integers are stringified, bytes are UTF-8 decoded,
/// composites are JSON-encoded. Non-representable entries are dropped
/// silently.
fn flatten_metadata(entries: &[AuxMetadata]) -> HashMap<String, String> {
    let mut flattened = HashMap::new();
    for entry in entries {
        let value = match &entry.value {
            MetadataValue::Text(text) => Some(text.clone()),
            MetadataValue::Int(int) => Some(int.to_string()),
            MetadataValue::Bytes(bytes) => {
                String::from_utf8(bytes.clone()).ok()
            }
            MetadataValue::Composite(composite) => {
                serde_json::to_string(composite).ok()
            }
        };
        match value {
            Some(value) => {
                flattened.insert(entry.label.to_string(), value);
            }
            None => tracing::trace!(
                label = entry.label,
                "dropping non-representable metadata entry"
            ),
        }
    }
    flattened
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::types::{BlockRef, ChainTx, TxInput, TxOutput};

    const WATCHED: &str = "addr1watched";
    const SENDER: &str = "addr1sender";

    fn watched() -> HashSet<String> {
        [WATCHED.to_string()].into_iter().collect()
    }

    fn apply_event(outputs: Vec<TxOutput>) -> TxEvent {
        TxEvent {
            action: TxAction::Apply,
            tx: ChainTx {
                hash: vec![0xaa; 32],
                inputs: vec![TxInput {
                    as_output: Some(TxOutput {
                        address: SENDER.into(),
                        coin: 9_000_000,
                    }),
                }],
                outputs,
                metadata: Vec::new(),
            },
            block: Some(BlockRef {
                slot: 1234,
                hash: "ff".repeat(32),
            }),
        }
    }

    #[test]
    fn rollback_events_decode_to_nothing() {
        let mut event = apply_event(vec![TxOutput {
            address: WATCHED.into(),
            coin: 5_000_000,
        }]);
        event.action = TxAction::Undo;
        assert!(decode_deposit_events(event, &watched()).is_empty());
    }

    #[test]
    fn one_deposit_per_matching_output() {
        let event = apply_event(vec![
            TxOutput {
                address: "addr1change".into(),
                coin: 1_000_000,
            },
            TxOutput {
                address: WATCHED.into(),
                coin: 5_000_000,
            },
            TxOutput {
                address: WATCHED.into(),
                coin: 7_000_000,
            },
        ]);
        let deposits = decode_deposit_events(event, &watched());
        assert_eq!(deposits.len(), 2);
        assert_eq!(deposits[0].tx_hash, "aa".repeat(32));
        assert_eq!(deposits[0].sender_address, SENDER);
        assert_eq!(deposits[0].recipient_address, WATCHED);
        assert_eq!(deposits[0].amount, 5_000_000);
        assert_eq!(deposits[0].asset_type, NATIVE_ASSET);
        assert_eq!(deposits[0].output_index, 1);
        assert_eq!(deposits[0].block_slot, 1234);
        assert_eq!(deposits[1].amount, 7_000_000);
        assert_eq!(deposits[1].output_index, 2);
    }

    #[test]
    fn unresolvable_senders_fall_back_to_the_marker() {
        let mut event = apply_event(vec![TxOutput {
            address: WATCHED.into(),
            coin: 5_000_000,
        }]);
        event.tx.inputs = vec![TxInput { as_output: None }];
        event.block = None;
        let deposits = decode_deposit_events(event, &watched());
        assert_eq!(deposits[0].sender_address, UNKNOWN_SENDER);
        assert_eq!(deposits[0].block_slot, 0);
        assert_eq!(deposits[0].block_hash, UNKNOWN_BLOCK);
    }

    #[test]
    fn metadata_flattens_by_case() {
        let entries = vec![
            AuxMetadata {
                label: 674,
                value: MetadataValue::Text("hello".into()),
            },
            AuxMetadata {
                label: 1,
                value: MetadataValue::Int(-42),
            },
            AuxMetadata {
                label: 2,
                value: MetadataValue::Bytes(b"utf8 ok".to_vec()),
            },
            AuxMetadata {
                label: 3,
                value: MetadataValue::Bytes(vec![0xff, 0xfe]),
            },
            AuxMetadata {
                label: 4,
                value: MetadataValue::Composite(serde_json::json!({
                    "k": [1, 2]
                })),
            },
        ];
        let flattened = flatten_metadata(&entries);
        assert_eq!(flattened["674"], "hello");
        assert_eq!(flattened["1"], "-42");
        assert_eq!(flattened["2"], "utf8 ok");
        assert!(!flattened.contains_key("3"));
        assert_eq!(flattened["4"], r#"{"k":[1,2]}"#);
    }
}
