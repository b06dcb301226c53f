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
//! End-to-end bridge flows over the in-memory loopback ledger.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use sha2::Digest;
use tokio::sync::Mutex;

use vista_bridge::adapters::inmemory::{InMemoryAssembler, InMemoryLedger};
use vista_bridge::adapters::types::{
    BlockRef, ChainTx, TxAction, TxEvent, TxInput, TxOutput,
};
use vista_bridge::adapters::{StreamingDestination, StreamingSource};
use vista_bridge::config::{
    BridgeLimitsConfig, BridgeRelayerConfig, DestinationConfig,
    SecurityConfig, SourceConfig,
};
use vista_bridge::indexer::DepositIndexer;
use vista_bridge::metric::Metrics;
use vista_bridge::mirror::MirrorWorker;
use vista_bridge::relayer::Relayer;
use vista_bridge::store::{BridgeStore, InMemoryStore, SledStore};
use vista_bridge::types::{DepositEvent, MirrorStatus};

const WATCHED: &str = "addr1watched";
const SENDER: &str = "addr1depositor";

/// The process-wide metrics registry tolerates exactly one registration,
/// so every test shares one instance.
fn metrics() -> Arc<Mutex<Metrics>> {
    static METRICS: OnceLock<Arc<Mutex<Metrics>>> = OnceLock::new();
    METRICS
        .get_or_init(|| Arc::new(Mutex::new(Metrics::new().unwrap())))
        .clone()
}

fn test_config(retry_attempts: u32) -> BridgeRelayerConfig {
    BridgeRelayerConfig {
        port: 0,
        source: SourceConfig {
            network_name: "inmemory".into(),
            utxorpc_url: "http://localhost:50051".parse().unwrap(),
            utxorpc_api_key: None,
            deposit_addresses: vec![WATCHED.into()],
        },
        destination: DestinationConfig {
            network_name: "inmemory".into(),
            utxorpc_url: "http://localhost:50052".parse().unwrap(),
            utxorpc_api_key: None,
            lucid_provider: "inmemory".into(),
            lucid_network: "Preview".into(),
            sender_addresses: vec!["addr1bridgewallet".into()],
            sender_wallet_seed: None,
        },
        bridge: BridgeLimitsConfig {
            allowed_assets: vec!["ADA".into()],
            min_deposit_amount: 2_000_000,
            max_transfer_amount: 100_000_000_000,
            fee_amount: 1_000_000,
        },
        security: SecurityConfig {
            required_confirmations: 1,
            retry_attempts,
            retry_delay_ms: 50,
        },
    }
}

fn apply_event(hash_byte: u8, coin: u64) -> TxEvent {
    TxEvent {
        action: TxAction::Apply,
        tx: ChainTx {
            hash: vec![hash_byte; 32],
            inputs: vec![TxInput {
                as_output: Some(TxOutput {
                    address: SENDER.into(),
                    coin: coin + 2_000_000,
                }),
            }],
            outputs: vec![TxOutput {
                address: WATCHED.into(),
                coin,
            }],
            metadata: Vec::new(),
        },
        block: Some(BlockRef {
            slot: 900,
            hash: "0f".repeat(32),
        }),
    }
}

fn deposit_event(tx_hash: &str, amount: u128, asset: &str) -> DepositEvent {
    DepositEvent {
        tx_hash: tx_hash.into(),
        sender_address: SENDER.into(),
        recipient_address: WATCHED.into(),
        amount,
        asset_type: asset.into(),
        block_slot: 900,
        block_hash: "0f".repeat(32),
        output_index: 0,
        metadata: HashMap::new(),
        timestamp: 1_700_000_000_000,
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let poll = async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), poll)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

#[tokio::test]
async fn a_single_deposit_flows_from_stream_to_confirmed_mirror() {
    let store = InMemoryStore::default();
    let config = test_config(3);
    let relayer = Arc::new(Relayer::new(store.clone(), 3).unwrap());
    let ledger = InMemoryLedger::new();
    let worker = MirrorWorker::new(
        relayer.clone(),
        StreamingDestination::new(InMemoryAssembler, ledger.clone()),
        &config,
        metrics(),
    )
    .unwrap();
    let indexer = DepositIndexer::new(
        relayer.clone(),
        StreamingSource::new(ledger.clone()),
        &config,
        metrics(),
    );
    tokio::task::spawn(async move { indexer.run().await });

    ledger.push_event(apply_event(0xaa, 5_000_000));
    let deposit_hash = "aa".repeat(32);
    {
        let store = store.clone();
        let deposit_hash = deposit_hash.clone();
        wait_for("the pending mirror", move || {
            store.get_pending_mirror(&deposit_hash).unwrap().is_some()
        })
        .await;
    }
    let pending = store.get_pending_mirror(&deposit_hash).unwrap().unwrap();
    assert_eq!(pending.retry_count, 0);
    assert_eq!(pending.deposit.amount, 5_000_000);
    assert_eq!(pending.deposit.sender_address, SENDER);

    worker.mirror_deposit(&pending.deposit).await.unwrap();

    // exactly one destination transaction went out, paying the depositor
    // the net amount under the bridge metadata label.
    let submissions = ledger.submissions();
    assert_eq!(submissions.len(), 1);
    let draft: serde_json::Value =
        serde_json::from_slice(&submissions[0]).unwrap();
    assert_eq!(draft["pay_to_address"], SENDER);
    assert_eq!(draft["amount"], 4_000_000);
    assert_eq!(draft["metadata_label"], 1337);
    assert_eq!(draft["metadata"]["originalTx"], deposit_hash);
    assert_eq!(draft["metadata"]["bridgeVersion"], "1.0.0");
    assert_eq!(draft["metadata"]["msg"][1], deposit_hash);

    let state = relayer.get_bridge_state().unwrap();
    assert!(state.pending_mirrors.is_empty());
    let processed = &state.processed_deposits[&deposit_hash];
    assert_eq!(processed.status, MirrorStatus::Confirmed);
    assert_eq!(
        processed.mirror_tx_hash,
        hex::encode(sha2::Sha256::digest(&submissions[0])),
        "the ledger-reported hash is recorded"
    );
    // the watermark followed the deposit's block.
    assert_eq!(state.watermark.last_processed_slot, 900);
}

#[tokio::test]
async fn deposits_below_the_minimum_never_reach_the_store() {
    let store = InMemoryStore::default();
    let config = test_config(3);
    let relayer = Arc::new(Relayer::new(store.clone(), 3).unwrap());
    let ledger = InMemoryLedger::new();
    let indexer = DepositIndexer::new(
        relayer.clone(),
        StreamingSource::new(ledger.clone()),
        &config,
        metrics(),
    );

    indexer
        .process_event(deposit_event(&"ab".repeat(32), 1_500_000, "ADA"))
        .await
        .unwrap();

    let state = relayer.get_bridge_state().unwrap();
    assert!(state.pending_mirrors.is_empty());
    assert!(state.processed_deposits.is_empty());
    assert!(ledger.submissions().is_empty());
}

#[tokio::test]
async fn deposits_in_disallowed_assets_are_dropped() {
    let store = InMemoryStore::default();
    let config = test_config(3);
    let relayer = Arc::new(Relayer::new(store.clone(), 3).unwrap());
    let indexer = DepositIndexer::new(
        relayer.clone(),
        StreamingSource::new(InMemoryLedger::new()),
        &config,
        metrics(),
    );

    indexer
        .process_event(deposit_event(&"ac".repeat(32), 5_000_000, "ERC20"))
        .await
        .unwrap();

    assert!(relayer
        .get_bridge_state()
        .unwrap()
        .pending_mirrors
        .is_empty());
}

#[tokio::test]
async fn exhausted_retries_turn_the_deposit_terminally_failed() {
    let store = InMemoryStore::default();
    let config = test_config(2);
    let relayer = Arc::new(Relayer::new(store.clone(), 2).unwrap());
    let ledger = InMemoryLedger::new();
    ledger.fail_next_submissions(2);
    let worker = MirrorWorker::new(
        relayer.clone(),
        StreamingDestination::new(InMemoryAssembler, ledger.clone()),
        &config,
        metrics(),
    )
    .unwrap();

    let deposit = deposit_event(&"ad".repeat(32), 5_000_000, "ADA");
    relayer.publish_deposit(deposit.clone()).await.unwrap();

    assert!(worker.mirror_deposit(&deposit).await.is_err());
    let pending = relayer.get_pending_deposits().unwrap();
    assert_eq!(pending[0].retry_count, 1);

    assert!(worker.mirror_deposit(&deposit).await.is_err());
    let state = relayer.get_bridge_state().unwrap();
    assert!(state.pending_mirrors.is_empty());
    assert_eq!(
        state.processed_deposits[&deposit.tx_hash].status,
        MirrorStatus::Failed
    );
    // the sweep source has nothing left to hand out.
    assert!(relayer
        .get_pending_deposits_for_retry(2)
        .unwrap()
        .is_empty());
    // a late duplicate attempt is a no-op, not a double failure.
    assert!(worker.mirror_deposit(&deposit).await.is_ok());
}

#[tokio::test]
async fn insufficient_after_fee_fails_without_a_submission() {
    let store = InMemoryStore::default();
    let config = test_config(3);
    let relayer = Arc::new(Relayer::new(store.clone(), 3).unwrap());
    let ledger = InMemoryLedger::new();
    let worker = MirrorWorker::new(
        relayer.clone(),
        StreamingDestination::new(InMemoryAssembler, ledger.clone()),
        &config,
        metrics(),
    )
    .unwrap();

    // passes validation, but amount - fee lands on the minimum output.
    let deposit = deposit_event(&"ae".repeat(32), 2_000_000, "ADA");
    relayer.publish_deposit(deposit.clone()).await.unwrap();
    let result = worker.mirror_deposit(&deposit).await;
    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("insufficient after fee"));
    assert!(ledger.submissions().is_empty());
    let pending = relayer.get_pending_deposits().unwrap();
    assert_eq!(pending[0].retry_count, 1);
}

#[tokio::test]
async fn a_crash_between_publish_and_mirror_resumes_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("store");
    let big_amount: u128 = 1 << 90;
    let first_boot_state;
    {
        let store = SledStore::open(&db_path).unwrap();
        let relayer = Relayer::new(store.clone(), 3).unwrap();
        relayer
            .publish_deposit(deposit_event(&"af".repeat(32), 90_000_000_000, "ADA"))
            .await
            .unwrap();
        // an amount past the 53-bit precision edge rides along to prove the
        // blob column keeps it intact.
        let mut oversized = deposit_event(&"a0".repeat(32), 0, "ADA");
        oversized.amount = big_amount;
        relayer.publish_deposit(oversized).await.unwrap();
        first_boot_state = relayer.get_bridge_state().unwrap();
        store.flush().unwrap();
        // the process dies here, before any mirror attempt.
    }

    let store = SledStore::open(&db_path).unwrap();
    let config = test_config(3);
    let relayer = Arc::new(Relayer::new(store.clone(), 3).unwrap());
    // the reloaded snapshot matches the pre-crash one, amounts included.
    let second_boot_state = relayer.get_bridge_state().unwrap();
    assert_eq!(second_boot_state, first_boot_state);
    assert_eq!(
        second_boot_state.pending_mirrors[&"a0".repeat(32)].deposit.amount,
        big_amount
    );

    // the surviving pending mirrors are re-emitted to the live
    // subscription, and the worker drains them without waiting for a
    // sweep.
    let ledger = InMemoryLedger::new();
    let worker = MirrorWorker::new(
        relayer.clone(),
        StreamingDestination::new(InMemoryAssembler, ledger),
        &config,
        metrics(),
    )
    .unwrap();
    tokio::task::spawn(async move { worker.run().await });
    {
        let store = store.clone();
        wait_for("the resumed mirror to settle", move || {
            store
                .get_processed_deposit(&"af".repeat(32))
                .unwrap()
                .is_some()
        })
        .await;
    }
    let processed = store
        .get_processed_deposit(&"af".repeat(32))
        .unwrap()
        .unwrap();
    assert_eq!(processed.status, MirrorStatus::Confirmed);
    assert!(!processed.mirror_tx_hash.is_empty());
}

#[tokio::test]
async fn duplicate_stream_deliveries_leave_one_pending_mirror() {
    let store = InMemoryStore::default();
    let config = test_config(3);
    let relayer = Arc::new(Relayer::new(store.clone(), 3).unwrap());
    let indexer = DepositIndexer::new(
        relayer.clone(),
        StreamingSource::new(InMemoryLedger::new()),
        &config,
        metrics(),
    );

    let deposit = deposit_event(&"ba".repeat(32), 5_000_000, "ADA");
    indexer.process_event(deposit.clone()).await.unwrap();
    indexer.process_event(deposit).await.unwrap();

    let state = relayer.get_bridge_state().unwrap();
    assert_eq!(state.pending_mirrors.len(), 1);
    assert!(state.processed_deposits.is_empty());
}

#[tokio::test]
async fn the_live_pipeline_settles_deposits_without_a_sweep() {
    let store = InMemoryStore::default();
    let config = test_config(3);
    let relayer = Arc::new(Relayer::new(store.clone(), 3).unwrap());
    let ledger = InMemoryLedger::new();
    let worker = MirrorWorker::new(
        relayer.clone(),
        StreamingDestination::new(InMemoryAssembler, ledger.clone()),
        &config,
        metrics(),
    )
    .unwrap();
    let indexer = DepositIndexer::new(
        relayer.clone(),
        StreamingSource::new(ledger.clone()),
        &config,
        metrics(),
    );
    tokio::task::spawn(async move { indexer.run().await });
    tokio::task::spawn(async move { worker.run().await });

    ledger.push_event(apply_event(0xbb, 7_000_000));
    {
        let store = store.clone();
        wait_for("the mirror to settle", move || {
            store
                .get_processed_deposit(&"bb".repeat(32))
                .unwrap()
                .is_some()
        })
        .await;
    }
    let processed = store
        .get_processed_deposit(&"bb".repeat(32))
        .unwrap()
        .unwrap();
    assert_eq!(processed.status, MirrorStatus::Confirmed);
    assert!(!processed.mirror_tx_hash.is_empty());
}

#[tokio::test]
async fn an_authentication_failure_kills_the_intake_loop() {
    let store = InMemoryStore::default();
    let config = test_config(3);
    let relayer = Arc::new(Relayer::new(store, 3).unwrap());
    let ledger = InMemoryLedger::new();
    let indexer = DepositIndexer::new(
        relayer,
        StreamingSource::new(ledger.clone()),
        &config,
        metrics(),
    );

    ledger.push_error(vista_bridge::Error::unauthorized("bad api key"));
    let result = tokio::time::timeout(Duration::from_secs(5), indexer.run())
        .await
        .expect("the intake loop should die, not retry");
    assert!(result.unwrap_err().is_unauthorized());
}

#[tokio::test]
async fn a_transient_stream_error_does_not_lose_later_deposits() {
    let store = InMemoryStore::default();
    let config = test_config(3);
    let relayer = Arc::new(Relayer::new(store.clone(), 3).unwrap());
    let ledger = InMemoryLedger::new();
    let indexer = DepositIndexer::new(
        relayer.clone(),
        StreamingSource::new(ledger.clone()),
        &config,
        metrics(),
    );
    tokio::task::spawn(async move { indexer.run().await });

    ledger.push_error(vista_bridge::Error::transient("connection reset"));
    ledger.push_event(apply_event(0xbc, 5_000_000));

    // the indexer re-subscribes after retry_delay_ms and picks the
    // deposit up from the queue.
    {
        let store = store.clone();
        wait_for("the pending mirror after a re-subscribe", move || {
            store
                .get_pending_mirror(&"bc".repeat(32))
                .unwrap()
                .is_some()
        })
        .await;
    }
}
