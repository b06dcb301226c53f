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

use std::convert::Infallible;
use std::sync::Arc;

use serde::Serialize;

use crate::context::RelayerContext;
use crate::metric::Metrics;
use crate::relayer::Relayer;
use crate::store::BridgeStore;

/// The public information of this bridge deployment.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayerInformationResponse {
    source_network: String,
    destination_network: String,
    deposit_addresses: Vec<String>,
    allowed_assets: Vec<String>,
    min_deposit_amount: u64,
    max_transfer_amount: u64,
    fee_amount: u64,
}

/// Handles the `/api/v1/info` route.
pub async fn handle_relayer_info(
    ctx: Arc<RelayerContext>,
) -> Result<impl warp::Reply, Infallible> {
    let config = &ctx.config;
    Ok(warp::reply::json(&RelayerInformationResponse {
        source_network: config.source.network_name.clone(),
        destination_network: config.destination.network_name.clone(),
        deposit_addresses: config.source.deposit_addresses.clone(),
        allowed_assets: config.bridge.allowed_assets.clone(),
        min_deposit_amount: config.bridge.min_deposit_amount,
        max_transfer_amount: config.bridge.max_transfer_amount,
        fee_amount: config.bridge.fee_amount,
    }))
}

/// A summary of the current bridge state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BridgeStateResponse {
    processed_deposits: usize,
    pending_mirrors: usize,
    last_processed_slot: u64,
    last_mirror_tx_hash: Option<String>,
}

/// Handles the `/api/v1/state` route.
pub async fn handle_bridge_state<S: BridgeStore>(
    relayer: Arc<Relayer<S>>,
) -> Result<impl warp::Reply, Infallible> {
    let reply = match relayer.get_bridge_state() {
        Ok(state) => warp::reply::with_status(
            warp::reply::json(&BridgeStateResponse {
                processed_deposits: state.processed_deposits.len(),
                pending_mirrors: state.pending_mirrors.len(),
                last_processed_slot: state.watermark.last_processed_slot,
                last_mirror_tx_hash: relayer.last_mirror_tx(),
            }),
            warp::http::StatusCode::OK,
        ),
        Err(e) => {
            tracing::error!(error = %e, "failed to load the bridge state");
            warp::reply::with_status(
                warp::reply::json(&serde_json::json!({
                    "error": e.to_string(),
                })),
                warp::http::StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    };
    Ok(reply)
}

/// Handles the `/metrics` route.
pub async fn handle_metrics() -> Result<impl warp::Reply, Infallible> {
    Ok(Metrics::gather_metrics())
}
