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
//! # Bridge Service Module 🌉
//!
//! A module for starting the long-running bridge tasks.
//!
//! ## Overview
//!
//! [`ignite`] boots the subsystems in dependency order: the relayer over
//! the durable store, the ledger adapters, the mirror worker in the
//! background, the periodic status and persistence loops, the status API,
//! and finally the indexer, whose intake loop the ignition blocks on. A
//! mirror worker crash is retried forever; an indexer crash ends the
//! ignition and is fatal for the process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::adapters::inmemory::{InMemoryAssembler, InMemoryLedger};
use crate::adapters::{
    DestinationChain, SourceChain, StreamingDestination, StreamingSource,
};
use crate::context::{RelayerContext, Shutdown};
use crate::error::Error;
use crate::handler;
use crate::indexer::DepositIndexer;
use crate::metric::Metrics;
use crate::mirror::MirrorWorker;
use crate::probe;
use crate::relayer::Relayer;
use crate::store::SledStore;

/// How long after boot the first status report is printed.
const STATUS_REPORT_WARMUP: Duration = Duration::from_secs(5);
/// The cadence of the status report.
const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(30);
/// The cadence of the persistence checkpoint.
const PERSIST_INTERVAL: Duration = Duration::from_secs(60);

/// Starts the bridge with the ledger provider selected by the
/// configuration. This build compiles in the `inmemory` loopback provider;
/// SDK-backed providers are linked by the embedding binary through
/// [`ignite_with`].
pub async fn ignite(
    ctx: RelayerContext,
    store: SledStore,
) -> crate::Result<()> {
    let provider = ctx.config.destination.lucid_provider.clone();
    match provider.as_str() {
        "inmemory" => {
            let ledger = InMemoryLedger::new();
            let source = StreamingSource::new(ledger.clone());
            let destination =
                StreamingDestination::new(InMemoryAssembler, ledger);
            ignite_with(ctx, store, source, destination).await
        }
        other => Err(Error::UnsupportedProvider {
            provider: other.to_string(),
        }),
    }
}

/// Starts the bridge over the given ledger adapters and blocks on the
/// indexer's intake loop. Returns once the shutdown signal fires, or with
/// the indexer's error.
pub async fn ignite_with<A, D>(
    ctx: RelayerContext,
    store: SledStore,
    source: A,
    destination: D,
) -> crate::Result<()>
where
    A: SourceChain + 'static,
    D: DestinationChain + 'static,
{
    tracing::info!(
        target: probe::TARGET,
        kind = %probe::Kind::Lifecycle,
        "starting the bridge relay"
    );
    let relayer =
        Arc::new(Relayer::new(store, ctx.config.security.retry_attempts)?);

    // the mirror worker runs in the background and is retried forever.
    let worker = MirrorWorker::new(
        relayer.clone(),
        destination,
        &ctx.config,
        ctx.metrics.clone(),
    )?;
    let mut shutdown = ctx.shutdown_signal();
    tokio::task::spawn(async move {
        tokio::select! {
            result = worker.run() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "mirror worker stopped");
                }
            }
            _ = shutdown.recv() => {}
        }
    });

    tokio::task::spawn(status_report_loop(
        relayer.clone(),
        ctx.metrics.clone(),
        ctx.shutdown_signal(),
    ));
    tokio::task::spawn(persistence_loop(
        relayer.clone(),
        ctx.shutdown_signal(),
    ));

    let (addr, server) = build_web_services(ctx.clone(), relayer.clone())?;
    tracing::info!("status API listening on {}", addr);
    tokio::task::spawn(server);

    // the indexer is the foreground task; its death ends the ignition.
    let indexer = DepositIndexer::new(
        relayer.clone(),
        source,
        &ctx.config,
        ctx.metrics.clone(),
    );
    let mut shutdown = ctx.shutdown_signal();
    let result = tokio::select! {
        result = indexer.run() => result,
        _ = shutdown.recv() => Ok(()),
    };
    // the in-flight pool drains on its own shutdown handle; make the store
    // durable before leaving.
    relayer.persist_state()?;
    tracing::info!(
        target: probe::TARGET,
        kind = %probe::Kind::Lifecycle,
        "bridge relay stopped"
    );
    result
}

/// Sets up the status API: relayer info, bridge state, and the prometheus
/// text endpoint.
pub fn build_web_services(
    ctx: RelayerContext,
    relayer: Arc<Relayer<SledStore>>,
) -> crate::Result<(
    SocketAddr,
    impl core::future::Future<Output = ()> + 'static,
)> {
    use warp::Filter;

    let port = ctx.config.port;
    let ctx_arc = Arc::new(ctx.clone());
    let ctx_filter = warp::any().map(move || Arc::clone(&ctx_arc));

    let info_filter = warp::path("info")
        .and(warp::get())
        .and(ctx_filter)
        .and_then(handler::handle_relayer_info);

    let relayer_filter = warp::any().map(move || Arc::clone(&relayer));
    let state_filter = warp::path("state")
        .and(warp::get())
        .and(relayer_filter)
        .and_then(handler::handle_bridge_state);

    let metrics_filter = warp::path("metrics")
        .and(warp::get())
        .and_then(handler::handle_metrics);

    let api = warp::path("api")
        .and(warp::path("v1"))
        .and(info_filter.or(state_filter));
    let routes = api.or(metrics_filter).with(warp::trace::request());

    let mut shutdown_signal = ctx.shutdown_signal();
    let shutdown_signal = async move {
        shutdown_signal.recv().await;
    };
    warp::serve(routes)
        .try_bind_with_graceful_shutdown(([0, 0, 0, 0], port), shutdown_signal)
        .map_err(Into::into)
}

async fn status_report_loop(
    relayer: Arc<Relayer<SledStore>>,
    metrics: Arc<Mutex<Metrics>>,
    mut shutdown: Shutdown,
) {
    tokio::select! {
        _ = tokio::time::sleep(STATUS_REPORT_WARMUP) => {}
        _ = shutdown.recv() => return,
    }
    report_status(&relayer, &metrics).await;
    let mut ticks = tokio::time::interval_at(
        tokio::time::Instant::now() + STATUS_REPORT_INTERVAL,
        STATUS_REPORT_INTERVAL,
    );
    loop {
        tokio::select! {
            _ = ticks.tick() => report_status(&relayer, &metrics).await,
            _ = shutdown.recv() => return,
        }
    }
}

async fn report_status(
    relayer: &Relayer<SledStore>,
    metrics: &Mutex<Metrics>,
) {
    match relayer.get_bridge_state() {
        Ok(state) => {
            metrics
                .lock()
                .await
                .pending_mirrors
                .set(state.pending_mirrors.len() as f64);
            tracing::info!(
                processed = state.processed_deposits.len(),
                pending = state.pending_mirrors.len(),
                slot = state.watermark.last_processed_slot,
                last_mirror = relayer.last_mirror_tx().as_deref(),
                "bridge status"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to load state for the status report");
        }
    }
}

async fn persistence_loop(
    relayer: Arc<Relayer<SledStore>>,
    mut shutdown: Shutdown,
) {
    let mut ticks = tokio::time::interval_at(
        tokio::time::Instant::now() + PERSIST_INTERVAL,
        PERSIST_INTERVAL,
    );
    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if let Err(e) = relayer.persist_state() {
                    tracing::error!(error = %e, "persistence checkpoint failed");
                }
            }
            _ = shutdown.recv() => {
                // one last checkpoint on the way out.
                if let Err(e) = relayer.persist_state() {
                    tracing::error!(error = %e, "final persistence checkpoint failed");
                }
                return;
            }
        }
    }
}
