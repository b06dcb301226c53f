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
//! A module for managing the context of the bridge relay.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::config::BridgeRelayerConfig;
use crate::metric::Metrics;

/// RelayerContext contains the bridge configuration and the shutdown
/// signal.
#[derive(Clone)]
pub struct RelayerContext {
    /// The configuration of the bridge, read-only after boot.
    pub config: BridgeRelayerConfig,
    /// Broadcasts a shutdown signal to all running tasks. Only a single
    /// value is ever sent; each task receives it through its own
    /// [`Shutdown`] handle, reaches a safe state, and completes.
    notify_shutdown: broadcast::Sender<()>,
    /// The metrics of the bridge.
    pub metrics: Arc<Mutex<Metrics>>,
}

impl RelayerContext {
    /// Creates a new RelayerContext.
    pub fn new(config: BridgeRelayerConfig) -> crate::Result<Self> {
        let (notify_shutdown, _) = broadcast::channel(2);
        let metrics = Arc::new(Mutex::new(Metrics::new()?));
        Ok(Self {
            config,
            notify_shutdown,
            metrics,
        })
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// Sends a shutdown signal to all subscribed tasks.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }
}

/// Listens for the process shutdown signal and remembers having seen it,
/// so callers can await it more than once.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received.
    shutdown: bool,
    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        if self.shutdown {
            return;
        }
        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;
        self.shutdown = true;
    }
}
