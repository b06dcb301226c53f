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
//! Configuration of the bridge relay.
//!
//! The configuration surface mirrors the environment variables the service
//! is deployed with (`SOURCE_*`, `DEST_*`, `BRIDGE_*`, `SECURITY_*`); the
//! same keys may also be provided, lowercased, through TOML files in the
//! `--config-dir` directory, with the environment taking precedence. After
//! loading, the raw key/value surface is assembled into sections and
//! validated; a bridge with an invalid configuration never boots.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

const fn default_port() -> u16 {
    9977
}

fn default_network() -> String {
    "mainnet".into()
}

fn default_source_url() -> Url {
    "http://localhost:50051".parse().expect("valid default url")
}

fn default_dest_url() -> Url {
    "http://localhost:50052".parse().expect("valid default url")
}

fn default_lucid_provider() -> String {
    "utxorpc".into()
}

fn default_lucid_network() -> String {
    "Mainnet".into()
}

fn default_allowed_assets() -> String {
    "ADA".into()
}

const fn default_min_deposit_amount() -> u64 {
    2_000_000
}

const fn default_max_transfer_amount() -> u64 {
    100_000_000_000
}

const fn default_fee_amount() -> u64 {
    1_000_000
}

const fn default_required_confirmations() -> u32 {
    1
}

const fn default_retry_attempts() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    30_000
}

/// BridgeRelayerConfig is the validated configuration for the bridge relay,
/// immutable for the lifetime of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeRelayerConfig {
    /// Status API port number.
    pub port: u16,
    /// Source ledger connection and watched addresses.
    pub source: SourceConfig,
    /// Destination ledger connection and signing surface.
    pub destination: DestinationConfig,
    /// Deposit validation and mirror fee math.
    pub bridge: BridgeLimitsConfig,
    /// Retry loop tuning.
    pub security: SecurityConfig,
}

/// SourceConfig is the configuration of the source ledger adapter.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    /// Network name of the source ledger.
    pub network_name: String,
    /// The streaming RPC endpoint of the source ledger.
    pub utxorpc_url: Url,
    /// API key for the streaming endpoint.
    #[serde(skip_serializing)]
    pub utxorpc_api_key: Option<String>,
    /// The watched deposit addresses. Never empty.
    pub deposit_addresses: Vec<String>,
}

/// DestinationConfig is the configuration of the destination ledger adapter.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DestinationConfig {
    /// Network name of the destination ledger.
    pub network_name: String,
    /// The submission RPC endpoint of the destination ledger.
    pub utxorpc_url: Url,
    /// API key for the submission endpoint.
    #[serde(skip_serializing)]
    pub utxorpc_api_key: Option<String>,
    /// Which compiled-in ledger provider backs the adapters.
    pub lucid_provider: String,
    /// The network the transaction builder targets.
    pub lucid_network: String,
    /// Sender addresses on the destination ledger; the first one pays the
    /// mirrors. Never empty.
    pub sender_addresses: Vec<String>,
    /// Signing material for the destination wallet.
    #[serde(skip_serializing)]
    pub sender_wallet_seed: Option<String>,
}

/// BridgeLimitsConfig holds the deposit validation bounds and the flat
/// bridge fee.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeLimitsConfig {
    /// The asset whitelist.
    pub allowed_assets: Vec<String>,
    /// Deposits below this are dropped at the indexer.
    pub min_deposit_amount: u64,
    /// Deposits above this are dropped at the indexer.
    pub max_transfer_amount: u64,
    /// Flat fee subtracted from every mirror.
    pub fee_amount: u64,
}

/// SecurityConfig tunes the confirmation and retry loops.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SecurityConfig {
    /// Confirmation stages to await before a mirror counts as settled.
    pub required_confirmations: u32,
    /// Failed mirror attempts before a deposit is given up on.
    pub retry_attempts: u32,
    /// Delay before re-subscribing to a failed deposit stream.
    pub retry_delay_ms: u64,
}

/// The raw, flat key surface as it comes out of the environment and the
/// optional config files. Assembled into [`BridgeRelayerConfig`] and
/// validated by [`postloading_process`].
#[derive(Debug, Clone, Deserialize)]
struct RawBridgeConfig {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_network")]
    source_network_name: String,
    #[serde(default = "default_source_url")]
    source_utxorpc_url: Url,
    #[serde(default)]
    source_utxorpc_api_key: Option<String>,
    #[serde(default)]
    source_deposit_addresses: String,
    #[serde(default = "default_network")]
    dest_network_name: String,
    #[serde(default = "default_dest_url")]
    dest_utxorpc_url: Url,
    #[serde(default)]
    dest_utxorpc_api_key: Option<String>,
    #[serde(default = "default_lucid_provider")]
    dest_lucid_provider: String,
    #[serde(default = "default_lucid_network")]
    dest_lucid_network: String,
    #[serde(default)]
    dest_sender_addresses: String,
    #[serde(default)]
    dest_sender_wallet_seed: Option<String>,
    #[serde(default = "default_allowed_assets")]
    bridge_allowed_assets: String,
    #[serde(default = "default_min_deposit_amount")]
    bridge_min_deposit_amount: u64,
    #[serde(default = "default_max_transfer_amount")]
    bridge_max_transfer_amount: u64,
    #[serde(default = "default_fee_amount")]
    bridge_fee_amount: u64,
    #[serde(default = "default_required_confirmations")]
    security_required_confirmations: u32,
    #[serde(default = "default_retry_attempts")]
    security_retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    security_retry_delay_ms: u64,
}

/// Loads the bridge configuration from the optional config directory and
/// the process environment, then validates it.
pub fn load<P: AsRef<Path>>(
    config_dir: Option<P>,
) -> crate::Result<BridgeRelayerConfig> {
    let mut cfg = config::Config::new();
    if let Some(dir) = config_dir {
        let pattern = format!("{}/**/*.toml", dir.as_ref().display());
        tracing::trace!("Loading config files from {}", pattern);
        for config_file in glob::glob(&pattern)?.flatten() {
            tracing::trace!("Loading config file: {}", config_file.display());
            let file = config::File::from(config_file)
                .format(config::FileFormat::Toml);
            if let Err(e) = cfg.merge(file) {
                tracing::warn!(
                    "Error while loading config file: {} skipping!",
                    e
                );
                continue;
            }
        }
    }
    // the environment always wins over the files.
    cfg.merge(config::Environment::new())?;
    let raw: Result<
        RawBridgeConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    postloading_process(raw?)
}

// The postloading_process exists to assemble the flat key surface into
// sections and to validate the result; boot stops here on the first
// violation.
fn postloading_process(
    raw: RawBridgeConfig,
) -> crate::Result<BridgeRelayerConfig> {
    tracing::trace!("Checking configuration sanity ...");
    let deposit_addresses = split_list(&raw.source_deposit_addresses);
    if deposit_addresses.is_empty() {
        return Err(invalid("no source deposit addresses configured"));
    }
    let sender_addresses = split_list(&raw.dest_sender_addresses);
    if sender_addresses.is_empty() {
        return Err(invalid("no destination sender addresses configured"));
    }
    let allowed_assets = split_list(&raw.bridge_allowed_assets);
    if allowed_assets.is_empty() {
        return Err(invalid("the allowed asset set is empty"));
    }
    if raw.bridge_fee_amount >= raw.bridge_min_deposit_amount {
        return Err(invalid(
            "the bridge fee must be lower than the minimum deposit amount",
        ));
    }
    if raw.bridge_min_deposit_amount >= raw.bridge_max_transfer_amount {
        return Err(invalid(
            "the minimum deposit amount must be lower than the maximum transfer amount",
        ));
    }
    for url in [&raw.source_utxorpc_url, &raw.dest_utxorpc_url] {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(&format!(
                "ledger endpoint {} must use http or https",
                url
            )));
        }
    }
    if raw.dest_lucid_provider.to_lowercase() != "inmemory"
        && raw.dest_sender_wallet_seed.is_none()
    {
        return Err(crate::Error::MissingSecrets);
    }
    let same_host = raw.source_utxorpc_url.host_str()
        == raw.dest_utxorpc_url.host_str();
    let same_port = raw.source_utxorpc_url.port_or_known_default()
        == raw.dest_utxorpc_url.port_or_known_default();
    if same_host && same_port {
        return Err(invalid(
            "the source and destination ledger endpoints share one port",
        ));
    }
    Ok(BridgeRelayerConfig {
        port: raw.port,
        source: SourceConfig {
            network_name: raw.source_network_name.to_lowercase(),
            utxorpc_url: raw.source_utxorpc_url,
            utxorpc_api_key: raw.source_utxorpc_api_key,
            deposit_addresses,
        },
        destination: DestinationConfig {
            network_name: raw.dest_network_name.to_lowercase(),
            utxorpc_url: raw.dest_utxorpc_url,
            utxorpc_api_key: raw.dest_utxorpc_api_key,
            lucid_provider: raw.dest_lucid_provider.to_lowercase(),
            lucid_network: raw.dest_lucid_network,
            sender_addresses,
            sender_wallet_seed: raw.dest_sender_wallet_seed,
        },
        bridge: BridgeLimitsConfig {
            allowed_assets,
            min_deposit_amount: raw.bridge_min_deposit_amount,
            max_transfer_amount: raw.bridge_max_transfer_amount,
            fee_amount: raw.bridge_fee_amount,
        },
        security: SecurityConfig {
            required_confirmations: raw.security_required_confirmations,
            retry_attempts: raw.security_retry_attempts,
            retry_delay_ms: raw.security_retry_delay_ms,
        },
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(String::from)
        .collect()
}

fn invalid(message: &str) -> crate::Error {
    config::ConfigError::Message(message.to_string()).into()
}
