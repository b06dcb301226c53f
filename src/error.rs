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

/// An enum of all possible errors that could be encountered during the
/// execution of the bridge relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing the config files.
    #[error("Config parse error: {0}")]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Prometheus error.
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
    /// Error in the underlying Http server.
    #[error(transparent)]
    Warp(#[from] warp::Error),
    /// A deposit event that fails the bridge validation rules.
    #[error("Invalid deposit: {}", reason)]
    InvalidDeposit {
        /// Why the deposit was rejected.
        reason: String,
    },
    /// A recoverable ledger error; the owning stream or RPC retries it.
    #[error("Transient ledger error: {}", message)]
    Transient {
        /// The underlying failure, as reported by the ledger client.
        message: String,
    },
    /// The ledger rejected our credentials. Permanent until the
    /// configuration changes.
    #[error("Ledger authentication failed: {}", message)]
    Unauthorized {
        /// The underlying failure, as reported by the ledger client.
        message: String,
    },
    /// Failed to assemble or sign a mirror transaction.
    #[error("Mirror build failed: {}", reason)]
    MirrorBuild {
        /// Why the mirror transaction could not be built.
        reason: String,
    },
    /// Failed to submit or confirm a mirror transaction.
    #[error("Mirror submission failed: {}", reason)]
    MirrorSubmit {
        /// Why the mirror transaction could not be submitted.
        reason: String,
    },
    /// The configured ledger provider is not compiled into this build.
    #[error("Unsupported ledger provider: {}", provider)]
    UnsupportedProvider {
        /// The provider name from the configuration.
        provider: String,
    },
    /// The source deposit stream ended while the bridge was still running.
    #[error("Deposit stream ended unexpectedly")]
    DepositStreamEnded,
    /// The single-consumer deposit subscription was already taken.
    #[error("Deposit subscription already taken")]
    AlreadySubscribed,
    /// The deposit subscriber hung up.
    #[error("Deposit subscriber is gone")]
    SubscriberGone,
    /// Missing the destination wallet seed in the config.
    #[error("Missing required wallet seed in the config")]
    MissingSecrets,
    /// Generic error.
    #[error("{0}")]
    Generic(&'static str),
}

impl Error {
    /// Whether this error is an authentication/authorization failure, which
    /// is permanent for the affected ledger adapter until the configuration
    /// changes.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Shorthand for a [`Error::Transient`] ledger error.
    pub fn transient<T: Into<String>>(message: T) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Shorthand for a [`Error::Unauthorized`] ledger error.
    pub fn unauthorized<T: Into<String>>(message: T) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }
}

/// A type alias for the result of the bridge relay, that uses the `Error`
/// enum.
pub type Result<T> = std::result::Result<T, Error>;
