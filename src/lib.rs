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
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # VISTA Bridge Relay Crate 🌉
//!
//! The off-chain relay service for the VISTA bridge.
//!
//! ## Overview
//!
//! The relay observes deposits paid to a set of watched addresses on the
//! source ledger, validates them, and issues one mirroring value-transfer on
//! the destination ledger for each accepted deposit, net of a flat bridge
//! fee. Every step is recorded durably so the process can crash, restart,
//! and converge without double-paying or forgetting work.
//!
//! The service is composed of three cooperating subsystems around a durable
//! store:
//!
//!   1. The **indexer** drives the source ledger's per-address transaction
//!      stream, extracts and validates deposit events, and hands them to the
//!      relayer.
//!   2. The **relayer** is the authoritative state broker: it owns the
//!      record of which deposits are pending, mirrored, or retrying, and it
//!      is the single publication point through which subscribers receive
//!      deposits exactly once per boot and durably once across reboots.
//!   3. The **mirror worker** consumes pending deposits, builds and submits
//!      the destination-side transaction through the ledger adapter, and
//!      feeds the outcome back into the relayer.
//!
//! A deposit is durable in the store before it is visible to any subscriber,
//! and the pending-to-processed transition is a single atomic store
//! transaction, which is what makes the mirror effect exactly-once.
//!
//! The concrete ledger SDKs (the streaming RPC client and the CBOR
//! transaction builder) stay outside this crate; the [`adapters`] module
//! defines the capability seams they plug into and ships an in-memory
//! loopback variant used by local runs and the test suite.

/// A module for the ledger adapter seams and their built-in variants.
pub mod adapters;
/// A module for loading and validating the bridge configuration.
pub mod config;
/// A module for managing the context of the relay service.
pub mod context;
/// A module for the crate-wide error type.
pub mod error;
/// HTTP handlers for the status surface.
pub mod handler;
/// A module that drives the source deposit stream.
pub mod indexer;
/// Metrics functionality.
pub mod metric;
/// A module that mirrors pending deposits on the destination ledger.
pub mod mirror;
/// A module used for tracing relay lifecycle, sync state, and mirror
/// transactions in a structured way.
pub mod probe;
/// A module for the relayer state broker.
pub mod relayer;
/// A module for starting the long-running bridge services.
pub mod service;
/// A module for managing the storage of the bridge.
pub mod store;
/// The bridge data model.
pub mod types;

pub use error::{Error, Result};
