#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Oracle daemon: evaluation cycle, ledger submission, storage and the operator API.

/// Daemon configuration and the redacted signer secret.
pub mod config;
/// SurrealDB-backed store.
pub mod db;
/// Operator HTTP API.
pub mod http;
pub mod ledger;
pub mod rpc_ledger;
/// Periodic cycle timer.
pub mod scheduler;
/// Cycle orchestration, registration and ingest.
pub mod service;
pub mod signer;
pub mod store;
pub mod submitter;
