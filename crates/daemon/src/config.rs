use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use prmx_oracle_core::evaluate::EvaluationParams;

/// Signer secret: a `0x` hex seed or a mnemonic phrase. Never printed.
#[derive(Clone)]
pub struct SignerSecret(String);

impl SignerSecret {
    /// Wraps a raw secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for key derivation only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SignerSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignerSecret(<redacted>)")
    }
}

/// Everything the daemon binary wires together.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// HTTP listen address.
    pub listen: String,

    /// SurrealDB endpoint, e.g. `surrealkv://.prmx-oracle/db` or `mem://`.
    pub db_endpoint: String,
    /// SurrealDB namespace.
    pub db_namespace: String,
    /// SurrealDB database within the namespace.
    pub db_name: String,

    /// JSON-RPC endpoint of the ledger node.
    pub ledger_url: String,
    /// Per-request timeout for ledger calls.
    pub rpc_timeout: Duration,
    /// Delay between transaction status polls.
    pub finality_poll: Duration,
    /// Give up waiting for finality after this long.
    pub finality_timeout: Duration,

    /// Oracle signing key material.
    pub signer_secret: SignerSecret,

    /// Period of the evaluation timer.
    pub cycle_interval: Duration,
    /// Start the periodic timer at boot; otherwise only manual cycles run
    /// until `POST /v1/scheduler/start`.
    pub autostart: bool,
    /// Non-transient failures after which a monitor is no longer retried.
    pub max_report_attempts: u32,
    /// Evaluator tunables.
    pub evaluation: EvaluationParams,
}

impl DaemonConfig {
    /// Resolves a relative SurrealKV path against `base`.
    pub fn absolutize_db_endpoint(&mut self, base: &std::path::Path) {
        if let Some(path) = self.db_endpoint.strip_prefix("surrealkv://") {
            let p = PathBuf::from(path);
            if !p.is_absolute() {
                self.db_endpoint = format!("surrealkv://{}", base.join(p).display());
            }
        }
    }
}
