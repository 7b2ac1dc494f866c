//! `prmx-oracle-daemon`: serves the oracle HTTP API and drives the evaluation timer.
#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use prmx_oracle_core::evaluate::EvaluationParams;
use prmx_oracle_daemon::{
    config::{DaemonConfig, SignerSecret},
    db::Db,
    http,
    rpc_ledger::{RpcLedger, RpcLedgerOptions},
    scheduler::Scheduler,
    service::OracleService,
    signer::ReportSigner,
};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "prmx-oracle-daemon", version, about = "Parametric rainfall oracle daemon")]
struct Cli {
    /// Where the operator HTTP API listens.
    #[arg(long, env = "PRMX_ORACLE_LISTEN", default_value = "127.0.0.1:8090")]
    listen: String,

    /// SurrealDB endpoint (`surrealkv://<dir>` or `mem://`).
    #[arg(long, env = "PRMX_ORACLE_DB", default_value = "surrealkv://.prmx-oracle/db")]
    db: String,

    #[arg(long, default_value = "prmx")]
    db_namespace: String,

    #[arg(long, default_value = "oracle")]
    db_name: String,

    /// Ledger node JSON-RPC endpoint.
    #[arg(long, env = "PRMX_ORACLE_LEDGER_URL", default_value = "http://127.0.0.1:9944")]
    ledger_url: String,

    #[arg(long, default_value_t = 15_000)]
    rpc_timeout_ms: u64,

    #[arg(long, default_value_t = 2_000)]
    finality_poll_ms: u64,

    #[arg(long, default_value_t = 120_000)]
    finality_timeout_ms: u64,

    /// `0x` hex seed or mnemonic phrase for the oracle signing account.
    #[arg(long, env = "PRMX_ORACLE_SIGNER_SECRET", hide_env_values = true)]
    signer_secret: String,

    /// Seconds between evaluation cycles.
    #[arg(long, env = "PRMX_ORACLE_CYCLE_INTERVAL_SECS", default_value_t = 600)]
    cycle_interval_secs: u64,

    /// Do not start the periodic timer at boot.
    #[arg(long, default_value_t = false)]
    no_autostart: bool,

    /// Rejected (non-transient) attempts after which a monitor is no longer retried.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    max_report_attempts: u32,

    /// Readings older than this are stale.
    #[arg(long, default_value_t = 6 * 60 * 60 * 1000, value_parser = clap::value_parser!(i64).range(0..))]
    max_staleness_ms: i64,

    /// tracing filter, e.g. `info` or `prmx_oracle_daemon=debug`.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log: String,
}

impl Cli {
    fn into_config(self) -> DaemonConfig {
        DaemonConfig {
            listen: self.listen,
            db_endpoint: self.db,
            db_namespace: self.db_namespace,
            db_name: self.db_name,
            ledger_url: self.ledger_url,
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            finality_poll: Duration::from_millis(self.finality_poll_ms),
            finality_timeout: Duration::from_millis(self.finality_timeout_ms),
            signer_secret: SignerSecret::new(self.signer_secret),
            cycle_interval: Duration::from_secs(self.cycle_interval_secs.max(1)),
            autostart: !self.no_autostart,
            max_report_attempts: self.max_report_attempts,
            evaluation: EvaluationParams {
                max_staleness_ms: self.max_staleness_ms,
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::new(&cli.log))
        .with(fmt::layer().with_target(false))
        .init();

    let mut config = cli.into_config();
    let cwd = std::env::current_dir().context("resolving working directory")?;
    config.absolutize_db_endpoint(&cwd);
    info!(?config, "starting oracle daemon");

    let signer = Arc::new(ReportSigner::from_secret(&config.signer_secret).context("loading signer key")?);
    info!(account = signer.account(), "oracle signer loaded");

    let db = Db::connect(&config.db_endpoint, &config.db_namespace, &config.db_name).await?;
    db.bootstrap_schema().await?;

    let ledger = RpcLedger::new(
        config.ledger_url.clone(),
        RpcLedgerOptions {
            request_timeout: config.rpc_timeout,
            finality_poll: config.finality_poll,
            finality_timeout: config.finality_timeout,
        },
    )?;

    let svc = Arc::new(OracleService::new(
        Arc::new(db),
        Arc::new(ledger),
        signer,
        config.evaluation,
        config.max_report_attempts,
    ));
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&svc), config.cycle_interval));
    if config.autostart {
        scheduler.start();
    }

    let app = http::router(Arc::clone(&svc), Arc::clone(&scheduler));

    let addr: SocketAddr = config.listen.parse().with_context(|| format!("parsing listen addr {}", config.listen))?;
    info!("listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Lets an in-flight cycle finish its submission before exit.
    scheduler.stop_and_wait().await;
    info!("oracle daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown requested");
}
