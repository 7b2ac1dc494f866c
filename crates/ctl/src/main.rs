use std::path::Path;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use prmx_oracle_core::api::{
    CancelMonitorResponse, CycleReport, IngestObservationsRequest, IngestObservationsResponse,
    RegisterMonitorRequest, SchedulerStatus, SchedulerTransition,
};
use prmx_oracle_core::evidence::hash_evidence;
use prmx_oracle_core::model::{EpochMs, EvidenceRecord, Monitor, Observation, PolicyId};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "oraclectl", about = "Operator CLI for the PRMX rainfall oracle")]
struct Args {
    /// Daemon base URL.
    #[arg(long, global = true, env = "PRMX_ORACLE_URL", default_value = "http://127.0.0.1:8090")]
    daemon: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    Monitors {
        #[command(subcommand)]
        cmd: MonitorCmd,
    },
    /// Ingest readings from a JSON file (an array or `{"observations": [...]}`).
    Observe {
        #[arg(long)]
        file: String,
    },
    Cycle {
        #[command(subcommand)]
        cmd: CycleCmd,
    },
    Scheduler {
        #[command(subcommand)]
        cmd: SchedulerCmd,
    },
    Evidence {
        #[command(subcommand)]
        cmd: EvidenceCmd,
    },
}

#[derive(Subcommand, Debug)]
enum MonitorCmd {
    List,
    Get {
        policy_id: PolicyId,
    },
    Register {
        #[arg(long)]
        policy_id: PolicyId,
        #[arg(long)]
        location: String,
        #[arg(long)]
        threshold_mm: f64,
        #[arg(long)]
        window_start_ms: EpochMs,
        #[arg(long)]
        window_end_ms: EpochMs,
    },
    Cancel {
        policy_id: PolicyId,
    },
}

#[derive(Subcommand, Debug)]
enum CycleCmd {
    /// Run one evaluation cycle now.
    Run,
}

#[derive(Subcommand, Debug)]
enum SchedulerCmd {
    Status,
    Start,
    Stop,
}

#[derive(Subcommand, Debug)]
enum EvidenceCmd {
    /// Fetch a stored evidence record by hash.
    Get { hash: String },
    /// Hash a local evidence payload the way the oracle does. Offline.
    Hash {
        #[arg(long)]
        file: String,
    },
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let resp = self.http.get(format!("{}{path}", self.base)).send().await?;
        decode(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: Option<&B>) -> anyhow::Result<T> {
        let mut req = self.http.post(format!("{}{path}", self.base));
        if let Some(body) = body {
            req = req.json(body);
        }
        decode(req.send().await?).await
    }
}

/// Surfaces the daemon's `{"error": ...}` body on failure.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let body: serde_json::Value = resp.json().await.unwrap_or_default();
    match body.get("error").and_then(|e| e.as_str()) {
        Some(msg) => bail!("{status}: {msg}"),
        None => bail!("{status}"),
    }
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_observations(bytes: &[u8]) -> anyhow::Result<Vec<Observation>> {
    let value: serde_json::Value = serde_json::from_slice(bytes).context("parse json")?;
    let list = match value {
        serde_json::Value::Object(mut obj) => obj.remove("observations").context("missing \"observations\"")?,
        other => other,
    };
    serde_json::from_value(list).context("parse observations")
}

fn hash_file(path: &Path) -> anyhow::Result<serde_json::Value> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let payload: serde_json::Value = serde_json::from_slice(&bytes).context("parse json")?;
    let evidence = hash_evidence(&payload);
    Ok(serde_json::json!({
        "evidence_hash": format!("0x{}", evidence.hash),
        "canonical_json": evidence.canonical_json,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = Client::new(&args.daemon);

    match args.cmd {
        Cmd::Monitors { cmd } => match cmd {
            MonitorCmd::List => print(&client.get::<Vec<Monitor>>("/v1/monitors").await?)?,
            MonitorCmd::Get { policy_id } => {
                print(&client.get::<Monitor>(&format!("/v1/monitors/{policy_id}")).await?)?
            }
            MonitorCmd::Register {
                policy_id,
                location,
                threshold_mm,
                window_start_ms,
                window_end_ms,
            } => {
                let req = RegisterMonitorRequest {
                    policy_id,
                    location_id: location,
                    threshold_mm,
                    window_start_ms,
                    window_end_ms,
                };
                print(&client.post::<_, Monitor>("/v1/monitors", Some(&req)).await?)?
            }
            MonitorCmd::Cancel { policy_id } => print(
                &client
                    .post::<(), CancelMonitorResponse>(&format!("/v1/monitors/{policy_id}/cancel"), None)
                    .await?,
            )?,
        },
        Cmd::Observe { file } => {
            let bytes = tokio::fs::read(&file).await.with_context(|| format!("read {file}"))?;
            let req = IngestObservationsRequest {
                observations: read_observations(&bytes)?,
            };
            print(&client.post::<_, IngestObservationsResponse>("/v1/observations", Some(&req)).await?)?
        }
        Cmd::Cycle { cmd: CycleCmd::Run } => print(&client.post::<(), CycleReport>("/v1/cycles", None).await?)?,
        Cmd::Scheduler { cmd } => match cmd {
            SchedulerCmd::Status => print(&client.get::<SchedulerStatus>("/v1/scheduler").await?)?,
            SchedulerCmd::Start => print(&client.post::<(), SchedulerTransition>("/v1/scheduler/start", None).await?)?,
            SchedulerCmd::Stop => print(&client.post::<(), SchedulerTransition>("/v1/scheduler/stop", None).await?)?,
        },
        Cmd::Evidence { cmd } => match cmd {
            EvidenceCmd::Get { hash } => print(&client.get::<EvidenceRecord>(&format!("/v1/evidence/{hash}")).await?)?,
            EvidenceCmd::Hash { file } => print(&hash_file(Path::new(&file))?)?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_file_matches_key_order_independent_hash() {
        let mut a = tempfile::NamedTempFile::new().unwrap();
        write!(a, r#"{{"policy_id": 42, "cumulative_mm": 62.0}}"#).unwrap();
        let mut b = tempfile::NamedTempFile::new().unwrap();
        write!(b, r#"{{ "cumulative_mm": 62.0,
            "policy_id": 42 }}"#)
        .unwrap();

        let ha = hash_file(a.path()).unwrap();
        let hb = hash_file(b.path()).unwrap();
        assert_eq!(ha, hb);
        assert_eq!(ha["canonical_json"], r#"{"cumulative_mm":62.0,"policy_id":42}"#);
        assert!(ha["evidence_hash"].as_str().unwrap().starts_with("0x"));
    }

    #[test]
    fn observations_accept_bare_array_or_wrapper() {
        let bare = br#"[{"location_id": "st-1", "observed_at_ms": 1, "rainfall_mm": 2.5}]"#;
        let wrapped = br#"{"observations": [{"location_id": "st-1", "observed_at_ms": 1, "rainfall_mm": 2.5, "source": "gauge"}]}"#;
        assert_eq!(read_observations(bare).unwrap().len(), 1);
        assert_eq!(read_observations(wrapped).unwrap()[0].source.as_deref(), Some("gauge"));
        assert!(read_observations(br#"{"other": []}"#).is_err());
    }

    #[test]
    fn cli_parses_nested_commands() {
        let args = Args::try_parse_from(["oraclectl", "--daemon", "http://x", "monitors", "cancel", "42"]).unwrap();
        assert_eq!(args.daemon, "http://x");
        assert!(matches!(args.cmd, Cmd::Monitors { cmd: MonitorCmd::Cancel { policy_id: 42 } }));
    }
}
