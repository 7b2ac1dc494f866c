use anyhow::{Context, Result};
use prmx_oracle_core::model::{EpochMs, EvidenceRecord, Monitor, Observation, PolicyId};
use surrealdb::engine::any::{connect, Any};
use surrealdb::Surreal;

use crate::store::EvidenceStore;

/// Client over whichever engine the endpoint scheme selects.
pub type SurrealDb = Surreal<Any>;

/// SurrealDB-backed evidence store.
#[derive(Clone)]
pub struct Db {
    inner: SurrealDb,
}

impl Db {
    /// Connects to `endpoint` (`surrealkv://<dir>` on disk, `mem://` in memory).
    pub async fn connect(endpoint: &str, namespace: &str, database: &str) -> Result<Self> {
        if let Some(dir) = endpoint.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(dir).with_context(|| format!("creating db dir {dir}"))?;
        }

        // The Any engine picks the backend from the endpoint scheme.
        let inner = connect(endpoint)
            .await
            .with_context(|| format!("connecting to {endpoint}"))?;
        inner
            .use_ns(namespace)
            .use_db(database)
            .await
            .context("selecting surreal namespace/db")?;

        Ok(Self { inner })
    }

    /// Applies `schema.surql`. Idempotent.
    pub async fn bootstrap_schema(&self) -> Result<()> {
        let schema = include_str!("../schema.surql");
        self.inner
            .query(schema)
            .await
            .context("applying schema")?
            .check()
            .context("applying schema")?;
        Ok(())
    }

    /// The underlying client, for ad-hoc queries.
    pub fn inner(&self) -> &SurrealDb {
        &self.inner
    }
}

impl EvidenceStore for Db {
    async fn upsert_monitor(&self, monitor: &Monitor) -> Result<()> {
        self.inner
            .query("UPSERT type::thing('monitor', $pid) CONTENT $rec RETURN NONE;")
            .bind(("pid", monitor.policy_id))
            .bind(("rec", monitor.clone()))
            .await?
            .check()
            .with_context(|| format!("upserting monitor {}", monitor.policy_id))?;
        Ok(())
    }

    async fn get_monitor(&self, policy_id: PolicyId) -> Result<Option<Monitor>> {
        let mut res = self
            .inner
            .query("SELECT * OMIT id FROM type::thing('monitor', $pid);")
            .bind(("pid", policy_id))
            .await?;
        let rows: Vec<Monitor> = res.take(0)?;
        Ok(rows.into_iter().next())
    }

    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        let mut res = self
            .inner
            .query("SELECT * OMIT id FROM monitor ORDER BY policy_id ASC;")
            .await?;
        let rows: Vec<Monitor> = res.take(0)?;
        Ok(rows)
    }

    async fn mark_reported(
        &self,
        policy_id: PolicyId,
        report_tx_hash: Option<String>,
        evidence_hash: Option<String>,
        now: EpochMs,
    ) -> Result<bool> {
        let mut res = self
            .inner
            .query(
                r#"
                UPDATE type::thing('monitor', $pid)
                SET state = 'reported',
                    report_tx_hash = $tx,
                    evidence_hash = $eh,
                    last_error = NONE,
                    updated_ms = $now
                WHERE state != 'reported'
                RETURN AFTER;
            "#,
            )
            .bind(("pid", policy_id))
            .bind(("tx", report_tx_hash))
            .bind(("eh", evidence_hash))
            .bind(("now", now))
            .await?;
        let updated: Vec<Monitor> = res.take(0)?;
        Ok(!updated.is_empty())
    }

    async fn mark_failed(&self, policy_id: PolicyId, error: String, transient: bool, now: EpochMs) -> Result<()> {
        let bump: u32 = if transient { 0 } else { 1 };
        self.inner
            .query(
                r#"
                UPDATE type::thing('monitor', $pid)
                SET state = 'failed',
                    failed_attempts += $bump,
                    last_error = $err,
                    updated_ms = $now
                WHERE state != 'reported' AND state != 'cancelled'
                RETURN NONE;
            "#,
            )
            .bind(("pid", policy_id))
            .bind(("err", error))
            .bind(("bump", bump))
            .bind(("now", now))
            .await?
            .check()?;
        Ok(())
    }

    async fn cancel_monitor(&self, policy_id: PolicyId, now: EpochMs) -> Result<bool> {
        let mut res = self
            .inner
            .query(
                r#"
                UPDATE type::thing('monitor', $pid)
                SET state = 'cancelled', updated_ms = $now
                WHERE state = 'pending' OR state = 'failed'
                RETURN AFTER;
            "#,
            )
            .bind(("pid", policy_id))
            .bind(("now", now))
            .await?;
        let updated: Vec<Monitor> = res.take(0)?;
        Ok(!updated.is_empty())
    }

    async fn put_evidence(&self, record: &EvidenceRecord) -> Result<bool> {
        // Content-addressed: an existing hash already holds identical bytes.
        if self.get_evidence(&record.evidence_hash).await?.is_some() {
            return Ok(false);
        }
        self.inner
            .query("CREATE type::thing('evidence', $hash) CONTENT $rec RETURN NONE;")
            .bind(("hash", record.evidence_hash.clone()))
            .bind(("rec", record.clone()))
            .await?
            .check()
            .with_context(|| format!("writing evidence {}", record.evidence_hash))?;
        Ok(true)
    }

    async fn get_evidence(&self, evidence_hash: &str) -> Result<Option<EvidenceRecord>> {
        let mut res = self
            .inner
            .query("SELECT * OMIT id FROM type::thing('evidence', $hash);")
            .bind(("hash", evidence_hash.to_string()))
            .await?;
        let rows: Vec<EvidenceRecord> = res.take(0)?;
        Ok(rows.into_iter().next())
    }

    async fn list_evidence(&self, policy_id: PolicyId) -> Result<Vec<EvidenceRecord>> {
        let mut res = self
            .inner
            .query("SELECT * OMIT id FROM evidence WHERE policy_id = $pid ORDER BY created_ms ASC;")
            .bind(("pid", policy_id))
            .await?;
        let rows: Vec<EvidenceRecord> = res.take(0)?;
        Ok(rows)
    }

    async fn record_observation(&self, observation: &Observation) -> Result<()> {
        self.inner
            .query("UPSERT type::thing('observation', [$loc, $at]) CONTENT $rec RETURN NONE;")
            .bind(("loc", observation.location_id.clone()))
            .bind(("at", observation.observed_at_ms))
            .bind(("rec", observation.clone()))
            .await?
            .check()?;
        Ok(())
    }

    async fn observations(&self, location_id: &str, from_ms: EpochMs, to_ms: EpochMs) -> Result<Vec<Observation>> {
        let mut res = self
            .inner
            .query(
                r#"
                SELECT * OMIT id FROM observation
                WHERE location_id = $loc AND observed_at_ms >= $from AND observed_at_ms < $to
                ORDER BY observed_at_ms ASC;
            "#,
            )
            .bind(("loc", location_id.to_string()))
            .bind(("from", from_ms))
            .bind(("to", to_ms))
            .await?;
        let rows: Vec<Observation> = res.take(0)?;
        Ok(rows)
    }
}
