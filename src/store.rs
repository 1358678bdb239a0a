//! Typed artifact store.
//!
//! Every intermediate and final product of a case is a JSON artifact keyed
//! by `(case_id, kind)`. Rows carry an epoch expiry: intermediates live a
//! day, reports a week. Expiry is enforced on read, so a crashed sweeper
//! never resurrects stale state.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::RetentionConfig;
use crate::db;

/// The fixed set of artifact slots a case can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    StagedFiles,
    Timeline,
    Progress,
    TriageFindings,
    GottmanFindings,
    DynamicsFindings,
    ChronicleFindings,
    VerifierFindings,
    BaselineReport,
    DeepReport,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::StagedFiles => "staged_files",
            ArtifactKind::Timeline => "timeline",
            ArtifactKind::Progress => "progress",
            ArtifactKind::TriageFindings => "triage_findings",
            ArtifactKind::GottmanFindings => "gottman_findings",
            ArtifactKind::DynamicsFindings => "dynamics_findings",
            ArtifactKind::ChronicleFindings => "chronicle_findings",
            ArtifactKind::VerifierFindings => "verifier_findings",
            ArtifactKind::BaselineReport => "baseline_report",
            ArtifactKind::DeepReport => "deep_report",
        }
    }

    /// Reports outlive the working artifacts that produced them.
    fn is_report(&self) -> bool {
        matches!(self, ArtifactKind::BaselineReport | ArtifactKind::DeepReport)
    }
}

#[derive(Clone)]
pub struct ArtifactStore {
    pool: SqlitePool,
    retention: RetentionConfig,
}

impl ArtifactStore {
    pub fn new(pool: SqlitePool, retention: RetentionConfig) -> Self {
        Self { pool, retention }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn ttl_secs(&self, kind: ArtifactKind) -> i64 {
        if kind.is_report() {
            self.retention.report_ttl_secs
        } else {
            self.retention.ephemeral_ttl_secs
        }
    }

    /// Upsert an artifact. Writing a slot again replaces the payload and
    /// restarts its TTL.
    pub async fn put<T: Serialize>(
        &self,
        case_id: &str,
        kind: ArtifactKind,
        value: &T,
    ) -> Result<()> {
        let payload = serde_json::to_string(value)
            .with_context(|| format!("serializing {} artifact", kind.as_str()))?;
        let now = db::now_epoch();

        sqlx::query(
            r#"
            INSERT INTO artifacts (case_id, kind, payload, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(case_id, kind) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(case_id)
        .bind(kind.as_str())
        .bind(&payload)
        .bind(now)
        .bind(now + self.ttl_secs(kind))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch an artifact if present and unexpired.
    pub async fn get<T: DeserializeOwned>(
        &self,
        case_id: &str,
        kind: ArtifactKind,
    ) -> Result<Option<T>> {
        let payload: Option<String> = sqlx::query_scalar(
            "SELECT payload FROM artifacts WHERE case_id = ? AND kind = ? AND expires_at > ?",
        )
        .bind(case_id)
        .bind(kind.as_str())
        .bind(db::now_epoch())
        .fetch_optional(&self.pool)
        .await?;

        match payload {
            Some(json) => {
                let value = serde_json::from_str(&json)
                    .with_context(|| format!("decoding {} artifact", kind.as_str()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn delete(&self, case_id: &str, kind: ArtifactKind) -> Result<()> {
        sqlx::query("DELETE FROM artifacts WHERE case_id = ? AND kind = ?")
            .bind(case_id)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop every artifact a case has accumulated.
    pub async fn delete_case(&self, case_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM artifacts WHERE case_id = ?")
            .bind(case_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove all expired rows. Returns the number swept.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM artifacts WHERE expires_at <= ?")
            .bind(db::now_epoch())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
