//! Case records and lifecycle.
//!
//! A case is one analysis run over one conversation. Status moves
//! pending -> processing -> completed | failed; deep cases additionally
//! require a completed baseline case for the same conversation.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Baseline,
    Deep,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Baseline => "baseline",
            AnalysisType::Deep => "deep",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "baseline" => Ok(AnalysisType::Baseline),
            "deep" => Ok(AnalysisType::Deep),
            other => bail!("unknown analysis type: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Pending => "pending",
            CaseStatus::Processing => "processing",
            CaseStatus::Completed => "completed",
            CaseStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(CaseStatus::Pending),
            "processing" => Ok(CaseStatus::Processing),
            "completed" => Ok(CaseStatus::Completed),
            "failed" => Ok(CaseStatus::Failed),
            other => bail!("unknown case status: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseRecord {
    pub id: String,
    pub conversation_id: String,
    pub analysis_type: AnalysisType,
    pub status: CaseStatus,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone)]
pub struct CaseStore {
    pool: SqlitePool,
}

impl CaseStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, conversation_id: &str, analysis_type: AnalysisType) -> Result<CaseRecord> {
        let id = Uuid::new_v4().to_string();
        let now = db::now_epoch();

        sqlx::query(
            r#"
            INSERT INTO cases (id, conversation_id, analysis_type, status, created_at, updated_at)
            VALUES (?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(analysis_type.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(CaseRecord {
            id,
            conversation_id: conversation_id.to_string(),
            analysis_type,
            status: CaseStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get(&self, case_id: &str) -> Result<Option<CaseRecord>> {
        let row = sqlx::query(
            "SELECT id, conversation_id, analysis_type, status, error, created_at, updated_at FROM cases WHERE id = ?",
        )
        .bind(case_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_case).transpose()
    }

    pub async fn set_status(&self, case_id: &str, status: CaseStatus) -> Result<()> {
        sqlx::query("UPDATE cases SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(db::now_epoch())
            .bind(case_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, case_id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE cases SET status = 'failed', error = ?, updated_at = ? WHERE id = ?")
            .bind(error)
            .bind(db::now_epoch())
            .bind(case_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Most recent completed baseline case for a conversation, if any.
    /// Deep analysis refuses to start without one.
    pub async fn completed_baseline_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<CaseRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, conversation_id, analysis_type, status, error, created_at, updated_at
            FROM cases
            WHERE conversation_id = ? AND analysis_type = 'baseline' AND status = 'completed'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_case).transpose()
    }
}

fn row_to_case(row: sqlx::sqlite::SqliteRow) -> Result<CaseRecord> {
    let analysis_type: String = row.get("analysis_type");
    let status: String = row.get("status");
    Ok(CaseRecord {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        analysis_type: AnalysisType::parse(&analysis_type)?,
        status: CaseStatus::parse(&status)?,
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
