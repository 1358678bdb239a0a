//! Durable job queue.
//!
//! Jobs live in the same SQLite file as the artifacts they produce, so a
//! crashed worker loses nothing: queued rows survive restarts and a
//! re-claimed job resumes from whatever artifacts its case already
//! persisted. Claiming is a single atomic UPDATE, safe across the worker
//! pool.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::cases::AnalysisType;
use crate::db;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => anyhow::bail!("unknown job status: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub case_id: String,
    pub kind: AnalysisType,
    pub status: JobStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub run_at: i64,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    backoff_base_secs: i64,
}

impl JobQueue {
    pub fn new(pool: SqlitePool, backoff_base_secs: i64) -> Self {
        Self {
            pool,
            backoff_base_secs,
        }
    }

    pub async fn enqueue(
        &self,
        case_id: &str,
        kind: AnalysisType,
        max_attempts: i64,
    ) -> Result<Job> {
        let id = Uuid::new_v4().to_string();
        let now = db::now_epoch();

        sqlx::query(
            r#"
            INSERT INTO jobs (id, case_id, kind, status, attempts, max_attempts, run_at, created_at, updated_at)
            VALUES (?, ?, ?, 'queued', 0, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(case_id)
        .bind(kind.as_str())
        .bind(max_attempts)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Job {
            id,
            case_id: case_id.to_string(),
            kind,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts,
            run_at: now,
            error: None,
        })
    }

    /// Claim the oldest due job, if any. The claim bumps the attempt
    /// counter, so a job observed as `running` with attempts = n is on
    /// its nth try.
    pub async fn claim_next(&self) -> Result<Option<Job>> {
        let now = db::now_epoch();

        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running', attempts = attempts + 1, updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'queued' AND run_at <= ?
                ORDER BY run_at, created_at
                LIMIT 1
            )
            RETURNING id, case_id, kind, status, attempts, max_attempts, run_at, error
            "#,
        )
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_job).transpose()
    }

    pub async fn complete(&self, job_id: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'completed', updated_at = ? WHERE id = ?")
            .bind(db::now_epoch())
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a failed attempt. Retryable jobs under the attempt cap go
    /// back to `queued` with exponential backoff; the exponent is capped
    /// so delays stay bounded.
    pub async fn fail(&self, job: &Job, error: &str, retryable: bool) -> Result<JobStatus> {
        let now = db::now_epoch();

        if retryable && job.attempts < job.max_attempts {
            let backoff = self.backoff_base_secs * (1i64 << (job.attempts as u32 - 1).min(5));
            sqlx::query(
                "UPDATE jobs SET status = 'queued', run_at = ?, error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(now + backoff)
            .bind(error)
            .bind(now)
            .bind(&job.id)
            .execute(&self.pool)
            .await?;
            Ok(JobStatus::Queued)
        } else {
            sqlx::query(
                "UPDATE jobs SET status = 'failed', error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(error)
            .bind(now)
            .bind(&job.id)
            .execute(&self.pool)
            .await?;
            Ok(JobStatus::Failed)
        }
    }

    /// Most recent job for a case, for status display.
    pub async fn latest_for_case(&self, case_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT id, case_id, kind, status, attempts, max_attempts, run_at, error
            FROM jobs
            WHERE case_id = ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(case_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_job).transpose()
    }

    /// Number of jobs waiting or running, for status display.
    pub async fn depth(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status IN ('queued', 'running')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<Job> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    Ok(Job {
        id: row.get("id"),
        case_id: row.get("case_id"),
        kind: AnalysisType::parse(&kind)?,
        status: JobStatus::parse(&status)?,
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        run_at: row.get("run_at"),
        error: row.get("error"),
    })
}
