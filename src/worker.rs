//! Worker pool.
//!
//! Pulls jobs from the durable queue and drives them through the
//! pipeline, `concurrency` jobs at a time. Runs until the queue drains,
//! which includes waiting out backoff delays on re-queued jobs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::cases::CaseStatus;
use crate::pipeline::{self, PipelineContext};
use crate::progress::{Monotonic, ProgressMode};
use crate::queue::{JobQueue, JobStatus};

const IDLE_POLL: Duration = Duration::from_millis(500);

/// Run the pool until the queue is idle. Returns the number of jobs that
/// reached a terminal state.
pub async fn run(
    ctx: Arc<PipelineContext>,
    queue: JobQueue,
    concurrency: usize,
    progress: ProgressMode,
) -> Result<u64> {
    let concurrency = concurrency.max(1);
    let mut handles = Vec::with_capacity(concurrency);

    for worker_id in 0..concurrency {
        let ctx = Arc::clone(&ctx);
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            worker_loop(worker_id, ctx, queue, progress).await
        }));
    }

    let mut settled = 0;
    for handle in handles {
        settled += handle.await??;
    }
    Ok(settled)
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<PipelineContext>,
    queue: JobQueue,
    progress: ProgressMode,
) -> Result<u64> {
    let mut settled = 0;

    loop {
        let Some(job) = queue.claim_next().await? else {
            // Nothing due. Jobs sitting out a backoff delay still count
            // as work, so only exit once the queue is truly empty.
            if queue.depth().await? == 0 {
                break;
            }
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        };

        tracing::info!(
            worker_id,
            job_id = %job.id,
            case_id = %job.case_id,
            kind = job.kind.as_str(),
            attempt = job.attempts,
            "job claimed"
        );

        let reporter = Monotonic::new(progress.reporter());
        match pipeline::run_case(&ctx, &job.case_id, &reporter).await {
            Ok(()) => {
                queue.complete(&job.id).await?;
                settled += 1;
                tracing::info!(job_id = %job.id, case_id = %job.case_id, "job completed");
            }
            Err(err) => {
                tracing::error!(
                    job_id = %job.id,
                    case_id = %job.case_id,
                    attempt = job.attempts,
                    retryable = err.is_retryable(),
                    error = %err,
                    "job failed"
                );

                let outcome = queue.fail(&job, &err.user_message(), err.is_retryable()).await?;
                if outcome == JobStatus::Failed {
                    ctx.cases.mark_failed(&job.case_id, &err.user_message()).await?;
                    settled += 1;
                } else {
                    // Back to queued for a later attempt; the case stays
                    // processing so status reflects reality.
                    ctx.cases
                        .set_status(&job.case_id, CaseStatus::Processing)
                        .await?;
                }
            }
        }
    }

    Ok(settled)
}
