//! Pipeline orchestration.
//!
//! Drives a case through its tier: baseline (ingest, stitch, triage,
//! report) or deep (triage, specialist fan-out, verification, report).
//! Every durable step writes its artifact before progress advances, so a
//! retried job resumes from the persisted Timeline checkpoint instead of
//! re-ingesting raw files.

use std::sync::Arc;

use anyhow::{anyhow, Context as _};
use sqlx::SqlitePool;

use crate::cases::{AnalysisType, CaseRecord, CaseStatus, CaseStore};
use crate::config::Config;
use crate::db;
use crate::error::PipelineError;
use crate::extract::{extract_files, DisabledRecognizer, TextRecognizer};
use crate::models::{DeepFindings, StagedFile, Timeline};
use crate::progress::{ProgressEvent, ProgressRecord, ProgressReporter};
use crate::reasoning::{create_provider, ReasoningProvider, StageRequest};
use crate::report;
use crate::stages::{chronicle, dynamics, gottman, triage, verifier};
use crate::store::{ArtifactKind, ArtifactStore};
use crate::timeline::stitch;

/// Shared handles for everything the pipeline touches.
pub struct PipelineContext {
    pub config: Config,
    pub store: ArtifactStore,
    pub cases: CaseStore,
    pub provider: Arc<dyn ReasoningProvider>,
    pub recognizer: Arc<dyn TextRecognizer>,
}

impl PipelineContext {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config).await?;
        Ok(Self::with_pool(config, pool)?)
    }

    pub fn with_pool(config: Config, pool: SqlitePool) -> anyhow::Result<Self> {
        let provider = create_provider(&config.reasoning)?;
        Ok(Self {
            store: ArtifactStore::new(pool.clone(), config.retention.clone()),
            cases: CaseStore::new(pool),
            provider,
            recognizer: Arc::new(DisabledRecognizer),
            config,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        self.store.pool()
    }
}

/// Run one case to completion. The caller owns retry policy; this
/// function owns progress, checkpointing, and the completed transition.
pub async fn run_case(
    ctx: &PipelineContext,
    case_id: &str,
    reporter: &dyn ProgressReporter,
) -> Result<(), PipelineError> {
    let case = ctx
        .cases
        .get(case_id)
        .await
        .map_err(PipelineError::Upstream)?
        .ok_or_else(|| PipelineError::Input(format!("unknown case: {}", case_id)))?;

    ctx.cases
        .set_status(case_id, CaseStatus::Processing)
        .await
        .map_err(PipelineError::Upstream)?;

    match case.analysis_type {
        AnalysisType::Baseline => run_baseline(ctx, &case, reporter).await?,
        AnalysisType::Deep => run_deep(ctx, &case, reporter).await?,
    }

    ctx.cases
        .set_status(case_id, CaseStatus::Completed)
        .await
        .map_err(PipelineError::Upstream)?;
    emit(ctx, reporter, case_id, 100, "complete").await?;

    Ok(())
}

async fn run_baseline(
    ctx: &PipelineContext,
    case: &CaseRecord,
    reporter: &dyn ProgressReporter,
) -> Result<(), PipelineError> {
    let timeline = materialize_timeline(ctx, case, reporter).await?;

    emit(ctx, reporter, &case.id, 40, "triage").await?;
    let findings = if timeline.total_count == 1 {
        triage::scan_excerpt(ctx.provider.as_ref(), &timeline.messages[0].raw.content).await?
    } else {
        triage::scan(ctx.provider.as_ref(), &timeline).await?
    };

    emit(ctx, reporter, &case.id, 70, "persisting findings").await?;
    ctx.store
        .put(&case.id, ArtifactKind::TriageFindings, &findings)
        .await
        .map_err(PipelineError::Upstream)?;

    emit(ctx, reporter, &case.id, 90, "report").await?;
    let report = report::assemble_baseline(&case.id, &findings, &timeline);
    ctx.store
        .put(&case.id, ArtifactKind::BaselineReport, &report)
        .await
        .map_err(PipelineError::Upstream)?;

    Ok(())
}

/// Produce the case's Timeline, or reuse the persisted one on retry.
/// Staged raw files are cleared once the Timeline is durable.
async fn materialize_timeline(
    ctx: &PipelineContext,
    case: &CaseRecord,
    reporter: &dyn ProgressReporter,
) -> Result<Timeline, PipelineError> {
    if let Some(timeline) = ctx
        .store
        .get::<Timeline>(&case.id, ArtifactKind::Timeline)
        .await
        .map_err(PipelineError::Upstream)?
    {
        tracing::debug!(case_id = %case.id, "resuming from persisted timeline");
        return Ok(timeline);
    }

    emit(ctx, reporter, &case.id, 5, "retrieving").await?;
    let files: Vec<StagedFile> = ctx
        .store
        .get(&case.id, ArtifactKind::StagedFiles)
        .await
        .map_err(PipelineError::Upstream)?
        .ok_or_else(|| PipelineError::Input("no staged files for case".to_string()))?;

    emit(ctx, reporter, &case.id, 10, "parsing").await?;
    let raw = extract_files(&files, ctx.recognizer.as_ref());

    emit(ctx, reporter, &case.id, 20, "stitching").await?;
    let timeline = stitch(raw, &ctx.config.analysis)?;

    ctx.store
        .put(&case.id, ArtifactKind::Timeline, &timeline)
        .await
        .map_err(PipelineError::Upstream)?;
    ctx.store
        .delete(&case.id, ArtifactKind::StagedFiles)
        .await
        .map_err(PipelineError::Upstream)?;

    Ok(timeline)
}

async fn run_deep(
    ctx: &PipelineContext,
    case: &CaseRecord,
    reporter: &dyn ProgressReporter,
) -> Result<(), PipelineError> {
    // Precondition: a completed baseline for this conversation with a
    // live Timeline of sufficient size. Checked before any reasoning
    // call is made.
    let baseline = ctx
        .cases
        .completed_baseline_for_conversation(&case.conversation_id)
        .await
        .map_err(PipelineError::Upstream)?
        .ok_or_else(|| {
            PipelineError::Precondition(
                "deep analysis requires a completed baseline case".to_string(),
            )
        })?;

    let timeline: Timeline = ctx
        .store
        .get(&baseline.id, ArtifactKind::Timeline)
        .await
        .map_err(PipelineError::Upstream)?
        .ok_or_else(|| {
            PipelineError::Precondition("baseline timeline has expired".to_string())
        })?;

    let min = ctx.config.analysis.min_deep_messages;
    if timeline.total_count < min {
        return Err(PipelineError::Precondition(format!(
            "deep analysis requires at least {} messages, found {}",
            min, timeline.total_count
        )));
    }

    emit(ctx, reporter, &case.id, 30, "triage").await?;
    let triage_findings = triage::scan(ctx.provider.as_ref(), &timeline).await?;
    ctx.store
        .put(&case.id, ArtifactKind::TriageFindings, &triage_findings)
        .await
        .map_err(PipelineError::Upstream)?;

    emit(ctx, reporter, &case.id, 40, "specialists").await?;
    let provider = ctx.provider.as_ref();
    let (gottman_res, dynamics_res, chronicle_res) = tokio::join!(
        gottman::analyze(provider, &triage_findings, &timeline),
        dynamics::analyze(provider, &timeline),
        chronicle::analyze(provider, &timeline),
    );

    // Persist whatever succeeded before surfacing a failure, so a retry
    // does not redo finished specialists' side effects downstream.
    if let Ok(f) = &gottman_res {
        ctx.store
            .put(&case.id, ArtifactKind::GottmanFindings, f)
            .await
            .map_err(PipelineError::Upstream)?;
    }
    if let Ok(f) = &dynamics_res {
        ctx.store
            .put(&case.id, ArtifactKind::DynamicsFindings, f)
            .await
            .map_err(PipelineError::Upstream)?;
    }
    if let Ok(f) = &chronicle_res {
        ctx.store
            .put(&case.id, ArtifactKind::ChronicleFindings, f)
            .await
            .map_err(PipelineError::Upstream)?;
    }

    let gottman_findings = gottman_res?;
    let dynamics_findings = dynamics_res?;
    let chronicle_findings = chronicle_res?;
    emit(ctx, reporter, &case.id, 60, "specialists complete").await?;

    emit(ctx, reporter, &case.id, 70, "verifier").await?;
    let verifier_findings = verifier::verify(
        provider,
        &triage_findings,
        &gottman_findings,
        &dynamics_findings,
        &chronicle_findings,
        &timeline,
        &ctx.config.analysis,
    )
    .await?;
    ctx.store
        .put(&case.id, ArtifactKind::VerifierFindings, &verifier_findings)
        .await
        .map_err(PipelineError::Upstream)?;

    emit(ctx, reporter, &case.id, 80, "report").await?;
    let findings = DeepFindings {
        triage: triage_findings,
        gottman: gottman_findings,
        dynamics: dynamics_findings,
        chronicle: chronicle_findings,
        verifier: verifier_findings,
    };
    let report = report::assemble_deep(&case.id, &findings, &timeline);
    ctx.store
        .put(&case.id, ArtifactKind::DeepReport, &report)
        .await
        .map_err(PipelineError::Upstream)?;

    emit(ctx, reporter, &case.id, 95, "finalize").await?;
    let swept = ctx
        .store
        .sweep_expired()
        .await
        .map_err(PipelineError::Upstream)?;
    if swept > 0 {
        tracing::debug!(swept, "swept expired artifacts");
    }

    Ok(())
}

/// Answer an ad hoc question over a completed case's report and timeline.
pub async fn ask(
    ctx: &PipelineContext,
    case_id: &str,
    question: &str,
) -> Result<String, PipelineError> {
    if !ctx.config.reasoning.is_enabled() {
        return Err(PipelineError::Precondition(
            "asking questions requires a reasoning provider".to_string(),
        ));
    }

    let report = load_report(ctx, case_id).await?;
    let timeline: Timeline = ctx
        .store
        .get(case_id, ArtifactKind::Timeline)
        .await
        .map_err(PipelineError::Upstream)?
        .unwrap_or_else(|| Timeline {
            messages: Vec::new(),
            total_count: 0,
            date_range: Default::default(),
            gaps: Vec::new(),
            senders: Vec::new(),
            stats: Default::default(),
        });

    let context_json = serde_json::to_string(&report)
        .context("serializing report for question context")
        .map_err(PipelineError::Upstream)?;

    let value = ctx
        .provider
        .invoke(&StageRequest {
            stage: "ask",
            system: "You answer questions about a finished conversation analysis, grounded \
                     only in the report and transcript excerpts provided. Respond with JSON \
                     {\"answer\": \"...\"}."
                .to_string(),
            prompt: format!(
                "Report:\n{}\n\nParticipants: {:?}\n\nQuestion: {}",
                context_json, timeline.senders, question
            ),
        })
        .await?;

    value
        .get("answer")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| PipelineError::Upstream(anyhow!("reasoning response had no answer")))
}

/// Suggest a reply to a single screenshot of an ongoing conversation.
pub async fn suggest(ctx: &PipelineContext, file: &StagedFile) -> Result<String, PipelineError> {
    if !ctx.config.reasoning.is_enabled() {
        return Err(PipelineError::Precondition(
            "reply suggestions require a reasoning provider".to_string(),
        ));
    }

    let raw = extract_files(std::slice::from_ref(file), ctx.recognizer.as_ref());
    let text: String = raw
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    if text.trim().is_empty() {
        return Err(PipelineError::no_content());
    }

    let tone = triage::scan_excerpt(ctx.provider.as_ref(), &text).await?;

    let value = ctx
        .provider
        .invoke(&StageRequest {
            stage: "suggest",
            system: "You draft one measured reply to the final message of a conversation \
                     excerpt, taking the assessed tone into account. Respond with JSON \
                     {\"reply\": \"...\"}."
                .to_string(),
            prompt: format!(
                "Excerpt:\n{}\n\nAssessed tone: {}\n",
                text,
                tone.tone.as_deref().unwrap_or("unknown")
            ),
        })
        .await?;

    value
        .get("reply")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| PipelineError::Upstream(anyhow!("reasoning response had no reply")))
}

async fn load_report(
    ctx: &PipelineContext,
    case_id: &str,
) -> Result<serde_json::Value, PipelineError> {
    for kind in [ArtifactKind::DeepReport, ArtifactKind::BaselineReport] {
        if let Some(report) = ctx
            .store
            .get::<serde_json::Value>(case_id, kind)
            .await
            .map_err(PipelineError::Upstream)?
        {
            return Ok(report);
        }
    }
    Err(PipelineError::Input(format!(
        "no stored report for case {}",
        case_id
    )))
}

/// Report progress and persist it as the case's Progress artifact.
async fn emit(
    ctx: &PipelineContext,
    reporter: &dyn ProgressReporter,
    case_id: &str,
    percent: u8,
    stage: &str,
) -> Result<(), PipelineError> {
    ctx.store
        .put(
            case_id,
            ArtifactKind::Progress,
            &ProgressRecord {
                percent,
                stage: stage.to_string(),
            },
        )
        .await
        .map_err(PipelineError::Upstream)?;

    reporter.report(ProgressEvent {
        case_id: case_id.to_string(),
        percent,
        stage: stage.to_string(),
    });

    Ok(())
}
