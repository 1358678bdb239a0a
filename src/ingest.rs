//! File staging and the `chs ingest` flow.
//!
//! Reads chat exports from disk (files or whole directories), stages them
//! as base64 payloads under a fresh case, and either runs the pipeline
//! inline or hands the case to the durable queue.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use walkdir::WalkDir;

use crate::cases::AnalysisType;
use crate::extract::content_type_for;
use crate::models::StagedFile;
use crate::pipeline::{self, PipelineContext};
use crate::progress::{Monotonic, ProgressMode};
use crate::queue::JobQueue;
use crate::store::ArtifactKind;

/// Read every given path into a staged payload. Directories are walked
/// recursively; hidden entries are skipped the way export folders from
/// macOS tend to need.
pub fn stage_paths(paths: &[PathBuf]) -> Result<Vec<StagedFile>> {
    let mut staged = Vec::new();

    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_file() && !is_hidden(entry.path()) {
                    staged.push(stage_file(entry.path())?);
                }
            }
        } else if path.is_file() {
            staged.push(stage_file(path)?);
        } else {
            bail!("no such file or directory: {}", path.display());
        }
    }

    if staged.is_empty() {
        bail!("no files found to ingest");
    }

    Ok(staged)
}

fn stage_file(path: &Path) -> Result<StagedFile> {
    let data = std::fs::read(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(StagedFile {
        content_type: content_type_for(&filename),
        filename,
        data: BASE64.encode(&data),
    })
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Create a case for the conversation, stage the files, and run or
/// enqueue it. Returns the case id.
pub async fn run_ingest(
    ctx: &PipelineContext,
    queue: &JobQueue,
    conversation_id: &str,
    paths: &[PathBuf],
    kind: AnalysisType,
    enqueue: bool,
    progress: ProgressMode,
) -> Result<String> {
    let staged = stage_paths(paths)?;
    let case = ctx.cases.create(conversation_id, kind).await?;
    ctx.store
        .put(&case.id, ArtifactKind::StagedFiles, &staged)
        .await?;

    tracing::info!(
        case_id = %case.id,
        conversation_id,
        kind = kind.as_str(),
        files = staged.len(),
        "case staged"
    );

    if enqueue {
        let job = queue
            .enqueue(&case.id, kind, ctx.config.worker.max_attempts)
            .await?;
        println!("case {} queued as job {}", case.id, job.id);
    } else {
        let reporter = Monotonic::new(progress.reporter());
        match pipeline::run_case(ctx, &case.id, &reporter).await {
            Ok(()) => println!("case {} completed", case.id),
            Err(err) => {
                ctx.cases.mark_failed(&case.id, &err.user_message()).await?;
                bail!("case {} failed: {}", case.id, err.user_message());
            }
        }
    }

    Ok(case.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_paths_walks_directories_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("chat.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/export.json"), "[]").unwrap();
        std::fs::write(dir.path().join(".DS_Store"), "junk").unwrap();

        let staged = stage_paths(&[dir.path().to_path_buf()]).unwrap();
        let mut names: Vec<&str> = staged.iter().map(|f| f.filename.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["chat.txt", "export.json"]);
    }

    #[test]
    fn stage_paths_rejects_missing_and_empty() {
        assert!(stage_paths(&[PathBuf::from("/no/such/file")]).is_err());

        let dir = tempfile::tempdir().unwrap();
        assert!(stage_paths(&[dir.path().to_path_buf()]).is_err());
    }

    #[test]
    fn stage_file_infers_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.zip");
        std::fs::write(&path, "zzz").unwrap();
        let staged = stage_file(&path).unwrap();
        assert_eq!(staged.content_type, "application/zip");
        assert_eq!(BASE64.decode(staged.data).unwrap(), b"zzz");
    }
}
