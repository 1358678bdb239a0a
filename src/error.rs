//! Pipeline error taxonomy.
//!
//! Three families with distinct retry semantics:
//! - [`PipelineError::Input`] — nothing usable in the uploaded files.
//!   Fatal for the case, never retried, message surfaced to the caller.
//! - [`PipelineError::Upstream`] — reasoning-service timeout or storage
//!   failure. Retried by the job carrier up to the configured limit.
//! - [`PipelineError::Precondition`] — the request itself cannot succeed
//!   (deep analysis without a completed baseline, too few messages).
//!   Fatal, never retried, distinct user-facing message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// No extractable content or corrupt input. Not retried.
    #[error("input error: {0}")]
    Input(String),

    /// Transient upstream failure (reasoning service, artifact store).
    /// Retried by the job carrier.
    #[error("upstream error: {0}")]
    Upstream(#[source] anyhow::Error),

    /// The request's preconditions do not hold. Not retried.
    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl PipelineError {
    pub fn no_content() -> Self {
        PipelineError::Input("no messages could be extracted from the uploaded files".to_string())
    }

    /// Whether the job carrier should re-run the case after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Upstream(_))
    }

    /// Short message safe to attach to the case record. Raw error detail
    /// stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Input(msg) | PipelineError::Precondition(msg) => msg.clone(),
            PipelineError::Upstream(_) => {
                "analysis could not be completed, please try again".to_string()
            }
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Upstream(e.into())
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        PipelineError::Upstream(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_is_retryable() {
        let err = PipelineError::Upstream(anyhow::anyhow!("timeout"));
        assert!(err.is_retryable());
    }

    #[test]
    fn input_and_precondition_are_fatal() {
        assert!(!PipelineError::no_content().is_retryable());
        assert!(!PipelineError::Precondition("no baseline".into()).is_retryable());
    }

    #[test]
    fn upstream_user_message_hides_detail() {
        let err = PipelineError::Upstream(anyhow::anyhow!("connection refused 10.0.0.3:443"));
        assert!(!err.user_message().contains("10.0.0.3"));
    }
}
