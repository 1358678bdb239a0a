//! Triage stage: locate hot zones and red flags.
//!
//! First pass over the whole timeline. Output bounds what the deep
//! specialists read closely, so zone indices are clamped to the timeline
//! before anything downstream sees them.

use serde::Deserialize;
use serde_json::Value;

use crate::error::PipelineError;
use crate::models::{HotZone, RedFlag, Timeline, TriageFindings};
use crate::reasoning::{ReasoningProvider, StageRequest};
use crate::stages::{decode_or_default, format_transcript};

pub const STAGE: &str = "triage";

const SYSTEM: &str = "You are a forensic conversation analyst performing rapid triage on a \
two-party message history. You locate the stretches that deserve close reading and the \
concrete warning signs. You only report what the transcript supports and you respond with \
a single JSON object.";

#[derive(Debug, Default, Deserialize)]
struct ScanResponse {
    #[serde(default)]
    hot_zones: Vec<HotZone>,
    #[serde(default)]
    red_flags: Vec<RedFlag>,
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExcerptResponse {
    #[serde(default)]
    tone: Option<String>,
    #[serde(default)]
    tone_score: Option<u32>,
    #[serde(default)]
    hidden_aggression_score: Option<u32>,
    #[serde(default)]
    red_flags: Vec<RedFlag>,
    #[serde(default)]
    summary: Option<String>,
}

/// Scan the full timeline for hot zones and red flags.
pub async fn scan(
    provider: &dyn ReasoningProvider,
    timeline: &Timeline,
) -> Result<TriageFindings, PipelineError> {
    let transcript = format_transcript(&timeline.messages);
    let prompt = format!(
        "Transcript ({} messages, numbered by index):\n\n{}\n\n\
         Return JSON: {{\"hot_zones\": [{{\"start_index\", \"end_index\", \"intensity_score\" \
         (0-100), \"brief_summary\", \"indicators\"}}], \"red_flags\": [{{\"type\", \
         \"description\", \"confidence\" (0-100), \"message_indices\"}}], \"summary\"}}.",
        timeline.total_count, transcript
    );

    let value = provider
        .invoke(&StageRequest {
            stage: STAGE,
            system: SYSTEM.to_string(),
            prompt,
        })
        .await?;

    Ok(from_scan_response(value, timeline))
}

/// Lightweight variant for a single screenshot or short excerpt: tone and
/// aggression scores instead of zones.
pub async fn scan_excerpt(
    provider: &dyn ReasoningProvider,
    text: &str,
) -> Result<TriageFindings, PipelineError> {
    let prompt = format!(
        "Excerpt:\n\n{}\n\n\
         Return JSON: {{\"tone\", \"tone_score\" (0-100), \"hidden_aggression_score\" (0-100), \
         \"red_flags\": [{{\"type\", \"description\", \"confidence\"}}], \"summary\"}}.",
        text
    );

    let value = provider
        .invoke(&StageRequest {
            stage: STAGE,
            system: SYSTEM.to_string(),
            prompt,
        })
        .await?;

    let resp: ExcerptResponse = decode_or_default(STAGE, value);
    Ok(TriageFindings {
        hot_zones: Vec::new(),
        red_flags: resp.red_flags,
        total_messages_scanned: 1,
        tone: resp.tone,
        tone_score: resp.tone_score,
        hidden_aggression_score: resp.hidden_aggression_score,
        summary: resp.summary,
    })
}

fn from_scan_response(value: Value, timeline: &Timeline) -> TriageFindings {
    let resp: ScanResponse = decode_or_default(STAGE, value);

    let last = timeline.total_count.saturating_sub(1);
    let hot_zones = resp
        .hot_zones
        .into_iter()
        .filter(|z| z.start_index <= z.end_index)
        .map(|mut z| {
            z.start_index = z.start_index.min(last);
            z.end_index = z.end_index.min(last);
            z
        })
        .collect();

    TriageFindings {
        hot_zones,
        red_flags: resp.red_flags,
        total_messages_scanned: timeline.total_count,
        tone: None,
        tone_score: None,
        hidden_aggression_score: None,
        summary: resp.summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::models::RawMessage;
    use crate::reasoning::DisabledProvider;
    use crate::timeline::stitch;

    fn small_timeline() -> Timeline {
        let msgs = vec![
            RawMessage::new("a.txt", "hello"),
            RawMessage::new("a.txt", "world"),
            RawMessage::new("a.txt", "again"),
        ];
        stitch(msgs, &AnalysisConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn disabled_provider_yields_neutral_finding() {
        let timeline = small_timeline();
        let findings = scan(&DisabledProvider, &timeline).await.unwrap();
        assert!(findings.hot_zones.is_empty());
        assert!(findings.red_flags.is_empty());
        assert_eq!(findings.total_messages_scanned, 3);
    }

    #[test]
    fn zone_indices_are_clamped_and_inverted_zones_dropped() {
        let timeline = small_timeline();
        let value = serde_json::json!({
            "hot_zones": [
                { "start_index": 1, "end_index": 999, "intensity_score": 80.0,
                  "brief_summary": "escalation", "indicators": [] },
                { "start_index": 5, "end_index": 2, "intensity_score": 10.0,
                  "brief_summary": "inverted", "indicators": [] },
            ],
            "red_flags": [],
        });
        let findings = from_scan_response(value, &timeline);
        assert_eq!(findings.hot_zones.len(), 1);
        assert_eq!(findings.hot_zones[0].end_index, 2);
    }

    #[tokio::test]
    async fn excerpt_variant_scans_one_message() {
        let findings = scan_excerpt(&DisabledProvider, "fine. whatever.").await.unwrap();
        assert_eq!(findings.total_messages_scanned, 1);
        assert!(findings.tone.is_none());
    }
}
