//! Chronicle stage: longitudinal narrative.
//!
//! Silence gaps become timeline events locally; themes, turning points
//! and the overall trajectory come from the reasoning service.

use serde::Deserialize;

use crate::error::PipelineError;
use crate::models::{
    ChronicleFindings, RecurringTheme, ReferenceLink, Timeline, TimelineEvent, Trajectory,
    TurningPoint,
};
use crate::reasoning::{ReasoningProvider, StageRequest};
use crate::stages::{decode_or_default, format_transcript};

pub const STAGE: &str = "chronicle";

const SYSTEM: &str = "You are a relationship historian reconstructing the arc of a two-party \
message history. You date events, track recurring themes, name turning points, and judge the \
overall trajectory, citing message indices. You respond with a single JSON object.";

#[derive(Debug, Default, Deserialize)]
struct ChronicleResponse {
    #[serde(default)]
    event_timeline: Vec<TimelineEvent>,
    #[serde(default)]
    recurring_themes: Vec<RecurringTheme>,
    #[serde(default)]
    turning_points: Vec<TurningPoint>,
    #[serde(default)]
    trajectory: Trajectory,
    #[serde(default)]
    reference_web: Vec<ReferenceLink>,
}

pub async fn analyze(
    provider: &dyn ReasoningProvider,
    timeline: &Timeline,
) -> Result<ChronicleFindings, PipelineError> {
    let prompt = format!(
        "Transcript:\n\n{}\n\n\
         Return JSON: {{\"event_timeline\": [{{\"date\", \"event_type\", \"description\", \
         \"significance\", \"message_indices\"}}], \"recurring_themes\": [{{\"theme\", \
         \"description\", \"first_occurrence\", \"frequency\", \"resolution_status\"}}], \
         \"turning_points\": [{{\"date\", \"description\", \"impact\", \"before_dynamic\", \
         \"after_dynamic\"}}], \"trajectory\": {{\"overall\" \
         (improving|stable|deteriorating|volatile), \"confidence\", \"description\", \
         \"phases\": [{{\"period\", \"characterization\", \"sentiment\"}}]}}, \
         \"reference_web\": [{{\"current_reference\", \"original_event\", \"pattern\"}}]}}.",
        format_transcript(&timeline.messages)
    );

    let value = provider
        .invoke(&StageRequest {
            stage: STAGE,
            system: SYSTEM.to_string(),
            prompt,
        })
        .await?;

    let resp: ChronicleResponse = decode_or_default(STAGE, value);

    let mut event_timeline = gap_events(timeline);
    event_timeline.extend(resp.event_timeline);

    Ok(ChronicleFindings {
        event_timeline,
        recurring_themes: resp.recurring_themes,
        turning_points: resp.turning_points,
        trajectory: resp.trajectory,
        reference_web: resp.reference_web,
    })
}

/// Every detected silence gap is a timeline event in its own right.
fn gap_events(timeline: &Timeline) -> Vec<TimelineEvent> {
    timeline
        .gaps
        .iter()
        .map(|gap| TimelineEvent {
            date: gap.start.format("%Y-%m-%d").to_string(),
            event_type: "silence".to_string(),
            description: format!(
                "No messages for {:.1} days (until {})",
                gap.duration_hours / 24.0,
                gap.end.format("%Y-%m-%d")
            ),
            significance: "communication gap".to_string(),
            message_indices: vec![gap.after_index],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::models::RawMessage;
    use crate::reasoning::DisabledProvider;
    use crate::timeline::stitch;

    fn dated(content: &str, timestamp: &str) -> RawMessage {
        let mut m = RawMessage::new("t.txt", content);
        m.timestamp = Some(timestamp.to_string());
        m
    }

    #[tokio::test]
    async fn gaps_become_events_even_without_reasoning() {
        let timeline = stitch(
            vec![
                dated("before the silence", "2024-03-01 09:00:00"),
                dated("after the silence", "2024-03-08 09:00:00"),
            ],
            &AnalysisConfig::default(),
        )
        .unwrap();

        let findings = analyze(&DisabledProvider, &timeline).await.unwrap();
        assert_eq!(findings.event_timeline.len(), 1);
        assert_eq!(findings.event_timeline[0].event_type, "silence");
        assert_eq!(findings.event_timeline[0].date, "2024-03-01");
        assert_eq!(findings.trajectory.overall, "stable");
    }
}
