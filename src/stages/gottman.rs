//! Behavior-coding stage.
//!
//! Codes the triage hot zones for the four corrosive behaviors
//! (criticism, contempt, defensiveness, stonewalling) plus repair
//! attempts, then reduces the tallies to percentile buckets and a single
//! relationship health score. The score arithmetic is local and fixed;
//! only the per-zone coding comes from the reasoning service.

use serde::Deserialize;

use crate::error::PipelineError;
use crate::models::{
    BehaviorExample, BehaviorTally, GottmanFindings, RepairAttempts, RepairExample, Timeline,
    TriageFindings,
};
use crate::reasoning::{ReasoningProvider, StageRequest};
use crate::stages::{decode_or_default, format_transcript, messages_in_range};

pub const STAGE: &str = "gottman";

const SYSTEM: &str = "You are a couples-communication researcher coding a transcript segment \
for criticism, contempt, defensiveness, stonewalling, and repair attempts. Count only clear \
instances, quote them exactly, and respond with a single JSON object.";

#[derive(Debug, Default, Deserialize)]
struct ZoneResponse {
    #[serde(default)]
    criticism: Vec<BehaviorExample>,
    #[serde(default)]
    contempt: Vec<BehaviorExample>,
    #[serde(default)]
    defensiveness: Vec<BehaviorExample>,
    #[serde(default)]
    stonewalling: Vec<BehaviorExample>,
    #[serde(default)]
    repair_attempts: Vec<RepairExample>,
}

/// Code each hot zone and aggregate into findings. With no zones the whole
/// timeline is coded as one segment.
pub async fn analyze(
    provider: &dyn ReasoningProvider,
    triage: &TriageFindings,
    timeline: &Timeline,
) -> Result<GottmanFindings, PipelineError> {
    let ranges: Vec<(usize, usize)> = if triage.hot_zones.is_empty() {
        vec![(0, timeline.total_count.saturating_sub(1))]
    } else {
        triage
            .hot_zones
            .iter()
            .map(|z| (z.start_index, z.end_index))
            .collect()
    };

    let mut merged = ZoneResponse::default();

    for (start, end) in ranges {
        let segment = messages_in_range(&timeline.messages, start, end);
        if segment.is_empty() {
            continue;
        }

        let prompt = format!(
            "Segment (messages {}..{}):\n\n{}\n\n\
             Return JSON: {{\"criticism\" | \"contempt\" | \"defensiveness\" | \
             \"stonewalling\": [{{\"index\", \"quote\", \"explanation\", \"severity\"}}], \
             \"repair_attempts\": [{{\"index\", \"quote\", \"outcome\" \
             (\"accepted\"|\"rejected\"|\"ignored\")}}]}}.",
            start,
            end,
            format_transcript(segment)
        );

        let value = provider
            .invoke(&StageRequest {
                stage: STAGE,
                system: SYSTEM.to_string(),
                prompt,
            })
            .await?;

        let zone: ZoneResponse = decode_or_default(STAGE, value);
        merged.criticism.extend(zone.criticism);
        merged.contempt.extend(zone.contempt);
        merged.defensiveness.extend(zone.defensiveness);
        merged.stonewalling.extend(zone.stonewalling);
        merged.repair_attempts.extend(zone.repair_attempts);
    }

    Ok(aggregate(merged, timeline.total_count))
}

fn aggregate(merged: ZoneResponse, total_messages: usize) -> GottmanFindings {
    let criticism = tally(merged.criticism, total_messages);
    let contempt = tally(merged.contempt, total_messages);
    let defensiveness = tally(merged.defensiveness, total_messages);
    let stonewalling = tally(merged.stonewalling, total_messages);
    let repair_attempts = repair_tally(merged.repair_attempts);

    let overall_health_score = health_score(
        criticism.count,
        contempt.count,
        defensiveness.count,
        stonewalling.count,
        repair_attempts.success_rate,
    );

    GottmanFindings {
        criticism,
        contempt,
        defensiveness,
        stonewalling,
        repair_attempts,
        overall_health_score,
    }
}

fn tally(examples: Vec<BehaviorExample>, total_messages: usize) -> BehaviorTally {
    let count = examples.len();
    let per_1000 = if total_messages == 0 {
        0.0
    } else {
        count as f64 * 1000.0 / total_messages as f64
    };
    BehaviorTally {
        count,
        examples,
        frequency_per_1000: per_1000.round() as u32,
        percentile: percentile_bucket(per_1000),
    }
}

fn repair_tally(examples: Vec<RepairExample>) -> RepairAttempts {
    let count = examples.len();
    let accepted = examples.iter().filter(|e| e.outcome == "accepted").count();
    let success_rate = if count == 0 {
        0
    } else {
        (accepted as f64 * 100.0 / count as f64).round() as u32
    };
    RepairAttempts {
        count,
        success_rate,
        examples,
    }
}

/// Bucket a frequency-per-1000-messages into a coarse population
/// percentile.
pub fn percentile_bucket(per_1000: f64) -> u32 {
    if per_1000 < 5.0 {
        25
    } else if per_1000 < 10.0 {
        50
    } else if per_1000 < 20.0 {
        75
    } else {
        95
    }
}

/// Relationship health score on a 0-100 scale. Each behavior subtracts a
/// capped penalty; repair success adds a capped bonus; the result is
/// clamped at both ends.
pub fn health_score(
    criticism: usize,
    contempt: usize,
    defensiveness: usize,
    stonewalling: usize,
    repair_success_rate: u32,
) -> u32 {
    let score = 100.0
        - (criticism as f64 * 2.0).min(25.0)
        - (contempt as f64 * 3.0).min(30.0)
        - (defensiveness as f64 * 1.5).min(20.0)
        - (stonewalling as f64 * 2.0).min(25.0)
        + (repair_success_rate as f64 * 0.2).min(15.0);

    score.clamp(0.0, 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::models::RawMessage;
    use crate::reasoning::DisabledProvider;
    use crate::timeline::stitch;

    #[test]
    fn health_score_clamps_at_both_ends() {
        // No behaviors, perfect repair: bonus cannot push past 100.
        assert_eq!(health_score(0, 0, 0, 0, 100), 100);
        // Saturated penalties with no repair: floor at 0, not negative.
        assert_eq!(health_score(50, 50, 50, 50, 0), 0);
    }

    #[test]
    fn health_score_penalties_are_capped() {
        // 13 criticisms would be 26 points raw; the cap keeps it at 25.
        assert_eq!(health_score(13, 0, 0, 0, 0), 75);
        assert_eq!(health_score(100, 0, 0, 0, 0), 75);
    }

    #[test]
    fn percentile_buckets() {
        assert_eq!(percentile_bucket(0.0), 25);
        assert_eq!(percentile_bucket(4.9), 25);
        assert_eq!(percentile_bucket(5.0), 50);
        assert_eq!(percentile_bucket(9.9), 50);
        assert_eq!(percentile_bucket(10.0), 75);
        assert_eq!(percentile_bucket(19.9), 75);
        assert_eq!(percentile_bucket(20.0), 95);
    }

    #[test]
    fn tally_records_frequency_per_1000() {
        let examples = vec![
            BehaviorExample {
                index: 3,
                quote: "you always do this".into(),
                explanation: "global character attack".into(),
                severity: "high".into(),
            },
            BehaviorExample {
                index: 7,
                quote: "typical".into(),
                explanation: "dismissive generalization".into(),
                severity: "low".into(),
            },
        ];
        let t = tally(examples, 500);
        assert_eq!(t.count, 2);
        assert_eq!(t.frequency_per_1000, 4);
        assert_eq!(t.percentile, 25);

        let empty = tally(Vec::new(), 0);
        assert_eq!(empty.frequency_per_1000, 0);
    }

    #[test]
    fn repair_success_rate_from_outcomes() {
        let examples = vec![
            RepairExample {
                index: 1,
                quote: "sorry".into(),
                outcome: "accepted".into(),
            },
            RepairExample {
                index: 2,
                quote: "my bad".into(),
                outcome: "ignored".into(),
            },
        ];
        let repairs = repair_tally(examples);
        assert_eq!(repairs.count, 2);
        assert_eq!(repairs.success_rate, 50);
    }

    #[tokio::test]
    async fn disabled_provider_scores_clean_timeline_at_100() {
        let msgs = vec![
            RawMessage::new("a.txt", "morning"),
            RawMessage::new("a.txt", "hi there"),
        ];
        let timeline = stitch(msgs, &AnalysisConfig::default()).unwrap();
        let triage = TriageFindings {
            total_messages_scanned: timeline.total_count,
            ..Default::default()
        };
        let findings = analyze(&DisabledProvider, &triage, &timeline).await.unwrap();
        assert_eq!(findings.overall_health_score, 100);
        assert_eq!(findings.criticism.count, 0);
        assert_eq!(findings.criticism.frequency_per_1000, 0);
        assert_eq!(findings.criticism.percentile, 25);
    }
}
