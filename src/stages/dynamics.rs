//! Interaction-dynamics stage.
//!
//! Pronoun usage and response latency are measured locally from the
//! timeline; named patterns, attachment styles and interaction loops come
//! from the reasoning service.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::PipelineError;
use crate::models::{
    AttachmentStyles, DetectedPattern, DynamicsFindings, InteractionLoop, LatencyProfile,
    PronounUsage, Timeline,
};
use crate::reasoning::{ReasoningProvider, StageRequest};
use crate::stages::{decode_or_default, format_transcript};

pub const STAGE: &str = "dynamics";

const SYSTEM: &str = "You are a relational-dynamics analyst reading a two-party message \
history. You identify named interaction patterns, likely attachment styles, and recurring \
loops, citing message indices as evidence. You respond with a single JSON object.";

static I_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(i|i'm|i've|i'll|i'd|me|my|mine)\b").expect("valid regex")
});
static WE_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(we|we're|we've|we'll|we'd|us|our|ours)\b").expect("valid regex")
});

/// Turnovers slower than a day say more about schedules than dynamics.
const MAX_LATENCY_SECS: i64 = 24 * 3600;

#[derive(Debug, Default, Deserialize)]
struct DynamicsResponse {
    #[serde(default)]
    patterns: Vec<DetectedPattern>,
    #[serde(default)]
    attachment_style: AttachmentStyles,
    #[serde(default)]
    interaction_loops: Vec<InteractionLoop>,
}

pub async fn analyze(
    provider: &dyn ReasoningProvider,
    timeline: &Timeline,
) -> Result<DynamicsFindings, PipelineError> {
    let pronoun_analysis = pronoun_usage(timeline);
    let latency_analysis = response_latency(timeline);

    let prompt = format!(
        "Transcript:\n\n{}\n\n\
         Return JSON: {{\"patterns\": [{{\"name\", \"detected\", \"confidence\" (0-100), \
         \"evidence\", \"details\"}}], \"attachment_style\": {{\"person_a\" | \"person_b\": \
         {{\"style\" (secure|anxious|avoidant|disorganized|unknown), \"confidence\"}}}}, \
         \"interaction_loops\": [{{\"type\", \"description\", \"frequency\", \
         \"typical_trigger\", \"typical_resolution\"}}]}}.",
        format_transcript(&timeline.messages)
    );

    let value = provider
        .invoke(&StageRequest {
            stage: STAGE,
            system: SYSTEM.to_string(),
            prompt,
        })
        .await?;

    let resp: DynamicsResponse = decode_or_default(STAGE, value);

    Ok(DynamicsFindings {
        patterns: resp.patterns,
        attachment_style: resp.attachment_style,
        pronoun_analysis,
        latency_analysis,
        interaction_loops: resp.interaction_loops,
    })
}

/// Per-sender I-versus-we word counts. Ratio divides by at least one so a
/// we-free history still yields a finite number.
fn pronoun_usage(timeline: &Timeline) -> BTreeMap<String, PronounUsage> {
    let mut usage: BTreeMap<String, PronounUsage> = BTreeMap::new();

    for msg in &timeline.messages {
        let Some(sender) = &msg.raw.sender else {
            continue;
        };
        let entry = usage.entry(sender.clone()).or_default();
        entry.i_count += I_WORD.find_iter(&msg.raw.content).count();
        entry.we_count += WE_WORD.find_iter(&msg.raw.content).count();
    }

    for profile in usage.values_mut() {
        profile.ratio = profile.i_count as f64 / profile.we_count.max(1) as f64;
    }

    usage
}

/// Average reply latency per responding sender, over sender-change pairs
/// where both sides are dated and the turnover is under a day.
fn response_latency(timeline: &Timeline) -> BTreeMap<String, LatencyProfile> {
    let mut samples: BTreeMap<String, Vec<i64>> = BTreeMap::new();

    for pair in timeline.messages.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let (Some(prev_sender), Some(next_sender)) = (&prev.raw.sender, &next.raw.sender) else {
            continue;
        };
        if prev_sender == next_sender {
            continue;
        }
        let (Some(t0), Some(t1)) = (prev.resolved_time, next.resolved_time) else {
            continue;
        };
        let secs = (t1 - t0).num_seconds();
        if secs >= 0 && secs < MAX_LATENCY_SECS {
            samples.entry(next_sender.clone()).or_default().push(secs);
        }
    }

    samples
        .into_iter()
        .map(|(sender, secs)| {
            let avg_minutes = secs.iter().sum::<i64>() as f64 / secs.len() as f64 / 60.0;
            let pattern = latency_pattern(avg_minutes).to_string();
            (sender, LatencyProfile { avg_minutes, pattern })
        })
        .collect()
}

fn latency_pattern(avg_minutes: f64) -> &'static str {
    if avg_minutes < 5.0 {
        "rapid"
    } else if avg_minutes < 60.0 {
        "engaged"
    } else if avg_minutes < 360.0 {
        "measured"
    } else {
        "delayed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::models::RawMessage;
    use crate::reasoning::DisabledProvider;
    use crate::timeline::stitch;

    fn msg(sender: &str, content: &str, timestamp: &str) -> RawMessage {
        let mut m = RawMessage::new("t.txt", content);
        m.sender = Some(sender.to_string());
        m.timestamp = Some(timestamp.to_string());
        m
    }

    fn timeline(msgs: Vec<RawMessage>) -> Timeline {
        stitch(msgs, &AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn pronoun_counts_per_sender() {
        let t = timeline(vec![
            msg("Alex", "I think we should talk. My view matters.", "2024-03-15 10:00:00"),
            msg("Sam", "We agreed. I'll be there.", "2024-03-15 10:05:00"),
        ]);
        let usage = pronoun_usage(&t);
        assert_eq!(usage["Alex"].i_count, 2); // "I", "My"
        assert_eq!(usage["Alex"].we_count, 1);
        assert_eq!(usage["Sam"].i_count, 1); // "I'll"
        assert_eq!(usage["Sam"].we_count, 1);
    }

    #[test]
    fn pronoun_ratio_survives_zero_we() {
        let t = timeline(vec![msg("Alex", "I did it. I said so.", "2024-03-15 10:00:00")]);
        let usage = pronoun_usage(&t);
        assert_eq!(usage["Alex"].ratio, 2.0);
    }

    #[test]
    fn latency_skips_same_sender_and_long_gaps() {
        let t = timeline(vec![
            msg("Alex", "first", "2024-03-15 10:00:00"),
            msg("Alex", "double text", "2024-03-15 10:01:00"),
            msg("Sam", "reply in ten", "2024-03-15 10:11:00"),
            msg("Alex", "two days later", "2024-03-17 12:00:00"),
        ]);
        let latency = response_latency(&t);
        // Sam replied in 10 minutes; Alex's 2-day turnover is excluded.
        assert_eq!(latency.len(), 1);
        assert!((latency["Sam"].avg_minutes - 10.0).abs() < 0.01);
        assert_eq!(latency["Sam"].pattern, "engaged");
    }

    #[tokio::test]
    async fn disabled_provider_keeps_local_metrics() {
        let t = timeline(vec![
            msg("Alex", "I wonder", "2024-03-15 10:00:00"),
            msg("Sam", "we'll see", "2024-03-15 10:02:00"),
        ]);
        let findings = analyze(&DisabledProvider, &t).await.unwrap();
        assert!(findings.patterns.is_empty());
        assert_eq!(findings.attachment_style.person_a.style, "unknown");
        assert_eq!(findings.pronoun_analysis.len(), 2);
        assert_eq!(findings.latency_analysis["Sam"].pattern, "rapid");
    }
}
