//! Timeline stitching.
//!
//! Merges parsed messages from all files into one global, deduplicated,
//! chronologically sorted, gap-annotated timeline with per-sender stats.
//! Stitching is deterministic: identical input always produces an
//! identical [`Timeline`], which makes job-carrier retries safe.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::config::AnalysisConfig;
use crate::error::PipelineError;
use crate::models::{
    DateRange, GapRecord, RawMessage, Timeline, TimelineMessage, TimelineStats, UNKNOWN_SENDER,
};

/// Content prefix length used as the dedup key.
const DEDUP_PREFIX_CHARS: usize = 100;

/// Locale-specific patterns tried after ISO-8601, in order. These cover
/// the timestamp shapes the format parsers emit.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%y, %I:%M:%S %p",
    "%m/%d/%Y, %I:%M:%S %p",
    "%m/%d/%y, %I:%M %p",
    "%m/%d/%Y, %I:%M %p",
    "%m/%d/%y, %H:%M",
    "%m/%d/%Y, %H:%M",
    "%m/%d/%y %I:%M %p",
    "%m/%d/%Y %I:%M %p",
    "%b %d, %Y at %I:%M %p",
    "%b %d, %Y %I:%M %p",
];

/// Stitch raw messages into a timeline.
///
/// Fails with an input error when nothing survives extraction; downstream
/// stages assume at least one message exists.
pub fn stitch(messages: Vec<RawMessage>, config: &AnalysisConfig) -> Result<Timeline, PipelineError> {
    if messages.is_empty() {
        return Err(PipelineError::no_content());
    }

    // Resolve timestamps, then stable-sort: dated ascending, undated after
    // all dated entries in original encounter order.
    let mut timeline: Vec<TimelineMessage> = messages
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let resolved_time = raw.timestamp.as_deref().and_then(resolve_timestamp);
            TimelineMessage {
                raw,
                index,
                resolved_time,
            }
        })
        .collect();

    timeline.sort_by(|a, b| match (a.resolved_time, b.resolved_time) {
        (Some(ta), Some(tb)) => ta.cmp(&tb),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    reindex(&mut timeline);

    let mut deduplicated = deduplicate(timeline, config.dedup_window_secs);
    reindex(&mut deduplicated);

    let gaps = detect_gaps(&deduplicated, config.gap_threshold_hours);

    let mut senders = Vec::new();
    for msg in &deduplicated {
        if let Some(sender) = &msg.raw.sender {
            if !senders.contains(sender) {
                senders.push(sender.clone());
            }
        }
    }

    let stats = calculate_stats(&deduplicated);

    let dated: Vec<&TimelineMessage> = deduplicated
        .iter()
        .filter(|m| m.resolved_time.is_some())
        .collect();
    let date_range = DateRange {
        start: dated.first().and_then(|m| m.resolved_time),
        end: dated.last().and_then(|m| m.resolved_time),
    };

    Ok(Timeline {
        total_count: deduplicated.len(),
        messages: deduplicated,
        date_range,
        gaps,
        senders,
        stats,
    })
}

/// Resolve a raw timestamp string to an absolute UTC instant. ISO-8601
/// first, then the locale pattern list; unresolvable maps to `None`.
pub fn resolve_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc());
        }
    }

    None
}

fn reindex(messages: &mut [TimelineMessage]) {
    for (i, msg) in messages.iter_mut().enumerate() {
        msg.index = i;
    }
}

/// Drop near-duplicates. Two messages are duplicates when their trimmed
/// first-100-char content matches a previously kept message and either
/// side has no timestamp or the timestamps fall within the dedup window.
/// Prefix equality plus time proximity keeps re-encoded exports from
/// doubling messages without destroying legitimate recurring phrases.
fn deduplicate(messages: Vec<TimelineMessage>, window_secs: i64) -> Vec<TimelineMessage> {
    let mut result: Vec<TimelineMessage> = Vec::with_capacity(messages.len());
    let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for msg in messages {
        let key: String = msg.raw.content.trim().chars().take(DEDUP_PREFIX_CHARS).collect();

        if let Some(&kept_at) = seen.get(&key) {
            let prev = &result[kept_at];
            let is_duplicate = match (prev.resolved_time, msg.resolved_time) {
                (Some(a), Some(b)) => (b - a).num_seconds().abs() < window_secs,
                _ => true,
            };
            if is_duplicate {
                continue;
            }
        }

        seen.insert(key, result.len());
        result.push(msg);
    }

    result
}

/// Record silences longer than the threshold between chronologically
/// adjacent dated messages.
fn detect_gaps(messages: &[TimelineMessage], threshold_hours: i64) -> Vec<GapRecord> {
    let threshold_secs = threshold_hours * 3600;
    let mut gaps = Vec::new();

    for pair in messages.windows(2) {
        if let (Some(start), Some(end)) = (pair[0].resolved_time, pair[1].resolved_time) {
            let diff_secs = (end - start).num_seconds();
            if diff_secs > threshold_secs {
                gaps.push(GapRecord {
                    after_index: pair[0].index,
                    duration_hours: diff_secs as f64 / 3600.0,
                    start,
                    end,
                });
            }
        }
    }

    gaps
}

fn calculate_stats(messages: &[TimelineMessage]) -> TimelineStats {
    let mut stats = TimelineStats::default();
    let mut total_chars: std::collections::BTreeMap<String, usize> = Default::default();

    for msg in messages {
        let sender = msg
            .raw
            .sender
            .clone()
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
        *stats.messages_per_sender.entry(sender.clone()).or_insert(0) += 1;
        *total_chars.entry(sender).or_insert(0) += msg.raw.content.chars().count();
    }

    for (sender, count) in &stats.messages_per_sender {
        let chars = total_chars.get(sender).copied().unwrap_or(0);
        stats
            .avg_message_length
            .insert(sender.clone(), (chars as f64 / *count as f64).round() as usize);
    }

    let dated: Vec<DateTime<Utc>> = messages.iter().filter_map(|m| m.resolved_time).collect();
    if dated.len() >= 2 {
        let span_secs = (dated[dated.len() - 1] - dated[0]).num_seconds();
        stats.total_duration_days = (span_secs as f64 / 86_400.0 * 10.0).round() / 10.0;
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg_at(content: &str, timestamp: Option<&str>) -> RawMessage {
        let mut m = RawMessage::new("test.txt", content);
        m.timestamp = timestamp.map(str::to_string);
        m
    }

    fn msg_from(sender: &str, content: &str, timestamp: &str) -> RawMessage {
        let mut m = msg_at(content, Some(timestamp));
        m.sender = Some(sender.to_string());
        m
    }

    fn cfg() -> AnalysisConfig {
        AnalysisConfig::default()
    }

    #[test]
    fn empty_input_is_an_error_not_an_empty_timeline() {
        let err = stitch(Vec::new(), &cfg()).unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
    }

    #[test]
    fn ordering_with_missing_timestamps() {
        // [A@10:00, B(no time), C@09:00] stitches to [C, A, B].
        let msgs = vec![
            msg_at("A", Some("2024-03-15 10:00:00")),
            msg_at("B", None),
            msg_at("C", Some("2024-03-15 09:00:00")),
        ];
        let timeline = stitch(msgs, &cfg()).unwrap();
        let contents: Vec<&str> = timeline
            .messages
            .iter()
            .map(|m| m.raw.content.as_str())
            .collect();
        assert_eq!(contents, vec!["C", "A", "B"]);
    }

    #[test]
    fn indices_are_dense_and_zero_based() {
        let msgs = vec![
            msg_at("one", Some("2024-03-15 10:00:00")),
            msg_at("two", None),
            msg_at("three", Some("2024-03-14 10:00:00")),
            msg_at("four", None),
        ];
        let timeline = stitch(msgs, &cfg()).unwrap();
        for (i, m) in timeline.messages.iter().enumerate() {
            assert_eq!(m.index, i);
        }
    }

    #[test]
    fn undated_messages_preserve_encounter_order() {
        let msgs = vec![msg_at("x", None), msg_at("y", None), msg_at("z", None)];
        let timeline = stitch(msgs, &cfg()).unwrap();
        let contents: Vec<&str> = timeline
            .messages
            .iter()
            .map(|m| m.raw.content.as_str())
            .collect();
        assert_eq!(contents, vec!["x", "y", "z"]);
    }

    #[test]
    fn stitch_is_deterministic() {
        let make = || {
            vec![
                msg_from("Alex", "first", "2024-03-15 10:00:00"),
                msg_from("Sam", "second", "2024-03-18 10:00:00"),
                msg_at("loose line", None),
            ]
        };
        let a = stitch(make(), &cfg()).unwrap();
        let b = stitch(make(), &cfg()).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn dedup_collapses_within_window() {
        // 4 minutes apart: duplicate. 6 minutes apart: kept.
        let msgs = vec![
            msg_at("same message text", Some("2024-03-15 10:00:00")),
            msg_at("same message text", Some("2024-03-15 10:04:00")),
        ];
        let timeline = stitch(msgs, &cfg()).unwrap();
        assert_eq!(timeline.total_count, 1);

        let msgs = vec![
            msg_at("same message text", Some("2024-03-15 10:00:00")),
            msg_at("same message text", Some("2024-03-15 10:06:00")),
        ];
        let timeline = stitch(msgs, &cfg()).unwrap();
        assert_eq!(timeline.total_count, 2);
    }

    #[test]
    fn dedup_drops_undated_copy() {
        let msgs = vec![
            msg_at("hello there", Some("2024-03-15 10:00:00")),
            msg_at("hello there", None),
        ];
        let timeline = stitch(msgs, &cfg()).unwrap();
        assert_eq!(timeline.total_count, 1);
    }

    #[test]
    fn dedup_keys_on_first_100_chars() {
        let long_a = format!("{}{}", "a".repeat(100), "tail one");
        let long_b = format!("{}{}", "a".repeat(100), "tail two");
        let msgs = vec![
            msg_at(&long_a, Some("2024-03-15 10:00:00")),
            msg_at(&long_b, Some("2024-03-15 10:01:00")),
        ];
        let timeline = stitch(msgs, &cfg()).unwrap();
        // Same 100-char prefix within the window collapses despite
        // differing tails.
        assert_eq!(timeline.total_count, 1);
    }

    #[test]
    fn gap_threshold_boundary() {
        // 48h01m apart: one gap. 47h59m apart: none.
        let msgs = vec![
            msg_at("before", Some("2024-03-01 00:00:00")),
            msg_at("after", Some("2024-03-03 00:01:00")),
        ];
        let timeline = stitch(msgs, &cfg()).unwrap();
        assert_eq!(timeline.gaps.len(), 1);
        assert_eq!(timeline.gaps[0].after_index, 0);
        assert!(timeline.gaps[0].duration_hours > 48.0);

        let msgs = vec![
            msg_at("before", Some("2024-03-01 00:00:00")),
            msg_at("after", Some("2024-03-02 23:59:00")),
        ];
        let timeline = stitch(msgs, &cfg()).unwrap();
        assert!(timeline.gaps.is_empty());
    }

    #[test]
    fn sender_stats_sum_to_total_count() {
        let msgs = vec![
            msg_from("Alex", "one", "2024-03-15 10:00:00"),
            msg_from("Sam", "two", "2024-03-15 10:01:00"),
            msg_at("no sender line", None),
        ];
        let timeline = stitch(msgs, &cfg()).unwrap();
        let sum: usize = timeline.stats.messages_per_sender.values().sum();
        assert_eq!(sum, timeline.total_count);
        assert_eq!(timeline.senders, vec!["Alex", "Sam"]);
        assert_eq!(timeline.stats.messages_per_sender[UNKNOWN_SENDER], 1);
    }

    #[test]
    fn date_range_and_duration() {
        let msgs = vec![
            msg_from("Alex", "start", "2024-03-01 00:00:00"),
            msg_from("Sam", "end", "2024-03-11 00:00:00"),
        ];
        let timeline = stitch(msgs, &cfg()).unwrap();
        assert!(timeline.date_range.start.is_some());
        assert_eq!(timeline.stats.total_duration_days, 10.0);
    }

    #[test]
    fn resolve_timestamp_formats() {
        assert!(resolve_timestamp("2024-03-15T14:30:00Z").is_some());
        assert!(resolve_timestamp("2024-03-15 14:30:00").is_some());
        assert!(resolve_timestamp("3/15/24, 2:30:15 PM").is_some());
        assert!(resolve_timestamp("3/15/2024, 2:30 PM").is_some());
        assert!(resolve_timestamp("Mar 15, 2024 at 2:30 PM").is_some());
        assert!(resolve_timestamp("not a date").is_none());
        assert!(resolve_timestamp("2:30 PM").is_none());
    }
}
