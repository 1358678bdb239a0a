//! Analysis stages.
//!
//! Each stage is an async function over `(provider, timeline, prior
//! findings)` returning a typed finding. Stages compute what they can
//! locally and treat the reasoning provider as enrichment: a disabled
//! backend or an undecodable response degrades to the local finding, it
//! never fails the stage. Provider transport errors do propagate, they
//! are the retryable class.

pub mod chronicle;
pub mod dynamics;
pub mod gottman;
pub mod triage;
pub mod verifier;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::TimelineMessage;

/// Prompt payloads are capped so a years-long export cannot blow the
/// provider's context window.
const MAX_TRANSCRIPT_CHARS: usize = 40_000;

const TRUNCATION_MARKER: &str = "\n... [transcript truncated]";

/// Render messages as numbered transcript lines for a reasoning prompt.
pub(crate) fn format_transcript(messages: &[TimelineMessage]) -> String {
    let mut out = String::new();

    for msg in messages {
        let line = match (&msg.resolved_time, &msg.raw.sender) {
            (Some(t), Some(sender)) => format!(
                "[{}] {} {}: {}\n",
                msg.index,
                t.format("%Y-%m-%d %H:%M"),
                sender,
                msg.raw.content
            ),
            (Some(t), None) => format!(
                "[{}] {} {}\n",
                msg.index,
                t.format("%Y-%m-%d %H:%M"),
                msg.raw.content
            ),
            (None, Some(sender)) => {
                format!("[{}] {}: {}\n", msg.index, sender, msg.raw.content)
            }
            (None, None) => format!("[{}] {}\n", msg.index, msg.raw.content),
        };

        if out.len() + line.len() > MAX_TRANSCRIPT_CHARS {
            out.push_str(TRUNCATION_MARKER);
            break;
        }
        out.push_str(&line);
    }

    out
}

/// Slice of the timeline covered by an index range, clamped to bounds.
pub(crate) fn messages_in_range(
    messages: &[TimelineMessage],
    start_index: usize,
    end_index: usize,
) -> &[TimelineMessage] {
    if messages.is_empty() || start_index > end_index {
        return &[];
    }
    let start = start_index.min(messages.len() - 1);
    let end = end_index.min(messages.len() - 1);
    &messages[start..=end]
}

/// Decode a provider payload into a stage's response shape. `Null` (the
/// disabled backend) and malformed payloads both yield the default; the
/// latter is logged since it usually means a prompt drifted.
pub(crate) fn decode_or_default<T: DeserializeOwned + Default>(stage: &str, value: Value) -> T {
    if value.is_null() {
        return T::default();
    }
    match serde_json::from_value(value) {
        Ok(decoded) => decoded,
        Err(err) => {
            tracing::warn!(stage, error = %err, "undecodable reasoning response, using local finding");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawMessage;

    fn msg(index: usize, content: &str) -> TimelineMessage {
        TimelineMessage {
            raw: RawMessage::new("t.txt", content),
            index,
            resolved_time: None,
        }
    }

    #[test]
    fn transcript_is_capped() {
        let messages: Vec<TimelineMessage> = (0..5000)
            .map(|i| msg(i, &"x".repeat(50)))
            .collect();
        let transcript = format_transcript(&messages);
        assert!(transcript.len() <= MAX_TRANSCRIPT_CHARS + TRUNCATION_MARKER.len());
        assert!(transcript.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn range_is_clamped() {
        let messages: Vec<TimelineMessage> = (0..10).map(|i| msg(i, "m")).collect();
        assert_eq!(messages_in_range(&messages, 3, 99).len(), 7);
        assert_eq!(messages_in_range(&messages, 8, 2).len(), 0);
        assert_eq!(messages_in_range(&[], 0, 5).len(), 0);
    }

    #[test]
    fn decode_falls_back_on_garbage() {
        #[derive(Default, serde::Deserialize, PartialEq, Debug)]
        struct Resp {
            n: u32,
        }
        let ok: Resp = decode_or_default("test", serde_json::json!({ "n": 3 }));
        assert_eq!(ok.n, 3);
        let null: Resp = decode_or_default("test", Value::Null);
        assert_eq!(null, Resp::default());
        let bad: Resp = decode_or_default("test", serde_json::json!({ "n": "not a number" }));
        assert_eq!(bad, Resp::default());
    }
}
