//! Chat-export format parsers.
//!
//! An ordered list of pure recognizers, tried in priority order; the first
//! parser producing at least one message wins, and a line-split fallback
//! guarantees the text always degrades to some usable message list.
//! Parsers never partially match: either the text conforms to a format or
//! the parser returns `None`.

use regex::Regex;
use serde_json::json;
use std::sync::LazyLock;

use crate::models::RawMessage;

static WHATSAPP_BRACKET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[(\d{1,2}/\d{1,2}/\d{2,4},?\s+\d{1,2}:\d{2}(?::\d{2})?\s*(?:[AP]M)?)\]\s+([^:]+):\s+(.*)$",
    )
    .expect("valid regex")
});

static WHATSAPP_DASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2}/\d{1,2}/\d{2,4},?\s+\d{1,2}:\d{2}(?:\s*[AP]M)?)\s+-\s+([^:]+):\s+(.*)$")
        .expect("valid regex")
});

static IMESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]{3}\s+\d{1,2},\s+\d{4}\s+at\s+\d{1,2}:\d{2}\s+[AP]M)\s+-\s+([^:]+):\s+(.*)$")
        .expect("valid regex")
});

static GENERIC_TIMESTAMPED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}[\sT]\d{2}:\d{2}(?::\d{2})?)\s*[-\u{2013}]\s*([^:]+):\s+(.*)$")
        .expect("valid regex")
});

static OCR_CHAT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2}:\d{2}(?:\s*[AP]M)?)\s+(.+)$").expect("valid regex")
});

/// Parse exported chat text into messages, trying platform formats in
/// priority order before falling back to one message per non-blank line.
pub fn parse_text(text: &str, source: &str) -> Vec<RawMessage> {
    let parsers: [(&str, &LazyLock<Regex>); 4] = [
        ("whatsapp", &WHATSAPP_BRACKET),
        ("whatsapp", &WHATSAPP_DASH),
        ("imessage", &IMESSAGE),
        ("generic", &GENERIC_TIMESTAMPED),
    ];

    for (format, pattern) in parsers {
        if let Some(messages) = parse_dialogue(text, source, format, pattern) {
            return messages;
        }
    }

    fallback_lines(text, source)
}

/// Line-oriented dialogue parser shared by all timestamped formats.
/// A line matching the header pattern starts a new message; lines that
/// do not match continue the previous message's body. Returns `None`
/// when no line matches (the format does not apply).
fn parse_dialogue(
    text: &str,
    source: &str,
    format: &str,
    pattern: &Regex,
) -> Option<Vec<RawMessage>> {
    let mut messages: Vec<RawMessage> = Vec::new();

    for line in text.lines() {
        if let Some(caps) = pattern.captures(line) {
            let mut msg = RawMessage::new(source, caps[3].trim());
            msg.timestamp = Some(caps[1].trim().to_string());
            msg.sender = Some(caps[2].trim().to_string());
            messages.push(msg.tagged("type", json!(format)));
        } else if let Some(last) = messages.last_mut() {
            // Continuation of a multi-line body.
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                last.content.push('\n');
                last.content.push_str(trimmed);
            }
        }
    }

    if messages.is_empty() {
        None
    } else {
        Some(messages)
    }
}

/// Parse a JSON export: an array of objects with loosely named content,
/// timestamp, and sender fields. Returns empty on anything else.
pub fn parse_json_export(text: &str, source: &str) -> Vec<RawMessage> {
    let parsed: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let items = match parsed.as_array() {
        Some(items) => items,
        None => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| {
            let content = first_string(item, &["content", "message", "text"])?;
            let mut msg = RawMessage::new(source, &content);
            msg.timestamp = first_string(item, &["timestamp", "date", "time"]);
            msg.sender = first_string(item, &["sender", "from", "author"]);
            Some(msg.tagged("type", json!("json")))
        })
        .collect()
}

fn first_string(item: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        item.get(k)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Parse recognized screenshot text: `HH:MM[ AM/PM] body` lines become
/// timestamped messages. Returns empty when no line matches.
pub fn parse_ocr_chat_text(text: &str, source: &str) -> Vec<RawMessage> {
    text.lines()
        .filter_map(|line| {
            let caps = OCR_CHAT_LINE.captures(line.trim())?;
            let mut msg = RawMessage::new(source, caps[2].trim());
            msg.timestamp = Some(caps[1].to_string());
            Some(msg.tagged("type", json!("ocr_chat")))
        })
        .collect()
}

/// No-op fallback: every non-blank line is one message with no sender or
/// timestamp.
fn fallback_lines(text: &str, source: &str) -> Vec<RawMessage> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| RawMessage::new(source, l).tagged("type", json!("text_line")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whatsapp_bracket_format() {
        let text = "[3/15/24, 2:30:15 PM] Alex: hey are you around?\n[3/15/24, 2:31:02 PM] Sam: yeah what's up";
        let msgs = parse_text(text, "chat.txt");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].sender.as_deref(), Some("Alex"));
        assert_eq!(msgs[0].timestamp.as_deref(), Some("3/15/24, 2:30:15 PM"));
        assert_eq!(msgs[1].content, "yeah what's up");
    }

    #[test]
    fn whatsapp_dash_format() {
        let text = "3/15/24, 14:30 - Alex: first\n3/15/24, 14:31 - Sam: second";
        let msgs = parse_text(text, "chat.txt");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].tags["type"], json!("whatsapp"));
    }

    #[test]
    fn imessage_format() {
        let text = "Mar 15, 2024 at 2:30 PM - John: Hey there";
        let msgs = parse_text(text, "export.txt");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].sender.as_deref(), Some("John"));
        assert_eq!(msgs[0].tags["type"], json!("imessage"));
    }

    #[test]
    fn generic_timestamped_format() {
        let text = "2024-03-15 14:30:00 - Sam: did you see this";
        let msgs = parse_text(text, "log.txt");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].timestamp.as_deref(), Some("2024-03-15 14:30:00"));
    }

    #[test]
    fn multiline_body_attaches_to_previous_message() {
        let text = "[3/15/24, 2:30 PM] Alex: first line\nsecond line of the same message\n[3/15/24, 2:32 PM] Sam: reply";
        let msgs = parse_text(text, "chat.txt");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "first line\nsecond line of the same message");
    }

    #[test]
    fn fallback_splits_non_blank_lines() {
        let text = "just some text\n\nanother line\n";
        let msgs = parse_text(text, "notes.txt");
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].timestamp.is_none());
        assert!(msgs[0].sender.is_none());
        assert_eq!(msgs[1].tags["type"], json!("text_line"));
    }

    #[test]
    fn first_matching_format_wins() {
        // Bracketed WhatsApp lines also resemble free text; the bracket
        // parser runs first and claims them.
        let text = "[3/15/24, 2:30 PM] Alex: hello";
        let msgs = parse_text(text, "chat.txt");
        assert_eq!(msgs[0].tags["type"], json!("whatsapp"));
    }

    #[test]
    fn json_export_with_field_aliases() {
        let text = r#"[{"message": "hi", "from": "Alex", "date": "2024-03-15T14:30:00Z"},
                       {"text": "hello", "author": "Sam", "time": "2024-03-15T14:31:00Z"}]"#;
        let msgs = parse_json_export(text, "export.json");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "hi");
        assert_eq!(msgs[1].sender.as_deref(), Some("Sam"));
    }

    #[test]
    fn json_export_rejects_non_array() {
        assert!(parse_json_export("{\"a\": 1}", "x.json").is_empty());
        assert!(parse_json_export("not json", "x.json").is_empty());
    }

    #[test]
    fn ocr_chat_lines() {
        let text = "2:30 PM hey\n14:31 are you coming\nrandom noise without time";
        let msgs = parse_ocr_chat_text(text, "shot.png");
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].timestamp.as_deref(), Some("2:30 PM"));
    }
}
