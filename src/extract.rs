//! Raw-content extraction for staged files.
//!
//! Turns a staged file (text, JSON, image, archive) into zero or more
//! [`RawMessage`]s. Archives recurse into the same extractor. Extraction
//! fails closed: an unreadable file yields one sentinel message tagged
//! `extraction_failed` instead of aborting the whole batch — partial
//! ingestion is preferred over total failure.

use std::io::Read;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;

use crate::models::{RawMessage, StagedFile};
use crate::parse;

/// Maximum nesting for archives inside archives.
const MAX_ARCHIVE_DEPTH: usize = 4;
/// Maximum decompressed bytes to read from a single archive entry.
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Capability that turns image bytes into text. Screenshot decoding is a
/// pluggable collaborator; the default build ships only the disabled
/// implementation.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, bytes: &[u8]) -> Result<String>;
}

/// Recognizer used when no OCR backend is configured. Always errors, so
/// image files degrade into sentinel messages.
pub struct DisabledRecognizer;

impl TextRecognizer for DisabledRecognizer {
    fn recognize(&self, _bytes: &[u8]) -> Result<String> {
        anyhow::bail!("no text recognizer configured")
    }
}

/// Extract messages from a batch of staged files.
pub fn extract_files(files: &[StagedFile], recognizer: &dyn TextRecognizer) -> Vec<RawMessage> {
    extract_batch(files, recognizer, 0)
}

fn extract_batch(
    files: &[StagedFile],
    recognizer: &dyn TextRecognizer,
    depth: usize,
) -> Vec<RawMessage> {
    let mut messages = Vec::new();

    for file in files {
        let bytes = match BASE64.decode(&file.data) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(file = %file.filename, error = %e, "file payload is not valid base64");
                messages.push(failure_sentinel(
                    &file.filename,
                    "[file payload could not be decoded]",
                ));
                continue;
            }
        };

        if file.content_type.starts_with("image/") {
            messages.extend(extract_image(&bytes, &file.filename, recognizer));
        } else if file.content_type == "text/plain" || file.content_type == "text/csv" {
            let text = String::from_utf8_lossy(&bytes);
            messages.extend(parse::parse_text(&text, &file.filename));
        } else if file.content_type == "application/json" {
            let text = String::from_utf8_lossy(&bytes);
            messages.extend(parse::parse_json_export(&text, &file.filename));
        } else if file.content_type == "application/zip" || file.filename.ends_with(".zip") {
            messages.extend(extract_archive(&bytes, &file.filename, recognizer, depth));
        }
        // Other content types are skipped; they carry no chat content.
    }

    messages
}

/// Unpack an archive and run its entries through the extractor again.
/// Any archive-level failure collapses into one sentinel message.
fn extract_archive(
    bytes: &[u8],
    filename: &str,
    recognizer: &dyn TextRecognizer,
    depth: usize,
) -> Vec<RawMessage> {
    if depth >= MAX_ARCHIVE_DEPTH {
        tracing::warn!(file = %filename, "archive nesting limit reached");
        return vec![failure_sentinel(filename, "[archive nested too deeply]")];
    }

    match read_archive_entries(bytes) {
        Ok(inner) => extract_batch(&inner, recognizer, depth + 1),
        Err(e) => {
            tracing::warn!(file = %filename, error = %e, "archive extraction failed");
            vec![failure_sentinel(filename, "[archive could not be extracted]")]
        }
    }
}

fn read_archive_entries(bytes: &[u8]) -> Result<Vec<StagedFile>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))?;
    let mut inner = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        let mut data = Vec::new();
        entry.by_ref().take(MAX_ENTRY_BYTES).read_to_end(&mut data)?;
        if data.len() as u64 >= MAX_ENTRY_BYTES {
            anyhow::bail!("archive entry {} exceeds size limit", name);
        }

        inner.push(StagedFile {
            content_type: content_type_for(&name),
            filename: name,
            data: BASE64.encode(&data),
        });
    }

    Ok(inner)
}

/// Infer a content type from a filename extension. Unknown extensions map
/// to `application/octet-stream`, which the extractor skips.
pub fn content_type_for(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.ends_with(".txt") || lower.ends_with(".csv") {
        "text/plain".to_string()
    } else if lower.ends_with(".json") {
        "application/json".to_string()
    } else if lower.ends_with(".zip") {
        "application/zip".to_string()
    } else if let Some(ext) = ["png", "jpg", "jpeg", "heic"]
        .iter()
        .find(|e| lower.ends_with(&format!(".{}", e)))
    {
        format!("image/{}", ext)
    } else {
        "application/octet-stream".to_string()
    }
}

fn extract_image(
    bytes: &[u8],
    filename: &str,
    recognizer: &dyn TextRecognizer,
) -> Vec<RawMessage> {
    let text = match recognizer.recognize(bytes) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!(file = %filename, error = %e, "text recognition unavailable");
            return vec![RawMessage::new(filename, "[text recognition failed]")
                .tagged("type", json!("image"))
                .tagged("error", json!("recognition_failed"))];
        }
    };

    if text.trim().is_empty() {
        return vec![RawMessage::new(filename, "[image with no extractable text]")
            .tagged("type", json!("image"))
            .tagged("error", json!("no_text"))];
    }

    let chat_messages = parse::parse_ocr_chat_text(&text, filename);
    if !chat_messages.is_empty() {
        return chat_messages;
    }

    vec![RawMessage::new(filename, text.trim()).tagged("type", json!("image_text"))]
}

fn failure_sentinel(filename: &str, content: &str) -> RawMessage {
    RawMessage::new(filename, content).tagged("error", json!("extraction_failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(filename: &str, content_type: &str, body: &[u8]) -> StagedFile {
        StagedFile {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            data: BASE64.encode(body),
        }
    }

    fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        use std::io::Write;
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn text_file_is_parsed() {
        let files = [staged(
            "chat.txt",
            "text/plain",
            b"[3/15/24, 2:30 PM] Alex: hi\n[3/15/24, 2:31 PM] Sam: hey",
        )];
        let msgs = extract_files(&files, &DisabledRecognizer);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].sender.as_deref(), Some("Alex"));
    }

    #[test]
    fn zip_recurses_into_entries() {
        let inner = zip_with(&[
            ("a.txt", b"2024-03-15 14:30 - Alex: one"),
            ("b.txt", b"2024-03-15 14:31 - Sam: two"),
        ]);
        let files = [staged("export.zip", "application/zip", &inner)];
        let msgs = extract_files(&files, &DisabledRecognizer);
        assert_eq!(msgs.len(), 2);
    }

    #[test]
    fn corrupt_zip_yields_sentinel_not_error() {
        let files = [staged("bad.zip", "application/zip", b"definitely not a zip")];
        let msgs = extract_files(&files, &DisabledRecognizer);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].tags["error"], json!("extraction_failed"));
    }

    #[test]
    fn image_without_recognizer_degrades_to_sentinel() {
        let files = [staged("shot.png", "image/png", b"\x89PNG fake")];
        let msgs = extract_files(&files, &DisabledRecognizer);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].tags["error"], json!("recognition_failed"));
    }

    #[test]
    fn recognized_chat_screenshot_parses_lines() {
        struct Fixed(&'static str);
        impl TextRecognizer for Fixed {
            fn recognize(&self, _bytes: &[u8]) -> Result<String> {
                Ok(self.0.to_string())
            }
        }
        let files = [staged("shot.png", "image/png", b"")];
        let msgs = extract_files(&files, &Fixed("2:30 PM hey\n2:31 PM you there?"));
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].content, "you there?");
    }

    #[test]
    fn unknown_content_type_is_skipped() {
        let files = [staged("video.mp4", "video/mp4", b"....")];
        let msgs = extract_files(&files, &DisabledRecognizer);
        assert!(msgs.is_empty());
    }

    #[test]
    fn nested_archives_are_bounded() {
        let mut payload = zip_with(&[("chat.txt", b"hello" as &[u8])]);
        for _ in 0..MAX_ARCHIVE_DEPTH + 1 {
            payload = zip_with(&[("inner.zip", payload.as_slice())]);
        }
        let files = [staged("outer.zip", "application/zip", &payload)];
        let msgs = extract_files(&files, &DisabledRecognizer);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].content.contains("nested too deeply"));
    }
}
