//! Content-based file classification.
//!
//! Binary formats are recognised from their magic bytes via `infer`; text is
//! anything that decodes as UTF-8 without NUL bytes. Text whose lines mostly
//! look like timestamped `speaker: message` turns is a chat log. File names
//! and extensions are never consulted.

use crate::extract::chat::parse_chat_line;
use crate::models::FileKind;

/// Minimum share of non-blank lines that must parse as chat turns.
const CHAT_LINE_RATIO: f64 = 0.6;
/// Lines sampled when deciding whether text is a chat log.
const CHAT_SAMPLE_LINES: usize = 200;

pub fn classify(bytes: &[u8]) -> FileKind {
    if bytes.is_empty() {
        return FileKind::Unknown;
    }

    if let Some(detected) = infer::get(bytes) {
        if detected.mime_type() == "application/pdf" {
            return FileKind::Pdf;
        }
        if detected.matcher_type() == infer::MatcherType::Image {
            return FileKind::Image;
        }
        if detected.matcher_type() != infer::MatcherType::Text {
            return FileKind::Unknown;
        }
    }

    match decode_text(bytes) {
        Some(text) if looks_like_chat(text) => FileKind::ChatLog,
        Some(_) => FileKind::PlainText,
        None => FileKind::Unknown,
    }
}

/// UTF-8 view of `bytes` with any leading BOM removed, or `None` for binary.
pub fn decode_text(bytes: &[u8]) -> Option<&str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if bytes.contains(&0) {
        return None;
    }
    std::str::from_utf8(bytes).ok()
}

fn looks_like_chat(text: &str) -> bool {
    let mut lines = 0usize;
    let mut turns = 0usize;
    for line in text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(CHAT_SAMPLE_LINES)
    {
        lines += 1;
        if parse_chat_line(line).is_some() {
            turns += 1;
        }
    }
    turns >= 2 && (turns as f64) >= (lines as f64) * CHAT_LINE_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_signature_wins_over_extension() {
        assert_eq!(classify(b"%PDF-1.4\n%...."), FileKind::Pdf);
    }

    #[test]
    fn png_signature_is_image() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(classify(&png), FileKind::Image);
    }

    #[test]
    fn key_value_text_is_plain_text() {
        let text = b"Invoice Number: INV-001\nTotal: 120.00\nDate: 2023-04-01\n";
        assert_eq!(classify(text), FileKind::PlainText);
    }

    #[test]
    fn timestamped_turns_are_chat_log() {
        let text = b"[2023-05-01 09:00] Alice: hi, invoice INV-7 is late\n\
[2023-05-01 09:02] Bob: checking now\n\
   continuing the thought\n\
[2023-05-01 09:05] Bob: paid yesterday\n";
        assert_eq!(classify(text), FileKind::ChatLog);
    }

    #[test]
    fn utf8_bom_is_accepted() {
        assert_eq!(classify(b"\xEF\xBB\xBFhello"), FileKind::PlainText);
    }

    #[test]
    fn binary_and_empty_are_unknown() {
        assert_eq!(classify(&[]), FileKind::Unknown);
        assert_eq!(classify(&[0x00, 0xFF, 0x10, 0x80]), FileKind::Unknown);
        // ZIP archive signature
        assert_eq!(classify(b"PK\x03\x04\x14\x00\x00\x00"), FileKind::Unknown);
    }
}
