//! Chat transcript extraction.
//!
//! A turn starts on a line carrying a timestamp and a speaker:
//!
//! ```text
//! [2023-05-01 09:00] Alice: invoice INV-7 is late
//! 2023-05-01 09:02 - Bob: checking now
//! 5/1/23, 9:05 AM - Bob: Invoice Number: INV-7
//! ```
//!
//! Lines that do not start a turn continue the previous one.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use super::text::parse_key_values;
use super::{ExtractError, Extractor};
use crate::classify::decode_text;
use crate::models::{format_ts_iso, ChatTurn, ExtractedContent, FileKind, RawValue, Record};
use crate::values::parse_timestamp;

pub struct ChatLogExtractor;

fn turn_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^\s*
            (?:
                \[(?P<bracketed>[^\]]*\d[^\]]*)\]
              | (?P<bare>
                    \d{4}-\d{2}-\d{2}[T\x20]\d{1,2}:\d{2}(?::\d{2})?(?:Z|[+-]\d{2}:?\d{2})?
                  | \d{1,2}/\d{1,2}/\d{2,4},?\x20\d{1,2}:\d{2}(?::\d{2})?(?:\x20?[AaPp][Mm])?
                )
            )
            \s*(?:-\s+)?
            (?P<speaker>[^:\[\]\s][^:\[\]]{0,63}?)
            \s*:\s*
            (?P<content>.*?)\s*$",
        )
        .expect("chat turn pattern is valid")
    })
}

/// Parse the first line of a chat turn. Returns `None` for continuation
/// lines and for anything that is not a turn.
pub fn parse_chat_line(line: &str) -> Option<ChatTurn> {
    let caps = turn_regex().captures(line)?;
    let raw_timestamp = caps
        .name("bracketed")
        .or_else(|| caps.name("bare"))?
        .as_str()
        .trim()
        .to_string();
    let speaker = caps.name("speaker")?.as_str().trim().to_string();
    if speaker.is_empty() {
        return None;
    }
    Some(ChatTurn {
        timestamp: parse_timestamp(&raw_timestamp),
        raw_timestamp,
        speaker,
        content: caps
            .name("content")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
    })
}

/// Split a transcript into turns. The second value counts non-blank lines
/// that appeared before the first turn and were dropped.
pub fn parse_turns(text: &str) -> (Vec<ChatTurn>, usize) {
    let mut turns: Vec<ChatTurn> = Vec::new();
    let mut orphaned = 0;
    for line in text.lines() {
        if let Some(turn) = parse_chat_line(line) {
            turns.push(turn);
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match turns.last_mut() {
            Some(last) => {
                if !last.content.is_empty() {
                    last.content.push('\n');
                }
                last.content.push_str(trimmed);
            }
            None => orphaned += 1,
        }
    }
    (turns, orphaned)
}

/// One record per turn: `speaker`, `sent_at`, `message`, plus any
/// key/value lines in the message.
pub fn turn_record(turn: &ChatTurn) -> Record {
    let mut record = parse_key_values(&turn.content);
    record.insert("speaker".into(), RawValue::text(turn.speaker.clone()));
    let sent_at = turn
        .timestamp
        .map(format_ts_iso)
        .unwrap_or_else(|| turn.raw_timestamp.clone());
    record.insert("sent_at".into(), RawValue::text(sent_at));
    if !turn.content.is_empty() {
        record.insert("message".into(), RawValue::text(turn.content.clone()));
    }
    record
}

impl Extractor for ChatLogExtractor {
    fn kind(&self) -> FileKind {
        FileKind::ChatLog
    }

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractError> {
        let text = decode_text(bytes).ok_or(ExtractError::Encoding)?;
        let (turns, orphaned) = parse_turns(text);
        if turns.is_empty() {
            return Err(ExtractError::NoContent("no chat turns found".into()));
        }

        let mut warnings = Vec::new();
        if orphaned > 0 {
            warnings.push(format!("{} line(s) before the first turn ignored", orphaned));
        }
        let unparsed = turns.iter().filter(|t| t.timestamp.is_none()).count();
        if unparsed > 0 {
            warnings.push(format!("{} turn timestamp(s) could not be parsed", unparsed));
        }

        let participants: BTreeSet<&str> = turns.iter().map(|t| t.speaker.as_str()).collect();
        let mut metadata = Record::new();
        metadata.insert("turn_count".into(), RawValue::Integer(turns.len() as i64));
        metadata.insert(
            "participants".into(),
            RawValue::text(participants.into_iter().collect::<Vec<_>>().join(", ")),
        );
        let mut stamps = turns.iter().filter_map(|t| t.timestamp);
        if let Some(first) = stamps.next() {
            let (start, end) = stamps.fold((first, first), |(lo, hi), ts| (lo.min(ts), hi.max(ts)));
            metadata.insert("started_at".into(), RawValue::text(format_ts_iso(start)));
            metadata.insert("ended_at".into(), RawValue::text(format_ts_iso(end)));
        }

        let records = turns.iter().map(turn_record).collect();
        let confidence = (turns.len() - unparsed) as f64 / turns.len() as f64;

        Ok(ExtractedContent {
            text: text.to_string(),
            records,
            metadata,
            chat_turns: turns,
            confidence,
            warnings,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_the_common_turn_shapes() {
        let bracketed = parse_chat_line("[2023-05-01 09:00] Alice: hello there").unwrap();
        assert_eq!(bracketed.speaker, "Alice");
        assert_eq!(bracketed.content, "hello there");
        assert!(bracketed.timestamp.is_some());

        let dashed = parse_chat_line("2023-05-01 09:02 - Bob Smith: ok").unwrap();
        assert_eq!(dashed.speaker, "Bob Smith");

        let phone = parse_chat_line("5/1/23, 9:05 AM - Carol: done").unwrap();
        assert_eq!(phone.speaker, "Carol");
        assert_eq!(phone.raw_timestamp, "5/1/23, 9:05 AM");
    }

    #[test]
    fn plain_key_value_lines_are_not_turns() {
        assert!(parse_chat_line("Invoice Number: INV-001").is_none());
        assert!(parse_chat_line("Due Date: 2023-04-01").is_none());
        assert!(parse_chat_line("just some prose").is_none());
    }

    #[test]
    fn continuation_lines_join_the_previous_turn() {
        let (turns, orphaned) = parse_turns(
            "preamble\n[2023-05-01 09:00] Alice: first\n  second line\n\n[2023-05-01 09:01] Bob: reply\n",
        );
        assert_eq!(orphaned, 1);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "first\nsecond line");
    }

    #[test]
    fn turns_become_records_with_key_values() {
        let log = "[2023-05-01 09:00] Alice: please pay\n\
Invoice Number: INV-7\n\
[2023-05-01 09:05] Bob: paid\n";
        let content = ChatLogExtractor.extract(log.as_bytes()).unwrap();
        assert_eq!(content.chat_turns.len(), 2);
        assert_eq!(content.records.len(), 2);
        assert_eq!(content.records[0]["invoice_number"], RawValue::text("INV-7"));
        assert_eq!(content.records[0]["speaker"], RawValue::text("Alice"));
        assert_eq!(
            content.records[1]["sent_at"],
            RawValue::text("2023-05-01T09:05:00Z")
        );
        assert_eq!(content.metadata["participants"], RawValue::text("Alice, Bob"));
        assert_eq!(
            content.metadata["started_at"],
            RawValue::text("2023-05-01T09:00:00Z")
        );
        assert_eq!(content.confidence, 1.0);
    }

    #[test]
    fn text_without_turns_fails() {
        let err = ChatLogExtractor.extract(b"nothing here\n").unwrap_err();
        assert!(matches!(err, ExtractError::NoContent(_)));
    }
}
