//! Plain-text extraction.
//!
//! Delimited tables (CSV, semicolon or tab separated) yield one record per
//! row. Anything else yields at most one record built from `Key: value` /
//! `Key = value` lines. The key/value parser is shared with the PDF, OCR and
//! chat paths.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use super::{ExtractError, Extractor};
use crate::classify::decode_text;
use crate::models::{ExtractedContent, FileKind, RawValue, Record};
use crate::values::normalize_field_name;

const TABLE_DELIMITERS: &[u8] = b",;\t";
const MAX_HEADER_WORDS: usize = 4;
const MAX_HEADER_CHARS: usize = 48;

pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn kind(&self) -> FileKind {
        FileKind::PlainText
    }

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractError> {
        let text = decode_text(bytes).ok_or(ExtractError::Encoding)?;
        if text.trim().is_empty() {
            return Err(ExtractError::NoContent("file contains only whitespace".into()));
        }

        let records = match parse_table(text) {
            Some(rows) => rows,
            None => {
                let record = parse_key_values(text);
                if record.is_empty() {
                    Vec::new()
                } else {
                    vec![record]
                }
            }
        };

        let mut metadata = Record::new();
        metadata.insert(
            "line_count".into(),
            RawValue::Integer(text.lines().count() as i64),
        );
        metadata.insert(
            "word_count".into(),
            RawValue::Integer(text.split_whitespace().count() as i64),
        );

        Ok(ExtractedContent {
            text: text.to_string(),
            records,
            metadata,
            confidence: 1.0,
            ..Default::default()
        })
    }
}

fn key_value_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z][A-Za-z0-9 _\-/#.]{0,47}?)\s*[:=]\s*(\S.*?)\s*$")
            .expect("key/value pattern is valid")
    })
}

/// Collect `Key: value` lines into one record. The first occurrence of a
/// key wins; keys longer than four words are treated as prose.
pub fn parse_key_values(text: &str) -> Record {
    let mut record = Record::new();
    for line in text.lines() {
        let Some(caps) = key_value_regex().captures(line) else {
            continue;
        };
        let key = &caps[1];
        let value = &caps[2];
        if key.split_whitespace().count() > MAX_HEADER_WORDS || value.starts_with("//") {
            continue;
        }
        if let Some(name) = normalize_field_name(key) {
            record
                .entry(name)
                .or_insert_with(|| RawValue::text(value.to_string()));
        }
    }
    record
}

/// Parse `text` as a delimited table with a header row. Returns `None`
/// unless some delimiter yields a consistent table of at least two columns
/// whose headers look like field names.
pub fn parse_table(text: &str) -> Option<Vec<Record>> {
    let non_blank = text.lines().filter(|l| !l.trim().is_empty()).count();
    if non_blank < 2 {
        return None;
    }
    TABLE_DELIMITERS
        .iter()
        .find_map(|&delimiter| parse_table_with(text, delimiter))
}

fn parse_table_with(text: &str, delimiter: u8) -> Option<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(false)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers().ok()?.clone();
    if headers.len() < 2 {
        return None;
    }

    let mut names = Vec::with_capacity(headers.len());
    let mut seen = HashSet::new();
    for header in headers.iter() {
        if header.len() > MAX_HEADER_CHARS
            || header.split_whitespace().count() > MAX_HEADER_WORDS
            || header.ends_with(['.', '!', '?'])
        {
            return None;
        }
        let name = normalize_field_name(header)?;
        if !seen.insert(name.clone()) {
            return None;
        }
        names.push(name);
    }

    let mut rows = Vec::new();
    for row in reader.records() {
        let row = row.ok()?;
        let record: Record = names
            .iter()
            .zip(row.iter())
            .filter(|(_, v)| !v.is_empty())
            .map(|(name, v)| (name.clone(), RawValue::text(v.to_string())))
            .collect();
        if !record.is_empty() {
            rows.push(record);
        }
    }

    if rows.is_empty() {
        None
    } else {
        Some(rows)
    }
}
