//! PDF extraction via `lopdf`, one page at a time.
//!
//! A page that fails (parser error, panic inside the content decoder, or no
//! text at all) is recorded as `None` and extraction moves on to the next
//! page. Only an unparsable file or a file where every page fails is an
//! error.

use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
use lopdf::{Document as PdfDocument, Object};

use super::text::parse_key_values;
use super::{ExtractError, Extractor};
use crate::models::{format_ts_iso, ExtractedContent, FileKind, RawValue, Record};

pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn kind(&self) -> FileKind {
        FileKind::Pdf
    }

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractError> {
        let doc = catch_unwind(AssertUnwindSafe(|| PdfDocument::load_mem(bytes)))
            .map_err(|_| ExtractError::Pdf("parser panicked".into()))?
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;

        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        if page_numbers.is_empty() {
            return Err(ExtractError::Pdf("document has no pages".into()));
        }

        let results = page_numbers
            .iter()
            .map(|&n| (n, extract_page(&doc, n)))
            .collect();
        let mut content = assemble_pages(results)?;

        content
            .metadata
            .insert("page_count".into(), RawValue::Integer(page_numbers.len() as i64));
        for (key, value) in info_metadata(&doc) {
            content.metadata.entry(key).or_insert(value);
        }

        Ok(content)
    }
}

fn extract_page(doc: &PdfDocument, page: u32) -> Result<String, String> {
    match catch_unwind(AssertUnwindSafe(|| doc.extract_text(&[page]))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("text decoder panicked".into()),
    }
}

/// Combine per-page results into one content value. Blank pages count as
/// failed.
pub fn assemble_pages(results: Vec<(u32, Result<String, String>)>) -> Result<ExtractedContent, ExtractError> {
    let total = results.len();
    let mut pages = Vec::with_capacity(total);
    let mut warnings = Vec::new();

    for (number, result) in results {
        match result {
            Ok(text) if !text.trim().is_empty() => pages.push(Some(text.trim().to_string())),
            Ok(_) => {
                warnings.push(format!("page {}: no extractable text", number));
                pages.push(None);
            }
            Err(e) => {
                tracing::debug!(page = number, error = %e, "PDF page extraction failed");
                warnings.push(format!("page {}: {}", number, e));
                pages.push(None);
            }
        }
    }

    let ok = pages.iter().filter(|p| p.is_some()).count();
    if ok == 0 {
        return Err(ExtractError::NoContent(format!(
            "none of {} page(s) yielded text",
            total
        )));
    }

    let text = pages
        .iter()
        .flatten()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n\n");
    let record = parse_key_values(&text);

    Ok(ExtractedContent {
        records: if record.is_empty() { Vec::new() } else { vec![record] },
        text,
        pages,
        confidence: ok as f64 / total as f64,
        warnings,
        ..Default::default()
    })
}

fn info_metadata(doc: &PdfDocument) -> Record {
    let mut out = Record::new();
    let info = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => doc.get_object(*id).and_then(Object::as_dict).ok(),
        Ok(Object::Dictionary(dict)) => Some(dict),
        _ => None,
    };
    let Some(info) = info else {
        return out;
    };

    for (key, field) in [
        (&b"Author"[..], "author"),
        (&b"Title"[..], "title"),
        (&b"CreationDate"[..], "creation_date"),
    ] {
        let Some(raw) = info.get(key).ok().and_then(|o| o.as_str().ok()) else {
            continue;
        };
        let value = decode_pdf_string(raw);
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let value = if field == "creation_date" {
            parse_pdf_date(value).unwrap_or_else(|| value.to_string())
        } else {
            value.to_string()
        };
        out.insert(field.into(), RawValue::text(value));
    }
    out
}

/// PDF text strings are UTF-16BE with a BOM or PDFDocEncoding, which is close
/// enough to Latin-1 for metadata.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// `D:YYYYMMDDHHmmSSOHH'mm'` → RFC 3339. Only the year is mandatory.
pub fn parse_pdf_date(raw: &str) -> Option<String> {
    let s = raw.strip_prefix("D:").unwrap_or(raw);
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }
    let field = |start: usize, len: usize, default: u32| -> Option<u32> {
        match digits.get(start..start + len) {
            Some(part) => part.parse().ok(),
            None => Some(default),
        }
    };
    let year: i32 = digits[..4].parse().ok()?;
    let naive = NaiveDate::from_ymd_opt(year, field(4, 2, 1)?, field(6, 2, 1)?)?
        .and_hms_opt(field(8, 2, 0)?, field(10, 2, 0)?, field(12, 2, 0)?)?;

    let tz = &s[digits.len()..];
    let offset_secs = match tz.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let tz_digits: String = tz[1..].chars().filter(|c| c.is_ascii_digit()).collect();
            let hours: i32 = tz_digits.get(0..2)?.parse().ok()?;
            let minutes: i32 = tz_digits.get(2..4).and_then(|m| m.parse().ok()).unwrap_or(0);
            let secs = hours * 3600 + minutes * 60;
            if sign == '-' {
                -secs
            } else {
                secs
            }
        }
        _ => 0,
    };
    let offset = FixedOffset::east_opt(offset_secs)?;
    let local = offset.from_local_datetime(&naive).single()?;
    Some(format_ts_iso(local.with_timezone(&Utc)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failing_page_keeps_the_others() {
        let content = assemble_pages(vec![
            (1, Ok("Invoice Number: INV-9".to_string())),
            (2, Err("bad content stream".to_string())),
            (3, Ok("Total: 40".to_string())),
        ])
        .unwrap();
        assert_eq!(content.pages.len(), 3);
        assert!(content.pages[1].is_none());
        assert!(content.text.contains("INV-9"));
        assert!(content.text.contains("Total: 40"));
        assert!((content.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(content.warnings.len(), 1);
        assert_eq!(content.records[0]["total"], RawValue::text("40"));
    }

    #[test]
    fn all_pages_failing_is_an_error() {
        let err = assemble_pages(vec![(1, Err("x".into())), (2, Ok("  ".into()))]).unwrap_err();
        assert!(matches!(err, ExtractError::NoContent(_)));
    }

    #[test]
    fn garbage_is_not_a_pdf() {
        let err = PdfExtractor.extract(b"%PDF-1.4\nthis is not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_) | ExtractError::NoContent(_)));
    }

    #[test]
    fn pdf_dates_normalize() {
        assert_eq!(
            parse_pdf_date("D:20230314093000Z").as_deref(),
            Some("2023-03-14T09:30:00Z")
        );
        assert_eq!(
            parse_pdf_date("D:20230314093000+02'00'").as_deref(),
            Some("2023-03-14T07:30:00Z")
        );
        assert_eq!(parse_pdf_date("D:2023").as_deref(), Some("2023-01-01T00:00:00Z"));
        assert_eq!(parse_pdf_date("yesterday"), None);
    }

    #[test]
    fn utf16_strings_decode() {
        assert_eq!(decode_pdf_string(&[0xFE, 0xFF, 0x00, b'A', 0x00, b'b']), "Ab");
        assert_eq!(decode_pdf_string(b"Plain"), "Plain");
    }
}
