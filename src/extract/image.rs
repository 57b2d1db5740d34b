//! Image extraction: dimensions, format and EXIF metadata, plus optional
//! text recognition.

use std::io::Cursor;

use image::{ImageDecoder, ImageReader};

use super::exif::parse_exif;
use super::ocr::TextRecognizer;
use super::text::parse_key_values;
use super::{ExtractError, Extractor};
use crate::models::{format_ts_iso, ExtractedContent, FileKind, RawValue, Record};
use crate::values::parse_timestamp;

pub struct ImageExtractor {
    recognizer: Option<Box<dyn TextRecognizer>>,
}

impl ImageExtractor {
    pub fn new(recognizer: Option<Box<dyn TextRecognizer>>) -> Self {
        Self { recognizer }
    }
}

impl Extractor for ImageExtractor {
    fn kind(&self) -> FileKind {
        FileKind::Image
    }

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractError> {
        let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
        let format = reader
            .format()
            .map(|f| format!("{:?}", f).to_lowercase())
            .ok_or_else(|| ExtractError::Image("unrecognised image format".into()))?;
        let mut decoder = reader
            .into_decoder()
            .map_err(|e| ExtractError::Image(e.to_string()))?;

        let (width, height) = decoder.dimensions();
        let mut metadata = Record::new();
        metadata.insert("width".into(), RawValue::Integer(width as i64));
        metadata.insert("height".into(), RawValue::Integer(height as i64));
        metadata.insert("format".into(), RawValue::text(format));

        let mut warnings = Vec::new();
        match decoder.exif_metadata() {
            Ok(Some(raw)) => metadata.extend(exif_fields(&raw)),
            Ok(None) => {}
            Err(e) => warnings.push(format!("EXIF unreadable: {}", e)),
        }

        let mut content = ExtractedContent {
            metadata,
            confidence: 1.0,
            warnings,
            ..Default::default()
        };

        if let Some(recognizer) = &self.recognizer {
            match recognizer.recognize(bytes) {
                Ok(text) => apply_recognized_text(&mut content, &text),
                Err(e) => {
                    tracing::warn!(error = %e, "text recognition failed, keeping metadata only");
                    content.warnings.push(format!("text recognition failed: {}", e));
                }
            }
        }

        Ok(content)
    }
}

fn exif_fields(raw: &[u8]) -> Record {
    let tags = parse_exif(raw);
    let mut out = Record::new();
    if let Some(device) = tags.device() {
        out.insert("device".into(), RawValue::text(device));
    }
    if let Some(captured) = tags.captured_at() {
        let value = parse_timestamp(captured)
            .map(format_ts_iso)
            .unwrap_or_else(|| captured.to_string());
        out.insert("captured_at".into(), RawValue::text(value));
    }
    out
}

/// Recognized text is kept only when it carries key/value structure;
/// free-form noise would pollute the schema.
fn apply_recognized_text(content: &mut ExtractedContent, text: &str) {
    let record = parse_key_values(text);
    if record.is_empty() {
        content
            .warnings
            .push("recognized text had no key/value lines".into());
        return;
    }
    content.text = text.trim().to_string();
    content.records.push(record);
}
