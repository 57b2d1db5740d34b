//! Per-kind content extraction.
//!
//! Every supported [`FileKind`] has one [`Extractor`]. Extractors take raw
//! bytes and return an [`ExtractedContent`]; they never touch the store or
//! shared state, so the ingestion pipeline runs them on blocking threads in
//! parallel. An extractor that cannot produce any content returns an
//! [`ExtractError`] and the orchestrator skips the file.

pub mod chat;
mod exif;
pub mod image;
pub mod ocr;
pub mod pdf;
pub mod text;

use thiserror::Error;

use crate::config::Config;
use crate::models::{ExtractedContent, FileKind};

/// Extraction failure. The file is skipped; the batch continues.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("image decoding failed: {0}")]
    Image(String),

    #[error("text is not valid UTF-8")]
    Encoding,

    #[error("no extractable content: {0}")]
    NoContent(String),

    #[error("external tool not found: {0}")]
    ToolNotFound(String),

    #[error("text recognition failed: {0}")]
    Recognition(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability shared by all per-kind readers.
pub trait Extractor: Send + Sync {
    fn kind(&self) -> FileKind;

    fn extract(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractError>;
}

/// The extractor for each supported kind.
pub struct ExtractorSet {
    pdf: pdf::PdfExtractor,
    image: image::ImageExtractor,
    text: text::PlainTextExtractor,
    chat: chat::ChatLogExtractor,
}

impl ExtractorSet {
    pub fn new(config: &Config) -> Self {
        let recognizer: Option<Box<dyn ocr::TextRecognizer>> = if config.ocr.enabled {
            Some(Box::new(ocr::TesseractRecognizer::new(
                config.ocr.tesseract_path.clone(),
                config.ocr.language.clone(),
            )))
        } else {
            None
        };

        Self {
            pdf: pdf::PdfExtractor,
            image: image::ImageExtractor::new(recognizer),
            text: text::PlainTextExtractor,
            chat: chat::ChatLogExtractor,
        }
    }

    pub fn for_kind(&self, kind: FileKind) -> Option<&dyn Extractor> {
        match kind {
            FileKind::Pdf => Some(&self.pdf),
            FileKind::Image => Some(&self.image),
            FileKind::PlainText => Some(&self.text),
            FileKind::ChatLog => Some(&self.chat),
            FileKind::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_kind_has_an_extractor() {
        let set = ExtractorSet::new(&Config::with_db_path("unused.sqlite"));
        for kind in [
            FileKind::Pdf,
            FileKind::Image,
            FileKind::PlainText,
            FileKind::ChatLog,
        ] {
            assert_eq!(set.for_kind(kind).map(|e| e.kind()), Some(kind));
        }
        assert!(set.for_kind(FileKind::Unknown).is_none());
    }
}
