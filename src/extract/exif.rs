//! Camera make, model and capture time from an EXIF block.

use exif::{Field, In, Reader, Tag, Value};

#[derive(Debug, Default, PartialEq)]
pub struct ExifTags {
    pub make: Option<String>,
    pub model: Option<String>,
    pub date_time: Option<String>,
    pub date_time_original: Option<String>,
}

impl ExifTags {
    pub fn device(&self) -> Option<String> {
        match (&self.make, &self.model) {
            (Some(make), Some(model)) if model.starts_with(make.as_str()) => Some(model.clone()),
            (Some(make), Some(model)) => Some(format!("{} {}", make, model)),
            (Some(one), None) | (None, Some(one)) => Some(one.clone()),
            (None, None) => None,
        }
    }

    pub fn captured_at(&self) -> Option<&str> {
        self.date_time_original
            .as_deref()
            .or(self.date_time.as_deref())
    }
}

fn ascii(field: Option<&Field>) -> Option<String> {
    let Value::Ascii(parts) = &field?.value else {
        return None;
    };
    let s = String::from_utf8_lossy(parts.first()?).trim().to_string();
    (!s.is_empty()).then_some(s)
}

/// Parse an EXIF block as returned by image decoders (with or without the
/// `Exif\0\0` prefix). Malformed input yields no tags.
pub fn parse_exif(raw: &[u8]) -> ExifTags {
    let data = raw.strip_prefix(b"Exif\0\0").unwrap_or(raw);
    let exif = match Reader::new().read_raw(data.to_vec()) {
        Ok(exif) => exif,
        Err(e) => {
            tracing::debug!("Unreadable EXIF block: {}", e);
            return ExifTags::default();
        }
    };
    // Fields of the EXIF sub-IFD are reported under the primary image.
    ExifTags {
        make: ascii(exif.get_field(Tag::Make, In::PRIMARY)),
        model: ascii(exif.get_field(Tag::Model, In::PRIMARY)),
        date_time: ascii(exif.get_field(Tag::DateTime, In::PRIMARY)),
        date_time_original: ascii(exif.get_field(Tag::DateTimeOriginal, In::PRIMARY)),
    }
}
