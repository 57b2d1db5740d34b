//! Optional text recognition for images.

use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

use super::ExtractError;

/// Turns image bytes into text.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &[u8]) -> Result<String, ExtractError>;
}

/// Runs the `tesseract` binary on a temporary copy of the image.
pub struct TesseractRecognizer {
    binary: PathBuf,
    language: String,
}

impl TesseractRecognizer {
    pub fn new(binary: PathBuf, language: String) -> Self {
        Self { binary, language }
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, image: &[u8]) -> Result<String, ExtractError> {
        let dir = TempDir::new()?;
        let input = dir.path().join("input");
        std::fs::write(&input, image)?;

        let output = Command::new(&self.binary)
            .arg(&input)
            .arg("stdout")
            .args(["-l", &self.language])
            .output();

        handle_output(output, &self.binary.to_string_lossy())
    }
}

fn handle_output(
    result: std::io::Result<std::process::Output>,
    tool: &str,
) -> Result<String, ExtractError> {
    match result {
        Ok(output) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        }
        Ok(output) => Err(ExtractError::Recognition(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ExtractError::ToolNotFound(tool.to_string()))
        }
        Err(e) => Err(ExtractError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_tool_not_found() {
        let recognizer = TesseractRecognizer::new(
            PathBuf::from("/nonexistent/definitely-not-tesseract"),
            "eng".into(),
        );
        let err = recognizer.recognize(b"not really an image").unwrap_err();
        assert!(matches!(err, ExtractError::ToolNotFound(_)));
    }
}
