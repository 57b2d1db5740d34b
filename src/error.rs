//! Ingestion error taxonomy and the per-batch report.
//!
//! Per-file problems become [`IngestIssue`]s in the [`IngestionReport`] and
//! never stop the batch. A store write that keeps failing after retries is
//! the one fatal condition; it is reported in [`IngestionReport::fatal`].

use serde::Serialize;
use thiserror::Error;

use crate::schema::Conflict;

#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IngestIssue {
    #[error("{path}: file kind could not be determined")]
    ClassificationUnknown { path: String },

    #[error("{path}: extraction failed: {reason}")]
    ExtractionFailure { path: String, reason: String },

    #[error("{path}: {size_bytes} bytes exceeds the {limit_bytes} byte limit")]
    FileTooLarge {
        path: String,
        size_bytes: u64,
        limit_bytes: u64,
    },

    #[error("{path}: read failed: {reason}")]
    ReadFailure { path: String, reason: String },

    #[error("schema conflict on '{}': {} vs {}, resolved as {}", .0.field, .0.existing, .0.observed, .0.resolved)]
    SchemaConflict(Conflict),

    #[error("{path}: {similarity:.2} similar to document {candidate_document_id}")]
    DuplicateAmbiguous {
        path: String,
        document_id: String,
        candidate_document_id: String,
        similarity: f64,
    },

    #[error("{path}: store write failed after {attempts} attempt(s): {reason}")]
    StoreWriteFailure {
        path: String,
        attempts: u32,
        reason: String,
    },
}

/// A file that was excluded from downstream stages.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub issue: IngestIssue,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    pub files_seen: usize,
    pub documents_created: usize,
    pub documents_versioned: usize,
    pub documents_unchanged: usize,
    pub entities_created: usize,
    pub relationships_created: usize,
    pub files_skipped: Vec<SkippedFile>,
    pub conflicts: Vec<Conflict>,
    pub duplicate_candidates: Vec<IngestIssue>,
    pub warnings: Vec<String>,
    pub fatal: Option<String>,
}

impl IngestionReport {
    pub fn skip(&mut self, path: impl Into<String>, issue: IngestIssue) {
        self.files_skipped.push(SkippedFile {
            path: path.into(),
            issue,
        });
    }

    /// Every issue in the report, in a single flat list.
    pub fn issues(&self) -> Vec<IngestIssue> {
        let mut out: Vec<IngestIssue> = self
            .files_skipped
            .iter()
            .map(|s| s.issue.clone())
            .collect();
        out.extend(self.conflicts.iter().cloned().map(IngestIssue::SchemaConflict));
        out.extend(self.duplicate_candidates.iter().cloned());
        out
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_messages_name_the_path() {
        let issue = IngestIssue::ExtractionFailure {
            path: "a/b.pdf".into(),
            reason: "no pages".into(),
        };
        assert_eq!(issue.to_string(), "a/b.pdf: extraction failed: no pages");
    }

    #[test]
    fn issues_serialize_with_a_tag() {
        let issue = IngestIssue::ClassificationUnknown {
            path: "x.bin".into(),
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["issue"], "classification_unknown");
        assert_eq!(json["path"], "x.bin");
    }
}
