//! Content fingerprints and duplicate detection.
//!
//! The fingerprint is a sha256 over normalized bytes, so a text file saved
//! with CRLF line endings or a BOM maps to the same document as its LF twin.
//! [`DedupIndex`] resolves a file to an existing document (by fingerprint,
//! then by path) or reserves a fresh identity, atomically.
//! [`NearDuplicateIndex`] reports documents whose text is very similar but
//! not identical; those are surfaced, never merged.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use sha2::{Digest, Sha256};

use crate::models::FileKind;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Canonical bytes for fingerprinting. Binary kinds pass through unchanged.
pub fn normalize(kind: FileKind, bytes: &[u8]) -> Vec<u8> {
    if !kind.is_textual() {
        return bytes.to_vec();
    }
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let text = String::from_utf8_lossy(bytes);
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<&str> = unified.split('\n').map(str::trim_end).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n").into_bytes()
}

pub fn fingerprint(kind: FileKind, bytes: &[u8]) -> String {
    sha256_hex(&normalize(kind, bytes))
}

/// How a file was matched to an existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    Fingerprint,
    Path,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Existing { document_id: String, via: MatchedBy },
    /// A fresh identity, reserved until committed or released.
    New { document_id: String },
}

impl Resolution {
    pub fn document_id(&self) -> &str {
        match self {
            Resolution::Existing { document_id, .. } | Resolution::New { document_id } => {
                document_id
            }
        }
    }
}

#[derive(Default)]
struct DedupState {
    by_fingerprint: HashMap<String, String>,
    by_path: HashMap<String, String>,
    reserved: HashSet<String>,
}

/// Fingerprint and path lookups behind one mutex, held per lookup.
#[derive(Default)]
pub struct DedupIndex {
    state: Mutex<DedupState>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, DedupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a stored document's known fingerprints and path.
    pub fn register<'a>(
        &self,
        document_id: &str,
        path: &str,
        fingerprints: impl IntoIterator<Item = &'a str>,
    ) {
        let mut state = self.state();
        for fp in fingerprints {
            state
                .by_fingerprint
                .entry(fp.to_string())
                .or_insert_with(|| document_id.to_string());
        }
        state.by_path.insert(path.to_string(), document_id.to_string());
    }

    pub fn find_existing(&self, fingerprint: &str) -> Option<String> {
        self.state().by_fingerprint.get(fingerprint).cloned()
    }

    /// Match by fingerprint, then by path, else reserve a new identity under
    /// both keys so a concurrent twin resolves to it.
    pub fn resolve(&self, fingerprint: &str, path: &str) -> Resolution {
        let mut state = self.state();
        if let Some(id) = state.by_fingerprint.get(fingerprint) {
            return Resolution::Existing {
                document_id: id.clone(),
                via: MatchedBy::Fingerprint,
            };
        }
        if let Some(id) = state.by_path.get(path).cloned() {
            state.by_fingerprint.insert(fingerprint.to_string(), id.clone());
            return Resolution::Existing {
                document_id: id,
                via: MatchedBy::Path,
            };
        }
        let id = uuid::Uuid::new_v4().to_string();
        state.by_fingerprint.insert(fingerprint.to_string(), id.clone());
        state.by_path.insert(path.to_string(), id.clone());
        state.reserved.insert(id.clone());
        Resolution::New { document_id: id }
    }

    /// The reserved document now exists in the store.
    pub fn confirm(&self, document_id: &str) {
        self.state().reserved.remove(document_id);
    }

    /// Whether `document_id` is reserved but not yet committed.
    pub fn is_reserved(&self, document_id: &str) -> bool {
        self.state().reserved.contains(document_id)
    }

    /// Forget a reservation whose commit failed.
    pub fn release(&self, document_id: &str) {
        let mut state = self.state();
        if state.reserved.remove(document_id) {
            state.by_fingerprint.retain(|_, id| id != document_id);
            state.by_path.retain(|_, id| id != document_id);
        }
    }

    /// Drop a fingerprint mapping added by a path match that did not commit.
    pub fn forget_fingerprint(&self, fingerprint: &str, document_id: &str) {
        let mut state = self.state();
        if state.by_fingerprint.get(fingerprint).map(String::as_str) == Some(document_id) {
            state.by_fingerprint.remove(fingerprint);
        }
    }

    pub fn len(&self) -> usize {
        self.state().by_fingerprint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Word shingles of `text`, lowercased, punctuation stripped.
pub fn shingles(text: &str, size: usize) -> HashSet<String> {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();
    let size = size.max(1);
    if words.is_empty() {
        return HashSet::new();
    }
    if words.len() < size {
        return HashSet::from([words.join(" ")]);
    }
    words.windows(size).map(|w| w.join(" ")).collect()
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// A near-duplicate match.
#[derive(Debug, Clone, PartialEq)]
pub struct NearDuplicate {
    pub document_id: String,
    pub similarity: f64,
}

/// Latest-text shingles per document.
pub struct NearDuplicateIndex {
    shingle_size: usize,
    threshold: f64,
    documents: Mutex<HashMap<String, HashSet<String>>>,
}

impl NearDuplicateIndex {
    pub fn new(shingle_size: usize, threshold: f64) -> Self {
        Self {
            shingle_size,
            threshold,
            documents: Mutex::new(HashMap::new()),
        }
    }

    pub fn update(&self, document_id: &str, text: &str) {
        let set = shingles(text, self.shingle_size);
        let mut docs = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        if set.is_empty() {
            docs.remove(document_id);
        } else {
            docs.insert(document_id.to_string(), set);
        }
    }

    /// Best match at or above the threshold, other than `exclude`.
    pub fn best_match(&self, text: &str, exclude: &str) -> Option<NearDuplicate> {
        let incoming = shingles(text, self.shingle_size);
        if incoming.is_empty() {
            return None;
        }
        let docs = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        docs.iter()
            .filter(|(id, _)| id.as_str() != exclude)
            .map(|(id, set)| NearDuplicate {
                document_id: id.clone(),
                similarity: jaccard(&incoming, set),
            })
            .filter(|m| m.similarity >= self.threshold)
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_endings_and_bom_do_not_change_the_fingerprint() {
        let lf = b"Invoice Number: INV-1\nTotal: 10\n";
        let crlf = b"\xEF\xBB\xBFInvoice Number: INV-1  \r\nTotal: 10\r\n\r\n";
        assert_eq!(
            fingerprint(FileKind::PlainText, lf),
            fingerprint(FileKind::PlainText, crlf)
        );
        assert_ne!(sha256_hex(lf), sha256_hex(crlf));
    }

    #[test]
    fn binary_kinds_hash_raw_bytes() {
        let a = b"%PDF-1.4\r\n";
        let b = b"%PDF-1.4\n";
        assert_ne!(fingerprint(FileKind::Pdf, a), fingerprint(FileKind::Pdf, b));
    }

    #[test]
    fn resolve_reserves_then_matches() {
        let index = DedupIndex::new();
        let first = index.resolve("fp1", "a.txt");
        let Resolution::New { document_id } = &first else {
            panic!("expected a new identity");
        };
        assert!(index.is_reserved(document_id));

        // Same content elsewhere resolves to the reservation.
        assert_eq!(
            index.resolve("fp1", "b.txt"),
            Resolution::Existing {
                document_id: document_id.clone(),
                via: MatchedBy::Fingerprint
            }
        );
        // Changed content at the same path is a new version of it.
        assert_eq!(
            index.resolve("fp2", "a.txt"),
            Resolution::Existing {
                document_id: document_id.clone(),
                via: MatchedBy::Path
            }
        );
        index.confirm(document_id);
        assert!(!index.is_reserved(document_id));
        assert_eq!(index.find_existing("fp1").as_deref(), Some(document_id.as_str()));
    }

    #[test]
    fn released_reservations_disappear() {
        let index = DedupIndex::new();
        let id = index.resolve("fp", "a.txt").document_id().to_string();
        index.release(&id);
        assert!(index.find_existing("fp").is_none());
        assert!(matches!(index.resolve("fp", "a.txt"), Resolution::New { .. }));
    }

    #[test]
    fn near_duplicates_above_threshold() {
        let index = NearDuplicateIndex::new(3, 0.5);
        index.update(
            "doc-1",
            "the quick brown fox jumps over the lazy dog near the river bank",
        );
        let hit = index
            .best_match(
                "the quick brown fox jumps over the lazy dog near the river shore",
                "other",
            )
            .unwrap();
        assert_eq!(hit.document_id, "doc-1");
        assert!(hit.similarity > 0.5 && hit.similarity < 1.0);

        assert!(index.best_match("entirely unrelated words here", "other").is_none());
        assert!(index
            .best_match("the quick brown fox jumps over the lazy dog near the river bank", "doc-1")
            .is_none());
    }

    #[test]
    fn jaccard_of_identical_sets_is_one() {
        let a = shingles("a b c d", 2);
        assert_eq!(jaccard(&a, &a), 1.0);
    }
}
