//! Core data models.
//!
//! These types flow from the extractors through deduplication, versioning
//! and schema inference into the store. Identifiers are UUID strings;
//! relationships and entities refer to each other only by identifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Content-derived file kind. Never inferred from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    Pdf,
    Image,
    PlainText,
    ChatLog,
    Unknown,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Image => "image",
            FileKind::PlainText => "plain-text",
            FileKind::ChatLog => "chat-log",
            FileKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(FileKind::Pdf),
            "image" => Some(FileKind::Image),
            "plain-text" => Some(FileKind::PlainText),
            "chat-log" => Some(FileKind::ChatLog),
            "unknown" => Some(FileKind::Unknown),
            _ => None,
        }
    }

    /// MIME-like label stored alongside file metadata.
    pub fn mime_type(&self) -> &'static str {
        match self {
            FileKind::Pdf => "application/pdf",
            FileKind::Image => "image/*",
            FileKind::PlainText => "text/plain",
            FileKind::ChatLog => "text/x-chat-log",
            FileKind::Unknown => "application/octet-stream",
        }
    }

    /// Textual kinds are normalized (BOM, line endings) before fingerprinting.
    pub fn is_textual(&self) -> bool {
        matches!(self, FileKind::PlainText | FileKind::ChatLog)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value exactly as observed in a source, before type inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl RawValue {
    pub fn text(s: impl Into<String>) -> Self {
        RawValue::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        match self {
            RawValue::Null => true,
            RawValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Null => f.write_str(""),
            RawValue::Bool(b) => write!(f, "{}", b),
            RawValue::Integer(i) => write!(f, "{}", i),
            RawValue::Real(r) => write!(f, "{}", r),
            RawValue::Text(s) => f.write_str(s),
        }
    }
}

/// One business record as extracted: field name → raw value.
pub type Record = BTreeMap<String, RawValue>;

/// Filesystem facts about a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_name: String,
    pub extension: Option<String>,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub mime_type: String,
}

/// A file read from disk, classified and hashed. Immutable once built.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub kind: FileKind,
    /// sha256 of the bytes as read.
    pub raw_hash: String,
    /// sha256 of the normalized bytes; the deduplication key.
    pub fingerprint: String,
    pub metadata: FileMetadata,
}

impl SourceFile {
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

/// One turn of a chat transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub timestamp: Option<DateTime<Utc>>,
    pub raw_timestamp: String,
    pub speaker: String,
    pub content: String,
}

/// Output of an extractor. Re-extraction produces a new value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub text: String,
    pub records: Vec<Record>,
    pub metadata: Record,
    /// Per-page text for paged formats; `None` marks a page that failed.
    pub pages: Vec<Option<String>>,
    pub chat_turns: Vec<ChatTurn>,
    /// Share of the source that extracted cleanly, in `[0, 1]`.
    pub confidence: f64,
    pub warnings: Vec<String>,
}

/// Logical identity of one source across its revisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_path: String,
    pub kind: FileKind,
    /// Fingerprint of the latest version.
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One revision of a document's extracted content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub document_id: String,
    pub version: i64,
    pub fingerprint: String,
    pub raw_hash: String,
    pub text: String,
    pub records: Vec<Record>,
    pub pages: Vec<Option<String>>,
    pub metadata: serde_json::Value,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Who produced an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "owner_kind", content = "owner_id", rename_all = "snake_case")]
pub enum EntityOwner {
    Document(String),
    Chat(String),
}

impl EntityOwner {
    pub fn kind_str(&self) -> &'static str {
        match self {
            EntityOwner::Document(_) => "document",
            EntityOwner::Chat(_) => "chat",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EntityOwner::Document(id) | EntityOwner::Chat(id) => id,
        }
    }

    pub fn from_parts(kind: &str, id: String) -> Option<Self> {
        match kind {
            "document" => Some(EntityOwner::Document(id)),
            "chat" => Some(EntityOwner::Chat(id)),
            _ => None,
        }
    }
}

/// One inferred business record derived from a document or chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub owner: EntityOwner,
    pub record_index: i64,
    pub entity_type: String,
    pub values: Record,
    /// Schema snapshot version the entity was merged into.
    pub schema_version: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// At least one field name matches on both sides.
    SharedIdentifier,
    /// Only cross-field matches (e.g. `customer_id` → `id`).
    Reference,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::SharedIdentifier => "shared_identifier",
            RelationshipKind::Reference => "reference",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "shared_identifier" => Some(RelationshipKind::SharedIdentifier),
            "reference" => Some(RelationshipKind::Reference),
            _ => None,
        }
    }
}

/// A field pair whose values justified a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub from_field: String,
    pub to_field: String,
    pub value: String,
}

/// Directed edge between two entities, by identifier only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub from_entity: String,
    pub to_entity: String,
    pub kind: RelationshipKind,
    pub matches: Vec<FieldMatch>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Order-independent key; at most one edge exists per pair.
    pub fn pair_key(&self) -> String {
        pair_key(&self.from_entity, &self.to_entity)
    }

    pub fn touches(&self, entity_id: &str) -> bool {
        self.from_entity == entity_id || self.to_entity == entity_id
    }
}

pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}|{}", a, b)
    } else {
        format!("{}|{}", b, a)
    }
}

/// A stored conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    pub conversation_id: String,
    pub speaker: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// Input to `store_chat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewChatRecord {
    pub conversation_id: String,
    pub speaker: String,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

pub fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

pub fn format_ts_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_value_json_is_untagged() {
        let record: Record = [
            ("total".to_string(), RawValue::Integer(12)),
            ("paid".to_string(), RawValue::Bool(true)),
            ("note".to_string(), RawValue::text("net 30")),
            ("memo".to_string(), RawValue::Null),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"memo":null,"note":"net 30","paid":true,"total":12}"#
        );
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn blank_text_counts_as_null() {
        assert!(RawValue::text("   ").is_null());
        assert!(!RawValue::Integer(0).is_null());
    }

    #[test]
    fn pair_key_ignores_direction() {
        assert_eq!(pair_key("a", "b"), pair_key("b", "a"));
    }

    #[test]
    fn file_kind_round_trips_through_str() {
        for kind in [
            FileKind::Pdf,
            FileKind::Image,
            FileKind::PlainText,
            FileKind::ChatLog,
            FileKind::Unknown,
        ] {
            assert_eq!(FileKind::parse(kind.as_str()), Some(kind));
        }
    }
}
