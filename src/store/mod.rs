//! Storage abstraction.
//!
//! The [`Store`] trait covers every persistent operation the engine needs.
//! [`SqliteStore`](sqlite::SqliteStore) is the production backend;
//! [`InMemoryStore`](memory::InMemoryStore) backs tests and ephemeral use.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`commit_version`](Store::commit_version) | Append a version and replace the owner's entities, atomically |
//! | [`is_current`](Store::is_current) | Do these bytes match what a document holds for a path? |
//! | [`upsert_relationships`](Store::upsert_relationships) | Insert edges, one per entity pair |
//! | [`save_schema`](Store::save_schema) | Persist a schema snapshot and its conflicts |
//! | [`insert_chat`](Store::insert_chat) | Store a chat turn with its entities |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ChatRecord, Document, DocumentVersion, Entity, EntityOwner, Record, Relationship,
};
use crate::schema::{Conflict, SchemaSnapshot};
use crate::stats::StoreStats;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Everything written by one version append.
#[derive(Debug, Clone)]
pub struct VersionCommit {
    /// Document row as it should read after the commit. Created if absent.
    pub document: Document,
    pub raw_hash: String,
    pub text: String,
    pub records: Vec<Record>,
    pub pages: Vec<Option<String>>,
    pub metadata: serde_json::Value,
    pub confidence: f64,
    /// Replaces every entity previously owned by the document.
    pub entities: Vec<Entity>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Append the next version of `commit.document` and swap its entities.
    ///
    /// The old entities' relationships are deleted in the same transaction.
    /// Returns the assigned version number.
    async fn commit_version(&self, commit: &VersionCommit) -> Result<i64>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// All versions of a document, oldest first.
    async fn list_versions(&self, document_id: &str) -> Result<Vec<DocumentVersion>>;

    async fn latest_version(&self, document_id: &str) -> Result<Option<DocumentVersion>>;

    /// True when the latest version of `document_id` carries `raw_hash`.
    ///
    /// A copy at a path other than the document's `source_path` is also
    /// current when any earlier version stored the same bytes, so twins with
    /// different line endings do not append a version on every pass.
    async fn is_current(&self, document_id: &str, source_path: &str, raw_hash: &str)
        -> Result<bool>;

    /// `(document_id, fingerprint)` for every stored version.
    async fn version_fingerprints(&self) -> Result<Vec<(String, String)>>;

    /// Entities of the latest version of every document and of every chat.
    async fn entities(&self) -> Result<Vec<Entity>>;

    async fn entities_for_owner(&self, owner: &EntityOwner) -> Result<Vec<Entity>>;

    /// Insert edges keyed by unordered entity pair. An existing edge is
    /// replaced only when its confidence changed; edges whose endpoints no
    /// longer exist are dropped. Returns the number of rows written.
    async fn upsert_relationships(&self, edges: &[Relationship]) -> Result<usize>;

    async fn relationships(&self) -> Result<Vec<Relationship>>;

    async fn save_schema(&self, snapshot: &SchemaSnapshot, conflicts: &[Conflict]) -> Result<()>;

    async fn load_schema(&self) -> Result<SchemaSnapshot>;

    async fn conflicts(&self) -> Result<Vec<Conflict>>;

    async fn insert_chat(&self, record: &ChatRecord, entities: &[Entity]) -> Result<()>;

    /// Turns of one conversation, ordered by timestamp then insertion.
    async fn chat_history(&self, conversation_id: &str) -> Result<Vec<ChatRecord>>;

    async fn stats(&self) -> Result<StoreStats>;
}
