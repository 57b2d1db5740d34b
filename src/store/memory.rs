//! In-memory [`Store`] implementation for tests and ephemeral engines.
//!
//! All state sits behind one `std::sync::RwLock`, so every trait method is
//! atomic with respect to the others, matching the transactional SQLite
//! backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;

use super::{Store, VersionCommit};
use crate::models::{ChatRecord, Document, DocumentVersion, Entity, EntityOwner, Relationship};
use crate::schema::{Conflict, SchemaSnapshot};
use crate::stats::{KindStats, StoreStats};

#[derive(Default)]
struct State {
    documents: BTreeMap<String, Document>,
    versions: HashMap<String, Vec<DocumentVersion>>,
    /// Insertion-ordered.
    entities: Vec<Entity>,
    relationships: BTreeMap<String, Relationship>,
    schema: SchemaSnapshot,
    conflicts: Vec<Conflict>,
    chats: Vec<ChatRecord>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn commit_version(&self, commit: &VersionCommit) -> Result<i64> {
        let mut state = self.write();
        let doc = &commit.document;

        let document = state
            .documents
            .entry(doc.id.clone())
            .or_insert_with(|| doc.clone());
        document.kind = doc.kind;
        document.fingerprint = doc.fingerprint.clone();
        document.updated_at = doc.updated_at;

        let versions = state.versions.entry(doc.id.clone()).or_default();
        let version = crate::versions::next_version(versions.last().map(|v| v.version));
        versions.push(DocumentVersion {
            document_id: doc.id.clone(),
            version,
            fingerprint: doc.fingerprint.clone(),
            raw_hash: commit.raw_hash.clone(),
            text: commit.text.clone(),
            records: commit.records.clone(),
            pages: commit.pages.clone(),
            metadata: commit.metadata.clone(),
            confidence: commit.confidence,
            created_at: doc.updated_at,
        });

        let owner = EntityOwner::Document(doc.id.clone());
        let removed: Vec<String> = state
            .entities
            .iter()
            .filter(|e| e.owner == owner)
            .map(|e| e.id.clone())
            .collect();
        state
            .relationships
            .retain(|_, r| !removed.iter().any(|id| r.touches(id)));
        state.entities.retain(|e| e.owner != owner);
        state.entities.extend(commit.entities.iter().cloned());

        Ok(version)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read().documents.get(id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self.read().documents.values().cloned().collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn list_versions(&self, document_id: &str) -> Result<Vec<DocumentVersion>> {
        Ok(self
            .read()
            .versions
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn latest_version(&self, document_id: &str) -> Result<Option<DocumentVersion>> {
        Ok(self
            .read()
            .versions
            .get(document_id)
            .and_then(|v| v.last().cloned()))
    }

    async fn is_current(
        &self,
        document_id: &str,
        source_path: &str,
        raw_hash: &str,
    ) -> Result<bool> {
        let state = self.read();
        let Some(versions) = state.versions.get(document_id) else {
            return Ok(false);
        };
        if versions.last().is_some_and(|v| v.raw_hash == raw_hash) {
            return Ok(true);
        }
        let elsewhere = state
            .documents
            .get(document_id)
            .is_some_and(|d| d.source_path != source_path);
        Ok(elsewhere && versions.iter().any(|v| v.raw_hash == raw_hash))
    }

    async fn version_fingerprints(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .read()
            .versions
            .values()
            .flatten()
            .map(|v| (v.document_id.clone(), v.fingerprint.clone()))
            .collect())
    }

    async fn entities(&self) -> Result<Vec<Entity>> {
        Ok(self.read().entities.clone())
    }

    async fn entities_for_owner(&self, owner: &EntityOwner) -> Result<Vec<Entity>> {
        Ok(self
            .read()
            .entities
            .iter()
            .filter(|e| &e.owner == owner)
            .cloned()
            .collect())
    }

    async fn upsert_relationships(&self, edges: &[Relationship]) -> Result<usize> {
        let mut state = self.write();
        let mut written = 0;
        for edge in edges {
            let exists = |id: &str| state.entities.iter().any(|e| e.id == id);
            if !exists(&edge.from_entity) || !exists(&edge.to_entity) {
                continue;
            }
            let key = edge.pair_key();
            match state.relationships.get_mut(&key) {
                Some(existing) if existing.confidence == edge.confidence => {}
                Some(existing) => {
                    existing.from_entity = edge.from_entity.clone();
                    existing.to_entity = edge.to_entity.clone();
                    existing.kind = edge.kind;
                    existing.matches = edge.matches.clone();
                    existing.confidence = edge.confidence;
                    written += 1;
                }
                None => {
                    state.relationships.insert(key, edge.clone());
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    async fn relationships(&self) -> Result<Vec<Relationship>> {
        let mut edges: Vec<Relationship> = self.read().relationships.values().cloned().collect();
        edges.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(edges)
    }

    async fn save_schema(&self, snapshot: &SchemaSnapshot, conflicts: &[Conflict]) -> Result<()> {
        let mut state = self.write();
        state.schema = snapshot.clone();
        state.conflicts.extend(conflicts.iter().cloned());
        Ok(())
    }

    async fn load_schema(&self) -> Result<SchemaSnapshot> {
        Ok(self.read().schema.clone())
    }

    async fn conflicts(&self) -> Result<Vec<Conflict>> {
        Ok(self.read().conflicts.clone())
    }

    async fn insert_chat(&self, record: &ChatRecord, entities: &[Entity]) -> Result<()> {
        let mut state = self.write();
        state.chats.push(record.clone());
        state.entities.extend(entities.iter().cloned());
        Ok(())
    }

    async fn chat_history(&self, conversation_id: &str) -> Result<Vec<ChatRecord>> {
        let mut history: Vec<ChatRecord> = self
            .read()
            .chats
            .iter()
            .filter(|c| c.conversation_id == conversation_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        history.sort_by_key(|c| c.timestamp);
        Ok(history)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let state = self.read();
        let mut stats = StoreStats {
            documents: state.documents.len() as u64,
            versions: state.versions.values().map(|v| v.len() as u64).sum(),
            entities: state.entities.len() as u64,
            relationships: state.relationships.len() as u64,
            chat_records: state.chats.len() as u64,
            schema_fields: state.schema.fields.len() as u64,
            schema_version: state.schema.version,
            conflicts: state.conflicts.len() as u64,
            last_ingest: state.documents.values().map(|d| d.updated_at.timestamp()).max(),
            ..Default::default()
        };
        for doc in state.documents.values() {
            let entry: &mut KindStats = stats.by_kind.entry(doc.kind).or_default();
            entry.documents += 1;
            entry.versions += state.versions.get(&doc.id).map_or(0, |v| v.len() as u64);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileKind, RawValue, Record, RelationshipKind};
    use chrono::Utc;

    fn commit(doc_id: &str, raw_hash: &str, entity_id: &str) -> VersionCommit {
        let now = Utc::now();
        let mut values = Record::new();
        values.insert("order_no".into(), RawValue::text("ORD-1"));
        VersionCommit {
            document: Document {
                id: doc_id.into(),
                source_path: format!("/data/{}", doc_id),
                kind: FileKind::Pdf,
                fingerprint: raw_hash.into(),
                created_at: now,
                updated_at: now,
            },
            raw_hash: raw_hash.into(),
            text: String::new(),
            records: vec![values.clone()],
            pages: vec![Some("page".into()), None],
            metadata: serde_json::json!({}),
            confidence: 0.5,
            entities: vec![Entity {
                id: entity_id.into(),
                owner: EntityOwner::Document(doc_id.into()),
                record_index: 0,
                entity_type: "order".into(),
                values,
                schema_version: 1,
                created_at: now,
            }],
        }
    }

    #[tokio::test]
    async fn commit_appends_and_replaces() {
        let store = InMemoryStore::new();
        assert_eq!(store.commit_version(&commit("d", "h1", "e1")).await.unwrap(), 1);
        assert_eq!(store.commit_version(&commit("d", "h2", "e2")).await.unwrap(), 2);
        let entities = store.entities().await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "e2");
        assert!(!store.is_current("d", "/data/d", "h1").await.unwrap());
        assert!(store.is_current("d", "/data/d", "h2").await.unwrap());
        assert!(store.is_current("d", "/copy/d", "h1").await.unwrap());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.versions, 2);
        assert_eq!(stats.by_kind[&FileKind::Pdf].versions, 2);
    }

    #[tokio::test]
    async fn edges_follow_their_entities() {
        let store = InMemoryStore::new();
        store.commit_version(&commit("a", "ha", "ea")).await.unwrap();
        store.commit_version(&commit("b", "hb", "eb")).await.unwrap();
        let edge = Relationship {
            id: "r".into(),
            from_entity: "eb".into(),
            to_entity: "ea".into(),
            kind: RelationshipKind::SharedIdentifier,
            matches: Vec::new(),
            confidence: 0.42,
            created_at: Utc::now(),
        };
        assert_eq!(store.upsert_relationships(&[edge.clone()]).await.unwrap(), 1);
        assert_eq!(store.upsert_relationships(&[edge]).await.unwrap(), 0);

        store.commit_version(&commit("a", "ha2", "ea2")).await.unwrap();
        assert!(store.relationships().await.unwrap().is_empty());
    }
}
