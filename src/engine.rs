//! The engine: the operations an outer shell calls.
//!
//! | Operation | Returns |
//! |-----------|---------|
//! | [`Engine::ingest_directory`] | [`IngestionReport`] for one batch |
//! | [`Engine::ingest_file`] | [`IngestionReport`] for one file |
//! | [`Engine::get_document`] | [`DocumentView`] |
//! | [`Engine::get_schema`] | schema fields, sorted by name |
//! | [`Engine::run_query`] | [`QueryOutcome`] or [`QueryError`] |
//! | [`Engine::store_chat`] | id of the stored chat record |
//! | [`Engine::chat_history`] | one conversation, oldest first |
//! | [`Engine::list_versions`] | every version of a document |
//! | [`Engine::stats`] | [`StoreStats`] |

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::config::Config;
use crate::error::IngestionReport;
use crate::extract::chat::turn_record;
use crate::ingest::{entity_type_for, Pipeline};
use crate::models::{
    ChatRecord, ChatTurn, Document, DocumentVersion, Entity, EntityOwner, FileKind, NewChatRecord,
};
use crate::query::{self, QueryPlan, TranslationFailure};
use crate::schema::{SchemaField, SchemaSnapshot};
use crate::stats::StoreStats;
use crate::store::{SqliteStore, Store};
use crate::{db, migrate};

/// A document with its latest content and entities.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub document: Document,
    pub latest: Option<DocumentVersion>,
    pub entities: Vec<Entity>,
    pub version_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub rows: Vec<serde_json::Value>,
    pub warnings: Vec<String>,
    pub total_matched: usize,
    pub plan: QueryPlan,
}

#[derive(Debug, Error)]
pub enum QueryError {
    /// The request could not be mapped onto the current schema.
    #[error(transparent)]
    Translation(#[from] TranslationFailure),

    #[error("query execution failed: {0:#}")]
    Store(#[from] anyhow::Error),
}

pub struct Engine {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    pipeline: Pipeline,
    pool: Option<SqlitePool>,
}

impl Engine {
    /// Connect to the configured database, run migrations and rebuild the
    /// in-memory indexes.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool.clone()));
        let mut engine = Self::with_store(config, store).await?;
        engine.pool = Some(pool);
        Ok(engine)
    }

    /// Build an engine over any store, e.g. an `InMemoryStore`.
    pub async fn with_store(config: Config, store: Arc<dyn Store>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let pipeline = Pipeline::open(config.clone(), store.clone()).await?;
        Ok(Self {
            config,
            store,
            pipeline,
            pool: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// The schema snapshot queries currently translate against.
    pub fn schema_snapshot(&self) -> Arc<SchemaSnapshot> {
        self.pipeline.schema.snapshot()
    }

    pub async fn ingest_directory(&self, path: impl AsRef<Path>) -> Result<IngestionReport> {
        self.pipeline.ingest_directory(path.as_ref()).await
    }

    pub async fn ingest_file(&self, path: impl AsRef<Path>) -> Result<IngestionReport> {
        self.pipeline.ingest_file(path.as_ref()).await
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<DocumentView>> {
        let Some(document) = self.store.get_document(id).await? else {
            return Ok(None);
        };
        let versions = self.store.list_versions(id).await?;
        let entities = self
            .store
            .entities_for_owner(&EntityOwner::Document(id.to_string()))
            .await?;
        Ok(Some(DocumentView {
            document,
            version_count: versions.len(),
            latest: versions.into_iter().last(),
            entities,
        }))
    }

    pub fn get_schema(&self) -> Vec<SchemaField> {
        self.schema_snapshot().sorted_fields()
    }

    /// Translate `text` against the current schema snapshot and run it.
    pub async fn run_query(&self, text: &str) -> Result<QueryOutcome, QueryError> {
        let snapshot = self.schema_snapshot();
        let known_types = self.known_entity_types().await?;
        let plan = query::translate(text, &snapshot, &known_types)?;
        let result = query::execute(
            &plan,
            self.store.as_ref(),
            &snapshot,
            self.config.query.default_limit,
        )
        .await?;
        Ok(QueryOutcome {
            rows: result.rows,
            warnings: result.warnings,
            total_matched: result.total_matched,
            plan,
        })
    }

    async fn known_entity_types(&self) -> Result<Vec<String>> {
        let mut types: BTreeSet<String> = self.config.entities.types.iter().cloned().collect();
        types.extend(
            self.store
                .entities()
                .await?
                .into_iter()
                .map(|e| e.entity_type),
        );
        Ok(types.into_iter().collect())
    }

    /// Store one chat turn, infer its entity and relate it to existing ones.
    pub async fn store_chat(&self, record: NewChatRecord) -> Result<String> {
        if record.conversation_id.trim().is_empty() {
            bail!("conversation_id must not be empty");
        }
        if record.speaker.trim().is_empty() {
            bail!("speaker must not be empty");
        }

        let id = uuid::Uuid::new_v4().to_string();
        let timestamp = record.timestamp.unwrap_or_else(Utc::now);
        let values = turn_record(&ChatTurn {
            timestamp: Some(timestamp),
            raw_timestamp: String::new(),
            speaker: record.speaker.clone(),
            content: record.content.clone(),
        });

        let source = format!("chat:{}", record.conversation_id);
        let (snapshot, _conflicts) = self
            .pipeline
            .merge_schema(FileKind::ChatLog, &source, std::slice::from_ref(&values))
            .await
            .map_err(|f| f.error.context("Failed to save schema"))?;

        let owner = EntityOwner::Chat(id.clone());
        let entities = vec![Entity {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.clone(),
            record_index: 0,
            entity_type: entity_type_for(&self.config, &values, FileKind::ChatLog, None, ""),
            values,
            schema_version: snapshot.version,
            created_at: Utc::now(),
        }];

        let chat = ChatRecord {
            id: id.clone(),
            conversation_id: record.conversation_id,
            speaker: record.speaker,
            content: record.content,
            timestamp,
            metadata: record
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        };
        self.store
            .insert_chat(&chat, &entities)
            .await
            .context("Failed to store chat record")?;

        let edges = self.pipeline.mapper.map(&owner, &entities, &snapshot);
        if !edges.is_empty() {
            self.store.upsert_relationships(&edges).await?;
        }
        tracing::debug!(chat_id = %id, edges = edges.len(), "Stored chat record");
        Ok(id)
    }

    pub async fn chat_history(&self, conversation_id: &str) -> Result<Vec<ChatRecord>> {
        self.store.chat_history(conversation_id).await
    }

    pub async fn list_versions(&self, document_id: &str) -> Result<Vec<DocumentVersion>> {
        self.store.list_versions(document_id).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    /// Close the database pool, if the engine opened one.
    pub async fn close(self) {
        if let Some(pool) = self.pool {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    async fn engine() -> Engine {
        Engine::with_store(
            Config::with_db_path("unused.sqlite"),
            Arc::new(InMemoryStore::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn chat_turns_become_related_entities() {
        let engine = engine().await;
        let first = engine
            .store_chat(NewChatRecord {
                conversation_id: "support-1".into(),
                speaker: "alice".into(),
                content: "Order No: ORD-7781".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        engine
            .store_chat(NewChatRecord {
                conversation_id: "support-2".into(),
                speaker: "bob".into(),
                content: "Order No: ORD-7781".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let history = engine.chat_history("support-1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, first);

        let schema = engine.get_schema();
        assert!(schema.iter().any(|f| f.name == "order_no"));
        assert_eq!(engine.store().relationships().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chat_requires_a_conversation() {
        let engine = engine().await;
        let err = engine
            .store_chat(NewChatRecord {
                speaker: "alice".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("conversation_id"));
    }

    #[tokio::test]
    async fn unknown_document_is_none() {
        let engine = engine().await;
        assert!(engine.get_document("missing").await.unwrap().is_none());
    }
}
