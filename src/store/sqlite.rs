//! SQLite [`Store`] backed by a `sqlx` pool.
//!
//! JSON columns hold records, pages, metadata and relationship matches.
//! Timestamps are Unix seconds.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{Store, VersionCommit};
use crate::models::{
    ts_to_datetime, ChatRecord, Document, DocumentVersion, Entity, EntityOwner, FileKind,
    Relationship, RelationshipKind,
};
use crate::schema::{Conflict, FieldType, SchemaField, SchemaSnapshot};
use crate::stats::{KindStats, StoreStats};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_kind(raw: &str) -> Result<FileKind> {
    FileKind::parse(raw).with_context(|| format!("Unknown file kind in store: {}", raw))
}

fn parse_field_type(raw: &str) -> Result<FieldType> {
    FieldType::parse(raw).with_context(|| format!("Unknown field type in store: {}", raw))
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    Ok(Document {
        id: row.get("id"),
        source_path: row.get("source_path"),
        kind: parse_kind(row.get("kind"))?,
        fingerprint: row.get("fingerprint"),
        created_at: ts_to_datetime(row.get("created_at")),
        updated_at: ts_to_datetime(row.get("updated_at")),
    })
}

fn version_from_row(row: &SqliteRow) -> Result<DocumentVersion> {
    let records_json: String = row.get("records_json");
    let pages_json: String = row.get("pages_json");
    let metadata_json: String = row.get("metadata_json");
    Ok(DocumentVersion {
        document_id: row.get("document_id"),
        version: row.get("version"),
        fingerprint: row.get("fingerprint"),
        raw_hash: row.get("raw_hash"),
        text: row.get("text"),
        records: serde_json::from_str(&records_json).context("Corrupt records_json")?,
        pages: serde_json::from_str(&pages_json).context("Corrupt pages_json")?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        confidence: row.get("confidence"),
        created_at: ts_to_datetime(row.get("created_at")),
    })
}

fn entity_from_row(row: &SqliteRow) -> Result<Entity> {
    let owner_kind: String = row.get("owner_kind");
    let owner_id: String = row.get("owner_id");
    let values_json: String = row.get("values_json");
    let schema_version: i64 = row.get("schema_version");
    Ok(Entity {
        id: row.get("id"),
        owner: EntityOwner::from_parts(&owner_kind, owner_id)
            .with_context(|| format!("Unknown entity owner kind: {}", owner_kind))?,
        record_index: row.get("record_index"),
        entity_type: row.get("entity_type"),
        values: serde_json::from_str(&values_json).context("Corrupt values_json")?,
        schema_version: schema_version as u64,
        created_at: ts_to_datetime(row.get("created_at")),
    })
}

fn relationship_from_row(row: &SqliteRow) -> Result<Relationship> {
    let kind: String = row.get("kind");
    let matches_json: String = row.get("matches_json");
    Ok(Relationship {
        id: row.get("id"),
        from_entity: row.get("from_entity"),
        to_entity: row.get("to_entity"),
        kind: RelationshipKind::parse(&kind)
            .with_context(|| format!("Unknown relationship kind: {}", kind))?,
        matches: serde_json::from_str(&matches_json).context("Corrupt matches_json")?,
        confidence: row.get("confidence"),
        created_at: ts_to_datetime(row.get("created_at")),
    })
}

fn chat_from_row(row: &SqliteRow) -> ChatRecord {
    let metadata_json: String = row.get("metadata_json");
    ChatRecord {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        speaker: row.get("speaker"),
        content: row.get("content"),
        timestamp: ts_to_datetime(row.get("timestamp")),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
    }
}

async fn insert_entities(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entities: &[Entity],
) -> Result<()> {
    for entity in entities {
        sqlx::query(
            r#"
            INSERT INTO entities (id, owner_kind, owner_id, record_index, entity_type, values_json, schema_version, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entity.id)
        .bind(entity.owner.kind_str())
        .bind(entity.owner.id())
        .bind(entity.record_index)
        .bind(&entity.entity_type)
        .bind(serde_json::to_string(&entity.values)?)
        .bind(entity.schema_version as i64)
        .bind(entity.created_at.timestamp())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn commit_version(&self, commit: &VersionCommit) -> Result<i64> {
        let doc = &commit.document;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, source_path, kind, fingerprint, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                fingerprint = excluded.fingerprint,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.source_path)
        .bind(doc.kind.as_str())
        .bind(&doc.fingerprint)
        .bind(doc.created_at.timestamp())
        .bind(doc.updated_at.timestamp())
        .execute(&mut *tx)
        .await?;

        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM document_versions WHERE document_id = ?")
                .bind(&doc.id)
                .fetch_one(&mut *tx)
                .await?;
        let version = crate::versions::next_version(latest);

        sqlx::query(
            r#"
            INSERT INTO document_versions
                (document_id, version, fingerprint, raw_hash, text, records_json, pages_json, metadata_json, confidence, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(version)
        .bind(&doc.fingerprint)
        .bind(&commit.raw_hash)
        .bind(&commit.text)
        .bind(serde_json::to_string(&commit.records)?)
        .bind(serde_json::to_string(&commit.pages)?)
        .bind(commit.metadata.to_string())
        .bind(commit.confidence)
        .bind(doc.updated_at.timestamp())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM relationships
            WHERE from_entity IN (SELECT id FROM entities WHERE owner_kind = 'document' AND owner_id = ?)
               OR to_entity IN (SELECT id FROM entities WHERE owner_kind = 'document' AND owner_id = ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM entities WHERE owner_kind = 'document' AND owner_id = ?")
            .bind(&doc.id)
            .execute(&mut *tx)
            .await?;

        insert_entities(&mut tx, &commit.entities).await?;

        tx.commit().await?;
        Ok(version)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, source_path, kind, fingerprint, created_at, updated_at FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, source_path, kind, fingerprint, created_at, updated_at FROM documents ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn list_versions(&self, document_id: &str) -> Result<Vec<DocumentVersion>> {
        let rows = sqlx::query(
            "SELECT * FROM document_versions WHERE document_id = ? ORDER BY version ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(version_from_row).collect()
    }

    async fn latest_version(&self, document_id: &str) -> Result<Option<DocumentVersion>> {
        let row = sqlx::query(
            "SELECT * FROM document_versions WHERE document_id = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn is_current(
        &self,
        document_id: &str,
        source_path: &str,
        raw_hash: &str,
    ) -> Result<bool> {
        let current: bool = sqlx::query_scalar(
            r#"
            SELECT COALESCE(
                (SELECT raw_hash FROM document_versions
                 WHERE document_id = ? ORDER BY version DESC LIMIT 1) = ?,
                0
            ) OR (
                EXISTS (SELECT 1 FROM documents WHERE id = ? AND source_path <> ?)
                AND EXISTS (SELECT 1 FROM document_versions
                            WHERE document_id = ? AND raw_hash = ?)
            )
            "#,
        )
        .bind(document_id)
        .bind(raw_hash)
        .bind(document_id)
        .bind(source_path)
        .bind(document_id)
        .bind(raw_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(current)
    }

    async fn version_fingerprints(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT document_id, fingerprint FROM document_versions ORDER BY document_id, version",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("document_id"), row.get("fingerprint")))
            .collect())
    }

    async fn entities(&self) -> Result<Vec<Entity>> {
        let rows = sqlx::query(
            "SELECT * FROM entities ORDER BY created_at ASC, owner_id ASC, record_index ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entity_from_row).collect()
    }

    async fn entities_for_owner(&self, owner: &EntityOwner) -> Result<Vec<Entity>> {
        let rows = sqlx::query(
            "SELECT * FROM entities WHERE owner_kind = ? AND owner_id = ? ORDER BY record_index ASC",
        )
        .bind(owner.kind_str())
        .bind(owner.id())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entity_from_row).collect()
    }

    async fn upsert_relationships(&self, edges: &[Relationship]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0usize;
        for edge in edges {
            let result = sqlx::query(
                r#"
                INSERT INTO relationships (id, pair_key, from_entity, to_entity, kind, matches_json, confidence, created_at)
                SELECT ?, ?, ?, ?, ?, ?, ?, ?
                WHERE EXISTS (SELECT 1 FROM entities WHERE id = ?)
                  AND EXISTS (SELECT 1 FROM entities WHERE id = ?)
                ON CONFLICT(pair_key) DO UPDATE SET
                    from_entity = excluded.from_entity,
                    to_entity = excluded.to_entity,
                    kind = excluded.kind,
                    matches_json = excluded.matches_json,
                    confidence = excluded.confidence
                WHERE relationships.confidence <> excluded.confidence
                "#,
            )
            .bind(&edge.id)
            .bind(edge.pair_key())
            .bind(&edge.from_entity)
            .bind(&edge.to_entity)
            .bind(edge.kind.as_str())
            .bind(serde_json::to_string(&edge.matches)?)
            .bind(edge.confidence)
            .bind(edge.created_at.timestamp())
            .bind(&edge.from_entity)
            .bind(&edge.to_entity)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn relationships(&self) -> Result<Vec<Relationship>> {
        let rows = sqlx::query("SELECT * FROM relationships ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(relationship_from_row).collect()
    }

    async fn save_schema(&self, snapshot: &SchemaSnapshot, conflicts: &[Conflict]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for field in snapshot.fields.values() {
            let kinds: Vec<&str> = field.contributing_kinds.iter().map(|k| k.as_str()).collect();
            sqlx::query(
                r#"
                INSERT INTO schema_fields (name, field_type, nullable, conflicted, contributing_kinds, introduced_in, updated_in)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(name) DO UPDATE SET
                    field_type = excluded.field_type,
                    nullable = excluded.nullable,
                    conflicted = excluded.conflicted,
                    contributing_kinds = excluded.contributing_kinds,
                    updated_in = excluded.updated_in
                "#,
            )
            .bind(&field.name)
            .bind(field.field_type.as_str())
            .bind(field.nullable)
            .bind(field.conflicted)
            .bind(serde_json::to_string(&kinds)?)
            .bind(field.introduced_in as i64)
            .bind(field.updated_in as i64)
            .execute(&mut *tx)
            .await?;
        }

        for conflict in conflicts {
            sqlx::query(
                r#"
                INSERT INTO schema_conflicts (field, existing_type, observed_type, resolved_type, kind, source, schema_version)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&conflict.field)
            .bind(conflict.existing.as_str())
            .bind(conflict.observed.as_str())
            .bind(conflict.resolved.as_str())
            .bind(conflict.kind.as_str())
            .bind(&conflict.source)
            .bind(snapshot.version as i64)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO schema_meta (key, value) VALUES ('version', ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(snapshot.version.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_schema(&self) -> Result<SchemaSnapshot> {
        let version: Option<String> =
            sqlx::query_scalar("SELECT value FROM schema_meta WHERE key = 'version'")
                .fetch_optional(&self.pool)
                .await?;
        let version = match version {
            Some(v) => v
                .parse::<u64>()
                .with_context(|| format!("Corrupt schema version: {}", v))?,
            None => 0,
        };

        let rows = sqlx::query("SELECT * FROM schema_fields ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        let mut snapshot = SchemaSnapshot {
            version,
            ..Default::default()
        };
        for row in &rows {
            let kinds_json: String = row.get("contributing_kinds");
            let kinds: Vec<String> =
                serde_json::from_str(&kinds_json).context("Corrupt contributing_kinds")?;
            let contributing_kinds = kinds
                .iter()
                .map(|k| parse_kind(k))
                .collect::<Result<BTreeSet<_>>>()?;
            let name: String = row.get("name");
            let introduced_in: i64 = row.get("introduced_in");
            let updated_in: i64 = row.get("updated_in");
            snapshot.fields.insert(
                name.clone(),
                SchemaField {
                    name,
                    field_type: parse_field_type(row.get("field_type"))?,
                    nullable: row.get("nullable"),
                    conflicted: row.get("conflicted"),
                    contributing_kinds,
                    introduced_in: introduced_in as u64,
                    updated_in: updated_in as u64,
                },
            );
        }
        Ok(snapshot)
    }

    async fn conflicts(&self) -> Result<Vec<Conflict>> {
        let rows = sqlx::query("SELECT * FROM schema_conflicts ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Conflict {
                    field: row.get("field"),
                    existing: parse_field_type(row.get("existing_type"))?,
                    observed: parse_field_type(row.get("observed_type"))?,
                    resolved: parse_field_type(row.get("resolved_type"))?,
                    kind: parse_kind(row.get("kind"))?,
                    source: row.get("source"),
                })
            })
            .collect()
    }

    async fn insert_chat(&self, record: &ChatRecord, entities: &[Entity]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO chat_records (id, conversation_id, speaker, content, timestamp, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.conversation_id)
        .bind(&record.speaker)
        .bind(&record.content)
        .bind(record.timestamp.timestamp())
        .bind(record.metadata.to_string())
        .execute(&mut *tx)
        .await?;
        insert_entities(&mut tx, entities).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn chat_history(&self, conversation_id: &str) -> Result<Vec<ChatRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM chat_records WHERE conversation_id = ? ORDER BY timestamp ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chat_from_row).collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &'static str| {
            let pool = self.pool.clone();
            async move {
                let n: i64 = sqlx::query_scalar(sql).fetch_one(&pool).await?;
                Ok::<u64, anyhow::Error>(n as u64)
            }
        };

        let mut stats = StoreStats {
            documents: count("SELECT COUNT(*) FROM documents").await?,
            versions: count("SELECT COUNT(*) FROM document_versions").await?,
            entities: count("SELECT COUNT(*) FROM entities").await?,
            relationships: count("SELECT COUNT(*) FROM relationships").await?,
            chat_records: count("SELECT COUNT(*) FROM chat_records").await?,
            schema_fields: count("SELECT COUNT(*) FROM schema_fields").await?,
            conflicts: count("SELECT COUNT(*) FROM schema_conflicts").await?,
            schema_version: self.load_schema_version().await?,
            ..Default::default()
        };

        let rows = sqlx::query(
            r#"
            SELECT d.kind AS kind,
                   COUNT(DISTINCT d.id) AS documents,
                   COUNT(v.version) AS versions
            FROM documents d
            LEFT JOIN document_versions v ON v.document_id = d.id
            GROUP BY d.kind
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        for row in &rows {
            let documents: i64 = row.get("documents");
            let versions: i64 = row.get("versions");
            stats.by_kind.insert(
                parse_kind(row.get("kind"))?,
                KindStats {
                    documents: documents as u64,
                    versions: versions as u64,
                },
            );
        }

        stats.last_ingest = sqlx::query_scalar("SELECT MAX(updated_at) FROM documents")
            .fetch_one(&self.pool)
            .await?;

        Ok(stats)
    }
}

impl SqliteStore {
    async fn load_schema_version(&self) -> Result<u64> {
        let version: Option<String> =
            sqlx::query_scalar("SELECT value FROM schema_meta WHERE key = 'version'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
    }
}
