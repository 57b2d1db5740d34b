use anyhow::{Context, Result};
use sqlx::SqlitePool;

/// Idempotent schema setup. Safe to run on every open.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_path TEXT NOT NULL,
            kind TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS document_versions (
            document_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            fingerprint TEXT NOT NULL,
            raw_hash TEXT NOT NULL,
            text TEXT NOT NULL,
            records_json TEXT NOT NULL DEFAULT '[]',
            pages_json TEXT NOT NULL DEFAULT '[]',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            confidence REAL NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (document_id, version),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            owner_kind TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            record_index INTEGER NOT NULL,
            entity_type TEXT NOT NULL,
            values_json TEXT NOT NULL,
            schema_version INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS relationships (
            id TEXT PRIMARY KEY,
            pair_key TEXT NOT NULL UNIQUE,
            from_entity TEXT NOT NULL,
            to_entity TEXT NOT NULL,
            kind TEXT NOT NULL,
            matches_json TEXT NOT NULL,
            confidence REAL NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS chat_records (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            speaker TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS schema_fields (
            name TEXT PRIMARY KEY,
            field_type TEXT NOT NULL,
            nullable INTEGER NOT NULL,
            conflicted INTEGER NOT NULL,
            contributing_kinds TEXT NOT NULL,
            introduced_in INTEGER NOT NULL,
            updated_in INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS schema_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            field TEXT NOT NULL,
            existing_type TEXT NOT NULL,
            observed_type TEXT NOT NULL,
            resolved_type TEXT NOT NULL,
            kind TEXT NOT NULL,
            source TEXT NOT NULL,
            schema_version INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS schema_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_documents_source_path ON documents(source_path)",
        "CREATE INDEX IF NOT EXISTS idx_versions_raw_hash ON document_versions(document_id, raw_hash)",
        "CREATE INDEX IF NOT EXISTS idx_entities_owner ON entities(owner_kind, owner_id)",
        "CREATE INDEX IF NOT EXISTS idx_relationships_from ON relationships(from_entity)",
        "CREATE INDEX IF NOT EXISTS idx_relationships_to ON relationships(to_entity)",
        "CREATE INDEX IF NOT EXISTS idx_chat_conversation ON chat_records(conversation_id, timestamp)",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to run migration")?;
    }

    Ok(())
}
