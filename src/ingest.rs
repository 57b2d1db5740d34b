//! Ingestion pipeline orchestration.
//!
//! Coordinates the per-file flow: discovery → read → classify → extract →
//! dedup/version decision → schema merge → version commit → relationship
//! mapping. Reading, classification and extraction run on the blocking pool,
//! at most `ingest.concurrency` files at a time. Shared state (dedup index,
//! schema registry, identifier index) is only touched after extraction, each
//! behind its own short critical section; versions of one document are
//! appended under that document's lock.
//!
//! Per-file problems end up in the [`IngestionReport`]. A store write that
//! still fails after the configured retries is fatal: files already in
//! flight finish, files not yet started are not processed.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::classify::classify;
use crate::config::{Config, RetryConfig};
use crate::dedup::{fingerprint, sha256_hex, DedupIndex, MatchedBy, NearDuplicateIndex, Resolution};
use crate::error::{IngestIssue, IngestionReport};
use crate::extract::ExtractorSet;
use crate::models::{
    Document, Entity, EntityOwner, ExtractedContent, FileKind, FileMetadata, Record, SourceFile,
};
use crate::relationships::RelationshipMapper;
use crate::schema::{self, Conflict, SchemaRegistry, SchemaSnapshot};
use crate::store::{Store, VersionCommit};
use crate::values::{normalize_field_name, singularize};
use crate::versions::DocumentLocks;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/.DS_Store", "**/*.sqlite-wal", "**/*.sqlite-shm"];

/// A file read, classified and extracted, not yet committed.
struct Prepared {
    source: SourceFile,
    content: ExtractedContent,
}

enum Status {
    Created,
    Versioned,
    Unchanged,
    Skipped(IngestIssue),
    /// Not started because an earlier file hit a fatal error.
    NotStarted,
}

struct FileOutcome {
    path: String,
    status: Status,
    entities: usize,
    relationships: usize,
    conflicts: Vec<Conflict>,
    duplicate: Option<IngestIssue>,
    warnings: Vec<String>,
    /// Store failure that ends the batch.
    fatal: Option<IngestIssue>,
}

impl FileOutcome {
    fn new(path: String, status: Status) -> Self {
        Self {
            path,
            status,
            entities: 0,
            relationships: 0,
            conflicts: Vec::new(),
            duplicate: None,
            warnings: Vec::new(),
            fatal: None,
        }
    }

    fn fail(&mut self, issue: IngestIssue) {
        self.status = Status::Skipped(issue.clone());
        self.fatal = Some(issue);
    }
}

/// A store write that kept failing.
pub(crate) struct WriteFailure {
    pub attempts: u32,
    pub error: anyhow::Error,
}

impl WriteFailure {
    fn issue(&self, path: &str) -> IngestIssue {
        IngestIssue::StoreWriteFailure {
            path: path.to_string(),
            attempts: self.attempts,
            reason: format!("{:#}", self.error),
        }
    }
}

/// Shared ingestion state: indexes rebuilt from the store at open time.
pub struct Pipeline {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    extractors: Arc<ExtractorSet>,
    include: GlobSet,
    exclude: GlobSet,
    dedup: DedupIndex,
    near_duplicates: NearDuplicateIndex,
    locks: DocumentLocks,
    pub(crate) schema: SchemaRegistry,
    pub(crate) mapper: RelationshipMapper,
}

impl Pipeline {
    /// Build the pipeline and load its in-memory indexes from `store`.
    pub async fn open(config: Arc<Config>, store: Arc<dyn Store>) -> Result<Self> {
        let include = build_globset(config.ingest.include_globs.iter().map(String::as_str))?;
        let exclude = build_globset(
            DEFAULT_EXCLUDES
                .iter()
                .copied()
                .chain(config.ingest.exclude_globs.iter().map(String::as_str)),
        )?;

        let snapshot = store
            .load_schema()
            .await
            .context("Failed to load schema")?;
        let mapper = RelationshipMapper::new(&config.relationships)?;
        let pipeline = Self {
            extractors: Arc::new(ExtractorSet::new(&config)),
            include,
            exclude,
            dedup: DedupIndex::new(),
            near_duplicates: NearDuplicateIndex::new(
                config.dedup.shingle_size,
                config.dedup.near_duplicate_threshold,
            ),
            locks: DocumentLocks::new(),
            schema: SchemaRegistry::new(snapshot),
            mapper,
            config,
            store,
        };
        pipeline.restore().await?;
        Ok(pipeline)
    }

    async fn restore(&self) -> Result<()> {
        let documents = self
            .store
            .list_documents()
            .await
            .context("Failed to load documents")?;
        let mut fingerprints: HashMap<String, Vec<String>> = HashMap::new();
        for (document_id, fp) in self.store.version_fingerprints().await? {
            fingerprints.entry(document_id).or_default().push(fp);
        }

        for doc in &documents {
            let fps = fingerprints.get(&doc.id).map(Vec::as_slice).unwrap_or_default();
            self.dedup
                .register(&doc.id, &doc.source_path, fps.iter().map(String::as_str));
            if let Some(latest) = self.store.latest_version(&doc.id).await? {
                self.near_duplicates.update(&doc.id, &latest.text);
            }
        }

        let entities = self.store.entities().await?;
        let snapshot = self.schema.snapshot();
        self.mapper.rebuild(&entities, &snapshot);

        tracing::debug!(
            documents = documents.len(),
            entities = entities.len(),
            schema_version = snapshot.version,
            "Restored ingestion indexes"
        );
        Ok(())
    }

    /// Files under `root` accepted by the include/exclude globs, sorted.
    /// Unreadable directory entries are returned as warnings.
    pub fn discover(&self, root: &Path) -> Result<(Vec<PathBuf>, Vec<String>)> {
        if !root.is_dir() {
            bail!("Not a directory: {}", root.display());
        }

        let mut files = Vec::new();
        let mut warnings = Vec::new();
        for entry in WalkDir::new(root).follow_links(self.config.ingest.follow_symlinks) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warnings.push(format!("skipped directory entry: {}", e));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy();
            if self.exclude.is_match(&*rel_str) || !self.include.is_match(&*rel_str) {
                continue;
            }
            files.push(path.to_path_buf());
        }

        files.sort();
        Ok((files, warnings))
    }

    pub async fn ingest_directory(&self, root: &Path) -> Result<IngestionReport> {
        let (files, warnings) = self.discover(root)?;
        tracing::info!(root = %root.display(), files = files.len(), "Ingesting directory");
        let mut report = self.ingest_paths(files).await;
        let mut all = warnings;
        all.append(&mut report.warnings);
        report.warnings = all;
        Ok(report)
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<IngestionReport> {
        if !path.is_file() {
            bail!("Not a file: {}", path.display());
        }
        Ok(self.ingest_paths(vec![path.to_path_buf()]).await)
    }

    async fn ingest_paths(&self, paths: Vec<PathBuf>) -> IngestionReport {
        let abort = AtomicBool::new(false);
        let mut report = IngestionReport {
            files_seen: paths.len(),
            ..Default::default()
        };

        let outcomes: Vec<FileOutcome> = stream::iter(paths)
            .map(|path| self.ingest_one(path, &abort))
            .buffer_unordered(self.config.ingest.effective_concurrency())
            .collect()
            .await;

        let mut not_started = 0usize;
        for outcome in outcomes {
            report.entities_created += outcome.entities;
            report.relationships_created += outcome.relationships;
            report.conflicts.extend(outcome.conflicts);
            report.duplicate_candidates.extend(outcome.duplicate);
            report
                .warnings
                .extend(outcome.warnings.into_iter().map(|w| format!("{}: {}", outcome.path, w)));
            if let Some(issue) = outcome.fatal {
                report.fatal.get_or_insert_with(|| issue.to_string());
            }
            match outcome.status {
                Status::Created => report.documents_created += 1,
                Status::Versioned => report.documents_versioned += 1,
                Status::Unchanged => report.documents_unchanged += 1,
                Status::Skipped(issue) => report.skip(outcome.path, issue),
                Status::NotStarted => not_started += 1,
            }
        }
        if not_started > 0 {
            report.warnings.push(format!(
                "{} file(s) not processed after a fatal store error",
                not_started
            ));
        }
        report.files_skipped.sort_by(|a, b| a.path.cmp(&b.path));

        tracing::info!(
            seen = report.files_seen,
            created = report.documents_created,
            versioned = report.documents_versioned,
            unchanged = report.documents_unchanged,
            skipped = report.files_skipped.len(),
            conflicts = report.conflicts.len(),
            fatal = report.fatal.is_some(),
            "Ingestion finished"
        );
        report
    }

    async fn ingest_one(&self, path: PathBuf, abort: &AtomicBool) -> FileOutcome {
        let path_str = path.to_string_lossy().to_string();
        if abort.load(Ordering::SeqCst) {
            return FileOutcome::new(path_str, Status::NotStarted);
        }

        let extractors = self.extractors.clone();
        let max_bytes = self.config.ingest.max_file_bytes;
        let prepared = tokio::task::spawn_blocking(move || prepare(&path, max_bytes, &extractors))
            .await
            .unwrap_or_else(|e| {
                Err(IngestIssue::ExtractionFailure {
                    path: path_str.clone(),
                    reason: format!("worker failed: {}", e),
                })
            });

        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(issue) => {
                tracing::warn!("Skipping file: {}", issue);
                return FileOutcome::new(path_str, Status::Skipped(issue));
            }
        };

        let outcome = self.commit(prepared).await;
        if let Some(issue) = &outcome.fatal {
            tracing::error!("Aborting batch: {}", issue);
            abort.store(true, Ordering::SeqCst);
        }
        outcome
    }

    async fn commit(&self, prepared: Prepared) -> FileOutcome {
        let Prepared { source, content } = prepared;
        let path = source.path_string();
        let mut outcome = FileOutcome::new(path.clone(), Status::Unchanged);
        outcome.warnings = content.warnings.clone();

        let resolution = self.dedup.resolve(&source.fingerprint, &path);
        let document_id = resolution.document_id().to_string();
        let _guard = self.locks.lock(&document_id).await;

        let undo = || match &resolution {
            Resolution::New { document_id } => self.dedup.release(document_id),
            Resolution::Existing {
                document_id,
                via: MatchedBy::Path,
            } => self.dedup.forget_fingerprint(&source.fingerprint, document_id),
            Resolution::Existing { .. } => {}
        };

        // A twin of this file may have committed first under the same id.
        let seen = self
            .with_retry("raw hash lookup", || {
                self.store.is_current(&document_id, &path, &source.raw_hash)
            })
            .await;
        match seen {
            Ok(true) => {
                tracing::debug!(path = %path, document_id = %document_id, "Unchanged");
                return outcome;
            }
            Ok(false) => {}
            Err(failure) => {
                undo();
                outcome.fail(failure.issue(&path));
                return outcome;
            }
        }

        let records = records_of(&content);
        let (snapshot, conflicts) = match self.merge_schema(source.kind, &path, &records).await {
            Ok(merged) => merged,
            Err(failure) => {
                undo();
                outcome.fail(failure.issue(&path));
                return outcome;
            }
        };
        outcome.conflicts = conflicts;

        let now = Utc::now();
        let owner = EntityOwner::Document(document_id.clone());
        let entities: Vec<Entity> = records
            .iter()
            .enumerate()
            .map(|(i, record)| Entity {
                id: uuid::Uuid::new_v4().to_string(),
                owner: owner.clone(),
                record_index: i as i64,
                entity_type: entity_type_for(
                    &self.config,
                    record,
                    source.kind,
                    Some(&source.metadata.file_name),
                    &content.text,
                ),
                values: record.clone(),
                schema_version: snapshot.version,
                created_at: now,
            })
            .collect();

        let commit = VersionCommit {
            document: Document {
                id: document_id.clone(),
                source_path: path.clone(),
                kind: source.kind,
                fingerprint: source.fingerprint.clone(),
                created_at: now,
                updated_at: now,
            },
            raw_hash: source.raw_hash.clone(),
            text: content.text.clone(),
            records: content.records.clone(),
            pages: content.pages.clone(),
            metadata: version_metadata(&source.metadata, &content),
            confidence: content.confidence,
            entities: entities.clone(),
        };
        let version = match self
            .with_retry("version commit", || self.store.commit_version(&commit))
            .await
        {
            Ok(version) => version,
            Err(failure) => {
                undo();
                outcome.fail(failure.issue(&path));
                return outcome;
            }
        };
        self.dedup.confirm(&document_id);
        outcome.entities = entities.len();
        outcome.status = if version == 1 {
            Status::Created
        } else {
            Status::Versioned
        };
        tracing::debug!(path = %path, document_id = %document_id, version, "Committed version");

        if version == 1 {
            if let Some(candidate) = self.near_duplicates.best_match(&content.text, &document_id) {
                outcome.duplicate = Some(IngestIssue::DuplicateAmbiguous {
                    path: path.clone(),
                    document_id: document_id.clone(),
                    candidate_document_id: candidate.document_id,
                    similarity: candidate.similarity,
                });
            }
        }
        self.near_duplicates.update(&document_id, &content.text);

        let edges = self.mapper.map(&owner, &entities, &snapshot);
        if !edges.is_empty() {
            match self
                .with_retry("relationship upsert", || self.store.upsert_relationships(&edges))
                .await
            {
                Ok(written) => outcome.relationships = written,
                Err(failure) => outcome.fatal = Some(failure.issue(&path)),
            }
        }
        outcome
    }

    /// Merge `records` into the current schema. A changed snapshot is
    /// persisted before it is published.
    pub(crate) async fn merge_schema(
        &self,
        kind: FileKind,
        source: &str,
        records: &[Record],
    ) -> Result<(Arc<SchemaSnapshot>, Vec<Conflict>), WriteFailure> {
        let guard = self.schema.begin_merge().await;
        let base = guard.base();
        let (next, conflicts) =
            schema::merge(&base, kind, source, records, self.mapper.identifiers());
        if next.version == base.version {
            return Ok((base, conflicts));
        }

        self.with_retry("schema save", || self.store.save_schema(&next, &conflicts))
            .await?;
        for conflict in &conflicts {
            tracing::warn!(
                field = %conflict.field,
                existing = %conflict.existing,
                observed = %conflict.observed,
                source = %conflict.source,
                "Schema conflict; field widened to text"
            );
        }
        Ok((guard.publish(next), conflicts))
    }

    /// Run a store operation, retrying with exponential backoff.
    pub(crate) async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, WriteFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retry = &self.config.ingest.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt >= max_attempts => {
                    return Err(WriteFailure {
                        attempts: attempt,
                        error,
                    })
                }
                Err(error) => {
                    let delay = backoff_delay(retry, attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "{} failed: {:#}; retrying",
                        what,
                        error
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Delay before retry number `attempt + 1`: the initial backoff doubled per
/// attempt, capped at the maximum.
pub fn backoff_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(20);
    Duration::from_millis(
        retry
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(retry.max_backoff_ms),
    )
}

fn build_globset<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Read, classify, hash and extract one file. Runs on a blocking thread.
fn prepare(path: &Path, max_bytes: u64, extractors: &ExtractorSet) -> Result<Prepared, IngestIssue> {
    let path_str = path.to_string_lossy().to_string();
    let read_failure = |e: std::io::Error| IngestIssue::ReadFailure {
        path: path_str.clone(),
        reason: e.to_string(),
    };

    let fs_meta = std::fs::metadata(path).map_err(read_failure)?;
    if fs_meta.len() > max_bytes {
        return Err(IngestIssue::FileTooLarge {
            path: path_str,
            size_bytes: fs_meta.len(),
            limit_bytes: max_bytes,
        });
    }
    let bytes = std::fs::read(path).map_err(read_failure)?;

    let kind = classify(&bytes);
    let Some(extractor) = extractors.for_kind(kind) else {
        return Err(IngestIssue::ClassificationUnknown { path: path_str });
    };
    tracing::debug!(path = %path_str, kind = %kind, "Classified");

    let content = extractor
        .extract(&bytes)
        .map_err(|e| IngestIssue::ExtractionFailure {
            path: path_str.clone(),
            reason: e.to_string(),
        })?;

    let metadata = FileMetadata {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        extension: path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase()),
        size_bytes: bytes.len() as u64,
        modified_at: fs_meta.modified().ok().map(DateTime::<Utc>::from),
        mime_type: kind.mime_type().to_string(),
    };
    let source = SourceFile {
        path: path.to_path_buf(),
        raw_hash: sha256_hex(&bytes),
        fingerprint: fingerprint(kind, &bytes),
        bytes,
        kind,
        metadata,
    };
    Ok(Prepared { source, content })
}

/// Extracted records, or the extracted metadata as a single record when the
/// file yielded none.
fn records_of(content: &ExtractedContent) -> Vec<Record> {
    if !content.records.is_empty() {
        content.records.clone()
    } else if content.metadata.is_empty() {
        Vec::new()
    } else {
        vec![content.metadata.clone()]
    }
}

fn version_metadata(file: &FileMetadata, content: &ExtractedContent) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(
        "file".into(),
        serde_json::to_value(file).unwrap_or(serde_json::Value::Null),
    );
    map.insert(
        "extracted".into(),
        serde_json::to_value(&content.metadata).unwrap_or(serde_json::Value::Null),
    );
    if !content.warnings.is_empty() {
        map.insert("warnings".into(), content.warnings.clone().into());
    }
    if !content.chat_turns.is_empty() {
        map.insert("chat_turns".into(), content.chat_turns.len().into());
    }
    serde_json::Value::Object(map)
}

/// Pick the business type of one record.
///
/// In order: an explicit type field (`type: Invoice`), a configured type
/// named by the file name, a field-name prefix (`invoice_number`), the
/// earliest configured type mentioned in the text, then a per-kind default.
/// Chat turns only use the first and third signals.
pub fn entity_type_for(
    config: &Config,
    record: &Record,
    kind: FileKind,
    file_name: Option<&str>,
    text: &str,
) -> String {
    let types = &config.entities.types;

    for field in &config.entities.type_fields {
        if let Some(name) = record
            .get(field)
            .and_then(|v| v.as_text())
            .and_then(|v| normalize_field_name(&singularize(v.trim())))
        {
            return name;
        }
    }

    let chat = kind == FileKind::ChatLog;
    if !chat {
        if let Some(found) = file_name.and_then(|name| type_in_file_name(types, name)) {
            return found;
        }
    }

    for ty in types {
        let prefix = format!("{}_", ty);
        if record.keys().any(|k| k.starts_with(&prefix)) {
            return ty.clone();
        }
    }

    if !chat {
        if let Some(found) = type_in_text(types, text) {
            return found;
        }
    }

    match kind {
        FileKind::Image => "image",
        FileKind::ChatLog => "message",
        _ => "document",
    }
    .to_string()
}

fn type_in_file_name(types: &[String], file_name: &str) -> Option<String> {
    let stem = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
    let words: Vec<String> = stem
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(singularize)
        .collect();
    for ty in types {
        let parts: Vec<&str> = ty.split('_').collect();
        if words
            .windows(parts.len())
            .any(|w| w.iter().zip(&parts).all(|(a, b)| a == b))
        {
            return Some(ty.clone());
        }
    }
    None
}

fn type_in_text(types: &[String], text: &str) -> Option<String> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(singularize)
        .collect();
    types
        .iter()
        .filter_map(|ty| {
            let parts: Vec<&str> = ty.split('_').collect();
            words
                .windows(parts.len())
                .position(|w| w.iter().zip(&parts).all(|(a, b)| a == b))
                .map(|pos| (pos, ty))
        })
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, ty)| ty.clone())
}
