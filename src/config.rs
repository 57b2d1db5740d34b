//! TOML configuration.
//!
//! Every section except `[db]` is optional; missing keys fall back to the
//! `default_*` functions below. [`load_config`] validates the result so the
//! engine never starts with a nonsensical threshold or a zero-sized pool.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub relationships: RelationshipConfig,
    #[serde(default)]
    pub entities: EntityConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Files read, classified and extracted at once. `0` means "use the
    /// available parallelism of the host".
    #[serde(default)]
    pub concurrency: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            max_file_bytes: default_max_file_bytes(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            retry: RetryConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            return self.concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

fn default_max_file_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

/// Exponential backoff for store writes.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    50
}
fn default_max_backoff_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    /// Jaccard similarity over word shingles at or above which a new file is
    /// reported as a version candidate of an existing document.
    #[serde(default = "default_near_duplicate_threshold")]
    pub near_duplicate_threshold: f64,
    #[serde(default = "default_shingle_size")]
    pub shingle_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            near_duplicate_threshold: default_near_duplicate_threshold(),
            shingle_size: default_shingle_size(),
        }
    }
}

fn default_near_duplicate_threshold() -> f64 {
    0.85
}
fn default_shingle_size() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelationshipConfig {
    /// Glob patterns over field names that mark a field as identifier-like.
    #[serde(default = "default_identifier_patterns")]
    pub identifier_patterns: Vec<String>,
    #[serde(default = "default_min_identifier_len")]
    pub min_identifier_len: usize,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            identifier_patterns: default_identifier_patterns(),
            min_identifier_len: default_min_identifier_len(),
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_identifier_patterns() -> Vec<String> {
    ["id", "*_id", "*_number", "*_no", "*_ref", "*_code"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_min_identifier_len() -> usize {
    3
}
fn default_min_confidence() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EntityConfig {
    /// Business record types recognised in field names, file names and text.
    #[serde(default = "default_entity_types")]
    pub types: Vec<String>,
    /// Fields whose value names the record type explicitly.
    #[serde(default = "default_type_fields")]
    pub type_fields: Vec<String>,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            types: default_entity_types(),
            type_fields: default_type_fields(),
        }
    }
}

fn default_entity_types() -> Vec<String> {
    [
        "invoice",
        "receipt",
        "purchase_order",
        "order",
        "quote",
        "estimate",
        "contract",
        "statement",
        "payment",
        "bill",
        "customer",
        "vendor",
        "supplier",
        "product",
        "employee",
        "expense",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_type_fields() -> Vec<String> {
    ["type", "record_type", "document_type", "doc_type"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    /// Row cap for requests that give no limit and do not ask for "all".
    #[serde(default = "default_query_limit")]
    pub default_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_query_limit(),
        }
    }
}

fn default_query_limit() -> usize {
    100
}

/// Optional text recognition for scanned images (Tesseract binary).
#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: PathBuf,
    #[serde(default = "default_ocr_language")]
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tesseract_path: default_tesseract_path(),
            language: default_ocr_language(),
        }
    }
}

fn default_tesseract_path() -> PathBuf {
    PathBuf::from("tesseract")
}
fn default_ocr_language() -> String {
    "eng".to_string()
}

impl Config {
    /// A config with every optional section defaulted.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            ingest: IngestConfig::default(),
            dedup: DedupConfig::default(),
            relationships: RelationshipConfig::default(),
            entities: EntityConfig::default(),
            query: QueryConfig::default(),
            ocr: OcrConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.max_file_bytes == 0 {
            anyhow::bail!("ingest.max_file_bytes must be > 0");
        }
        if self.ingest.retry.max_attempts == 0 {
            anyhow::bail!("ingest.retry.max_attempts must be >= 1");
        }
        if self.ingest.retry.initial_backoff_ms > self.ingest.retry.max_backoff_ms {
            anyhow::bail!("ingest.retry.initial_backoff_ms must be <= max_backoff_ms");
        }
        if !(0.0..=1.0).contains(&self.dedup.near_duplicate_threshold) {
            anyhow::bail!("dedup.near_duplicate_threshold must be in [0.0, 1.0]");
        }
        if self.dedup.shingle_size == 0 {
            anyhow::bail!("dedup.shingle_size must be > 0");
        }
        if !(0.0..1.0).contains(&self.relationships.min_confidence) {
            anyhow::bail!("relationships.min_confidence must be in [0.0, 1.0)");
        }
        if self.relationships.identifier_patterns.is_empty() {
            anyhow::bail!("relationships.identifier_patterns must not be empty");
        }
        if self.query.default_limit == 0 {
            anyhow::bail!("query.default_limit must be > 0");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
