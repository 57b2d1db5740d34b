//! # bizdata
//!
//! Business data ingestion and schema inference.
//!
//! `bizdata` turns a directory of unstructured business files (PDFs,
//! scanned images, plain-text notes and exports, chat transcripts) into a
//! versioned, relationally structured SQLite store, and answers
//! natural-language questions against the schema it inferred.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │ directory │──▶│ classify │──▶│  extract  │──▶│  dedup + │
//! │   walk    │   │ (magic)  │   │ per kind  │   │ versions │
//! └───────────┘   └──────────┘   └───────────┘   └────┬─────┘
//!                                                     ▼
//!                 ┌──────────┐   ┌───────────┐   ┌──────────┐
//!   request ────▶ │  query   │◀──│  SQLite   │◀──│  schema  │
//!                 │ translate│   │   store   │   │ + edges  │
//!                 └──────────┘   └───────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! let config = bizdata::config::load_config(std::path::Path::new("config/bizdata.toml"))?;
//! let engine = bizdata::Engine::open(config).await?;
//! let report = engine.ingest_directory("./inbox").await?;
//! println!("{} created, {} skipped", report.documents_created, report.files_skipped.len());
//! let outcome = engine.run_query("list all invoices from 2023").await?;
//! println!("{} rows", outcome.rows.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`classify`] | Content-based file kind detection |
//! | [`extract`] | PDF, image (EXIF + OCR), text and chat extraction |
//! | [`dedup`] | Fingerprints, exact and near-duplicate detection |
//! | [`versions`] | Per-document locks and version numbering |
//! | [`schema`] | Type inference and schema snapshots |
//! | [`relationships`] | Identifier index and relationship scoring |
//! | [`query`] | Natural-language translation and execution |
//! | [`ingest`] | Ingestion orchestration |
//! | [`engine`] | Public operations |
//! | [`store`] | Storage trait, SQLite and in-memory backends |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod classify;
pub mod config;
pub mod db;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod query;
pub mod relationships;
pub mod schema;
pub mod stats;
pub mod store;
pub mod values;
pub mod versions;

pub use config::Config;
pub use engine::{DocumentView, Engine, QueryError, QueryOutcome};
pub use error::{IngestIssue, IngestionReport};
pub use models::{ChatRecord, FileKind, NewChatRecord};
pub use query::TranslationFailure;
