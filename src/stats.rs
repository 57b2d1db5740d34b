//! Store statistics.
//!
//! A quick summary of what has been ingested: documents, versions,
//! entities, relationships, chat records and the schema, with a per-kind
//! document breakdown. The `Display` impl renders the same table a shell
//! would print.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::models::FileKind;

/// Per-kind breakdown of documents and versions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KindStats {
    pub documents: u64,
    pub versions: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub documents: u64,
    pub versions: u64,
    pub entities: u64,
    pub relationships: u64,
    pub chat_records: u64,
    pub schema_fields: u64,
    pub schema_version: u64,
    pub conflicts: u64,
    pub by_kind: BTreeMap<FileKind, KindStats>,
    /// Unix seconds of the most recent document update.
    pub last_ingest: Option<i64>,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Store Stats")?;
        writeln!(f, "===========")?;
        writeln!(f)?;
        writeln!(f, "  Documents:      {}", self.documents)?;
        writeln!(f, "  Versions:       {}", self.versions)?;
        writeln!(f, "  Entities:       {}", self.entities)?;
        writeln!(f, "  Relationships:  {}", self.relationships)?;
        writeln!(f, "  Chat records:   {}", self.chat_records)?;
        writeln!(
            f,
            "  Schema:         {} field(s), version {}, {} conflict(s)",
            self.schema_fields, self.schema_version, self.conflicts
        )?;
        let last = match self.last_ingest {
            Some(ts) => format_ts_relative(ts),
            None => "never".to_string(),
        };
        writeln!(f, "  Last ingest:    {}", last)?;

        if !self.by_kind.is_empty() {
            writeln!(f)?;
            writeln!(f, "  By kind:")?;
            writeln!(f, "  {:<12} {:>6} {:>9}", "KIND", "DOCS", "VERSIONS")?;
            writeln!(f, "  {}", "-".repeat(29))?;
            for (kind, s) in &self.by_kind {
                writeln!(f, "  {:<12} {:>6} {:>9}", kind.as_str(), s.documents, s.versions)?;
            }
        }
        Ok(())
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_short(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_short(ts)
    }
}

fn format_ts_short(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_kinds() {
        let mut stats = StoreStats {
            documents: 2,
            versions: 3,
            ..Default::default()
        };
        stats.by_kind.insert(
            FileKind::Pdf,
            KindStats {
                documents: 2,
                versions: 3,
            },
        );
        let out = stats.to_string();
        assert!(out.contains("Documents:      2"));
        assert!(out.contains("pdf"));
        assert!(out.contains("never"));
    }

    #[test]
    fn relative_times() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(0), "1970-01-01 00:00");
    }
}
