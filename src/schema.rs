//! Schema inference.
//!
//! Every observed value is mapped to a [`FieldType`]; the types of a field
//! across all records are joined on the lattice
//! `boolean < integer < real < text`. `timestamp` and `reference` only join
//! with themselves. Any other combination is a [`Conflict`]: the field falls
//! back to nullable text and stays flagged as conflicted. Types never narrow
//! and fields are never removed.
//!
//! Snapshots are immutable. [`SchemaRegistry`] serializes merges, and a new
//! snapshot is only published after the caller has persisted it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::models::{FileKind, RawValue, Record};
use crate::relationships::IdentifierHeuristic;
use crate::values::{parse_bool, parse_number, parse_timestamp, Number};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Boolean,
    Integer,
    Real,
    Timestamp,
    Reference,
    Text,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Real => "real",
            FieldType::Timestamp => "timestamp",
            FieldType::Reference => "reference",
            FieldType::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "boolean" => Some(FieldType::Boolean),
            "integer" => Some(FieldType::Integer),
            "real" => Some(FieldType::Real),
            "timestamp" => Some(FieldType::Timestamp),
            "reference" => Some(FieldType::Reference),
            "text" => Some(FieldType::Text),
            _ => None,
        }
    }

    /// Position on the numeric/text chain; `None` for the isolated types.
    fn rank(&self) -> Option<u8> {
        match self {
            FieldType::Boolean => Some(0),
            FieldType::Integer => Some(1),
            FieldType::Real => Some(2),
            FieldType::Text => Some(3),
            FieldType::Timestamp | FieldType::Reference => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Real)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join of two types, or `None` when they conflict.
pub fn widen(existing: FieldType, observed: FieldType) -> Option<FieldType> {
    if existing == observed || existing == FieldType::Text {
        return Some(existing);
    }
    match (existing.rank(), observed.rank()) {
        (Some(a), Some(b)) => Some(if a >= b { existing } else { observed }),
        _ => None,
    }
}

/// Type of a single value, ignoring the field name. `None` for nulls.
pub fn infer_value_type(value: &RawValue) -> Option<FieldType> {
    match value {
        RawValue::Null => None,
        RawValue::Bool(_) => Some(FieldType::Boolean),
        RawValue::Integer(_) => Some(FieldType::Integer),
        RawValue::Real(_) => Some(FieldType::Real),
        RawValue::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if parse_bool(s).is_some() {
                return Some(FieldType::Boolean);
            }
            if has_significant_leading_zero(s) {
                return Some(FieldType::Text);
            }
            if let Some(n) = parse_number(s) {
                return Some(match n {
                    Number::Integer(_) => FieldType::Integer,
                    Number::Real(_) => FieldType::Real,
                });
            }
            if parse_timestamp(s).is_some() {
                return Some(FieldType::Timestamp);
            }
            Some(FieldType::Text)
        }
    }
}

/// `00123` is a code, not the number 123.
fn has_significant_leading_zero(s: &str) -> bool {
    s.len() > 1
        && s.starts_with('0')
        && !s[1..].starts_with('.')
        && s.chars().all(|c| c.is_ascii_digit())
}

/// Type of `value` observed under `field`.
pub fn infer_type(
    field: &str,
    value: &RawValue,
    identifiers: &IdentifierHeuristic,
) -> Option<FieldType> {
    let inferred = infer_value_type(value)?;
    if identifiers.is_identifier_name(field)
        && !matches!(inferred, FieldType::Boolean | FieldType::Timestamp)
    {
        return Some(FieldType::Reference);
    }
    Some(inferred)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub conflicted: bool,
    pub contributing_kinds: BTreeSet<FileKind>,
    /// Snapshot version that created the field.
    pub introduced_in: u64,
    /// Last snapshot version that changed the field.
    pub updated_in: u64,
}

/// A type observation that could not be widened into the existing type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub field: String,
    pub existing: FieldType,
    pub observed: FieldType,
    pub resolved: FieldType,
    pub kind: FileKind,
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub version: u64,
    pub fields: BTreeMap<String, SchemaField>,
}

impl SchemaSnapshot {
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.get(name)
    }

    pub fn timestamp_fields(&self) -> Vec<&str> {
        self.fields
            .values()
            .filter(|f| f.field_type == FieldType::Timestamp)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Fields sorted by name.
    pub fn sorted_fields(&self) -> Vec<SchemaField> {
        self.fields.values().cloned().collect()
    }
}

/// Merge observed records into `existing`, returning the next snapshot and
/// any conflicts. If nothing changed the returned snapshot keeps the
/// existing version.
pub fn merge(
    existing: &SchemaSnapshot,
    kind: FileKind,
    source: &str,
    records: &[Record],
    identifiers: &IdentifierHeuristic,
) -> (SchemaSnapshot, Vec<Conflict>) {
    let next = existing.version + 1;
    let mut fields = existing.fields.clone();
    let mut conflicts = Vec::new();
    let mut changed = false;

    for record in records {
        let had_fields = !fields.is_empty();

        for (name, value) in record {
            let observed = infer_type(name, value, identifiers);
            let Some(field) = fields.get_mut(name) else {
                // Nulls alone do not create a field.
                if let Some(field_type) = observed {
                    fields.insert(
                        name.clone(),
                        SchemaField {
                            name: name.clone(),
                            field_type,
                            nullable: had_fields,
                            conflicted: false,
                            contributing_kinds: BTreeSet::from([kind]),
                            introduced_in: next,
                            updated_in: next,
                        },
                    );
                    changed = true;
                }
                continue;
            };

            let mut touched = field.contributing_kinds.insert(kind);
            match observed {
                None => {
                    if !field.nullable {
                        field.nullable = true;
                        touched = true;
                    }
                }
                Some(observed) => match widen(field.field_type, observed) {
                    Some(joined) if joined != field.field_type => {
                        field.field_type = joined;
                        touched = true;
                    }
                    Some(_) => {}
                    None => {
                        conflicts.push(Conflict {
                            field: name.clone(),
                            existing: field.field_type,
                            observed,
                            resolved: FieldType::Text,
                            kind,
                            source: source.to_string(),
                        });
                        field.field_type = FieldType::Text;
                        field.conflicted = true;
                        field.nullable = true;
                        touched = true;
                    }
                },
            }
            if touched {
                field.updated_in = next;
                changed = true;
            }
        }

        for field in fields.values_mut() {
            if !field.nullable && !record.contains_key(&field.name) {
                field.nullable = true;
                field.updated_in = next;
                changed = true;
            }
        }
    }

    if !changed {
        return (existing.clone(), conflicts);
    }
    (
        SchemaSnapshot {
            version: next,
            fields,
        },
        conflicts,
    )
}

/// Holds the current snapshot and serializes merges.
pub struct SchemaRegistry {
    current: RwLock<Arc<SchemaSnapshot>>,
    merge_lock: Mutex<()>,
}

/// Exclusive right to produce the next snapshot. Dropping it without
/// publishing leaves the current snapshot in place.
pub struct MergeGuard<'a> {
    registry: &'a SchemaRegistry,
    _lock: MutexGuard<'a, ()>,
}

impl SchemaRegistry {
    pub fn new(initial: SchemaSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            merge_lock: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn begin_merge(&self) -> MergeGuard<'_> {
        MergeGuard {
            registry: self,
            _lock: self.merge_lock.lock().await,
        }
    }
}

impl MergeGuard<'_> {
    pub fn base(&self) -> Arc<SchemaSnapshot> {
        self.registry.snapshot()
    }

    pub fn publish(self, snapshot: SchemaSnapshot) -> Arc<SchemaSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self
            .registry
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelationshipConfig;

    fn ids() -> IdentifierHeuristic {
        IdentifierHeuristic::new(&RelationshipConfig::default()).unwrap()
    }

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), RawValue::text(*v)))
            .collect()
    }

    #[test]
    fn lattice_joins() {
        use FieldType::*;
        assert_eq!(widen(Integer, Real), Some(Real));
        assert_eq!(widen(Real, Integer), Some(Real));
        assert_eq!(widen(Boolean, Text), Some(Text));
        assert_eq!(widen(Text, Timestamp), Some(Text));
        assert_eq!(widen(Timestamp, Timestamp), Some(Timestamp));
        assert_eq!(widen(Timestamp, Integer), None);
        assert_eq!(widen(Reference, Real), None);
        assert_eq!(widen(Integer, Timestamp), None);
    }

    #[test]
    fn text_values_are_parsed() {
        assert_eq!(infer_value_type(&RawValue::text("yes")), Some(FieldType::Boolean));
        assert_eq!(infer_value_type(&RawValue::text("42")), Some(FieldType::Integer));
        assert_eq!(infer_value_type(&RawValue::text("$1,200.50")), Some(FieldType::Real));
        assert_eq!(
            infer_value_type(&RawValue::text("2023-04-01")),
            Some(FieldType::Timestamp)
        );
        assert_eq!(infer_value_type(&RawValue::text("00123")), Some(FieldType::Text));
        assert_eq!(infer_value_type(&RawValue::text("  ")), None);
    }

    #[test]
    fn identifier_names_infer_reference() {
        let ids = ids();
        assert_eq!(
            infer_type("invoice_number", &RawValue::text("INV-1"), &ids),
            Some(FieldType::Reference)
        );
        assert_eq!(
            infer_type("customer_id", &RawValue::Integer(7), &ids),
            Some(FieldType::Reference)
        );
        assert_eq!(
            infer_type("total", &RawValue::Integer(7), &ids),
            Some(FieldType::Integer)
        );
    }

    #[test]
    fn integer_widens_to_real_and_bumps_version() {
        let ids = ids();
        let (v1, _) = merge(
            &SchemaSnapshot::default(),
            FileKind::PlainText,
            "a.txt",
            &[record(&[("total", "10")])],
            &ids,
        );
        assert_eq!(v1.version, 1);
        assert_eq!(v1.fields["total"].field_type, FieldType::Integer);
        assert!(!v1.fields["total"].nullable);

        let (v2, conflicts) = merge(&v1, FileKind::Pdf, "b.pdf", &[record(&[("total", "10.5")])], &ids);
        assert!(conflicts.is_empty());
        assert_eq!(v2.version, 2);
        assert_eq!(v2.fields["total"].field_type, FieldType::Real);
        assert_eq!(
            v2.fields["total"].contributing_kinds,
            BTreeSet::from([FileKind::Pdf, FileKind::PlainText])
        );

        // A narrower observation does not narrow the type.
        let (v3, _) = merge(&v2, FileKind::Pdf, "c.pdf", &[record(&[("total", "3")])], &ids);
        assert_eq!(v3.version, 2);
        assert_eq!(v3.fields["total"].field_type, FieldType::Real);
    }

    #[test]
    fn incompatible_types_conflict_to_nullable_text() {
        let ids = ids();
        let (v1, _) = merge(
            &SchemaSnapshot::default(),
            FileKind::PlainText,
            "a.txt",
            &[record(&[("due", "2023-04-01")])],
            &ids,
        );
        let (v2, conflicts) = merge(&v1, FileKind::PlainText, "b.txt", &[record(&[("due", "12")])], &ids);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].existing, FieldType::Timestamp);
        assert_eq!(conflicts[0].observed, FieldType::Integer);
        assert_eq!(conflicts[0].source, "b.txt");
        let due = &v2.fields["due"];
        assert_eq!(due.field_type, FieldType::Text);
        assert!(due.conflicted);
        assert!(due.nullable);

        // Text absorbs later observations silently.
        let (v3, conflicts) = merge(&v2, FileKind::PlainText, "c.txt", &[record(&[("due", "2024-01-01")])], &ids);
        assert!(conflicts.is_empty());
        assert_eq!(v3.version, v2.version);
    }

    #[test]
    fn late_and_missing_fields_become_nullable() {
        let ids = ids();
        let (snapshot, _) = merge(
            &SchemaSnapshot::default(),
            FileKind::PlainText,
            "a.csv",
            &[
                record(&[("name", "Widget"), ("total", "4")]),
                record(&[("name", "Gadget"), ("color", "red")]),
            ],
            &ids,
        );
        assert!(!snapshot.fields["name"].nullable);
        assert!(snapshot.fields["total"].nullable);
        assert!(snapshot.fields["color"].nullable);
    }

    #[test]
    fn null_only_values_do_not_create_fields() {
        let ids = ids();
        let mut rec = Record::new();
        rec.insert("memo".into(), RawValue::Null);
        let (snapshot, _) = merge(&SchemaSnapshot::default(), FileKind::PlainText, "a", &[rec], &ids);
        assert!(snapshot.fields.is_empty());
        assert_eq!(snapshot.version, 0);
    }

    #[tokio::test]
    async fn registry_publishes_after_merge() {
        let registry = SchemaRegistry::new(SchemaSnapshot::default());
        let guard = registry.begin_merge().await;
        let base = guard.base();
        let (next, _) = merge(&base, FileKind::PlainText, "a", &[record(&[("x", "1")])], &ids());
        assert_eq!(registry.snapshot().version, 0);
        guard.publish(next);
        assert_eq!(registry.snapshot().version, 1);
    }
}
