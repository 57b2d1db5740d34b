//! Relationship mapping between entities that share identifier values.
//!
//! Identifier-like fields are picked by name (`relationships.identifier_patterns`)
//! or by schema type `reference`. Their values are indexed; a new entity is
//! linked to every entity of another owner holding one of its values. Each
//! shared value contributes `base * max(1 / sqrt(holders), SPECIFICITY_FLOOR)`
//! where `base` is higher when the field names agree; contributions combine
//! as independent evidence. The floor keeps three matches of common values
//! above any single match.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::RelationshipConfig;
use crate::models::{Entity, EntityOwner, FieldMatch, RawValue, Relationship, RelationshipKind};
use crate::schema::{FieldType, SchemaSnapshot};

const SAME_FIELD_WEIGHT: f64 = 0.6;
const CROSS_FIELD_WEIGHT: f64 = 0.4;
/// Lowest specificity a shared value can have: `1 - (1 - 0.4 * 0.7)^3`
/// exceeds the best single-field score `0.6 / sqrt(2)`.
const SPECIFICITY_FLOOR: f64 = 0.7;

/// Decides which fields carry identifiers and normalizes their values.
pub struct IdentifierHeuristic {
    patterns: GlobSet,
    min_len: usize,
}

impl IdentifierHeuristic {
    pub fn new(config: &RelationshipConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.identifier_patterns {
            builder.add(
                Glob::new(pattern)
                    .with_context(|| format!("Invalid identifier pattern: {}", pattern))?,
            );
        }
        Ok(Self {
            patterns: builder.build()?,
            min_len: config.min_identifier_len,
        })
    }

    pub fn is_identifier_name(&self, field: &str) -> bool {
        self.patterns.is_match(field)
    }

    pub fn is_identifier(&self, field: &str, snapshot: &SchemaSnapshot) -> bool {
        self.is_identifier_name(field)
            || snapshot
                .field(field)
                .is_some_and(|f| f.field_type == FieldType::Reference)
    }

    /// Comparable form of an identifier value; `None` when too short to be
    /// meaningful.
    pub fn normalize_value(&self, value: &RawValue) -> Option<String> {
        let normalized = match value {
            RawValue::Text(s) => s.trim().to_lowercase(),
            RawValue::Integer(i) => i.to_string(),
            _ => return None,
        };
        (normalized.chars().count() >= self.min_len).then_some(normalized)
    }
}

#[derive(Debug, Clone)]
struct Holder {
    entity_id: String,
    owner: EntityOwner,
    field: String,
}

/// Identifier value → entities holding it.
#[derive(Default)]
pub struct IdentifierIndex {
    by_value: HashMap<String, Vec<Holder>>,
    by_owner: HashMap<EntityOwner, Vec<(String, String)>>,
}

impl IdentifierIndex {
    fn insert(&mut self, entity: &Entity, keys: &[(String, String)]) {
        for (field, value) in keys {
            self.by_value.entry(value.clone()).or_default().push(Holder {
                entity_id: entity.id.clone(),
                owner: entity.owner.clone(),
                field: field.clone(),
            });
            self.by_owner
                .entry(entity.owner.clone())
                .or_default()
                .push((entity.id.clone(), value.clone()));
        }
    }

    fn remove_owner(&mut self, owner: &EntityOwner) {
        let Some(held) = self.by_owner.remove(owner) else {
            return;
        };
        let ids: HashSet<&str> = held.iter().map(|(id, _)| id.as_str()).collect();
        for (_, value) in &held {
            if let Some(holders) = self.by_value.get_mut(value) {
                holders.retain(|h| !ids.contains(h.entity_id.as_str()));
                if holders.is_empty() {
                    self.by_value.remove(value);
                }
            }
        }
    }

    pub fn holders(&self, value: &str) -> usize {
        self.by_value.get(value).map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.by_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_value.is_empty()
    }
}

pub struct RelationshipMapper {
    identifiers: IdentifierHeuristic,
    min_confidence: f64,
    index: Mutex<IdentifierIndex>,
}

impl RelationshipMapper {
    pub fn new(config: &RelationshipConfig) -> Result<Self> {
        Ok(Self {
            identifiers: IdentifierHeuristic::new(config)?,
            min_confidence: config.min_confidence,
            index: Mutex::new(IdentifierIndex::default()),
        })
    }

    pub fn identifiers(&self) -> &IdentifierHeuristic {
        &self.identifiers
    }

    fn keys(&self, entity: &Entity, snapshot: &SchemaSnapshot) -> Vec<(String, String)> {
        let mut keys: Vec<(String, String)> = entity
            .values
            .iter()
            .filter(|(field, _)| self.identifiers.is_identifier(field, snapshot))
            .filter_map(|(field, value)| {
                self.identifiers
                    .normalize_value(value)
                    .map(|v| (field.clone(), v))
            })
            .collect();
        keys.dedup();
        keys
    }

    /// Load already-stored entities without producing edges.
    pub fn rebuild(&self, entities: &[Entity], snapshot: &SchemaSnapshot) {
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        *index = IdentifierIndex::default();
        for entity in entities {
            let keys = self.keys(entity, snapshot);
            index.insert(entity, &keys);
        }
    }

    /// Replace `owner`'s entities in the index with `entities` and return the
    /// edges from each new entity to entities of other owners.
    pub fn map(
        &self,
        owner: &EntityOwner,
        entities: &[Entity],
        snapshot: &SchemaSnapshot,
    ) -> Vec<Relationship> {
        let keyed: Vec<(&Entity, Vec<(String, String)>)> = entities
            .iter()
            .map(|e| (e, self.keys(e, snapshot)))
            .collect();

        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        index.remove_owner(owner);
        for (entity, keys) in &keyed {
            index.insert(entity, keys);
        }

        let now = Utc::now();
        let mut edges = Vec::new();
        for (entity, keys) in &keyed {
            let mut by_counterpart: BTreeMap<String, Vec<(FieldMatch, usize)>> = BTreeMap::new();
            for (field, value) in keys {
                let Some(holders) = index.by_value.get(value) else {
                    continue;
                };
                for holder in holders.iter().filter(|h| &h.owner != owner) {
                    by_counterpart
                        .entry(holder.entity_id.clone())
                        .or_default()
                        .push((
                            FieldMatch {
                                from_field: field.clone(),
                                to_field: holder.field.clone(),
                                value: value.clone(),
                            },
                            holders.len(),
                        ));
                }
            }

            for (counterpart, matches) in by_counterpart {
                let confidence = score(matches.iter().map(|(m, holders)| {
                    (m.from_field == m.to_field, *holders)
                }));
                if confidence < self.min_confidence {
                    continue;
                }
                let matches: Vec<FieldMatch> = matches.into_iter().map(|(m, _)| m).collect();
                let kind = if matches.iter().any(|m| m.from_field == m.to_field) {
                    RelationshipKind::SharedIdentifier
                } else {
                    RelationshipKind::Reference
                };
                edges.push(Relationship {
                    id: uuid::Uuid::new_v4().to_string(),
                    from_entity: entity.id.clone(),
                    to_entity: counterpart,
                    kind,
                    matches,
                    confidence,
                    created_at: now,
                });
            }
        }
        edges
    }

    pub fn indexed_values(&self) -> usize {
        self.index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// `1 - Π(1 - s)` over `(same_field_name, holders)` evidence.
pub fn score(evidence: impl IntoIterator<Item = (bool, usize)>) -> f64 {
    let miss: f64 = evidence
        .into_iter()
        .map(|(same_name, holders)| {
            let base = if same_name {
                SAME_FIELD_WEIGHT
            } else {
                CROSS_FIELD_WEIGHT
            };
            let specificity = (1.0 / (holders.max(1) as f64).sqrt()).max(SPECIFICITY_FLOOR);
            1.0 - base * specificity
        })
        .product();
    1.0 - miss
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;

    fn entity(id: &str, owner: &str, values: &[(&str, &str)]) -> Entity {
        Entity {
            id: id.into(),
            owner: EntityOwner::Document(owner.into()),
            record_index: 0,
            entity_type: "invoice".into(),
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), RawValue::text(*v)))
                .collect::<Record>(),
            schema_version: 1,
            created_at: Utc::now(),
        }
    }

    fn mapper() -> RelationshipMapper {
        RelationshipMapper::new(&RelationshipConfig::default()).unwrap()
    }

    #[test]
    fn heuristic_matches_configured_names() {
        let ids = IdentifierHeuristic::new(&RelationshipConfig::default()).unwrap();
        assert!(ids.is_identifier_name("id"));
        assert!(ids.is_identifier_name("customer_id"));
        assert!(ids.is_identifier_name("invoice_number"));
        assert!(!ids.is_identifier_name("paid"));
        assert!(!ids.is_identifier_name("total"));
        assert_eq!(ids.normalize_value(&RawValue::text(" INV-1 ")), Some("inv-1".into()));
        assert_eq!(ids.normalize_value(&RawValue::text("7")), None);
    }

    #[test]
    fn shared_invoice_number_makes_one_edge() {
        let m = mapper();
        let snapshot = SchemaSnapshot::default();
        let a = entity("a", "doc-a", &[("invoice_number", "INV-001"), ("total", "10")]);
        let b = entity("b", "doc-b", &[("invoice_number", "inv-001")]);

        assert!(m.map(&a.owner, &[a.clone()], &snapshot).is_empty());
        let edges = m.map(&b.owner, &[b.clone()], &snapshot);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from_entity, "b");
        assert_eq!(edges[0].to_entity, "a");
        assert_eq!(edges[0].kind, RelationshipKind::SharedIdentifier);
    }

    #[test]
    fn more_matching_fields_score_higher() {
        let m = mapper();
        let snapshot = SchemaSnapshot::default();
        let base = entity(
            "base",
            "doc-1",
            &[
                ("invoice_number", "INV-9"),
                ("customer_id", "CUST-1"),
                ("order_no", "ORD-5"),
            ],
        );
        m.map(&base.owner, &[base.clone()], &snapshot);

        let one = entity("one", "doc-2", &[("invoice_number", "INV-9")]);
        let three = entity(
            "three",
            "doc-3",
            &[
                ("invoice_number", "INV-9"),
                ("customer_id", "CUST-1"),
                ("order_no", "ORD-5"),
            ],
        );
        let one_edges = m.map(&one.owner.clone(), &[one], &snapshot);
        let three_edges = m.map(&three.owner.clone(), &[three], &snapshot);
        let one_to_base = one_edges.iter().find(|e| e.to_entity == "base").unwrap();
        let three_to_base = three_edges.iter().find(|e| e.to_entity == "base").unwrap();
        assert!(three_to_base.confidence > one_to_base.confidence);
        assert_eq!(three_to_base.matches.len(), 3);
    }

    #[test]
    fn cross_field_matches_are_references() {
        let m = mapper();
        let snapshot = SchemaSnapshot::default();
        let customer = entity("c", "doc-c", &[("id", "C-42"), ("name", "Acme")]);
        let invoice = entity("i", "doc-i", &[("customer_id", "C-42")]);
        m.map(&customer.owner.clone(), &[customer], &snapshot);
        let edges = m.map(&invoice.owner.clone(), &[invoice], &snapshot);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, RelationshipKind::Reference);
        assert!((edges[0].confidence - 0.4 / 2f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn same_owner_entities_are_not_linked() {
        let m = mapper();
        let snapshot = SchemaSnapshot::default();
        let rows = [
            entity("r1", "doc", &[("invoice_number", "INV-1")]),
            entity("r2", "doc", &[("invoice_number", "INV-1")]),
        ];
        assert!(m.map(&rows[0].owner, &rows, &snapshot).is_empty());
    }

    #[test]
    fn replacing_an_owner_drops_its_old_values() {
        let m = mapper();
        let snapshot = SchemaSnapshot::default();
        let v1 = entity("v1", "doc", &[("invoice_number", "INV-OLD")]);
        m.map(&v1.owner.clone(), &[v1], &snapshot);
        let v2 = entity("v2", "doc", &[("invoice_number", "INV-NEW")]);
        m.map(&v2.owner.clone(), &[v2], &snapshot);

        let other = entity("o", "other", &[("invoice_number", "INV-OLD")]);
        assert!(m.map(&other.owner.clone(), &[other], &snapshot).is_empty());
    }

    #[test]
    fn crowded_values_score_lower_down_to_the_floor() {
        let score_two = score([(true, 2)]);
        let score_five = score([(true, 5)]);
        let score_many = score([(true, 100)]);
        assert!(score_two > score_five);
        assert!((score_five - 0.6 * SPECIFICITY_FLOOR).abs() < 1e-9);
        assert_eq!(score_many, score_five);
    }

    #[test]
    fn three_crowded_matches_beat_one_unique_match() {
        let worst_three = score([(false, 1000), (false, 1000), (false, 1000)]);
        let best_one = score([(true, 2)]);
        assert!(worst_three > best_one);
    }

    #[test]
    fn shared_crowded_fields_outrank_a_single_unique_field() {
        let m = mapper();
        let snapshot = SchemaSnapshot::default();
        let crowded = [("customer_id", "C-100"), ("order_no", "ORD-100"), ("region_code", "REG-1")];
        for i in 0..20 {
            let member = entity(&format!("m{}", i), &format!("doc-m{}", i), &crowded);
            m.map(&member.owner, &[member.clone()], &snapshot);
        }
        let single = entity("single", "doc-single", &[("invoice_number", "INV-777")]);
        m.map(&single.owner, &[single.clone()], &snapshot);

        let mut values = crowded.to_vec();
        values.push(("invoice_number", "INV-777"));
        let newcomer = entity("new", "doc-new", &values);
        let edges = m.map(&newcomer.owner.clone(), &[newcomer], &snapshot);

        let three = edges.iter().find(|e| e.to_entity == "m0").unwrap();
        let one = edges.iter().find(|e| e.to_entity == "single").unwrap();
        assert_eq!(three.matches.len(), 3);
        assert_eq!(one.matches.len(), 1);
        assert!(three.confidence > one.confidence);
    }
}
