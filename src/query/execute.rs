//! Run a [`QueryPlan`] over the store's current entities.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::translate::parse_instant;
use super::{Aggregate, AggregateFn, DateRange, GroupBy, Operator, Predicate, QueryPlan};
use crate::models::{format_ts_iso, Document, Entity, EntityOwner, FileKind, RawValue};
use crate::schema::{FieldType, SchemaSnapshot};
use crate::store::Store;
use crate::values::{parse_bool, parse_number, parse_timestamp, Number};

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Value>,
    pub warnings: Vec<String>,
    /// Entities that passed every filter, before aggregation and limit.
    /// Document-level requests count the documents owning them instead.
    pub total_matched: usize,
}

/// Values that could not be compared, counted per field and type.
#[derive(Default)]
struct Uncomparable(BTreeMap<(String, &'static str), usize>);

impl Uncomparable {
    fn note(&mut self, field: &str, field_type: FieldType) {
        *self
            .0
            .entry((field.to_string(), field_type.as_str()))
            .or_default() += 1;
    }

    fn into_warnings(self) -> impl Iterator<Item = String> {
        self.0.into_iter().map(|((field, ty), n)| {
            format!(
                "{} value(s) of field '{}' could not be compared as {}",
                n, field, ty
            )
        })
    }
}

/// Execute `plan` against the entities currently in `store`. `snapshot`
/// must be the snapshot the plan was translated against.
pub async fn execute(
    plan: &QueryPlan,
    store: &dyn Store,
    snapshot: &SchemaSnapshot,
    default_limit: usize,
) -> Result<QueryResult> {
    let entities = store.entities().await.context("Failed to load entities")?;
    let documents: HashMap<String, Document> = store
        .list_documents()
        .await
        .context("Failed to load documents")?
        .into_iter()
        .map(|d| (d.id.clone(), d))
        .collect();

    let mut warnings = plan.warnings.clone();
    for field in referenced_fields(plan) {
        if snapshot.field(field).is_some_and(|f| f.conflicted) {
            warnings.push(format!(
                "field '{}' has conflicting types; its values are compared as text",
                field
            ));
        }
    }

    let edges = if plan.joins.is_empty() {
        Vec::new()
    } else {
        store
            .relationships()
            .await
            .context("Failed to load relationships")?
    };
    let linked = if plan.joins.is_empty() {
        None
    } else {
        let type_of: HashMap<&str, &str> = entities
            .iter()
            .map(|e| (e.id.as_str(), e.entity_type.as_str()))
            .collect();
        let sets: Vec<HashSet<&str>> = plan
            .joins
            .iter()
            .map(|join| {
                let mut ids = HashSet::new();
                for edge in &edges {
                    let (from, to) = (edge.from_entity.as_str(), edge.to_entity.as_str());
                    if type_of.get(to) == Some(&join.entity_type.as_str()) {
                        ids.insert(from);
                    }
                    if type_of.get(from) == Some(&join.entity_type.as_str()) {
                        ids.insert(to);
                    }
                }
                ids
            })
            .collect();
        Some(sets)
    };

    let mut uncomparable = Uncomparable::default();
    let mut matched: Vec<&Entity> = Vec::new();
    for entity in &entities {
        if plan
            .entity_type
            .as_ref()
            .is_some_and(|t| *t != entity.entity_type)
        {
            continue;
        }
        if plan.kind.is_some() && plan.kind != kind_of(entity, &documents) {
            continue;
        }
        if let Some(sets) = &linked {
            if !sets.iter().all(|ids| ids.contains(entity.id.as_str())) {
                continue;
            }
        }
        if !plan
            .predicates
            .iter()
            .all(|p| evaluate(p, entity, snapshot, &mut uncomparable))
        {
            continue;
        }
        if !plan
            .date_ranges
            .iter()
            .all(|r| in_range(r, entity, snapshot, &mut uncomparable))
        {
            continue;
        }
        matched.push(entity);
    }

    if let Some(entity_type) = &plan.entity_type {
        if !entities.iter().any(|e| e.entity_type == *entity_type) {
            warnings.push(format!("no entities of type '{}' exist", entity_type));
        }
    }

    let total_matched = if plan.per_document {
        owner_count(&matched)
    } else {
        matched.len()
    };
    let mut rows = match &plan.aggregate {
        Some(aggregate) => aggregate_rows(
            aggregate,
            &matched,
            &documents,
            snapshot,
            plan.per_document,
            &mut uncomparable,
        ),
        None if plan.per_document => document_rows(&matched, &documents, &plan.fields),
        None => matched
            .iter()
            .map(|e| entity_row(e, &documents, &plan.fields))
            .collect(),
    };

    let limit = match plan.limit {
        Some(limit) => limit,
        None if plan.list_all => usize::MAX,
        None => default_limit,
    };
    if rows.len() > limit {
        warnings.push(format!("showing {} of {} rows", limit, rows.len()));
        rows.truncate(limit);
    }
    warnings.extend(uncomparable.into_warnings());

    tracing::debug!(
        query = %plan.query,
        matched = total_matched,
        rows = rows.len(),
        "Executed query"
    );

    Ok(QueryResult {
        rows,
        warnings,
        total_matched,
    })
}

fn referenced_fields(plan: &QueryPlan) -> Vec<&str> {
    let mut fields: Vec<&str> = plan.predicates.iter().map(|p| p.field.as_str()).collect();
    if let Some(aggregate) = &plan.aggregate {
        fields.extend(aggregate.field.as_deref());
        if let Some(GroupBy::Field(field)) = &aggregate.group_by {
            fields.push(field);
        }
    }
    fields.sort_unstable();
    fields.dedup();
    fields
}

fn kind_of(entity: &Entity, documents: &HashMap<String, Document>) -> Option<FileKind> {
    owner_kind(&entity.owner, documents)
}

fn owner_kind(owner: &EntityOwner, documents: &HashMap<String, Document>) -> Option<FileKind> {
    match owner {
        EntityOwner::Document(id) => documents.get(id).map(|d| d.kind),
        EntityOwner::Chat(_) => Some(FileKind::ChatLog),
    }
}

fn owner_count(entities: &[&Entity]) -> usize {
    entities.iter().map(|e| &e.owner).collect::<HashSet<_>>().len()
}

/// Comparison type of a field; conflicted and unknown fields compare as text.
fn comparison_type(snapshot: &SchemaSnapshot, field: &str) -> FieldType {
    snapshot
        .field(field)
        .filter(|f| !f.conflicted)
        .map_or(FieldType::Text, |f| f.field_type)
}

fn present<'a>(entity: &'a Entity, field: &str) -> Option<&'a RawValue> {
    entity.values.get(field).filter(|v| !v.is_null())
}

fn evaluate(
    predicate: &Predicate,
    entity: &Entity,
    snapshot: &SchemaSnapshot,
    uncomparable: &mut Uncomparable,
) -> bool {
    let value = present(entity, &predicate.field);
    match predicate.op {
        Operator::Exists => return value.is_some(),
        Operator::Missing => return value.is_none(),
        _ => {}
    }
    let (Some(value), Some(expected)) = (value, predicate.value.as_deref()) else {
        return false;
    };
    if predicate.op == Operator::Contains {
        return value
            .to_string()
            .to_lowercase()
            .contains(&expected.to_lowercase());
    }

    let field_type = comparison_type(snapshot, &predicate.field);
    let Some(ordering) = compare(value, expected, field_type) else {
        uncomparable.note(&predicate.field, field_type);
        return false;
    };
    match predicate.op {
        Operator::Eq => ordering == Ordering::Equal,
        Operator::Ne => ordering != Ordering::Equal,
        Operator::Gt => ordering == Ordering::Greater,
        Operator::Gte => ordering != Ordering::Less,
        Operator::Lt => ordering == Ordering::Less,
        Operator::Lte => ordering != Ordering::Greater,
        Operator::Contains | Operator::Exists | Operator::Missing => false,
    }
}

/// Order of a stored value relative to a query literal, using `field_type`.
fn compare(value: &RawValue, expected: &str, field_type: FieldType) -> Option<Ordering> {
    match field_type {
        FieldType::Integer | FieldType::Real => {
            let (left, right) = (as_number(value)?, parse_number(expected)?);
            match (left, right) {
                (Number::Integer(a), Number::Integer(b)) => Some(a.cmp(&b)),
                (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
            }
        }
        FieldType::Timestamp => Some(as_instant(value)?.cmp(&parse_instant(expected)?)),
        FieldType::Boolean => {
            let left = match value {
                RawValue::Bool(b) => *b,
                RawValue::Text(s) => parse_bool(s)?,
                _ => return None,
            };
            Some(left.cmp(&parse_bool(expected)?))
        }
        FieldType::Text | FieldType::Reference => Some(
            value
                .to_string()
                .trim()
                .to_lowercase()
                .cmp(&expected.trim().to_lowercase()),
        ),
    }
}

fn as_number(value: &RawValue) -> Option<Number> {
    match value {
        RawValue::Integer(i) => Some(Number::Integer(*i)),
        RawValue::Real(r) => Some(Number::Real(*r)),
        RawValue::Text(s) => parse_number(s),
        _ => None,
    }
}

fn as_instant(value: &RawValue) -> Option<DateTime<Utc>> {
    value.as_text().and_then(parse_timestamp)
}

/// True when any of the range's fields holds a timestamp inside it.
fn in_range(
    range: &DateRange,
    entity: &Entity,
    snapshot: &SchemaSnapshot,
    uncomparable: &mut Uncomparable,
) -> bool {
    let mut hit = false;
    for field in &range.fields {
        let Some(value) = present(entity, field) else {
            continue;
        };
        match as_instant(value) {
            Some(ts) => hit |= range.contains(ts),
            None if comparison_type(snapshot, field) == FieldType::Timestamp => {
                uncomparable.note(field, FieldType::Timestamp)
            }
            None => {}
        }
    }
    hit
}

fn raw_to_json(value: &RawValue) -> Value {
    match value {
        RawValue::Null => Value::Null,
        RawValue::Bool(b) => Value::Bool(*b),
        RawValue::Integer(i) => Value::from(*i),
        RawValue::Real(r) => serde_json::Number::from_f64(*r).map_or(Value::Null, Value::Number),
        RawValue::Text(s) => Value::String(s.clone()),
    }
}

fn owner_columns(owner: &EntityOwner, documents: &HashMap<String, Document>) -> Map<String, Value> {
    let mut row = Map::new();
    match owner {
        EntityOwner::Document(id) => {
            row.insert("_document_id".into(), Value::String(id.clone()));
            if let Some(doc) = documents.get(id) {
                row.insert("_source".into(), Value::String(doc.source_path.clone()));
            }
        }
        EntityOwner::Chat(id) => {
            row.insert("_chat_id".into(), Value::String(id.clone()));
        }
    }
    if let Some(kind) = owner_kind(owner, documents) {
        row.insert("_kind".into(), Value::String(kind.as_str().to_string()));
    }
    row
}

/// Projected field values of one entity; every field when `fields` is empty.
fn field_values(entity: &Entity, fields: &[String], row: &mut Map<String, Value>) {
    if fields.is_empty() {
        for (name, value) in &entity.values {
            row.insert(name.clone(), raw_to_json(value));
        }
    } else {
        for name in fields {
            let value = entity.values.get(name).map_or(Value::Null, raw_to_json);
            row.insert(name.clone(), value);
        }
    }
}

fn entity_row(entity: &Entity, documents: &HashMap<String, Document>, fields: &[String]) -> Value {
    let mut row = owner_columns(&entity.owner, documents);
    row.insert("_entity_id".into(), Value::String(entity.id.clone()));
    row.insert("_type".into(), Value::String(entity.entity_type.clone()));
    field_values(entity, fields, &mut row);
    Value::Object(row)
}

/// One row per owning document, in order of first match, carrying the
/// matched records under `records`.
fn document_rows(matched: &[&Entity], documents: &HashMap<String, Document>, fields: &[String]) -> Vec<Value> {
    let mut order: Vec<&EntityOwner> = Vec::new();
    let mut members: HashMap<&EntityOwner, Vec<&Entity>> = HashMap::new();
    for entity in matched {
        let group = members.entry(&entity.owner).or_default();
        if group.is_empty() {
            order.push(&entity.owner);
        }
        group.push(entity);
    }

    order
        .into_iter()
        .map(|owner| {
            let group = members.get(owner).map(Vec::as_slice).unwrap_or_default();
            let mut row = owner_columns(owner, documents);
            let mut types: Vec<&str> = group.iter().map(|e| e.entity_type.as_str()).collect();
            types.sort_unstable();
            types.dedup();
            row.insert(
                "_types".into(),
                Value::Array(types.into_iter().map(|t| Value::String(t.to_string())).collect()),
            );
            let records = group
                .iter()
                .map(|e| {
                    let mut record = Map::new();
                    record.insert("_entity_id".into(), Value::String(e.id.clone()));
                    field_values(e, fields, &mut record);
                    Value::Object(record)
                })
                .collect();
            row.insert("records".into(), Value::Array(records));
            Value::Object(row)
        })
        .collect()
}

fn group_key(group_by: &GroupBy, entity: &Entity, documents: &HashMap<String, Document>) -> Option<String> {
    match group_by {
        GroupBy::Field(field) => present(entity, field).map(|v| v.to_string()),
        GroupBy::Kind => kind_of(entity, documents).map(|k| k.as_str().to_string()),
        GroupBy::EntityType => Some(entity.entity_type.clone()),
    }
}

fn aggregate_rows(
    aggregate: &Aggregate,
    matched: &[&Entity],
    documents: &HashMap<String, Document>,
    snapshot: &SchemaSnapshot,
    per_document: bool,
    uncomparable: &mut Uncomparable,
) -> Vec<Value> {
    let mut groups: BTreeMap<Option<String>, Vec<&Entity>> = BTreeMap::new();
    match &aggregate.group_by {
        Some(group_by) => {
            for entity in matched {
                groups
                    .entry(group_key(group_by, entity, documents))
                    .or_default()
                    .push(entity);
            }
        }
        None => {
            groups.insert(None, matched.to_vec());
        }
    }

    let value_key = match &aggregate.field {
        Some(field) => format!("{}_{}", aggregate.function.as_str(), field),
        None => aggregate.function.as_str().to_string(),
    };
    let group_column = aggregate.group_by.as_ref().map(|g| match g {
        GroupBy::Field(field) => field.as_str(),
        GroupBy::Kind => "kind",
        GroupBy::EntityType => "type",
    });

    groups
        .into_iter()
        .map(|(key, members)| {
            let mut row = Map::new();
            if let Some(column) = group_column {
                row.insert(column.to_string(), key.map_or(Value::Null, Value::String));
            }
            let value = if per_document
                && aggregate.function == AggregateFn::Count
                && aggregate.field.is_none()
            {
                Value::from(owner_count(&members))
            } else {
                compute(aggregate, &members, snapshot, uncomparable)
            };
            row.insert(value_key.clone(), value);
            Value::Object(row)
        })
        .collect()
}

fn compute(
    aggregate: &Aggregate,
    members: &[&Entity],
    snapshot: &SchemaSnapshot,
    uncomparable: &mut Uncomparable,
) -> Value {
    let Some(field) = aggregate.field.as_deref() else {
        return Value::from(members.len());
    };
    let field_type = comparison_type(snapshot, field);
    let values = members.iter().filter_map(|e| present(e, field));

    if field_type == FieldType::Timestamp {
        let mut instants = Vec::new();
        for value in values {
            match as_instant(value) {
                Some(ts) => instants.push(ts),
                None => uncomparable.note(field, field_type),
            }
        }
        let picked = match aggregate.function {
            AggregateFn::Min => instants.into_iter().min(),
            AggregateFn::Max => instants.into_iter().max(),
            AggregateFn::Count => return Value::from(members.len()),
            AggregateFn::Sum | AggregateFn::Avg => None,
        };
        return picked.map_or(Value::Null, |ts| Value::String(format_ts_iso(ts)));
    }

    let mut numbers = Vec::new();
    for value in values {
        match as_number(value) {
            Some(n) => numbers.push(n),
            None => uncomparable.note(field, FieldType::Real),
        }
    }
    if numbers.is_empty() {
        return match aggregate.function {
            AggregateFn::Count => Value::from(0),
            _ => Value::Null,
        };
    }
    let all_integers = numbers.iter().all(|n| matches!(n, Number::Integer(_)));
    let float = |f: f64| serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number);

    match aggregate.function {
        AggregateFn::Count => Value::from(numbers.len()),
        AggregateFn::Sum if all_integers => Value::from(
            numbers
                .iter()
                .map(|n| match n {
                    Number::Integer(i) => *i,
                    Number::Real(r) => *r as i64,
                })
                .fold(0i64, i64::saturating_add),
        ),
        AggregateFn::Sum => float(numbers.iter().map(Number::as_f64).sum()),
        AggregateFn::Avg => float(numbers.iter().map(Number::as_f64).sum::<f64>() / numbers.len() as f64),
        AggregateFn::Min | AggregateFn::Max => {
            let pick = numbers.iter().copied().reduce(|a, b| {
                let ordering = a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(Ordering::Equal);
                let keep_a = match aggregate.function {
                    AggregateFn::Min => ordering != Ordering::Greater,
                    _ => ordering != Ordering::Less,
                };
                if keep_a {
                    a
                } else {
                    b
                }
            });
            match pick {
                Some(Number::Integer(i)) => Value::from(i),
                Some(Number::Real(r)) => float(r),
                None => Value::Null,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Record, Relationship, RelationshipKind};
    use crate::query::translate;
    use crate::schema::SchemaField;
    use crate::store::{InMemoryStore, VersionCommit};
    use std::collections::BTreeSet;

    fn schema() -> SchemaSnapshot {
        let mut snapshot = SchemaSnapshot {
            version: 3,
            ..Default::default()
        };
        for (name, field_type, conflicted) in [
            ("invoice_number", FieldType::Reference, false),
            ("customer_id", FieldType::Reference, false),
            ("total", FieldType::Real, false),
            ("date", FieldType::Timestamp, false),
            ("note", FieldType::Text, true),
        ] {
            snapshot.fields.insert(
                name.into(),
                SchemaField {
                    name: name.into(),
                    field_type,
                    nullable: true,
                    conflicted,
                    contributing_kinds: BTreeSet::from([FileKind::PlainText]),
                    introduced_in: 1,
                    updated_in: 1,
                },
            );
        }
        snapshot
    }

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), RawValue::text(*v)))
            .collect()
    }

    async fn add(store: &InMemoryStore, doc: &str, kind: FileKind, entity_type: &str, values: Record) {
        let now = Utc::now();
        store
            .commit_version(&VersionCommit {
                document: Document {
                    id: doc.into(),
                    source_path: format!("/in/{}", doc),
                    kind,
                    fingerprint: format!("fp-{}", doc),
                    created_at: now,
                    updated_at: now,
                },
                raw_hash: format!("raw-{}", doc),
                text: String::new(),
                records: vec![values.clone()],
                pages: Vec::new(),
                metadata: Value::Null,
                confidence: 1.0,
                entities: vec![Entity {
                    id: format!("e-{}", doc),
                    owner: EntityOwner::Document(doc.into()),
                    record_index: 0,
                    entity_type: entity_type.into(),
                    values,
                    schema_version: 3,
                    created_at: now,
                }],
            })
            .await
            .unwrap();
    }

    async fn fixture() -> InMemoryStore {
        let store = InMemoryStore::new();
        add(&store, "a", FileKind::Pdf, "invoice",
            record(&[("invoice_number", "INV-1"), ("customer_id", "C-1"), ("total", "$1,200.00"), ("date", "2023-02-01")])).await;
        add(&store, "b", FileKind::PlainText, "invoice",
            record(&[("invoice_number", "INV-2"), ("customer_id", "C-1"), ("total", "80"), ("date", "2022-11-30")])).await;
        add(&store, "c", FileKind::PlainText, "invoice",
            record(&[("invoice_number", "INV-3"), ("customer_id", "C-2"), ("total", "n/a"), ("date", "2023-12-31")])).await;
        add(&store, "d", FileKind::Image, "receipt",
            record(&[("invoice_number", "INV-1"), ("date", "2023-02-03")])).await;
        store
    }

    async fn run(store: &InMemoryStore, text: &str) -> QueryResult {
        run_capped(store, text, 100).await
    }

    async fn run_capped(store: &InMemoryStore, text: &str, default_limit: usize) -> QueryResult {
        let snapshot = schema();
        let types = vec!["invoice".to_string(), "receipt".to_string()];
        let plan = translate(text, &snapshot, &types).unwrap();
        execute(&plan, store, &snapshot, default_limit).await.unwrap()
    }

    fn ids(result: &QueryResult) -> Vec<&str> {
        result
            .rows
            .iter()
            .filter_map(|r| r["_entity_id"].as_str())
            .collect()
    }

    #[tokio::test]
    async fn year_range_returns_only_that_year() {
        let store = fixture().await;
        let result = run(&store, "list all documents from 2023").await;
        let documents: Vec<&str> = result
            .rows
            .iter()
            .filter_map(|r| r["_document_id"].as_str())
            .collect();
        assert_eq!(documents, vec!["a", "c", "d"]);
        assert_eq!(result.total_matched, 3);
        assert_eq!(result.rows[0]["_kind"], "pdf");
        assert_eq!(result.rows[0]["_source"], "/in/a");
        assert_eq!(result.rows[0]["records"][0]["_entity_id"], "e-a");
    }

    #[tokio::test]
    async fn numeric_filters_parse_currency_and_warn_on_junk() {
        let store = fixture().await;
        let result = run(&store, "invoices with total over 100").await;
        assert_eq!(ids(&result), vec!["e-a"]);
        assert!(result.warnings.iter().any(|w| w.contains("'total'")));
    }

    #[tokio::test]
    async fn reference_equality_ignores_case() {
        let store = fixture().await;
        let result = run(&store, "invoices where customer_id is c-1").await;
        assert_eq!(ids(&result), vec!["e-a", "e-b"]);
    }

    #[tokio::test]
    async fn grouped_sum_and_count_by_kind() {
        let store = fixture().await;
        let result = run(&store, "total total by customer_id").await;
        assert_eq!(
            result.rows,
            vec![
                serde_json::json!({"customer_id": null, "sum_total": null}),
                serde_json::json!({"customer_id": "C-1", "sum_total": 1280.0}),
                serde_json::json!({"customer_id": "C-2", "sum_total": null}),
            ]
        );

        let result = run(&store, "count documents by kind").await;
        assert_eq!(
            result.rows,
            vec![
                serde_json::json!({"kind": "image", "count": 1}),
                serde_json::json!({"kind": "pdf", "count": 1}),
                serde_json::json!({"kind": "plain-text", "count": 2}),
            ]
        );
    }

    #[tokio::test]
    async fn joins_follow_relationship_edges() {
        let store = fixture().await;
        store
            .upsert_relationships(&[Relationship {
                id: "r1".into(),
                from_entity: "e-d".into(),
                to_entity: "e-a".into(),
                kind: RelationshipKind::SharedIdentifier,
                matches: Vec::new(),
                confidence: 0.6,
                created_at: Utc::now(),
            }])
            .await
            .unwrap();
        let result = run(&store, "invoices related to receipts").await;
        assert_eq!(ids(&result), vec!["e-a"]);
    }

    #[tokio::test]
    async fn limit_and_projection() {
        let store = fixture().await;
        let result = run(&store, "first 1 invoices invoice_number").await;
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.total_matched, 3);
        assert!(result.rows[0].get("total").is_none());
        assert_eq!(result.rows[0]["invoice_number"], "INV-1");
        assert!(result.warnings.iter().any(|w| w.contains("showing 1 of 3")));
    }

    #[tokio::test]
    async fn default_cap_spares_list_all_requests() {
        let store = fixture().await;

        let all = run_capped(&store, "list all invoices", 1).await;
        assert_eq!(all.rows.len(), 3);
        assert!(!all.warnings.iter().any(|w| w.contains("showing")));

        let some = run_capped(&store, "show invoices", 1).await;
        assert_eq!(some.rows.len(), 1);
        assert!(some.warnings.iter().any(|w| w.contains("showing 1 of 3")));

        let explicit = run_capped(&store, "list all invoices limit 2", 1).await;
        assert_eq!(explicit.rows.len(), 2);
    }

    #[tokio::test]
    async fn conflicted_and_unknown_type_warnings() {
        let store = fixture().await;
        let result = run(&store, "invoices with note").await;
        assert!(result.rows.is_empty());
        assert!(result.warnings.iter().any(|w| w.contains("conflicting types")));

        let result = run(&store, "list all widgets").await;
        assert!(result.rows.is_empty());
        assert!(result.warnings.iter().any(|w| w.contains("'widget'")));
    }
}
