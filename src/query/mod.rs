//! Natural-language queries over the inferred schema.
//!
//! [`translate`] turns a request such as "invoices with total over 100 from
//! 2023" into a [`QueryPlan`] against one schema snapshot; [`execute`] runs
//! the plan over the store's current entities. Plans are never cached: each
//! request is translated against the snapshot current at that moment.

mod execute;
mod translate;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::FileKind;

pub use execute::{execute, QueryResult};
pub use translate::translate;

/// Why a request could not be turned into a plan. Each variant names the
/// offending term so the caller can rephrase.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TranslationFailure {
    #[error("query is empty")]
    Empty,

    #[error("unknown field '{term}'")]
    UnresolvedField { term: String },

    #[error("no timestamp fields are known, so a date range cannot be applied")]
    NoTimestampFields,

    #[error("field '{field}' is not a timestamp")]
    NotTimestampField { field: String },

    #[error("'{value}' is not a valid {expected} for field '{field}'")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("missing value after '{field}'")]
    MissingValue { field: String },

    #[error("cannot compute {function} over field '{field}'")]
    NotAggregatable { field: String, function: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    /// Field present with a non-null value.
    Exists,
    /// Field absent or null.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predicate {
    pub field: String,
    pub op: Operator,
    pub value: Option<String>,
}

/// Half-open `[start, end)` window applied to any of `fields`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateRange {
    pub fields: Vec<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts < e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFn {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFn::Count => "count",
            AggregateFn::Sum => "sum",
            AggregateFn::Avg => "avg",
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "by", content = "field", rename_all = "snake_case")]
pub enum GroupBy {
    Field(String),
    Kind,
    EntityType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub function: AggregateFn,
    pub field: Option<String>,
    pub group_by: Option<GroupBy>,
}

/// Keep entities with an edge to an entity of `entity_type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Join {
    pub entity_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryPlan {
    pub query: String,
    /// Schema snapshot the plan was translated against.
    pub schema_version: u64,
    pub entity_type: Option<String>,
    pub kind: Option<FileKind>,
    pub predicates: Vec<Predicate>,
    pub date_ranges: Vec<DateRange>,
    pub aggregate: Option<Aggregate>,
    pub joins: Vec<Join>,
    /// Projection; empty means every field.
    pub fields: Vec<String>,
    /// The request names documents or files, so rows and counts are per
    /// source document rather than per record.
    pub per_document: bool,
    pub limit: Option<usize>,
    /// "all"/"every" was asked for; no default cap applies.
    pub list_all: bool,
    /// Notes from translation (ignored words, ambiguous phrases).
    pub warnings: Vec<String>,
}
