//! Request text → [`QueryPlan`].
//!
//! The translator is a single left-to-right pass over word tokens. At each
//! position it tries, in order: limit, join, date clause, group-by,
//! aggregate, connector predicate (`with`, `where`, ...), bare predicate
//! (`total over 100`), file kind, entity type, field projection and filler.
//! Anything left over is either reported as an unknown field (snake_case
//! terms) or noted in the plan's warnings.

use std::collections::HashSet;

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::{
    Aggregate, AggregateFn, DateRange, GroupBy, Join, Operator, Predicate, QueryPlan,
    TranslationFailure,
};
use crate::models::FileKind;
use crate::schema::{FieldType, SchemaSnapshot};
use crate::values::{normalize_field_name, parse_bool, parse_number, parse_timestamp, singularize};

type Window = (DateTime<Utc>, DateTime<Utc>);

const ARTICLES: &[&str] = &["a", "an", "the", "any", "some"];

const FILLER: &[&str] = &[
    "list", "show", "me", "all", "of", "for", "get", "find", "give", "display", "return",
    "what", "which", "are", "is", "was", "were", "every", "each", "there", "please", "in",
    "my", "our", "do", "does", "we", "i", "have", "has", "that", "and", "or", "to", "from",
    "with", "select", "fetch", "dated", "created", "issued", "made", "sent", "received",
    "by", "per", "on", "a", "an", "the", "any", "some", "whose", "where", "having",
];

/// Nouns that mean "any record" and impose no type filter.
const GENERIC_NOUNS: &[&str] = &[
    "document", "documents", "file", "files", "record", "records", "entity", "entities",
    "row", "rows", "item", "items", "data", "everything", "entry", "entries", "thing",
    "things", "results",
];

/// Generic nouns that ask for whole source documents.
const DOCUMENT_NOUNS: &[&str] = &["document", "documents", "file", "files"];

/// Words after which an unknown plural noun is taken as a requested type.
const TYPE_LEADERS: &[&str] = &["all", "every", "many", "list", "show", "me", "count", "find", "get"];

const OPERATORS: &[(&[&str], Operator)] = &[
    (&["is", "greater", "than", "or", "equal", "to"], Operator::Gte),
    (&["is", "less", "than", "or", "equal", "to"], Operator::Lte),
    (&["greater", "than", "or", "equal", "to"], Operator::Gte),
    (&["less", "than", "or", "equal", "to"], Operator::Lte),
    (&["is", "not", "equal", "to"], Operator::Ne),
    (&["is", "equal", "to"], Operator::Eq),
    (&["is", "greater", "than"], Operator::Gt),
    (&["is", "more", "than"], Operator::Gt),
    (&["is", "less", "than"], Operator::Lt),
    (&["is", "at", "least"], Operator::Gte),
    (&["is", "at", "most"], Operator::Lte),
    (&["no", "more", "than"], Operator::Lte),
    (&["no", "less", "than"], Operator::Gte),
    (&["greater", "than"], Operator::Gt),
    (&["more", "than"], Operator::Gt),
    (&["less", "than"], Operator::Lt),
    (&["fewer", "than"], Operator::Lt),
    (&["at", "least"], Operator::Gte),
    (&["at", "most"], Operator::Lte),
    (&["equal", "to"], Operator::Eq),
    (&["is", "not"], Operator::Ne),
    (&["is", "over"], Operator::Gt),
    (&["is", "above"], Operator::Gt),
    (&["is", "under"], Operator::Lt),
    (&["is", "below"], Operator::Lt),
    (&["is"], Operator::Eq),
    (&["equals"], Operator::Eq),
    (&["="], Operator::Eq),
    (&["=="], Operator::Eq),
    (&[":"], Operator::Eq),
    (&["not"], Operator::Ne),
    (&["isn't"], Operator::Ne),
    (&["!="], Operator::Ne),
    (&["<>"], Operator::Ne),
    (&["over"], Operator::Gt),
    (&["above"], Operator::Gt),
    (&["exceeds"], Operator::Gt),
    (&["exceeding"], Operator::Gt),
    (&[">"], Operator::Gt),
    (&[">="], Operator::Gte),
    (&["under"], Operator::Lt),
    (&["below"], Operator::Lt),
    (&["<"], Operator::Lt),
    (&["<="], Operator::Lte),
    (&["contains"], Operator::Contains),
    (&["containing"], Operator::Contains),
    (&["includes"], Operator::Contains),
    (&["like"], Operator::Contains),
];

const DATE_KEYWORDS: &[&str] = &[
    "between", "from", "in", "during", "on", "for", "within", "dated", "after", "since",
    "before", "until", "till", "through", "thru",
];

/// Words that open another clause and so never serve as a bare filter value.
const CLAUSE_WORDS: &[&str] = &[
    "no", "without", "not", "group", "grouped", "limit", "top", "first", "only", "related",
    "linked", "connected", "associated", "referencing", "reference", "this", "last", "next",
    "pdf", "pdfs", "image", "images", "photo", "photos", "picture", "pictures", "scans",
    "chat", "chats", "conversation", "conversations", "transcript", "transcripts", "text",
];

/// Date keywords that only make sense for a timestamp field.
const STRICT_DATE_KEYWORDS: &[&str] = &["between", "after", "since", "before", "until"];

const MONTHS: &[&[&str]] = &[
    &["january", "jan"],
    &["february", "feb"],
    &["march", "mar"],
    &["april", "apr"],
    &["may"],
    &["june", "jun"],
    &["july", "jul"],
    &["august", "aug"],
    &["september", "sep", "sept"],
    &["october", "oct"],
    &["november", "nov"],
    &["december", "dec"],
];

#[derive(Debug, Clone)]
struct Token {
    word: String,
    raw: String,
    quoted: bool,
}

fn strip_punct(s: &str) -> &str {
    s.trim_end_matches([',', ';', '?', '!', '.'])
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let mut pieces = text.split_whitespace();
    while let Some(piece) = pieces.next() {
        if let Some(q @ ('"' | '\'')) = piece.chars().next() {
            let mut buf = piece[1..].to_string();
            while !strip_punct(&buf).ends_with(q) {
                match pieces.next() {
                    Some(next) => {
                        buf.push(' ');
                        buf.push_str(next);
                    }
                    None => break,
                }
            }
            let inner = strip_punct(&buf).trim_end_matches(q).to_string();
            out.push(Token {
                word: inner.to_lowercase(),
                raw: inner,
                quoted: true,
            });
            continue;
        }

        let trimmed = strip_punct(piece);
        let (body, colon) = match trimmed.strip_suffix(':') {
            Some(body) if !body.is_empty() => (body, true),
            _ => (trimmed, false),
        };
        if !body.is_empty() {
            out.push(Token {
                word: body.to_lowercase(),
                raw: body.to_string(),
                quoted: false,
            });
        }
        if colon {
            out.push(Token {
                word: ":".into(),
                raw: ":".into(),
                quoted: false,
            });
        }
    }
    out
}

/// Translate `text` against `snapshot`. `known_types` are the entity types
/// a word like "invoices" may refer to.
pub fn translate(
    text: &str,
    snapshot: &SchemaSnapshot,
    known_types: &[String],
) -> Result<QueryPlan, TranslationFailure> {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return Err(TranslationFailure::Empty);
    }

    let list_all = tokens
        .iter()
        .any(|t| !t.quoted && matches!(t.word.as_str(), "all" | "every"));
    let mut translator = Translator {
        tokens,
        pos: 0,
        snapshot,
        known_types: known_types.iter().map(|t| t.to_lowercase()).collect(),
        plan: QueryPlan {
            query: text.trim().to_string(),
            schema_version: snapshot.version,
            list_all,
            ..Default::default()
        },
        group_by: None,
    };
    translator.run()?;
    Ok(translator.finish())
}

struct Translator<'a> {
    tokens: Vec<Token>,
    pos: usize,
    snapshot: &'a SchemaSnapshot,
    known_types: HashSet<String>,
    plan: QueryPlan,
    group_by: Option<GroupBy>,
}

impl Translator<'_> {
    fn run(&mut self) -> Result<(), TranslationFailure> {
        while self.pos < self.tokens.len() {
            if self.parse_limit()
                || self.parse_join()
                || self.parse_date(None)?
                || self.parse_group_by()?
                || self.parse_aggregate()?
                || self.parse_connector()?
                || self.parse_bare_predicate()?
                || self.parse_kind()
                || self.parse_entity_type()
                || self.parse_projection()
            {
                continue;
            }
            self.leftover()?;
        }
        Ok(())
    }

    fn finish(mut self) -> QueryPlan {
        let group_by = self.group_by.take();
        if let Some(aggregate) = self.plan.aggregate.as_mut() {
            aggregate.group_by = group_by;
        } else if group_by.is_some() {
            self.plan.aggregate = Some(Aggregate {
                function: AggregateFn::Count,
                field: None,
                group_by,
            });
        }
        self.plan
    }

    // ---- token helpers ----

    fn token(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    /// Lowercased word at `offset`, unless it was quoted.
    fn keyword(&self, offset: usize) -> Option<&str> {
        self.token(offset)
            .filter(|t| !t.quoted)
            .map(|t| t.word.as_str())
    }

    fn matches_seq(&self, offset: usize, seq: &[&str]) -> bool {
        seq.iter()
            .enumerate()
            .all(|(i, w)| self.keyword(offset + i) == Some(*w))
    }

    /// Length of the first matching sequence.
    fn match_any(&self, offset: usize, seqs: &[&[&str]]) -> Option<usize> {
        seqs.iter()
            .find(|seq| self.matches_seq(offset, seq))
            .map(|seq| seq.len())
    }

    fn skip_articles(&self, mut offset: usize) -> usize {
        while self.keyword(offset).is_some_and(|w| ARTICLES.contains(&w)) {
            offset += 1;
        }
        offset
    }

    fn match_operator(&self, offset: usize) -> Option<(Operator, usize)> {
        OPERATORS
            .iter()
            .filter(|(seq, _)| self.matches_seq(offset, seq))
            .max_by_key(|(seq, _)| seq.len())
            .map(|(seq, op)| (*op, seq.len()))
    }

    /// Longest phrase (up to three words) at `offset` naming a schema field.
    fn resolve_field(&self, offset: usize) -> Option<(String, usize)> {
        for n in (1..=3).rev() {
            let Some(words) = self.words(offset, n) else {
                continue;
            };
            let mut candidates = Vec::with_capacity(2);
            if let Some(name) = normalize_field_name(&words.join(" ")) {
                candidates.push(name);
            }
            if let Some((last, rest)) = words.split_last() {
                let mut singular: Vec<String> = rest.iter().map(|w| w.to_string()).collect();
                singular.push(singularize(last));
                if let Some(name) = normalize_field_name(&singular.join(" ")) {
                    candidates.push(name);
                }
            }
            if let Some(found) = candidates.into_iter().find(|c| self.snapshot.field(c).is_some()) {
                return Some((found, n));
            }
        }
        None
    }

    /// Longest phrase (up to two words) at `offset` naming a known entity type.
    fn resolve_type(&self, offset: usize) -> Option<(String, usize)> {
        for n in (1..=2).rev() {
            let Some(words) = self.words(offset, n) else {
                continue;
            };
            let Some((last, rest)) = words.split_last() else {
                continue;
            };
            let mut parts: Vec<String> = rest.iter().map(|w| w.to_string()).collect();
            parts.push(singularize(last));
            let candidate = parts.join("_");
            if self.known_types.contains(&candidate) {
                return Some((candidate, n));
            }
        }
        None
    }

    /// `n` unquoted words starting at `offset`.
    fn words(&self, offset: usize, n: usize) -> Option<Vec<&str>> {
        (0..n).map(|i| self.keyword(offset + i)).collect()
    }

    // ---- clauses ----

    fn parse_limit(&mut self) -> bool {
        let Some(n) = self.match_any(
            0,
            &[&["limit", "to"], &["limit"], &["top"], &["first"], &["only"]],
        ) else {
            return false;
        };
        let Some(limit) = self.keyword(n).and_then(|w| w.parse::<usize>().ok()) else {
            return false;
        };
        self.plan.limit = Some(limit);
        self.pos += n + 1;
        true
    }

    fn parse_join(&mut self) -> bool {
        let Some(n) = self.match_any(
            0,
            &[
                &["related", "to"],
                &["linked", "to"],
                &["connected", "to"],
                &["associated", "with"],
                &["that", "reference"],
                &["which", "reference"],
                &["referencing"],
            ],
        ) else {
            return false;
        };
        let at = self.skip_articles(n);
        if let Some((entity_type, m)) = self.resolve_type(at) {
            self.plan.joins.push(Join { entity_type });
            self.pos += at + m;
            return true;
        }
        let Some(word) = self.keyword(at).map(str::to_string) else {
            return false;
        };
        let entity_type = singularize(&word);
        self.plan
            .warnings
            .push(format!("no entities of type '{}' are known", entity_type));
        self.plan.joins.push(Join { entity_type });
        self.pos += at + 1;
        true
    }

    /// A date clause at the cursor. With `field` the window applies to that
    /// field only, otherwise to every timestamp field of the snapshot.
    fn parse_date(&mut self, field: Option<String>) -> Result<bool, TranslationFailure> {
        let Some(keyword) = self.keyword(0) else {
            return Ok(false);
        };
        if !DATE_KEYWORDS.contains(&keyword) {
            return Ok(false);
        }
        let Some((first, n)) = self.parse_period(1) else {
            return Ok(false);
        };

        let (start, end, consumed) = match keyword {
            "between" => {
                if !matches!(self.keyword(1 + n), Some("and" | "to" | "-")) {
                    return Ok(false);
                }
                let Some((second, m)) = self.parse_period(2 + n) else {
                    return Ok(false);
                };
                (Some(first.0), Some(second.1), 2 + n + m)
            }
            "from" => {
                let range_end = match self.keyword(1 + n) {
                    Some("to" | "until" | "through" | "thru" | "till" | "-") => {
                        self.parse_period(2 + n)
                    }
                    _ => None,
                };
                match range_end {
                    Some((second, m)) => (Some(first.0), Some(second.1), 2 + n + m),
                    None => (Some(first.0), Some(first.1), 1 + n),
                }
            }
            "after" => (Some(first.1), None, 1 + n),
            "since" => (Some(first.0), None, 1 + n),
            "before" => (None, Some(first.0), 1 + n),
            "until" | "till" | "through" | "thru" => (None, Some(first.1), 1 + n),
            _ => (Some(first.0), Some(first.1), 1 + n),
        };

        let fields = match field {
            Some(field) => vec![field],
            None => {
                let fields = self.snapshot.timestamp_fields();
                if fields.is_empty() {
                    return Err(TranslationFailure::NoTimestampFields);
                }
                fields.into_iter().map(str::to_string).collect()
            }
        };
        self.plan.date_ranges.push(DateRange { fields, start, end });
        self.pos += consumed;
        Ok(true)
    }

    /// A year, month, or day at `offset`, as a half-open window.
    fn parse_period(&self, offset: usize) -> Option<(Window, usize)> {
        let words: Vec<&str> = (0..3).map_while(|i| self.keyword(offset + i)).collect();

        if words.len() >= 3 {
            if let Some(day) = parse_timestamp(&words[..3].join(" ")) {
                return Some((day_window(day), 3));
            }
        }
        if words.len() >= 2 {
            if let (Some(month), Some(year)) = (month_number(words[0]), parse_year(words[1])) {
                return Some((month_window(year, month)?, 2));
            }
        }
        let first = *words.first()?;
        if let Some(year) = parse_year(first) {
            return Some((year_window(year)?, 1));
        }
        if let Some((year, month)) = parse_year_month(first) {
            return Some((month_window(year, month)?, 1));
        }
        parse_timestamp(first).map(|day| (day_window(day), 1))
    }

    fn parse_group_by(&mut self) -> Result<bool, TranslationFailure> {
        let Some(n) = self.match_any(
            0,
            &[
                &["grouped", "by"],
                &["group", "by"],
                &["broken", "down", "by"],
                &["by"],
                &["per"],
            ],
        ) else {
            return Ok(false);
        };
        let at = self.skip_articles(n);
        let Some(target) = self.token(at).map(|t| t.raw.clone()) else {
            return Ok(false);
        };

        let (group, m) = if let Some((field, m)) = self.resolve_field(at) {
            (GroupBy::Field(field), m)
        } else if let Some(m) = self.match_any(
            at,
            &[&["file", "kind"], &["document", "kind"], &["file", "type"], &["kind"], &["kinds"], &["format"]],
        ) {
            (GroupBy::Kind, m)
        } else if let Some(m) = self.match_any(
            at,
            &[&["entity", "type"], &["record", "type"], &["type"], &["types"]],
        ) {
            (GroupBy::EntityType, m)
        } else {
            return Err(TranslationFailure::UnresolvedField { term: target });
        };

        if self.group_by.is_some() {
            self.plan
                .warnings
                .push("only one grouping is supported; using the first".into());
        } else {
            self.group_by = Some(group);
        }
        self.pos += at + m;
        Ok(true)
    }

    fn parse_aggregate(&mut self) -> Result<bool, TranslationFailure> {
        if let Some(n) = self.match_any(
            0,
            &[&["how", "many"], &["number", "of"], &["count", "of"], &["count"]],
        ) {
            self.set_aggregate(AggregateFn::Count, None);
            self.pos += n;
            return Ok(true);
        }

        // Non-strict words ("total", "latest") only aggregate when a field
        // follows; otherwise they may be a field name or plain English.
        let (function, strict) = match self.keyword(0) {
            Some("sum") => (AggregateFn::Sum, true),
            Some("total") => (AggregateFn::Sum, false),
            Some("average" | "avg" | "mean") => (AggregateFn::Avg, true),
            Some("minimum" | "min") => (AggregateFn::Min, true),
            Some("lowest" | "smallest" | "earliest") => (AggregateFn::Min, false),
            Some("maximum" | "max") => (AggregateFn::Max, true),
            Some("highest" | "largest" | "biggest" | "latest") => (AggregateFn::Max, false),
            _ => return Ok(false),
        };
        let mut at = 1;
        if self.keyword(at) == Some("of") {
            at += 1;
        }
        at = self.skip_articles(at);

        let Some((field, m)) = self.resolve_field(at) else {
            if !strict {
                return Ok(false);
            }
            let term = self
                .token(at)
                .map(|t| t.raw.clone())
                .unwrap_or_else(|| function.as_str().to_string());
            return Err(TranslationFailure::UnresolvedField { term });
        };
        if !strict && self.match_operator(at + m).is_some() {
            return Ok(false);
        }

        let field_type = self.snapshot.field(&field).map(|f| f.field_type);
        let allowed = match function {
            AggregateFn::Sum | AggregateFn::Avg => field_type.is_some_and(|t| t.is_numeric()),
            _ => field_type.is_some_and(|t| t.is_numeric() || t == FieldType::Timestamp),
        };
        if !allowed {
            return Err(TranslationFailure::NotAggregatable {
                field,
                function: function.as_str().to_string(),
            });
        }

        self.set_aggregate(function, Some(field));
        self.pos += at + m;
        Ok(true)
    }

    fn set_aggregate(&mut self, function: AggregateFn, field: Option<String>) {
        if self.plan.aggregate.is_some() {
            self.plan
                .warnings
                .push(format!("only one aggregate is supported; ignoring {}", function.as_str()));
            return;
        }
        self.plan.aggregate = Some(Aggregate {
            function,
            field,
            group_by: None,
        });
    }

    /// `with a warranty_code`, `where customer_id is C-42`, `having no due_date`.
    fn parse_connector(&mut self) -> Result<bool, TranslationFailure> {
        let n = match self.keyword(0) {
            Some("where" | "with" | "having" | "whose") => 1,
            _ => match self.match_any(
                0,
                &[&["that", "have"], &["that", "has"], &["which", "have"], &["which", "has"]],
            ) {
                Some(n) => n,
                None => return Ok(false),
            },
        };

        let mut at = n;
        let mut negate = false;
        loop {
            match self.keyword(at) {
                Some(w) if ARTICLES.contains(&w) => at += 1,
                Some("no" | "without") => {
                    negate = true;
                    at += 1;
                }
                _ => break,
            }
        }

        let Some((field, m)) = self.resolve_field(at) else {
            if let Some((entity_type, m)) = self.resolve_type(at) {
                self.plan.joins.push(Join { entity_type });
                self.pos += at + m;
                return Ok(true);
            }
            // "... from 2023 with" or a trailing connector: nothing to name.
            let Some(token) = self.token(at) else {
                return Ok(false);
            };
            if !token.quoted && DATE_KEYWORDS.contains(&token.word.as_str()) {
                return Ok(false);
            }
            return Err(TranslationFailure::UnresolvedField {
                term: token.raw.clone(),
            });
        };

        self.pos += at + m;
        if negate {
            self.plan.predicates.push(Predicate {
                field,
                op: Operator::Missing,
                value: None,
            });
            return Ok(true);
        }
        self.predicate_body(field, true)
    }

    /// `total over 100`: a field followed directly by an operator or a date
    /// clause.
    fn parse_bare_predicate(&mut self) -> Result<bool, TranslationFailure> {
        let Some((field, m)) = self.resolve_field(0) else {
            return Ok(false);
        };
        let start = self.pos;
        self.pos += m;
        if self.predicate_body(field, false)? {
            return Ok(true);
        }
        self.pos = start;
        Ok(false)
    }

    /// Operator and value for `field`, cursor just past the field phrase.
    /// With `explicit` a missing operator means "has a value".
    fn predicate_body(&mut self, field: String, explicit: bool) -> Result<bool, TranslationFailure> {
        let field_type = self.snapshot.field(&field).map(|f| f.field_type);

        let copula = usize::from(matches!(self.keyword(0), Some("is" | "was" | "are" | "were")));
        if let Some(keyword) = self.keyword(copula) {
            if DATE_KEYWORDS.contains(&keyword) {
                if field_type == Some(FieldType::Timestamp) {
                    let start = self.pos;
                    self.pos += copula;
                    if self.parse_date(Some(field.clone()))? {
                        return Ok(true);
                    }
                    self.pos = start;
                } else if STRICT_DATE_KEYWORDS.contains(&keyword)
                    && self.parse_period(copula + 1).is_some()
                {
                    return Err(TranslationFailure::NotTimestampField { field });
                }
            }
        }

        if let Some((op, n)) = self.match_operator(0) {
            let Some(value) = self.token(n).map(|t| t.raw.clone()) else {
                return Err(TranslationFailure::MissingValue { field });
            };
            validate_value(&field, field_type, op, &value)?;
            self.pos += n + 1;
            self.plan.predicates.push(Predicate {
                field,
                op,
                value: Some(value),
            });
            return Ok(true);
        }

        if explicit {
            // `with customer id C-100`: a value right after the field is an
            // equality test, nothing after it is a presence test.
            if let Some(value) = self.bare_value(0) {
                validate_value(&field, field_type, Operator::Eq, &value)?;
                self.pos += 1;
                self.plan.predicates.push(Predicate {
                    field,
                    op: Operator::Eq,
                    value: Some(value),
                });
                return Ok(true);
            }
            self.plan.predicates.push(Predicate {
                field,
                op: Operator::Exists,
                value: None,
            });
            return Ok(true);
        }
        Ok(false)
    }

    /// The token at `offset` when it can only be read as a literal value.
    fn bare_value(&self, offset: usize) -> Option<String> {
        let token = self.token(offset)?;
        if token.quoted {
            return Some(token.raw.clone());
        }
        let word = token.word.as_str();
        let reserved = [FILLER, ARTICLES, DATE_KEYWORDS, GENERIC_NOUNS, TYPE_LEADERS, CLAUSE_WORDS]
            .iter()
            .any(|list| list.contains(&word));
        if reserved
            || !word.chars().any(char::is_alphanumeric)
            || self.match_operator(offset).is_some()
            || self.resolve_field(offset).is_some()
            || self.resolve_type(offset).is_some()
        {
            return None;
        }
        Some(token.raw.clone())
    }

    fn parse_kind(&mut self) -> bool {
        let (kind, n) = if let Some(n) = self.match_any(0, &[&["chat", "logs"], &["chat", "log"]]) {
            (FileKind::ChatLog, n)
        } else if let Some(n) = self.match_any(0, &[&["text", "files"], &["text", "file"]]) {
            (FileKind::PlainText, n)
        } else {
            match self.keyword(0) {
                Some("pdf" | "pdfs") => (FileKind::Pdf, 1),
                Some("image" | "images" | "photo" | "photos" | "picture" | "pictures" | "scans") => {
                    (FileKind::Image, 1)
                }
                Some("chat" | "chats" | "conversation" | "conversations" | "transcript" | "transcripts") => {
                    (FileKind::ChatLog, 1)
                }
                _ => return false,
            }
        };
        match self.plan.kind {
            Some(existing) if existing != kind => self
                .plan
                .warnings
                .push(format!("more than one file kind named; using {}", existing)),
            _ => self.plan.kind = Some(kind),
        }
        self.pos += n;
        true
    }

    fn parse_entity_type(&mut self) -> bool {
        if let Some(noun) = self.keyword(0).filter(|w| GENERIC_NOUNS.contains(w)) {
            if DOCUMENT_NOUNS.contains(&noun) {
                self.plan.per_document = true;
            }
            self.pos += 1;
            return true;
        }
        let Some((entity_type, n)) = self.resolve_type(0) else {
            return false;
        };
        match &self.plan.entity_type {
            Some(existing) if *existing != entity_type => self.plan.warnings.push(format!(
                "more than one entity type named; using {}",
                existing
            )),
            _ => self.plan.entity_type = Some(entity_type),
        }
        self.pos += n;
        true
    }

    fn parse_projection(&mut self) -> bool {
        let Some((field, n)) = self.resolve_field(0) else {
            return false;
        };
        if !self.plan.fields.contains(&field) {
            self.plan.fields.push(field);
        }
        self.pos += n;
        true
    }

    fn leftover(&mut self) -> Result<(), TranslationFailure> {
        let Some(token) = self.token(0).cloned() else {
            return Ok(());
        };
        self.pos += 1;
        if token.quoted {
            self.plan
                .warnings
                .push(format!("ignored quoted text \"{}\"", token.raw));
            return Ok(());
        }
        if FILLER.contains(&token.word.as_str()) || !token.word.chars().any(char::is_alphanumeric) {
            return Ok(());
        }
        if looks_like_field_name(&token.word) {
            return Err(TranslationFailure::UnresolvedField { term: token.raw });
        }

        let previous = self
            .pos
            .checked_sub(2)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.word.as_str());
        let singular = singularize(&token.word);
        if self.plan.entity_type.is_none()
            && previous.is_some_and(|p| TYPE_LEADERS.contains(&p))
            && singular != token.word
            && token.word.chars().all(char::is_alphabetic)
        {
            self.plan
                .warnings
                .push(format!("no entities of type '{}' are known", singular));
            self.plan.entity_type = Some(singular);
            return Ok(());
        }

        self.plan
            .warnings
            .push(format!("ignored '{}'", token.raw));
        Ok(())
    }
}

/// `warranty_code`, `po_number`: lowercase words joined by underscores.
fn looks_like_field_name(word: &str) -> bool {
    word.contains('_')
        && word.chars().any(|c| c.is_ascii_alphabetic())
        && word.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_value(
    field: &str,
    field_type: Option<FieldType>,
    op: Operator,
    value: &str,
) -> Result<(), TranslationFailure> {
    let invalid = |expected: &str| TranslationFailure::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    };
    if op == Operator::Contains {
        return Ok(());
    }
    match field_type {
        Some(FieldType::Integer | FieldType::Real) => {
            parse_number(value).map(|_| ()).ok_or_else(|| invalid("number"))
        }
        Some(FieldType::Timestamp) => parse_instant(value).map(|_| ()).ok_or_else(|| invalid("date")),
        Some(FieldType::Boolean) if matches!(op, Operator::Eq | Operator::Ne) => {
            parse_bool(value).map(|_| ()).ok_or_else(|| invalid("boolean"))
        }
        _ => Ok(()),
    }
}

/// Timestamp or bare year (taken as January 1st).
pub(super) fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    parse_timestamp(value).or_else(|| parse_year(value).and_then(|y| year_window(y).map(|w| w.0)))
}

fn parse_year(word: &str) -> Option<i32> {
    if word.len() != 4 || !word.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    word.parse().ok().filter(|y| (1900..=2199).contains(y))
}

fn parse_year_month(word: &str) -> Option<(i32, u32)> {
    let (year, month) = word.split_once(['-', '/'])?;
    if month.len() > 2 {
        return None;
    }
    let month: u32 = month.parse().ok().filter(|m| (1..=12).contains(m))?;
    Some((parse_year(year)?, month))
}

fn month_number(word: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|names| names.contains(&word))
        .map(|i| i as u32 + 1)
}

fn year_window(year: i32) -> Option<Window> {
    Some((
        Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?,
        Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single()?,
    ))
}

fn month_window(year: i32, month: u32) -> Option<Window> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    Some((
        Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?,
        Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0).single()?,
    ))
}

fn day_window(ts: DateTime<Utc>) -> Window {
    let start = ts
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|n| Utc.from_utc_datetime(&n))
        .unwrap_or(ts);
    (start, start + Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaField;
    use std::collections::BTreeSet;

    fn snapshot(fields: &[(&str, FieldType)]) -> SchemaSnapshot {
        let mut snapshot = SchemaSnapshot {
            version: 7,
            ..Default::default()
        };
        for (name, field_type) in fields {
            snapshot.fields.insert(
                name.to_string(),
                SchemaField {
                    name: name.to_string(),
                    field_type: *field_type,
                    nullable: false,
                    conflicted: false,
                    contributing_kinds: BTreeSet::from([FileKind::PlainText]),
                    introduced_in: 1,
                    updated_in: 1,
                },
            );
        }
        snapshot
    }

    fn business() -> SchemaSnapshot {
        snapshot(&[
            ("invoice_number", FieldType::Reference),
            ("customer_id", FieldType::Reference),
            ("total", FieldType::Real),
            ("amount", FieldType::Real),
            ("date", FieldType::Timestamp),
            ("due_date", FieldType::Timestamp),
            ("status", FieldType::Text),
            ("paid", FieldType::Boolean),
        ])
    }

    fn types() -> Vec<String> {
        ["invoice", "receipt", "customer", "purchase_order"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn ymd(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn empty_text_fails() {
        assert_eq!(
            translate("   ", &business(), &types()),
            Err(TranslationFailure::Empty)
        );
    }

    #[test]
    fn list_by_type() {
        let plan = translate("list all invoices", &business(), &types()).unwrap();
        assert_eq!(plan.entity_type.as_deref(), Some("invoice"));
        assert!(!plan.per_document);
        assert!(plan.predicates.is_empty());
        assert_eq!(plan.schema_version, 7);

        let plan = translate("show purchase orders", &business(), &types()).unwrap();
        assert_eq!(plan.entity_type.as_deref(), Some("purchase_order"));
    }

    #[test]
    fn documents_from_a_year_cover_every_timestamp_field() {
        let plan = translate("list all documents from 2023", &business(), &types()).unwrap();
        assert_eq!(plan.entity_type, None);
        assert!(plan.per_document);
        assert_eq!(plan.date_ranges.len(), 1);
        let range = &plan.date_ranges[0];
        assert_eq!(range.fields, vec!["date".to_string(), "due_date".to_string()]);
        assert_eq!(range.start, Some(ymd(2023, 1, 1)));
        assert_eq!(range.end, Some(ymd(2024, 1, 1)));
    }

    #[test]
    fn unknown_field_after_with_is_named() {
        let err = translate(
            "show me all invoices with a warranty_code",
            &business(),
            &types(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            TranslationFailure::UnresolvedField {
                term: "warranty_code".into()
            }
        );
    }

    #[test]
    fn stray_snake_case_terms_fail() {
        let err = translate("invoices warranty_code", &business(), &types()).unwrap_err();
        assert!(matches!(err, TranslationFailure::UnresolvedField { term } if term == "warranty_code"));
    }

    #[test]
    fn filters_by_field() {
        let plan = translate(
            "invoices where customer_id is C-42 and total over 100",
            &business(),
            &types(),
        )
        .unwrap();
        assert_eq!(
            plan.predicates,
            vec![
                Predicate {
                    field: "customer_id".into(),
                    op: Operator::Eq,
                    value: Some("C-42".into())
                },
                Predicate {
                    field: "total".into(),
                    op: Operator::Gt,
                    value: Some("100".into())
                },
            ]
        );
    }

    #[test]
    fn spaced_and_plural_field_mentions_resolve() {
        let plan = translate("invoices with customer id C-1", &business(), &types()).unwrap();
        assert_eq!(
            plan.predicates,
            vec![Predicate {
                field: "customer_id".into(),
                op: Operator::Eq,
                value: Some("C-1".into())
            }]
        );
        assert!(plan.warnings.is_empty(), "{:?}", plan.warnings);

        let plan = translate("invoices with totals at least 5", &business(), &types()).unwrap();
        assert_eq!(plan.predicates[0].field, "total");
        assert_eq!(plan.predicates[0].op, Operator::Gte);
    }

    #[test]
    fn presence_and_absence() {
        let plan = translate("invoices with a due date", &business(), &types()).unwrap();
        assert_eq!(plan.predicates[0].op, Operator::Exists);
        let plan = translate("invoices with no due_date", &business(), &types()).unwrap();
        assert_eq!(plan.predicates[0].op, Operator::Missing);
    }

    #[test]
    fn value_after_a_field_is_an_equality_test() {
        let plan = translate("invoices with total 20 from 2023", &business(), &types()).unwrap();
        assert_eq!(plan.predicates[0].op, Operator::Eq);
        assert_eq!(plan.predicates[0].value.as_deref(), Some("20"));
        assert_eq!(plan.date_ranges.len(), 1);

        let plan = translate("invoices with status \"on hold\"", &business(), &types()).unwrap();
        assert_eq!(plan.predicates[0].value.as_deref(), Some("on hold"));

        let plan =
            translate("invoices with a total and with a due date", &business(), &types()).unwrap();
        assert!(plan.predicates.iter().all(|p| p.op == Operator::Exists));
        assert_eq!(plan.predicates.len(), 2);

        let err = translate("invoices with total lots", &business(), &types()).unwrap_err();
        assert!(matches!(err, TranslationFailure::InvalidValue { field, .. } if field == "total"));
    }

    #[test]
    fn invalid_numeric_value_fails() {
        let err = translate("invoices where total is lots", &business(), &types()).unwrap_err();
        assert!(matches!(err, TranslationFailure::InvalidValue { field, .. } if field == "total"));
        let err = translate("invoices where total is", &business(), &types()).unwrap_err();
        assert_eq!(err, TranslationFailure::MissingValue { field: "total".into() });
    }

    #[test]
    fn date_ranges_in_several_shapes() {
        let plan = translate(
            "receipts between 2023-01-01 and 2023-06-30",
            &business(),
            &types(),
        )
        .unwrap();
        assert_eq!(plan.date_ranges[0].start, Some(ymd(2023, 1, 1)));
        assert_eq!(plan.date_ranges[0].end, Some(ymd(2023, 7, 1)));

        let plan = translate("invoices after March 2023", &business(), &types()).unwrap();
        assert_eq!(plan.date_ranges[0].start, Some(ymd(2023, 4, 1)));
        assert_eq!(plan.date_ranges[0].end, None);

        let plan = translate("invoices before 2023-03-15", &business(), &types()).unwrap();
        assert_eq!(plan.date_ranges[0].end, Some(ymd(2023, 3, 15)));

        let plan = translate("invoices with due_date in 2024", &business(), &types()).unwrap();
        assert_eq!(plan.date_ranges[0].fields, vec!["due_date".to_string()]);
        assert!(plan.predicates.is_empty());
    }

    #[test]
    fn date_range_without_timestamp_fields_fails() {
        let plain = snapshot(&[("total", FieldType::Real)]);
        assert_eq!(
            translate("documents from 2023", &plain, &types()),
            Err(TranslationFailure::NoTimestampFields)
        );
    }

    #[test]
    fn date_keyword_on_a_non_timestamp_field_fails() {
        let err = translate("invoices where total after 2023", &business(), &types()).unwrap_err();
        assert_eq!(err, TranslationFailure::NotTimestampField { field: "total".into() });
    }

    #[test]
    fn aggregates() {
        let plan = translate("count documents by kind", &business(), &types()).unwrap();
        assert_eq!(
            plan.aggregate,
            Some(Aggregate {
                function: AggregateFn::Count,
                field: None,
                group_by: Some(GroupBy::Kind)
            })
        );

        let plan = translate("how many invoices", &business(), &types()).unwrap();
        assert_eq!(plan.aggregate.unwrap().function, AggregateFn::Count);
        assert_eq!(plan.entity_type.as_deref(), Some("invoice"));

        let plan = translate("total amount by customer_id", &business(), &types()).unwrap();
        assert_eq!(
            plan.aggregate,
            Some(Aggregate {
                function: AggregateFn::Sum,
                field: Some("amount".into()),
                group_by: Some(GroupBy::Field("customer_id".into()))
            })
        );

        let plan = translate("average total of invoices", &business(), &types()).unwrap();
        let aggregate = plan.aggregate.unwrap();
        assert_eq!(aggregate.function, AggregateFn::Avg);
        assert_eq!(aggregate.field.as_deref(), Some("total"));
    }

    #[test]
    fn total_as_a_field_is_not_a_sum() {
        let plan = translate("invoices total over 100", &business(), &types()).unwrap();
        assert!(plan.aggregate.is_none());
        assert_eq!(plan.predicates[0].field, "total");
    }

    #[test]
    fn aggregating_text_fails() {
        let err = translate("sum of status", &business(), &types()).unwrap_err();
        assert!(matches!(err, TranslationFailure::NotAggregatable { .. }));
        let err = translate("average bananas", &business(), &types()).unwrap_err();
        assert_eq!(err, TranslationFailure::UnresolvedField { term: "bananas".into() });
    }

    #[test]
    fn unknown_group_target_fails() {
        let err = translate("count invoices by region", &business(), &types()).unwrap_err();
        assert_eq!(err, TranslationFailure::UnresolvedField { term: "region".into() });
    }

    #[test]
    fn joins_and_limits() {
        let plan = translate("top 5 invoices related to receipts", &business(), &types()).unwrap();
        assert_eq!(plan.limit, Some(5));
        assert_eq!(plan.joins, vec![Join { entity_type: "receipt".into() }]);
        assert_eq!(plan.entity_type.as_deref(), Some("invoice"));
    }

    #[test]
    fn kinds_and_projection() {
        let plan = translate("show invoice_number and total for pdfs", &business(), &types()).unwrap();
        assert_eq!(plan.kind, Some(FileKind::Pdf));
        assert_eq!(plan.fields, vec!["invoice_number".to_string(), "total".to_string()]);
    }

    #[test]
    fn unknown_requested_type_is_kept_with_a_warning() {
        let plan = translate("list all widgets", &business(), &types()).unwrap();
        assert_eq!(plan.entity_type.as_deref(), Some("widget"));
        assert!(plan.warnings.iter().any(|w| w.contains("widget")));
    }

    #[test]
    fn quoted_values_keep_spaces_and_case() {
        let plan = translate("invoices where status is \"Past Due\"", &business(), &types()).unwrap();
        assert_eq!(plan.predicates[0].value.as_deref(), Some("Past Due"));
    }
}
