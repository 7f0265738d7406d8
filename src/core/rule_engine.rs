//! Rule engine
//!
//! Criteria are compiled once into a typed form and then evaluated two ways:
//! - pushed down into SQLite as a single conjunctive `WHERE` over `catalog_items`
//! - in-process against an [`ItemProjection`] built from a stored item or from
//!   request metadata
//!
//! Both surfaces consume the same [`CompiledCriterion`], so for any item the
//! pushdown query returns it iff the in-process predicate accepts it.

use crate::core::clock::Clock;
use crate::core::content_type::content_type_of;
use crate::core::error::{CuratorError, Result};
use crate::db::models::{CatalogItem, Rule};
use crate::db::repository::{
    CatalogItemRepository, LibraryRepository, Repository, RuleRepository,
};
use rusqlite::types::ToSqlOutput;
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound on items returned by a preview
pub const MAX_PREVIEW_LIMIT: usize = 500;

const NUMERIC_GUARD: &str = "IN ('integer','real')";

const CONTENT_TYPE_SQL: &str = "(CASE WHEN json_type(ci.metadata, '$.contentAnalysis.contentType') = 'text' \
     THEN json_extract(ci.metadata, '$.contentAnalysis.contentType') END)";

/// One `{field, operator, value}` triple as stored on a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub field: String,
    pub operator: String,
    pub value: Value,
}

impl Criterion {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator: operator.as_str().to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Contains,
    Equals,
    GreaterThan,
    IsOneOf,
    Between,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Contains => "contains",
            Operator::Equals => "equals",
            Operator::GreaterThan => "greater_than",
            Operator::IsOneOf => "is_one_of",
            Operator::Between => "between",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = CuratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "contains" => Ok(Operator::Contains),
            "equals" => Ok(Operator::Equals),
            "greater_than" | "greaterThan" => Ok(Operator::GreaterThan),
            "is_one_of" | "isOneOf" => Ok(Operator::IsOneOf),
            "between" => Ok(Operator::Between),
            other => Err(CuratorError::ValidationError(format!(
                "Unknown operator '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    TextList,
}

/// Fields a criterion may address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleField {
    Title,
    Year,
    MediaType,
    Studio,
    ContentRating,
    Genres,
    Tags,
    Collections,
    ContentType,
    ImdbId,
    TmdbId,
    TvdbId,
}

impl RuleField {
    pub fn kind(&self) -> FieldKind {
        match self {
            RuleField::Year => FieldKind::Number,
            RuleField::Genres | RuleField::Tags | RuleField::Collections => FieldKind::TextList,
            _ => FieldKind::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleField::Title => "title",
            RuleField::Year => "year",
            RuleField::MediaType => "media_type",
            RuleField::Studio => "studio",
            RuleField::ContentRating => "content_rating",
            RuleField::Genres => "genres",
            RuleField::Tags => "tags",
            RuleField::Collections => "collections",
            RuleField::ContentType => "content_type",
            RuleField::ImdbId => "imdb_id",
            RuleField::TmdbId => "tmdb_id",
            RuleField::TvdbId => "tvdb_id",
        }
    }

    /// SQL expression over the `ci` alias of `catalog_items`
    fn sql_expr(&self) -> &'static str {
        match self {
            RuleField::Title => "ci.title",
            RuleField::Year => "ci.year",
            RuleField::MediaType => "ci.media_type",
            RuleField::Studio => "ci.studio",
            RuleField::ContentRating => "ci.content_rating",
            RuleField::Genres => "ci.genres",
            RuleField::Tags => "ci.tags",
            RuleField::Collections => "ci.collections",
            RuleField::ContentType => CONTENT_TYPE_SQL,
            RuleField::ImdbId => "ci.imdb_id",
            RuleField::TmdbId => "ci.tmdb_id",
            RuleField::TvdbId => "ci.tvdb_id",
        }
    }
}

impl FromStr for RuleField {
    type Err = CuratorError;

    fn from_str(s: &str) -> Result<Self> {
        let field = match s {
            "title" => RuleField::Title,
            "year" => RuleField::Year,
            "media_type" | "mediaType" => RuleField::MediaType,
            "studio" => RuleField::Studio,
            "content_rating" | "contentRating" | "rating" => RuleField::ContentRating,
            "genres" | "genre" => RuleField::Genres,
            "tags" | "tag" => RuleField::Tags,
            "collections" | "collection" => RuleField::Collections,
            "content_type" | "contentType" => RuleField::ContentType,
            "imdb_id" | "imdbId" => RuleField::ImdbId,
            "tmdb_id" | "tmdbId" => RuleField::TmdbId,
            "tvdb_id" | "tvdbId" => RuleField::TvdbId,
            other => {
                return Err(CuratorError::ValidationError(format!(
                    "Unknown field '{}'",
                    other
                )))
            }
        };
        Ok(field)
    }
}

/// Number as bound into SQL: integers stay integers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Int(i64),
    Real(f64),
}

impl Numeric {
    pub fn as_f64(&self) -> f64 {
        match self {
            Numeric::Int(i) => *i as f64,
            Numeric::Real(f) => *f,
        }
    }

    fn compare(&self, other: &Numeric) -> Option<Ordering> {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => Some(a.cmp(b)),
            _ => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }

    fn from_json(value: &Value) -> Option<Numeric> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Numeric::Int)
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(Numeric::Real)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>().map(Numeric::Int).ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(Numeric::Real)
                })
            }
            _ => None,
        }
    }

    fn to_param(self) -> SqlParam {
        match self {
            Numeric::Int(i) => SqlParam::Integer(i),
            Numeric::Real(f) => SqlParam::Real(f),
        }
    }
}

/// Comparison operand, already coerced to the field's kind
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Text(String),
    Number(Numeric),
}

impl Operand {
    fn to_param(&self) -> SqlParam {
        match self {
            Operand::Text(s) => SqlParam::Text(s.clone()),
            Operand::Number(n) => n.to_param(),
        }
    }
}

/// Positional SQL parameter produced by pushdown compilation
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Real(f64),
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParam::Text(s) => ToSqlOutput::from(s.as_str()),
            SqlParam::Integer(i) => ToSqlOutput::from(*i),
            SqlParam::Real(f) => ToSqlOutput::from(*f),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompiledOp {
    /// Any needle is an ASCII case-insensitive substring
    Contains(Vec<String>),
    Equals(Operand),
    GreaterThan(Numeric),
    IsOneOf(Vec<Operand>),
    /// Inclusive range; at least one bound is set
    Between {
        min: Option<Numeric>,
        max: Option<Numeric>,
    },
}

/// A validated criterion shared by the SQL and in-process evaluators
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCriterion {
    pub field: RuleField,
    pub op: CompiledOp,
}

fn invalid(field: RuleField, op: Operator, detail: &str) -> CuratorError {
    CuratorError::ValidationError(format!(
        "Invalid value for {} {}: {}",
        field.as_str(),
        op,
        detail
    ))
}

fn coerce_operand(field: RuleField, op: Operator, value: &Value) -> Result<Operand> {
    match field.kind() {
        FieldKind::Number => Numeric::from_json(value)
            .map(Operand::Number)
            .ok_or_else(|| invalid(field, op, "expected a number")),
        FieldKind::Text | FieldKind::TextList => match value {
            Value::String(s) => Ok(Operand::Text(s.clone())),
            Value::Number(n) => Ok(Operand::Text(n.to_string())),
            _ => Err(invalid(field, op, "expected a string")),
        },
    }
}

impl CompiledCriterion {
    pub fn compile(criterion: &Criterion) -> Result<Self> {
        let field: RuleField = criterion.field.parse()?;
        let op: Operator = criterion.operator.parse()?;
        let value = &criterion.value;

        let compiled = match op {
            Operator::Contains => {
                if field.kind() == FieldKind::Number {
                    return Err(invalid(field, op, "contains requires a text field"));
                }
                let needles = match value {
                    Value::String(s) => vec![s.clone()],
                    Value::Array(items) if !items.is_empty() => items
                        .iter()
                        .map(|v| {
                            v.as_str()
                                .map(str::to_string)
                                .ok_or_else(|| invalid(field, op, "expected strings"))
                        })
                        .collect::<Result<Vec<_>>>()?,
                    _ => return Err(invalid(field, op, "expected a string or list of strings")),
                };
                CompiledOp::Contains(needles)
            }
            Operator::Equals => CompiledOp::Equals(coerce_operand(field, op, value)?),
            Operator::GreaterThan => {
                if field.kind() != FieldKind::Number {
                    return Err(invalid(field, op, "greater_than requires a numeric field"));
                }
                match coerce_operand(field, op, value)? {
                    Operand::Number(n) => CompiledOp::GreaterThan(n),
                    Operand::Text(_) => return Err(invalid(field, op, "expected a number")),
                }
            }
            Operator::IsOneOf => {
                let values = match value {
                    Value::Array(items) if items.is_empty() => {
                        return Err(invalid(field, op, "list must not be empty"))
                    }
                    Value::Array(items) => items
                        .iter()
                        .map(|v| coerce_operand(field, op, v))
                        .collect::<Result<Vec<_>>>()?,
                    scalar => vec![coerce_operand(field, op, scalar)?],
                };
                CompiledOp::IsOneOf(values)
            }
            Operator::Between => {
                if field.kind() != FieldKind::Number {
                    return Err(invalid(field, op, "between requires a numeric field"));
                }
                let obj = value
                    .as_object()
                    .ok_or_else(|| invalid(field, op, "expected {min, max}"))?;
                let bound = |key: &str| -> Result<Option<Numeric>> {
                    match obj.get(key) {
                        None | Some(Value::Null) => Ok(None),
                        Some(v) => Numeric::from_json(v)
                            .map(Some)
                            .ok_or_else(|| invalid(field, op, "bounds must be numbers")),
                    }
                };
                let (min, max) = (bound("min")?, bound("max")?);
                if min.is_none() && max.is_none() {
                    return Err(invalid(field, op, "at least one bound is required"));
                }
                CompiledOp::Between { min, max }
            }
        };

        Ok(Self { field, op: compiled })
    }

    /// In-process predicate
    pub fn matches(&self, item: &ItemProjection) -> bool {
        match item.value(self.field) {
            FieldValue::Text(None) | FieldValue::Number(None) => false,
            FieldValue::Text(Some(text)) => match &self.op {
                CompiledOp::Contains(needles) => needles.iter().any(|n| contains_ci(text, n)),
                CompiledOp::Equals(Operand::Text(t)) => text == t,
                CompiledOp::IsOneOf(set) => set
                    .iter()
                    .any(|o| matches!(o, Operand::Text(t) if t == text)),
                _ => false,
            },
            FieldValue::List(values) => match &self.op {
                CompiledOp::Contains(needles) => values
                    .iter()
                    .any(|v| needles.iter().any(|n| contains_ci(v, n))),
                CompiledOp::Equals(Operand::Text(t)) => values.iter().any(|v| v == t),
                CompiledOp::IsOneOf(set) => values
                    .iter()
                    .any(|v| set.iter().any(|o| matches!(o, Operand::Text(t) if t == v))),
                _ => false,
            },
            FieldValue::Number(Some(n)) => match &self.op {
                CompiledOp::Equals(Operand::Number(b)) => n.compare(b) == Some(Ordering::Equal),
                CompiledOp::GreaterThan(b) => n.compare(b) == Some(Ordering::Greater),
                CompiledOp::IsOneOf(set) => set.iter().any(
                    |o| matches!(o, Operand::Number(b) if n.compare(b) == Some(Ordering::Equal)),
                ),
                CompiledOp::Between { min, max } => {
                    let above = min.map_or(true, |m| {
                        matches!(n.compare(&m), Some(Ordering::Greater | Ordering::Equal))
                    });
                    let below = max.map_or(true, |m| {
                        matches!(n.compare(&m), Some(Ordering::Less | Ordering::Equal))
                    });
                    above && below
                }
                _ => false,
            },
        }
    }

    /// Append this criterion's SQL predicate; placeholders continue after `?1`
    fn push_sql(&self, params: &mut Vec<SqlParam>) -> String {
        let expr = self.field.sql_expr();
        let kind = self.field.kind();

        match (&self.op, kind) {
            (CompiledOp::Contains(needles), FieldKind::TextList) => {
                let likes = needles
                    .iter()
                    .map(|n| {
                        let p = bind(params, SqlParam::Text(like_pattern(n)));
                        format!("je.value LIKE {} ESCAPE '\\'", p)
                    })
                    .collect::<Vec<_>>()
                    .join(" OR ");
                list_exists(expr, &format!("({})", likes))
            }
            (CompiledOp::Contains(needles), _) => {
                let likes = needles
                    .iter()
                    .map(|n| {
                        let p = bind(params, SqlParam::Text(like_pattern(n)));
                        format!("{} LIKE {} ESCAPE '\\'", expr, p)
                    })
                    .collect::<Vec<_>>()
                    .join(" OR ");
                format!("({})", likes)
            }
            (CompiledOp::Equals(operand), FieldKind::TextList) => {
                let p = bind(params, operand.to_param());
                list_exists(expr, &format!("je.value = {}", p))
            }
            (CompiledOp::Equals(operand), FieldKind::Number) => {
                let p = bind(params, operand.to_param());
                format!("(typeof({e}) {g} AND {e} = {p})", e = expr, g = NUMERIC_GUARD, p = p)
            }
            (CompiledOp::Equals(operand), FieldKind::Text) => {
                let p = bind(params, operand.to_param());
                format!("{} = {}", expr, p)
            }
            (CompiledOp::GreaterThan(n), _) => {
                let p = bind(params, n.to_param());
                format!("(typeof({e}) {g} AND {e} > {p})", e = expr, g = NUMERIC_GUARD, p = p)
            }
            (CompiledOp::IsOneOf(set), _) => {
                let placeholders = set
                    .iter()
                    .map(|o| bind(params, o.to_param()))
                    .collect::<Vec<_>>()
                    .join(", ");
                match kind {
                    FieldKind::TextList => {
                        list_exists(expr, &format!("je.value IN ({})", placeholders))
                    }
                    FieldKind::Number => format!(
                        "(typeof({e}) {g} AND {e} IN ({p}))",
                        e = expr,
                        g = NUMERIC_GUARD,
                        p = placeholders
                    ),
                    FieldKind::Text => format!("{} IN ({})", expr, placeholders),
                }
            }
            (CompiledOp::Between { min, max }, _) => {
                let mut parts = vec![format!("typeof({}) {}", expr, NUMERIC_GUARD)];
                if let Some(m) = min {
                    parts.push(format!("{} >= {}", expr, bind(params, m.to_param())));
                }
                if let Some(m) = max {
                    parts.push(format!("{} <= {}", expr, bind(params, m.to_param())));
                }
                format!("({})", parts.join(" AND "))
            }
        }
    }
}

fn bind(params: &mut Vec<SqlParam>, param: SqlParam) -> String {
    params.push(param);
    // ?1 is reserved for the library id
    format!("?{}", params.len() + 1)
}

fn list_exists(expr: &str, predicate: &str) -> String {
    format!(
        "EXISTS (SELECT 1 FROM json_each({}) je WHERE je.type = 'text' AND {})",
        expr, predicate
    )
}

/// `%needle%` with LIKE metacharacters escaped by backslash
pub fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Same folding SQLite's LIKE applies: ASCII letters only
fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}

/// Compile a list of criteria; the error names the offending position
pub fn compile_criteria(criteria: &[Criterion]) -> Result<Vec<CompiledCriterion>> {
    criteria
        .iter()
        .enumerate()
        .map(|(i, c)| {
            CompiledCriterion::compile(c).map_err(|e| match e {
                CuratorError::ValidationError(msg) => {
                    CuratorError::ValidationError(format!("criteria[{}]: {}", i, msg))
                }
                other => other,
            })
        })
        .collect()
}

/// Conjunctive filter over `catalog_items ci`, scoped by `ci.library_id = ?1`
#[derive(Debug, Clone, PartialEq)]
pub struct PushdownQuery {
    pub filter: String,
    /// Parameters for `?2`, `?3`, ...
    pub params: Vec<SqlParam>,
}

impl PushdownQuery {
    pub fn build(compiled: &[CompiledCriterion]) -> Self {
        let mut params = Vec::new();
        let mut clauses = vec!["ci.library_id = ?1".to_string()];
        for c in compiled {
            clauses.push(c.push_sql(&mut params));
        }
        Self {
            filter: clauses.join(" AND "),
            params,
        }
    }

    /// All positional parameters, library id first
    pub fn bind(&self, library_id: &str) -> Vec<SqlParam> {
        std::iter::once(SqlParam::Text(library_id.to_string()))
            .chain(self.params.iter().cloned())
            .collect()
    }
}

/// Typed view of an item used by in-process evaluation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemProjection {
    pub title: Option<String>,
    pub year: Option<Numeric>,
    pub media_type: Option<String>,
    pub studio: Option<String>,
    pub content_rating: Option<String>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub collections: Vec<String>,
    pub content_type: Option<String>,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub tvdb_id: Option<String>,
}

enum FieldValue<'a> {
    Text(Option<&'a str>),
    Number(Option<Numeric>),
    List(&'a [String]),
}

impl ItemProjection {
    pub fn from_item(item: &CatalogItem) -> Self {
        Self {
            title: Some(item.title.clone()),
            year: item.year.map(Numeric::Int),
            media_type: Some(item.media_type.clone()),
            studio: item.studio.clone(),
            content_rating: item.content_rating.clone(),
            genres: item.genres.clone(),
            tags: item.tags.clone(),
            collections: item.collections.clone(),
            content_type: content_type_of(&item.metadata).map(str::to_string),
            imdb_id: item.imdb_id.clone(),
            tmdb_id: item.tmdb_id.clone(),
            tvdb_id: item.tvdb_id.clone(),
        }
    }

    /// Build from request metadata (camelCase or snake_case keys).
    /// A value of the wrong type at a known key is a validation error.
    pub fn from_metadata(metadata: &Value) -> Result<Self> {
        let obj = metadata.as_object().ok_or_else(|| {
            CuratorError::ValidationError("metadata must be a JSON object".to_string())
        })?;
        let lookup = |camel: &str, snake: &str| obj.get(camel).or_else(|| obj.get(snake));

        let content_type = match metadata
            .pointer("/contentAnalysis/contentType")
            .or_else(|| metadata.pointer("/content_analysis/content_type"))
        {
            Some(v) => meta_text(v, "contentAnalysis.contentType", false)?,
            None => None,
        };

        Ok(Self {
            title: opt_text(lookup("title", "title"), "title", false)?,
            year: match lookup("year", "year") {
                None | Some(Value::Null) => None,
                Some(v) => Some(Numeric::from_json(v).ok_or_else(|| {
                    CuratorError::ValidationError("year must be a number".to_string())
                })?),
            },
            media_type: opt_text(lookup("mediaType", "media_type"), "mediaType", false)?,
            studio: opt_text(lookup("studio", "studio"), "studio", false)?,
            content_rating: opt_text(
                lookup("contentRating", "content_rating"),
                "contentRating",
                false,
            )?,
            genres: text_list(lookup("genres", "genres"), "genres")?,
            tags: text_list(lookup("tags", "tags"), "tags")?,
            collections: text_list(lookup("collections", "collections"), "collections")?,
            content_type,
            imdb_id: opt_text(lookup("imdbId", "imdb_id"), "imdbId", true)?,
            tmdb_id: opt_text(lookup("tmdbId", "tmdb_id"), "tmdbId", true)?,
            tvdb_id: opt_text(lookup("tvdbId", "tvdb_id"), "tvdbId", true)?,
        })
    }

    fn value(&self, field: RuleField) -> FieldValue<'_> {
        match field {
            RuleField::Title => FieldValue::Text(self.title.as_deref()),
            RuleField::Year => FieldValue::Number(self.year),
            RuleField::MediaType => FieldValue::Text(self.media_type.as_deref()),
            RuleField::Studio => FieldValue::Text(self.studio.as_deref()),
            RuleField::ContentRating => FieldValue::Text(self.content_rating.as_deref()),
            RuleField::Genres => FieldValue::List(&self.genres),
            RuleField::Tags => FieldValue::List(&self.tags),
            RuleField::Collections => FieldValue::List(&self.collections),
            RuleField::ContentType => FieldValue::Text(self.content_type.as_deref()),
            RuleField::ImdbId => FieldValue::Text(self.imdb_id.as_deref()),
            RuleField::TmdbId => FieldValue::Text(self.tmdb_id.as_deref()),
            RuleField::TvdbId => FieldValue::Text(self.tvdb_id.as_deref()),
        }
    }
}

fn meta_text(value: &Value, key: &str, allow_number: bool) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) if allow_number => Ok(Some(n.to_string())),
        _ => Err(CuratorError::ValidationError(format!(
            "{} must be a string",
            key
        ))),
    }
}

fn opt_text(value: Option<&Value>, key: &str, allow_number: bool) -> Result<Option<String>> {
    value.map_or(Ok(None), |v| meta_text(v, key, allow_number))
}

fn text_list(value: Option<&Value>, key: &str) -> Result<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    CuratorError::ValidationError(format!("{} must contain only strings", key))
                })
            })
            .collect(),
        Some(_) => Err(CuratorError::ValidationError(format!(
            "{} must be a list of strings",
            key
        ))),
    }
}

/// Evaluate criteria in-process; compilation errors are logged and yield false
pub fn evaluate_criteria(criteria: &[Criterion], item: &ItemProjection) -> bool {
    match compile_criteria(criteria) {
        Ok(compiled) => compiled.iter().all(|c| c.matches(item)),
        Err(e) => {
            warn!(error = %e, "Criteria failed to compile; treating as non-match");
            false
        }
    }
}

/// Value side of a condition mapping entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    /// Any listed value matches
    Any(Vec<Value>),
    /// Inclusive range
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<Value>,
    },
    /// Exact value
    Scalar(Value),
}

/// Field -> condition mapping (AND across keys) used as a library's routing rule set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleConditions(pub BTreeMap<String, ConditionValue>);

impl RuleConditions {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Translate the mapping into equivalent criteria
    pub fn to_criteria(&self) -> Vec<Criterion> {
        self.0
            .iter()
            .map(|(field, cond)| match cond {
                ConditionValue::Any(values) => {
                    Criterion::new(field, Operator::IsOneOf, Value::Array(values.clone()))
                }
                ConditionValue::Range { min, max } => {
                    let mut bounds = serde_json::Map::new();
                    if let Some(min) = min {
                        bounds.insert("min".to_string(), min.clone());
                    }
                    if let Some(max) = max {
                        bounds.insert("max".to_string(), max.clone());
                    }
                    Criterion::new(field, Operator::Between, Value::Object(bounds))
                }
                ConditionValue::Scalar(v) => Criterion::new(field, Operator::Equals, v.clone()),
            })
            .collect()
    }

    /// Validate by compiling
    pub fn validate(&self) -> Result<()> {
        compile_criteria(&self.to_criteria()).map(|_| ())
    }
}

/// Evaluate a condition mapping against request metadata. Never fails:
/// invalid metadata or conditions are logged and count as non-match.
pub fn evaluate_conditions(conditions: &RuleConditions, metadata: &Value) -> bool {
    if conditions.is_empty() {
        return false;
    }
    let projection = match ItemProjection::from_metadata(metadata) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Request metadata rejected; treating as non-match");
            return false;
        }
    };
    evaluate_criteria(&conditions.to_criteria(), &projection)
}

/// Result of a pushdown preview
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePreview {
    pub total: i64,
    pub items: Vec<CatalogItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Rule,
    RuleSet,
}

/// Outcome of request-time classification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub library_id: String,
    pub rule_id: Option<String>,
    pub matched_by: MatchSource,
}

/// Input for rule creation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    pub library_id: String,
    pub name: String,
    pub criteria: Vec<Criterion>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub generated_by: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Rule persistence, preview and request-time classification
pub struct RuleEngine {
    rules: Arc<RuleRepository>,
    libraries: Arc<LibraryRepository>,
    items: Arc<CatalogItemRepository>,
    clock: Arc<dyn Clock>,
}

impl RuleEngine {
    pub fn new(
        rules: Arc<RuleRepository>,
        libraries: Arc<LibraryRepository>,
        items: Arc<CatalogItemRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rules,
            libraries,
            items,
            clock,
        }
    }

    /// Count and list the library's items matching the criteria via one SQL query
    pub async fn preview_rule(
        &self,
        library_id: &str,
        criteria: &[Criterion],
        limit: usize,
    ) -> Result<RulePreview> {
        let compiled = compile_criteria(criteria)?;
        let query = PushdownQuery::build(&compiled);
        debug!(library_id = %library_id, filter = %query.filter, "Rule preview");

        let (total, items) = self
            .items
            .query_matching(library_id, query, limit.min(MAX_PREVIEW_LIMIT))
            .await?;
        Ok(RulePreview { total, items })
    }

    pub async fn create_rule(&self, new_rule: NewRule) -> Result<Rule> {
        if new_rule.name.trim().is_empty() {
            return Err(CuratorError::ValidationError(
                "Rule name must not be empty".to_string(),
            ));
        }
        if new_rule.criteria.is_empty() {
            return Err(CuratorError::ValidationError(
                "A rule needs at least one criterion".to_string(),
            ));
        }
        compile_criteria(&new_rule.criteria)?;

        if self.libraries.find_by_id(&new_rule.library_id).await?.is_none() {
            return Err(CuratorError::NotFound(format!(
                "Library not found: {}",
                new_rule.library_id
            )));
        }

        let now = self.clock.now();
        let rule = Rule {
            id: Uuid::new_v4().to_string(),
            library_id: new_rule.library_id,
            name: new_rule.name,
            criteria: new_rule.criteria,
            priority: new_rule.priority,
            enabled: new_rule.enabled,
            generated_by: new_rule.generated_by,
            created_at: now,
            updated_at: now,
        };
        self.rules.create(&rule).await?;

        info!(rule_id = %rule.id, library_id = %rule.library_id, "Rule created");
        Ok(rule)
    }

    pub async fn get_rule(&self, id: &str) -> Result<Rule> {
        self.rules
            .find_by_id(id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("Rule not found: {}", id)))
    }

    pub async fn list_rules(&self, library_id: Option<&str>) -> Result<Vec<Rule>> {
        match library_id {
            Some(id) => self.rules.find_by_library(id).await,
            None => self.rules.find_all().await,
        }
    }

    pub async fn delete_rule(&self, id: &str) -> Result<()> {
        if !self.rules.delete(id).await? {
            return Err(CuratorError::NotFound(format!("Rule not found: {}", id)));
        }
        info!(rule_id = %id, "Rule deleted");
        Ok(())
    }

    /// Route request metadata to a library. Enabled rules are tried by
    /// priority (highest first, then oldest); library rule sets are the fallback.
    pub async fn classify(&self, metadata: &Value) -> Result<Option<Classification>> {
        let projection = match ItemProjection::from_metadata(metadata) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Request metadata rejected; no classification");
                return Ok(None);
            }
        };

        for rule in self.rules.find_enabled_by_priority().await? {
            let compiled = match compile_criteria(&rule.criteria) {
                Ok(c) => c,
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "Skipping rule with invalid criteria");
                    continue;
                }
            };
            if compiled.iter().all(|c| c.matches(&projection)) {
                debug!(rule_id = %rule.id, library_id = %rule.library_id, "Request matched rule");
                return Ok(Some(Classification {
                    library_id: rule.library_id,
                    rule_id: Some(rule.id),
                    matched_by: MatchSource::Rule,
                }));
            }
        }

        for library in self.libraries.find_all().await? {
            let Some(rule_set) = library.rule_set.as_ref() else {
                continue;
            };
            if library.enabled && evaluate_conditions(rule_set, metadata) {
                return Ok(Some(Classification {
                    library_id: library.id,
                    rule_id: None,
                    matched_by: MatchSource::RuleSet,
                }));
            }
        }

        Ok(None)
    }
}

/// Criteria equivalent of a JSON value list, used by callers that build rules
pub fn is_one_of(field: &str, values: &[String]) -> Criterion {
    Criterion::new(field, Operator::IsOneOf, json!(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;
    use crate::core::content_type::{build_metadata, ContentType};
    use crate::db::migrations::run_migrations;
    use crate::db::models::Library;
    use crate::db::DatabaseManager;
    use chrono::Utc;
    use proptest::prelude::*;
    use rusqlite::Connection;

    fn crit(field: &str, op: &str, value: Value) -> Criterion {
        Criterion {
            field: field.to_string(),
            operator: op.to_string(),
            value,
        }
    }

    fn item(external_id: &str, title: &str) -> CatalogItem {
        CatalogItem {
            server_id: "srv".to_string(),
            external_id: external_id.to_string(),
            library_id: "lib".to_string(),
            tmdb_id: None,
            imdb_id: None,
            tvdb_id: None,
            title: title.to_string(),
            year: None,
            media_type: "movie".to_string(),
            genres: vec![],
            tags: vec![],
            collections: vec![],
            studio: None,
            content_rating: None,
            metadata: build_metadata(json!({}), None),
            content_hash: external_id.to_string(),
            last_synced: Utc::now(),
        }
    }

    fn seeded_conn(items: &[CatalogItem]) -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        for i in items {
            CatalogItemRepository::upsert_with(&conn, i).unwrap();
        }
        conn
    }

    fn pushdown_ids(conn: &Connection, compiled: &[CompiledCriterion]) -> Vec<String> {
        let query = PushdownQuery::build(compiled);
        let (_, items) =
            CatalogItemRepository::query_matching_with(conn, "lib", &query, 10_000).unwrap();
        let mut ids: Vec<String> = items.into_iter().map(|i| i.external_id).collect();
        ids.sort();
        ids
    }

    fn in_process_ids(items: &[CatalogItem], compiled: &[CompiledCriterion]) -> Vec<String> {
        let mut ids: Vec<String> = items
            .iter()
            .filter(|i| {
                let p = ItemProjection::from_item(i);
                compiled.iter().all(|c| c.matches(&p))
            })
            .map(|i| i.external_id.clone())
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_title_contains_binds_like_pattern() {
        let items = vec![
            item("1", "The Matrix"),
            item("2", "Matrix Reloaded"),
            item("3", "Inception"),
        ];
        let compiled = compile_criteria(&[crit("title", "contains", json!("Matrix"))]).unwrap();
        let query = PushdownQuery::build(&compiled);

        assert_eq!(query.params, vec![SqlParam::Text("%Matrix%".to_string())]);

        let conn = seeded_conn(&items);
        assert_eq!(pushdown_ids(&conn, &compiled), vec!["1", "2"]);
        assert_eq!(in_process_ids(&items, &compiled), vec!["1", "2"]);
    }

    #[test]
    fn test_greater_than_coerces_string_to_integer() {
        let compiled =
            compile_criteria(&[crit("year", "greater_than", json!("2000"))]).unwrap();
        let query = PushdownQuery::build(&compiled);

        assert_eq!(query.params, vec![SqlParam::Integer(2000)]);
        assert!(query.filter.contains("ci.year > ?2"));
    }

    #[test]
    fn test_content_type_is_one_of() {
        let mut holiday = item("1", "Elf");
        holiday.metadata = build_metadata(json!({}), Some(ContentType::Holiday));
        let mut standup = item("2", "Killing Them Softly");
        standup.metadata = build_metadata(json!({}), Some(ContentType::Standup));
        let mut anime = item("3", "Akira");
        anime.metadata = build_metadata(json!({}), Some(ContentType::Anime));
        let mut numeric = item("4", "Odd");
        numeric.metadata = json!({"contentAnalysis": {"contentType": 7}});
        let items = vec![holiday, standup, anime, numeric, item("5", "Plain")];

        let compiled = compile_criteria(&[crit(
            "content_type",
            "is_one_of",
            json!(["holiday", "standup"]),
        )])
        .unwrap();

        let conn = seeded_conn(&items);
        assert_eq!(pushdown_ids(&conn, &compiled), vec!["1", "2"]);
        assert_eq!(in_process_ids(&items, &compiled), vec!["1", "2"]);
    }

    #[test]
    fn test_params_numbered_after_library_id() {
        let compiled = compile_criteria(&[
            crit("genres", "is_one_of", json!(["Action", "Drama"])),
            crit("year", "between", json!({"min": 1990, "max": "1999"})),
        ])
        .unwrap();
        let query = PushdownQuery::build(&compiled);

        assert!(query.filter.starts_with("ci.library_id = ?1 AND "));
        assert!(query.filter.contains("je.value IN (?2, ?3)"));
        assert!(query.filter.contains("ci.year >= ?4"));
        assert!(query.filter.contains("ci.year <= ?5"));
        assert_eq!(query.bind("lib")[0], SqlParam::Text("lib".to_string()));
        assert_eq!(query.bind("lib").len(), 5);
    }

    #[test]
    fn test_like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");

        let items = vec![item("1", "50% Off"), item("2", "500 Off")];
        let compiled = compile_criteria(&[crit("title", "contains", json!("0%"))]).unwrap();
        let conn = seeded_conn(&items);
        assert_eq!(pushdown_ids(&conn, &compiled), vec!["1"]);
        assert_eq!(in_process_ids(&items, &compiled), vec!["1"]);
    }

    #[test]
    fn test_compile_rejects_bad_criteria() {
        let cases = vec![
            crit("colour", "equals", json!("red")),
            crit("title", "matches", json!("x")),
            crit("title", "greater_than", json!(3)),
            crit("year", "contains", json!("19")),
            crit("year", "equals", json!("nineteen")),
            crit("genres", "is_one_of", json!([])),
            crit("year", "between", json!({})),
            crit("title", "contains", json!(true)),
        ];
        for c in cases {
            let err = compile_criteria(&[c.clone()]).unwrap_err();
            assert!(
                matches!(err, CuratorError::ValidationError(_)),
                "expected validation error for {:?}",
                c
            );
        }
    }

    #[test]
    fn test_field_aliases() {
        for alias in ["contentRating", "rating", "content_rating"] {
            assert_eq!(alias.parse::<RuleField>().unwrap(), RuleField::ContentRating);
        }
        assert_eq!("genre".parse::<RuleField>().unwrap(), RuleField::Genres);
        assert_eq!("contentType".parse::<RuleField>().unwrap(), RuleField::ContentType);
    }

    #[test]
    fn test_equals_on_list_means_membership() {
        let mut a = item("1", "A");
        a.genres = vec!["Anime".into(), "Action".into()];
        let compiled = compile_criteria(&[crit("genres", "equals", json!("Anime"))]).unwrap();
        assert!(compiled[0].matches(&ItemProjection::from_item(&a)));
        let compiled = compile_criteria(&[crit("genres", "equals", json!("anime"))]).unwrap();
        assert!(!compiled[0].matches(&ItemProjection::from_item(&a)));
    }

    #[test]
    fn test_evaluate_conditions() {
        let conditions: RuleConditions = serde_json::from_value(json!({
            "genres": ["Anime", "Animation"],
            "year": {"min": 2000, "max": 2010},
            "contentRating": "TV-14",
        }))
        .unwrap();

        let hit = json!({
            "title": "Naruto",
            "year": 2002,
            "genres": ["Anime"],
            "contentRating": "TV-14",
        });
        assert!(evaluate_conditions(&conditions, &hit));

        let wrong_year = json!({"year": 1999, "genres": ["Anime"], "contentRating": "TV-14"});
        assert!(!evaluate_conditions(&conditions, &wrong_year));

        let absent = json!({"genres": ["Anime"], "contentRating": "TV-14"});
        assert!(!evaluate_conditions(&conditions, &absent));

        let malformed = json!({"year": [2002], "genres": ["Anime"], "contentRating": "TV-14"});
        assert!(!evaluate_conditions(&conditions, &malformed));

        assert!(!evaluate_conditions(&RuleConditions::default(), &hit));
    }

    #[test]
    fn test_condition_value_shapes() {
        let conditions: RuleConditions = serde_json::from_value(json!({
            "genres": ["A"],
            "year": {"max": 1980},
            "studio": "Ghibli",
        }))
        .unwrap();
        assert_eq!(conditions.0["genres"], ConditionValue::Any(vec![json!("A")]));
        assert_eq!(
            conditions.0["year"],
            ConditionValue::Range {
                min: None,
                max: Some(json!(1980))
            }
        );
        assert_eq!(conditions.0["studio"], ConditionValue::Scalar(json!("Ghibli")));
        assert!(conditions.validate().is_ok());
    }

    #[test]
    fn test_from_metadata_accepts_snake_case_and_numeric_ids() {
        let p = ItemProjection::from_metadata(&json!({
            "media_type": "movie",
            "tmdb_id": 603,
            "content_analysis": {"content_type": "anime"},
        }))
        .unwrap();
        assert_eq!(p.media_type.as_deref(), Some("movie"));
        assert_eq!(p.tmdb_id.as_deref(), Some("603"));
        assert_eq!(p.content_type.as_deref(), Some("anime"));

        assert!(ItemProjection::from_metadata(&json!({"title": 5})).is_err());
        assert!(ItemProjection::from_metadata(&json!([1])).is_err());
    }

    async fn engine_with_library() -> (RuleEngine, Arc<DatabaseManager>) {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        let libraries = Arc::new(LibraryRepository::new(db.clone()));
        crate::db::repository::tests_support::insert_connection(&db, "conn").await;
        for (id, rule_set) in [
            ("movies", None),
            (
                "anime",
                Some(serde_json::from_value(json!({"genres": ["Anime"]})).unwrap()),
            ),
        ] {
            libraries
                .create(&Library {
                    id: id.to_string(),
                    provider_connection_id: "conn".to_string(),
                    external_id: id.to_string(),
                    name: id.to_string(),
                    media_type: "movie".to_string(),
                    enabled: true,
                    rule_set,
                    last_synced_at: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let engine = RuleEngine::new(
            Arc::new(RuleRepository::new(db.clone())),
            libraries,
            Arc::new(CatalogItemRepository::new(db.clone())),
            Arc::new(SystemClock),
        );
        (engine, db)
    }

    #[tokio::test]
    async fn test_classify_prefers_priority_then_falls_back_to_rule_set() {
        let (engine, _db) = engine_with_library().await;

        let low = engine
            .create_rule(NewRule {
                library_id: "movies".into(),
                name: "modern".into(),
                criteria: vec![crit("year", "greater_than", json!(2000))],
                priority: 1,
                enabled: true,
                generated_by: None,
            })
            .await
            .unwrap();
        let high = engine
            .create_rule(NewRule {
                library_id: "anime".into(),
                name: "recent anime".into(),
                criteria: vec![
                    crit("genres", "is_one_of", json!(["Anime"])),
                    crit("year", "greater_than", json!(2000)),
                ],
                priority: 10,
                enabled: true,
                generated_by: None,
            })
            .await
            .unwrap();

        let c = engine
            .classify(&json!({"year": 2005, "genres": ["Anime"]}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c.rule_id.as_deref(), Some(high.id.as_str()));

        let c = engine
            .classify(&json!({"year": 2005, "genres": ["Drama"]}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c.rule_id.as_deref(), Some(low.id.as_str()));

        let c = engine
            .classify(&json!({"year": 1990, "genres": ["Anime"]}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c.library_id, "anime");
        assert_eq!(c.matched_by, MatchSource::RuleSet);

        assert!(engine
            .classify(&json!({"year": 1990}))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_rule_crud() {
        let (engine, _db) = engine_with_library().await;

        let missing_library = engine
            .create_rule(NewRule {
                library_id: "nope".into(),
                name: "x".into(),
                criteria: vec![crit("title", "contains", json!("a"))],
                priority: 0,
                enabled: true,
                generated_by: None,
            })
            .await;
        assert!(matches!(missing_library, Err(CuratorError::NotFound(_))));

        let bad = engine
            .create_rule(NewRule {
                library_id: "movies".into(),
                name: "x".into(),
                criteria: vec![crit("title", "nope", json!("a"))],
                priority: 0,
                enabled: true,
                generated_by: None,
            })
            .await;
        assert!(matches!(bad, Err(CuratorError::ValidationError(_))));

        let rule = engine
            .create_rule(NewRule {
                library_id: "movies".into(),
                name: "matrix".into(),
                criteria: vec![crit("title", "contains", json!("Matrix"))],
                priority: 0,
                enabled: true,
                generated_by: None,
            })
            .await
            .unwrap();
        assert_eq!(engine.get_rule(&rule.id).await.unwrap().criteria, rule.criteria);
        assert_eq!(engine.list_rules(Some("movies")).await.unwrap().len(), 1);

        engine.delete_rule(&rule.id).await.unwrap();
        assert!(matches!(
            engine.delete_rule(&rule.id).await,
            Err(CuratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_preview_rejects_malformed_criteria() {
        let (engine, _db) = engine_with_library().await;
        let err = engine
            .preview_rule("movies", &[crit("year", "greater_than", json!("soon"))], 10)
            .await
            .unwrap_err();
        assert!(matches!(err, CuratorError::ValidationError(_)));
    }

    fn arb_item() -> impl Strategy<Value = CatalogItem> {
        let titles = prop::sample::select(vec![
            "The Matrix",
            "matrix",
            "Inception",
            "50% Off",
            "a_b",
            "Back\\slash",
            "Élan",
            "",
        ]);
        let genre_pool = vec!["Action", "Comedy", "Anime", "Drama", "action"];
        let ratings = prop::sample::select(vec![None, Some("PG"), Some("R"), Some("PG-13")]);
        let studios = prop::sample::select(vec![None, Some("Ghibli"), Some("A24"), Some("")]);
        let content = prop::sample::select(vec![
            json!(null),
            json!("holiday"),
            json!("standup"),
            json!(5),
        ]);

        (
            titles,
            prop::option::of(1990i64..2010),
            prop::sample::subsequence(genre_pool.clone(), 0..=3),
            prop::sample::subsequence(genre_pool, 0..=2),
            ratings,
            studios,
            content,
        )
            .prop_map(|(title, year, genres, tags, rating, studio, content)| CatalogItem {
                server_id: "srv".to_string(),
                external_id: String::new(),
                library_id: "lib".to_string(),
                tmdb_id: None,
                imdb_id: None,
                tvdb_id: None,
                title: title.to_string(),
                year,
                media_type: "movie".to_string(),
                genres: genres.into_iter().map(String::from).collect(),
                tags: tags.into_iter().map(String::from).collect(),
                collections: vec![],
                studio: studio.map(String::from),
                content_rating: rating.map(String::from),
                metadata: json!({"raw": {}, "contentAnalysis": {"contentType": content}}),
                content_hash: String::new(),
                last_synced: Utc::now(),
            })
    }

    fn arb_criterion() -> impl Strategy<Value = Criterion> {
        prop_oneof![
            prop::sample::select(vec!["matrix", "MAT", "%", "_", "\\", "x", "é"])
                .prop_map(|n| crit("title", "contains", json!(n))),
            prop::sample::select(vec![json!("2000"), json!(1995), json!(2005.5)])
                .prop_map(|v| crit("year", "greater_than", v)),
            (1990i64..2010).prop_map(|y| crit("year", "equals", json!(y))),
            (1990i64..2010, 0i64..10).prop_map(|(min, span)| crit(
                "year",
                "between",
                json!({"min": min, "max": min + span})
            )),
            prop::sample::subsequence(vec!["Action", "Anime", "Drama"], 1..=2)
                .prop_map(|g| crit("genres", "is_one_of", json!(g))),
            prop::sample::select(vec!["act", "ANI", "x"])
                .prop_map(|n| crit("genres", "contains", json!(n))),
            prop::sample::select(vec!["Anime", "action"])
                .prop_map(|g| crit("tags", "equals", json!(g))),
            prop::sample::subsequence(vec!["PG", "R", "PG-13"], 1..=2)
                .prop_map(|r| crit("content_rating", "is_one_of", json!(r))),
            prop::sample::select(vec!["holiday", "standup"])
                .prop_map(|c| crit("content_type", "equals", json!(c))),
            prop::sample::select(vec!["a", "GHIB", ""])
                .prop_map(|n| crit("studio", "contains", json!(n))),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_pushdown_agrees_with_in_process(
            raw_items in prop::collection::vec(arb_item(), 0..25),
            criteria in prop::collection::vec(arb_criterion(), 0..3),
        ) {
            let items: Vec<CatalogItem> = raw_items
                .into_iter()
                .enumerate()
                .map(|(i, mut it)| {
                    it.external_id = format!("{:03}", i);
                    it.content_hash = it.external_id.clone();
                    it
                })
                .collect();
            let compiled = compile_criteria(&criteria).unwrap();
            let conn = seeded_conn(&items);

            prop_assert_eq!(pushdown_ids(&conn, &compiled), in_process_ids(&items, &compiled));
        }
    }
}
