//! Generic list vocabulary and its translation into backend expressions
//!
//! A [`ListRequest`] names a resource, a page, ordered sort specs and ordered
//! filter predicates. The backend consumes a single sort expression
//! (`-amount,name`) and a single filter expression
//! (`status = "paid" && amount > "100"`); the functions here produce both.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Record;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Marker the backend uses for descending sort fields
pub const DESC_MARKER: char = '-';

/// Logical AND between filter predicates
pub const FILTER_AND: &str = " && ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current: u32,
    pub page_size: u32,
}

impl Pagination {
    pub fn new(current: u32, page_size: u32) -> Self {
        Self {
            current: current.max(1),
            page_size: page_size.max(1),
        }
    }

    /// Values clamped to at least one
    pub fn normalized(self) -> Self {
        Self::new(self.current, self.page_size)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            current: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }

    /// Backend token for this spec: `-field` when descending, `field` otherwise
    pub fn token(&self) -> String {
        match self.order {
            SortOrder::Desc => format!("{DESC_MARKER}{}", self.field),
            SortOrder::Asc => self.field.clone(),
        }
    }
}

impl FromStr for SortSpec {
    type Err = String;

    /// Parses the backend token form (`-amount`, `name`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (field, order) = match s.strip_prefix(DESC_MARKER) {
            Some(rest) => (rest, SortOrder::Desc),
            None => (s.strip_prefix('+').unwrap_or(s), SortOrder::Asc),
        };
        if field.is_empty() {
            return Err(format!("empty sort field in '{s}'"));
        }
        Ok(Self {
            field: field.to_string(),
            order,
        })
    }
}

/// Comparison operator of a filter predicate
///
/// Known generic names (`eq`, `ne`, `lt`, ...) and backend symbols both parse
/// into the named variants; anything else is forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    Other(String),
}

impl FilterOperator {
    pub fn as_backend_str(&self) -> &str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Ne => "!=",
            FilterOperator::Gt => ">",
            FilterOperator::Gte => ">=",
            FilterOperator::Lt => "<",
            FilterOperator::Lte => "<=",
            FilterOperator::Contains => "~",
            FilterOperator::NotContains => "!~",
            FilterOperator::Other(raw) => raw,
        }
    }
}

impl From<&str> for FilterOperator {
    fn from(s: &str) -> Self {
        match s.trim() {
            "eq" | "=" => FilterOperator::Eq,
            "ne" | "!=" => FilterOperator::Ne,
            "gt" | ">" => FilterOperator::Gt,
            "gte" | ">=" => FilterOperator::Gte,
            "lt" | "<" => FilterOperator::Lt,
            "lte" | "<=" => FilterOperator::Lte,
            "contains" | "~" => FilterOperator::Contains,
            "ncontains" | "!~" => FilterOperator::NotContains,
            other => FilterOperator::Other(other.to_string()),
        }
    }
}

impl From<String> for FilterOperator {
    fn from(s: String) -> Self {
        FilterOperator::from(s.as_str())
    }
}

impl From<FilterOperator> for String {
    fn from(op: FilterOperator) -> Self {
        op.as_backend_str().to_string()
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_backend_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl FilterPredicate {
    pub fn new(
        field: impl Into<String>,
        operator: impl Into<FilterOperator>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

/// How filter values are written into the backend expression
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRendering {
    /// Every value quoted as a string, byte-compatible with the historical
    /// admin panel. Numeric and date comparisons lose their type.
    #[default]
    Legacy,
    /// Numbers, booleans and null bare; dates normalised; strings escaped
    Typed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRequest {
    pub resource: String,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub sorters: Vec<SortSpec>,
    #[serde(default)]
    pub filters: Vec<FilterPredicate>,
}

impl ListRequest {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            pagination: None,
            sorters: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn page(mut self, current: u32, page_size: u32) -> Self {
        self.pagination = Some(Pagination::new(current, page_size));
        self
    }

    pub fn sort(mut self, spec: SortSpec) -> Self {
        self.sorters.push(spec);
        self
    }

    pub fn filter(
        mut self,
        field: impl Into<String>,
        operator: impl Into<FilterOperator>,
        value: impl Into<Value>,
    ) -> Self {
        self.filters
            .push(FilterPredicate::new(field, operator, value));
        self
    }

    /// Requested page, falling back to 1/10 when absent
    pub fn effective_pagination(&self) -> Pagination {
        self.pagination.unwrap_or_default().normalized()
    }
}

/// One page of records plus the count across all pages
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListResult {
    pub data: Vec<Record>,
    pub total: u64,
}

/// Serialize sort specs into a single backend sort expression
pub fn render_sort(sorters: &[SortSpec]) -> String {
    sorters
        .iter()
        .map(SortSpec::token)
        .collect::<Vec<_>>()
        .join(",")
}

/// Serialize filter predicates into a single backend filter expression
pub fn render_filter(filters: &[FilterPredicate], rendering: ValueRendering) -> String {
    filters
        .iter()
        .map(|predicate| render_predicate(predicate, rendering))
        .collect::<Vec<_>>()
        .join(FILTER_AND)
}

pub fn render_predicate(predicate: &FilterPredicate, rendering: ValueRendering) -> String {
    let value = match rendering {
        ValueRendering::Legacy => format!("\"{}\"", legacy_text(&predicate.value)),
        ValueRendering::Typed => typed_literal(&predicate.value),
    };
    format!("{} {} {}", predicate.field, predicate.operator, value)
}

/// Text of a value the way string interpolation produced it historically
fn legacy_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Array(items) => items
            .iter()
            .map(legacy_text)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

fn typed_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => match canonical_datetime(s) {
            Some(date) => quote(&date),
            None => quote(s),
        },
        Value::Array(_) | Value::Object(_) => quote(&legacy_text(value)),
    }
}

fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Backend datetime format (`2025-01-31 00:00:00.000Z`)
pub const BACKEND_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3fZ";

/// Normalise a date-like string into the backend datetime format
pub fn canonical_datetime(s: &str) -> Option<String> {
    parse_datetime(s).map(|dt| dt.format(BACKEND_DATETIME_FORMAT).to_string())
}

/// Parse the date shapes the backend and its clients exchange
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.fZ") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
