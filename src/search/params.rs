//! Parameter normalization: raw request parameters to typed search parameters

use crate::search::error::{SearchError, SearchResult};
use crate::search::fields::{DataType, FieldCatalog, FieldDefinition};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::Display;

/// Public name of the field that drives index selection
pub const DATE_FIELD: &str = "date";

pub const META_RESULTS_OFFSET: &str = "_results_offset";
pub const META_RESULTS_NUMBER: &str = "_results_number";
pub const META_FACETS: &str = "_facets";
pub const META_FACETS_SIZE: &str = "_facets_size";
pub const META_RETURN_QUERY: &str = "_return_query";
pub const META_SORT: &str = "_sort";
pub const META_COLUMNS: &str = "_columns";

const DEFAULT_RESULTS_NUMBER: usize = 100;

/// Raw request parameters: every key maps to one or more string values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawParams(BTreeMap<String, Vec<String>>);

impl RawParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `key`
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    /// Builder-style variant of [`RawParams::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = RawParams::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

/// Per-value comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Operator {
    /// No glyph: matches any of the listed terms
    #[strum(serialize = "")]
    Any,
    #[strum(serialize = "=")]
    Equal,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterOrEqual,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessOrEqual,
    #[strum(serialize = "~")]
    Contains,
    #[strum(serialize = "$")]
    StartsWith,
    #[strum(serialize = "^")]
    EndsWith,
    #[strum(serialize = "__null__")]
    IsNull,
}

impl Operator {
    /// Glyphs in match order; longer glyphs come before their prefixes
    const GLYPHS: [(&'static str, Operator); 9] = [
        ("__null__", Operator::IsNull),
        (">=", Operator::GreaterOrEqual),
        ("<=", Operator::LessOrEqual),
        (">", Operator::Greater),
        ("<", Operator::Less),
        ("=", Operator::Equal),
        ("~", Operator::Contains),
        ("$", Operator::StartsWith),
        ("^", Operator::EndsWith),
    ];

    /// Split a raw value into (negated, operator, remainder)
    pub fn parse_value(raw: &str) -> (bool, Operator, &str) {
        let (negated, rest) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        for (glyph, operator) in Self::GLYPHS {
            if let Some(value) = rest.strip_prefix(glyph) {
                return (negated, operator, value);
            }
        }
        (negated, Operator::Any, rest)
    }

    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Operator::Greater | Operator::GreaterOrEqual | Operator::Less | Operator::LessOrEqual
        )
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(
            self,
            Operator::Contains | Operator::StartsWith | Operator::EndsWith
        )
    }

    /// Operators whose values are compared verbatim
    pub fn is_exact(&self) -> bool {
        matches!(self, Operator::Equal)
    }
}

/// One typed, operator-annotated filter on a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchParam {
    pub field: FieldDefinition,
    pub operator: Operator,
    pub negated: bool,
    pub values: Vec<String>,
}

impl SearchParam {
    pub fn new(field: FieldDefinition, operator: Operator, values: Vec<String>) -> Self {
        Self {
            field,
            operator,
            negated: false,
            values,
        }
    }

    pub fn negated(mut self) -> Self {
        self.negated = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.field.public_name
    }

    /// Values parsed as integers; values that fail to parse are skipped
    pub fn int_values(&self) -> Vec<i64> {
        self.values.iter().filter_map(|v| v.parse().ok()).collect()
    }
}

/// Inclusive date window driving index selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub offset: usize,
    pub size: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            size: DEFAULT_RESULTS_NUMBER,
        }
    }
}

/// Sort key requested through `_sort`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

/// Output of the normalizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedParams {
    pub params: Vec<SearchParam>,
    pub date_range: DateRange,
    pub pagination: Pagination,
    pub facets: Vec<String>,
    pub facets_size: Option<usize>,
    pub return_query: bool,
    pub sort: Vec<SortKey>,
    pub columns: Vec<String>,
}

impl NormalizedParams {
    /// Parameters on the given public field
    pub fn params_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SearchParam> + 'a {
        self.params.iter().filter(move |p| p.name() == name)
    }
}

/// Knobs the normalizer needs from configuration
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub now: DateTime<Utc>,
    pub default_window_days: i64,
    pub max_window_days: i64,
    pub max_results_number: usize,
    pub required_params: Vec<String>,
}

impl NormalizeOptions {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            default_window_days: 7,
            max_window_days: 365,
            max_results_number: 1000,
            required_params: Vec::new(),
        }
    }
}

/// Legacy and plural spellings accepted by the public API
fn resolve_alias(name: &str) -> &str {
    match name {
        "products" => "product",
        "versions" => "version",
        "platforms" => "platform",
        "build" => "build_id",
        "channel" | "release_channels" => "release_channel",
        "os" => "platform",
        other => other,
    }
}

/// Turn raw request parameters into typed search parameters
pub fn normalize(
    raw: &RawParams,
    catalog: &FieldCatalog,
    options: &NormalizeOptions,
) -> SearchResult<NormalizedParams> {
    let mut params: Vec<SearchParam> = Vec::new();
    let mut pagination = Pagination::default();
    let mut facets = Vec::new();
    let mut facets_size = None;
    let mut return_query = false;
    let mut sort = Vec::new();
    let mut columns = Vec::new();

    for (key, values) in raw.iter() {
        match key.as_str() {
            META_RESULTS_OFFSET => {
                if let Some(offset) = last_usize(key, values) {
                    pagination.offset = offset;
                }
            }
            META_RESULTS_NUMBER => {
                if let Some(size) = last_usize(key, values) {
                    if size > options.max_results_number {
                        return Err(SearchError::BadArgument(format!(
                            "{} cannot exceed {}",
                            META_RESULTS_NUMBER, options.max_results_number
                        )));
                    }
                    pagination.size = size;
                }
            }
            META_FACETS => facets.extend(split_list(values)),
            META_FACETS_SIZE => facets_size = last_usize(key, values),
            META_RETURN_QUERY => {
                return_query = values
                    .last()
                    .and_then(|v| parse_bool(v))
                    .unwrap_or(false);
            }
            META_SORT => {
                sort.extend(split_list(values).into_iter().map(|s| match s.strip_prefix('-') {
                    Some(field) => SortKey {
                        field: field.to_string(),
                        descending: true,
                    },
                    None => SortKey {
                        field: s,
                        descending: false,
                    },
                }));
            }
            META_COLUMNS => columns.extend(split_list(values)),
            other if other.starts_with('_') => {
                tracing::debug!(param = other, "Ignoring unrecognized meta parameter");
            }
            other => {
                let name = resolve_alias(other);
                let field = catalog
                    .lookup(name)
                    .ok_or_else(|| SearchError::BadArgument(format!("Unknown field: {}", other)))?;
                for value in values {
                    push_value(&mut params, field, value, options.now);
                }
            }
        }
    }

    for required in &options.required_params {
        let name = resolve_alias(required);
        if !params.iter().any(|p| p.name() == name) {
            return Err(SearchError::MissingArgument(name.to_string()));
        }
    }

    let date_range = apply_date_defaults(&mut params, catalog, options)?;

    Ok(NormalizedParams {
        params,
        date_range,
        pagination,
        facets,
        facets_size,
        return_query,
        sort,
        columns,
    })
}

/// Parse one raw value and merge it into the matching (field, operator, negated) group
fn push_value(params: &mut Vec<SearchParam>, field: &FieldDefinition, raw: &str, now: DateTime<Utc>) {
    let (negated, operator, value) = Operator::parse_value(raw);

    let coerced = if operator == Operator::IsNull {
        None
    } else {
        match coerce(field, operator, value, now) {
            Some(v) => Some(v),
            None => {
                // Malformed values are dropped rather than rejected
                tracing::debug!(
                    field = %field.public_name,
                    value = raw,
                    "Dropping value that does not match the field type"
                );
                return;
            }
        }
    };

    let existing = params.iter_mut().find(|p| {
        p.field.public_name == field.public_name && p.operator == operator && p.negated == negated
    });

    match existing {
        Some(param) => {
            if let Some(v) = coerced {
                if !param.values.contains(&v) {
                    param.values.push(v);
                }
            }
        }
        None => params.push(SearchParam {
            field: field.clone(),
            operator,
            negated,
            values: coerced.into_iter().collect(),
        }),
    }
}

/// Coerce a value to the field's declared type; `None` means "treat as absent"
fn coerce(field: &FieldDefinition, operator: Operator, value: &str, now: DateTime<Utc>) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    match field.data_type {
        DataType::Date | DataType::Datetime => {
            let parsed = parse_datetime(value)?.min(now);
            Some(format_datetime(field.data_type, parsed))
        }
        DataType::Integer => value.parse::<i64>().ok().map(|n| n.to_string()),
        DataType::Boolean => parse_bool(value).map(|b| b.to_string()),
        DataType::String | DataType::Enum => {
            if operator.is_exact() {
                Some(value.to_string())
            } else {
                Some(value.to_lowercase())
            }
        }
    }
}

/// ISO-8601: a bare date, or a date and time with optional fraction and offset
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn format_datetime(data_type: DataType, value: DateTime<Utc>) -> String {
    match data_type {
        DataType::Date => value.format("%Y-%m-%d").to_string(),
        _ => value.to_rfc3339_opts(SecondsFormat::Secs, true),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn last_usize(key: &str, values: &[String]) -> Option<usize> {
    let raw = values.last()?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::debug!(param = key, value = %raw, "Ignoring malformed integer");
            None
        }
    }
}

fn split_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Derive the date window and make sure both bounds exist as filters
fn apply_date_defaults(
    params: &mut Vec<SearchParam>,
    catalog: &FieldCatalog,
    options: &NormalizeOptions,
) -> SearchResult<DateRange> {
    let mut lower: Option<DateTime<Utc>> = None;
    let mut upper: Option<DateTime<Utc>> = None;

    for param in params
        .iter()
        .filter(|p| p.name() == DATE_FIELD && !p.negated)
    {
        for value in &param.values {
            let Some(dt) = parse_datetime(value) else {
                continue;
            };
            match param.operator {
                Operator::Greater | Operator::GreaterOrEqual => {
                    lower = Some(lower.map_or(dt, |l| l.max(dt)));
                }
                Operator::Less | Operator::LessOrEqual => {
                    upper = Some(upper.map_or(dt, |u| u.min(dt)));
                }
                Operator::Equal | Operator::Any => {
                    lower = Some(lower.map_or(dt, |l| l.max(dt)));
                    upper = Some(upper.map_or(dt, |u| u.min(dt)));
                }
                _ => {}
            }
        }
    }

    let window = Duration::days(options.default_window_days);
    let date_field = catalog.lookup(DATE_FIELD);

    let to = match upper {
        Some(to) => to,
        None => {
            if let Some(field) = date_field {
                push_value(
                    params,
                    field,
                    &format!("<={}", format_datetime(field.data_type, options.now)),
                    options.now,
                );
            }
            options.now
        }
    };

    let from = match lower {
        Some(from) => from,
        None => {
            let from = to - window;
            if let Some(field) = date_field {
                push_value(
                    params,
                    field,
                    &format!(">={}", format_datetime(field.data_type, from)),
                    options.now,
                );
            }
            from
        }
    };

    if to - from > Duration::days(options.max_window_days) {
        return Err(SearchError::bad_argument(format!(
            "date range {} to {} is wider than {} days",
            from.date_naive(),
            to.date_naive(),
            options.max_window_days
        )));
    }

    Ok(DateRange { from, to })
}
