//! Query compilation: typed parameters to a backend query document

use crate::search::error::{SearchError, SearchResult};
use crate::search::fields::{DataType, FieldCatalog, FieldDefinition};
use crate::search::params::{NormalizedParams, Operator, SearchParam};
use crate::search::versions::{ChannelFilter, ResolvedVersionFilter};
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

/// Boolean filter tree
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Term { field: String, value: Value },
    Terms { field: String, values: Vec<Value> },
    Range { field: String, bound: &'static str, value: Value },
    Missing { field: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Logical NOT; negating a negation unwraps it instead of stacking
    pub fn negate(self) -> Filter {
        match self {
            Filter::Not(inner) => *inner,
            other => Filter::Not(Box::new(other)),
        }
    }

    /// AND of the given filters; a single filter is returned as is
    pub fn all(mut filters: Vec<Filter>) -> Filter {
        if filters.len() == 1 {
            filters.remove(0)
        } else {
            Filter::And(filters)
        }
    }

    /// OR of the given filters; a single filter is returned as is
    pub fn any(mut filters: Vec<Filter>) -> Filter {
        if filters.len() == 1 {
            filters.remove(0)
        } else {
            Filter::Or(filters)
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Filter::Term { field, value } => json!({ "term": { field.as_str(): value } }),
            Filter::Terms { field, values } => json!({ "terms": { field.as_str(): values } }),
            Filter::Range { field, bound, value } => {
                json!({ "range": { field.as_str(): { *bound: value } } })
            }
            Filter::Missing { field } => json!({ "missing": { "field": field } }),
            Filter::And(filters) => {
                json!({ "and": filters.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::Or(filters) => {
                json!({ "or": filters.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::Not(inner) => json!({ "not": { "filter": inner.to_json() } }),
        }
    }
}

/// Pattern query evaluated by the backend's scorer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wildcard {
    pub field: String,
    pub pattern: String,
}

impl Wildcard {
    pub fn to_json(&self) -> Value {
        json!({ "wildcard": { self.field.as_str(): self.pattern } })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetSpec {
    pub name: String,
    pub field: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

/// Backend query document for one request
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// Conjoined filter set, shared by the main query and every facet
    pub filters: Vec<Filter>,
    /// Disjoined positive pattern clauses
    pub wildcards: Vec<Wildcard>,
    /// Pattern clauses that must not match
    pub excluded_wildcards: Vec<Wildcard>,
    pub facets: Vec<FacetSpec>,
    pub sort: Vec<SortSpec>,
    pub size: usize,
    pub offset: usize,
}

impl CompiledQuery {
    fn filter_json(&self) -> Value {
        if self.filters.is_empty() {
            json!({ "match_all": {} })
        } else {
            json!({ "and": self.filters.iter().map(Filter::to_json).collect::<Vec<_>>() })
        }
    }

    fn query_json(&self) -> Value {
        if self.wildcards.is_empty() && self.excluded_wildcards.is_empty() {
            return json!({ "match_all": {} });
        }

        let mut bool_query = Map::new();
        if self.wildcards.is_empty() {
            bool_query.insert("must".to_string(), json!([{ "match_all": {} }]));
        } else {
            bool_query.insert(
                "should".to_string(),
                Value::Array(self.wildcards.iter().map(Wildcard::to_json).collect()),
            );
            bool_query.insert("minimum_should_match".to_string(), json!(1));
        }
        if !self.excluded_wildcards.is_empty() {
            bool_query.insert(
                "must_not".to_string(),
                Value::Array(self.excluded_wildcards.iter().map(Wildcard::to_json).collect()),
            );
        }
        json!({ "bool": bool_query })
    }

    /// Request body sent to `/<indices>/_search`
    pub fn to_json(&self) -> Value {
        let filter = self.filter_json();

        let mut body = Map::new();
        body.insert(
            "query".to_string(),
            json!({ "filtered": { "query": self.query_json(), "filter": filter } }),
        );
        body.insert("size".to_string(), json!(self.size));
        body.insert("from".to_string(), json!(self.offset));

        if !self.facets.is_empty() {
            let facets: Map<String, Value> = self
                .facets
                .iter()
                .map(|facet| {
                    (
                        facet.name.clone(),
                        json!({
                            "terms": { "field": facet.field, "size": facet.size },
                            "facet_filter": filter,
                        }),
                    )
                })
                .collect();
            body.insert("facets".to_string(), Value::Object(facets));
        }

        if !self.sort.is_empty() {
            let sort: Vec<Value> = self
                .sort
                .iter()
                .map(|s| {
                    let order = if s.descending { "desc" } else { "asc" };
                    json!({ s.field.as_str(): { "order": order } })
                })
                .collect();
            body.insert("sort".to_string(), Value::Array(sort));
        }

        Value::Object(body)
    }
}

impl Serialize for CompiledQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Compiled form of a single parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Filter(Filter),
    Wildcards { clauses: Vec<Wildcard>, negated: bool },
}

/// Builds backend queries against a field catalog
pub struct QueryCompiler<'a> {
    catalog: &'a FieldCatalog,
    max_facet_terms: usize,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(catalog: &'a FieldCatalog, max_facet_terms: usize) -> Self {
        Self {
            catalog,
            max_facet_terms,
        }
    }

    /// Compile normalized parameters plus resolved versions into a query document
    pub fn compile(
        &self,
        request: &NormalizedParams,
        versions: &[ResolvedVersionFilter],
    ) -> SearchResult<CompiledQuery> {
        // facets are checked first so a bad facet fails before anything else
        let facets = self.compile_facets(&request.facets, request.facets_size)?;
        let sort = self.compile_sort(request)?;

        let mut filters = Vec::new();
        let mut wildcards = Vec::new();
        let mut excluded_wildcards = Vec::new();

        for param in &request.params {
            match compile_param(param)? {
                Fragment::Filter(filter) => filters.push(filter),
                Fragment::Wildcards { clauses, negated: false } => wildcards.extend(clauses),
                Fragment::Wildcards { clauses, negated: true } => excluded_wildcards.extend(clauses),
            }
        }

        if !versions.is_empty() {
            filters.push(self.compile_versions(versions)?);
        }

        Ok(CompiledQuery {
            filters,
            wildcards,
            excluded_wildcards,
            facets,
            sort,
            size: request.pagination.size,
            offset: request.pagination.offset,
        })
    }

    fn field(&self, name: &str) -> SearchResult<&'a FieldDefinition> {
        self.catalog
            .lookup(name)
            .ok_or_else(|| SearchError::BadArgument(format!("Unknown field: {}", name)))
    }

    fn compile_facets(&self, names: &[String], requested: Option<usize>) -> SearchResult<Vec<FacetSpec>> {
        let size = requested
            .unwrap_or(self.max_facet_terms)
            .min(self.max_facet_terms);

        names
            .iter()
            .map(|name| {
                let field = self.catalog.lookup(name).ok_or_else(|| {
                    SearchError::BadArgument(format!("Unknown facet field: {}", name))
                })?;
                if !field.is_facetable {
                    return Err(SearchError::BadArgument(format!(
                        "Field is not facetable: {}",
                        name
                    )));
                }
                Ok(FacetSpec {
                    name: field.public_name.clone(),
                    field: field.exact_path(),
                    size,
                })
            })
            .collect()
    }

    fn compile_sort(&self, request: &NormalizedParams) -> SearchResult<Vec<SortSpec>> {
        request
            .sort
            .iter()
            .map(|key| {
                let field = self.field(&key.field)?;
                Ok(SortSpec {
                    field: field.exact_path(),
                    descending: key.descending,
                })
            })
            .collect()
    }

    /// OR over keys, AND within one key
    fn compile_versions(&self, versions: &[ResolvedVersionFilter]) -> SearchResult<Filter> {
        let product = self.field("product")?;
        let version = self.field("version")?;
        let channel = self.field("release_channel")?;
        let build = self.field("build_id")?;

        let per_key = versions
            .iter()
            .map(|resolved| {
                let mut conditions = vec![
                    Filter::Term {
                        field: product.storage_path(),
                        value: Value::String(resolved.product.clone()),
                    },
                    Filter::Term {
                        field: version.storage_path(),
                        value: Value::String(resolved.version.clone()),
                    },
                ];
                match &resolved.channel {
                    Some(ChannelFilter::Only(name)) => conditions.push(Filter::Term {
                        field: channel.storage_path(),
                        value: Value::String(name.clone()),
                    }),
                    Some(ChannelFilter::Exclude(names)) => conditions.push(
                        Filter::Terms {
                            field: channel.storage_path(),
                            values: names.iter().cloned().map(Value::String).collect(),
                        }
                        .negate(),
                    ),
                    None => {}
                }
                if let Some(build_ids) = &resolved.build_ids {
                    conditions.push(Filter::Terms {
                        field: build.storage_path(),
                        values: build_ids.iter().map(|b| typed_value(build, b)).collect(),
                    });
                }
                Filter::And(conditions)
            })
            .collect();

        Ok(Filter::any(per_key))
    }
}

/// Compile one parameter according to its operator
pub fn compile_param(param: &SearchParam) -> SearchResult<Fragment> {
    let field = &param.field;

    let fragment = match param.operator {
        Operator::Any => Fragment::Filter(term_filter(field, field.storage_path(), &param.values)?),
        Operator::Equal => Fragment::Filter(term_filter(field, field.exact_path(), &param.values)?),
        Operator::Greater | Operator::GreaterOrEqual | Operator::Less | Operator::LessOrEqual => {
            if !field.data_type.is_ordered() {
                return Err(SearchError::BadArgument(format!(
                    "Operator {} is not supported on field {}",
                    param.operator, field.public_name
                )));
            }
            let bound = match param.operator {
                Operator::Greater => "gt",
                Operator::GreaterOrEqual => "gte",
                Operator::Less => "lt",
                _ => "lte",
            };
            let ranges = param
                .values
                .iter()
                .map(|v| Filter::Range {
                    field: field.storage_path(),
                    bound,
                    value: typed_value(field, v),
                })
                .collect::<Vec<_>>();
            if ranges.is_empty() {
                return Err(empty_param(param));
            }
            Fragment::Filter(Filter::all(ranges))
        }
        Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
            if !field.data_type.is_textual() {
                return Err(SearchError::BadArgument(format!(
                    "Operator {} is not supported on field {}",
                    param.operator, field.public_name
                )));
            }
            let clauses = param
                .values
                .iter()
                .map(|v| Wildcard {
                    field: field.exact_path(),
                    pattern: match param.operator {
                        Operator::Contains => format!("*{}*", v),
                        Operator::StartsWith => format!("{}*", v),
                        _ => format!("*{}", v),
                    },
                })
                .collect::<Vec<_>>();
            if clauses.is_empty() {
                return Err(empty_param(param));
            }
            return Ok(Fragment::Wildcards {
                clauses,
                negated: param.negated,
            });
        }
        Operator::IsNull => Fragment::Filter(Filter::Missing {
            field: field.storage_path(),
        }),
    };

    match fragment {
        Fragment::Filter(filter) if param.negated => Ok(Fragment::Filter(filter.negate())),
        other => Ok(other),
    }
}

fn term_filter(field: &FieldDefinition, path: String, values: &[String]) -> SearchResult<Filter> {
    match values {
        [] => Err(SearchError::BadArgument(format!(
            "No usable value for field {}",
            field.public_name
        ))),
        [single] => Ok(Filter::Term {
            field: path,
            value: typed_value(field, single),
        }),
        many => Ok(Filter::Terms {
            field: path,
            values: many.iter().map(|v| typed_value(field, v)).collect(),
        }),
    }
}

fn empty_param(param: &SearchParam) -> SearchError {
    SearchError::BadArgument(format!("No usable value for field {}", param.name()))
}

/// JSON value of the field's type; anything unparseable stays a string
fn typed_value(field: &FieldDefinition, value: &str) -> Value {
    match field.data_type {
        DataType::Integer => value
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(value.to_string())),
        DataType::Boolean => match value {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            other => Value::String(other.to_string()),
        },
        _ => Value::String(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::params::{normalize, NormalizeOptions, RawParams};
    use chrono::{TimeZone, Utc};

    fn catalog() -> FieldCatalog {
        FieldCatalog::builtin().unwrap()
    }

    fn normalized(raw: RawParams) -> NormalizedParams {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        normalize(&raw, &catalog(), &NormalizeOptions::new(now)).unwrap()
    }

    fn param(name: &str, operator: Operator, values: &[&str]) -> SearchParam {
        SearchParam::new(
            catalog().lookup(name).unwrap().clone(),
            operator,
            values.iter().map(|v| v.to_string()).collect(),
        )
    }

    #[test]
    fn test_single_and_multiple_terms() {
        let single = compile_param(&param("product", Operator::Any, &["firefox"])).unwrap();
        assert_eq!(
            single,
            Fragment::Filter(Filter::Term {
                field: "processed_crash.product".to_string(),
                value: json!("firefox"),
            })
        );

        let many = compile_param(&param("product", Operator::Any, &["firefox", "fennec"])).unwrap();
        assert_eq!(
            many,
            Fragment::Filter(Filter::Terms {
                field: "processed_crash.product".to_string(),
                values: vec![json!("firefox"), json!("fennec")],
            })
        );
    }

    #[test]
    fn test_exact_match_routes_to_full_field() {
        let fragment = compile_param(&param("signature", Operator::Equal, &["3.0.1"])).unwrap();
        let Fragment::Filter(Filter::Term { field, .. }) = fragment else {
            panic!("expected a term filter");
        };
        assert_eq!(field, "processed_crash.signature.full");

        // fields without a full version keep the plain path
        let fragment = compile_param(&param("product", Operator::Equal, &["Firefox"])).unwrap();
        let Fragment::Filter(Filter::Term { field, .. }) = fragment else {
            panic!("expected a term filter");
        };
        assert_eq!(field, "processed_crash.product");
    }

    #[test]
    fn test_wildcard_patterns() {
        let cases = [
            (Operator::Contains, "*oom*"),
            (Operator::StartsWith, "oom*"),
            (Operator::EndsWith, "*oom"),
        ];
        for (operator, expected) in cases {
            let fragment = compile_param(&param("signature", operator, &["oom"])).unwrap();
            assert_eq!(
                fragment,
                Fragment::Wildcards {
                    clauses: vec![Wildcard {
                        field: "processed_crash.signature.full".to_string(),
                        pattern: expected.to_string(),
                    }],
                    negated: false,
                }
            );
        }
    }

    #[test]
    fn test_range_on_integer_field() {
        let fragment = compile_param(&param("uptime", Operator::GreaterOrEqual, &["60"])).unwrap();
        assert_eq!(
            fragment,
            Fragment::Filter(Filter::Range {
                field: "processed_crash.uptime".to_string(),
                bound: "gte",
                value: json!(60),
            })
        );
    }

    #[test]
    fn test_range_on_text_field_is_rejected() {
        let result = compile_param(&param("signature", Operator::Greater, &["a"]));
        assert!(matches!(result, Err(SearchError::BadArgument(_))));
    }

    #[test]
    fn test_null_operator() {
        let fragment = compile_param(&param("email", Operator::IsNull, &[])).unwrap();
        assert_eq!(
            fragment.clone(),
            Fragment::Filter(Filter::Missing {
                field: "processed_crash.email".to_string()
            })
        );
        assert_eq!(
            Filter::Missing { field: "processed_crash.email".to_string() }.to_json(),
            json!({ "missing": { "field": "processed_crash.email" } })
        );
    }

    #[test]
    fn test_negation_round_trip() {
        let positive = compile_param(&param("signature", Operator::Equal, &["x"])).unwrap();
        let negative = compile_param(&param("signature", Operator::Equal, &["x"]).negated()).unwrap();

        let (Fragment::Filter(positive), Fragment::Filter(negative)) = (positive, negative) else {
            panic!("expected filters");
        };
        assert_eq!(negative, Filter::Not(Box::new(positive.clone())));
        assert_eq!(negative.clone().negate(), positive);
        assert_eq!(positive.clone().negate().negate(), positive);
    }

    #[test]
    fn test_negated_wildcard_goes_to_must_not() {
        let request = normalized(RawParams::new().with("signature", "!~shutdown"));
        let compiled = QueryCompiler::new(&catalog(), 50).compile(&request, &[]).unwrap();

        assert!(compiled.wildcards.is_empty());
        assert_eq!(compiled.excluded_wildcards.len(), 1);

        let body = compiled.to_json();
        let bool_query = &body["query"]["filtered"]["query"]["bool"];
        assert_eq!(
            bool_query["must_not"][0],
            json!({ "wildcard": { "processed_crash.signature.full": "*shutdown*" } })
        );
        assert_eq!(bool_query["must"][0], json!({ "match_all": {} }));
    }

    #[test]
    fn test_wildcards_are_disjoined() {
        let request = normalized(
            RawParams::new()
                .with("signature", "~oom")
                .with("reason", "$exception"),
        );
        let compiled = QueryCompiler::new(&catalog(), 50).compile(&request, &[]).unwrap();
        let body = compiled.to_json();

        let should = body["query"]["filtered"]["query"]["bool"]["should"]
            .as_array()
            .unwrap();
        assert_eq!(should.len(), 2);
        assert_eq!(
            body["query"]["filtered"]["query"]["bool"]["minimum_should_match"],
            json!(1)
        );
    }

    #[test]
    fn test_beta_version_compiles_to_conjunction() {
        let versions = vec![ResolvedVersionFilter {
            product: "alpha".to_string(),
            version: "3.0".to_string(),
            channel: Some(ChannelFilter::Only("beta".to_string())),
            build_ids: Some(vec!["1001".to_string(), "1002".to_string()]),
        }];
        let catalog = catalog();
        let compiler = QueryCompiler::new(&catalog, 50);
        let filter = compiler.compile_versions(&versions).unwrap();

        assert_eq!(
            filter.to_json(),
            json!({ "and": [
                { "term": { "processed_crash.product": "alpha" } },
                { "term": { "processed_crash.version": "3.0" } },
                { "term": { "processed_crash.release_channel": "beta" } },
                { "terms": { "processed_crash.build": [1001, 1002] } },
            ]})
        );
    }

    #[test]
    fn test_several_versions_are_ored() {
        let versions = vec![
            ResolvedVersionFilter {
                product: "alpha".to_string(),
                version: "3.0".to_string(),
                channel: Some(ChannelFilter::Exclude(vec!["beta".to_string()])),
                build_ids: None,
            },
            ResolvedVersionFilter {
                product: "beta".to_string(),
                version: "1.0".to_string(),
                channel: None,
                build_ids: None,
            },
        ];
        let filter = QueryCompiler::new(&catalog(), 50)
            .compile_versions(&versions)
            .unwrap();

        let Filter::Or(branches) = filter else {
            panic!("expected an OR");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(
            branches[0].to_json()["and"][2],
            json!({ "not": { "filter": { "terms": { "processed_crash.release_channel": ["beta"] } } } })
        );
    }

    #[test]
    fn test_facets_share_the_filter_set() {
        let request = normalized(
            RawParams::new()
                .with("product", "Firefox")
                .with("_facets", "signature")
                .with("_facets_size", "500"),
        );
        let compiled = QueryCompiler::new(&catalog(), 50).compile(&request, &[]).unwrap();
        let body = compiled.to_json();

        let facet = &body["facets"]["signature"];
        assert_eq!(facet["terms"]["field"], json!("processed_crash.signature.full"));
        assert_eq!(facet["terms"]["size"], json!(50));
        assert_eq!(facet["facet_filter"], body["query"]["filtered"]["filter"]);
    }

    #[test]
    fn test_unknown_facet_is_bad_argument() {
        let request = normalized(RawParams::new().with("_facets", "nope"));
        let result = QueryCompiler::new(&catalog(), 50).compile(&request, &[]);
        assert!(matches!(result, Err(SearchError::BadArgument(_))));
    }

    #[test]
    fn test_unfacetable_field_is_bad_argument() {
        let request = normalized(RawParams::new().with("_facets", "dump"));
        let result = QueryCompiler::new(&catalog(), 50).compile(&request, &[]);
        assert!(matches!(result, Err(SearchError::BadArgument(_))));
    }

    #[test]
    fn test_sort_and_pagination() {
        let request = normalized(
            RawParams::new()
                .with("_sort", "-date")
                .with("_results_number", "10")
                .with("_results_offset", "30"),
        );
        let compiled = QueryCompiler::new(&catalog(), 50).compile(&request, &[]).unwrap();
        let body = compiled.to_json();

        assert_eq!(body["size"], json!(10));
        assert_eq!(body["from"], json!(30));
        assert_eq!(
            body["sort"],
            json!([{ "processed_crash.date_processed": { "order": "desc" } }])
        );
    }

    #[test]
    fn test_compilation_is_idempotent() {
        let request = normalized(
            RawParams::new()
                .with("product", "Firefox")
                .with("signature", "~oom")
                .with("platform", "!Linux")
                .with("_facets", "platform"),
        );
        let catalog = catalog();
        let compiler = QueryCompiler::new(&catalog, 50);
        let first = serde_json::to_string(&compiler.compile(&request, &[]).unwrap()).unwrap();
        let second = serde_json::to_string(&compiler.compile(&request, &[]).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_default_date_bounds_become_range_filters() {
        let request = normalized(RawParams::new());
        let compiled = QueryCompiler::new(&catalog(), 50).compile(&request, &[]).unwrap();

        assert_eq!(
            compiled.filters,
            vec![
                Filter::Range {
                    field: "processed_crash.date_processed".to_string(),
                    bound: "lte",
                    value: json!("2024-03-15T12:00:00Z"),
                },
                Filter::Range {
                    field: "processed_crash.date_processed".to_string(),
                    bound: "gte",
                    value: json!("2024-03-08T12:00:00Z"),
                },
            ]
        );
        assert_eq!(
            compiled.to_json()["query"]["filtered"]["query"],
            json!({ "match_all": {} })
        );
    }
}
