//! Backend responses to public search results

use crate::search::error::{SearchError, SearchResult};
use crate::search::fields::{FieldCatalog, Namespace};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A crash report keyed by public field names
pub type Document = Map<String, Value>;

/// One facet bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetBucket {
    pub term: Value,
    pub count: u64,
}

/// Search results as returned to callers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub total: u64,
    pub hits: Vec<Document>,
    pub facets: BTreeMap<String, Vec<FacetBucket>>,
}

impl SearchResponse {
    /// `{0, [], {}}`, returned when no index could be queried
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Renames storage fields of returned documents to public names
pub struct ResultFormatter<'a> {
    catalog: &'a FieldCatalog,
    columns: &'a [String],
}

impl<'a> ResultFormatter<'a> {
    pub fn new(catalog: &'a FieldCatalog) -> Self {
        Self {
            catalog,
            columns: &[],
        }
    }

    /// Only keep these public fields in returned documents
    pub fn with_columns(mut self, columns: &'a [String]) -> Self {
        self.columns = columns;
        self
    }

    pub fn format(&self, response: &Value) -> SearchResult<SearchResponse> {
        let Some(hits) = response.get("hits").filter(|hits| hits.is_object()) else {
            return Err(SearchError::database("backend response has no hits section"));
        };
        let total = parse_total(&hits["total"])?;

        let documents = match &hits["hits"] {
            Value::Array(raw_hits) => raw_hits.iter().map(|hit| self.document(hit)).collect(),
            Value::Null => Vec::new(),
            other => {
                return Err(SearchError::database(format!(
                    "hits.hits is not a list: {other}"
                )))
            }
        };

        Ok(SearchResponse {
            total,
            hits: documents,
            facets: parse_facets(response),
        })
    }

    /// Flatten one hit. Raw fields are written first so processed ones win
    pub fn document(&self, hit: &Value) -> Document {
        let source = hit.get("_source").unwrap_or(hit);
        let Some(source) = source.as_object() else {
            return Document::new();
        };

        let mut plain = Document::new();
        let mut raw = Vec::new();
        let mut processed = Vec::new();

        for (key, value) in source {
            if let Some(namespace) = namespace_of(key) {
                match value.as_object() {
                    Some(nested) => {
                        let target = match namespace {
                            Namespace::RawCrash => &mut raw,
                            Namespace::ProcessedCrash => &mut processed,
                        };
                        target.extend(nested.iter().map(|(k, v)| (k.as_str(), v)));
                    }
                    None => tracing::debug!(key = %key, "Ignoring non-object namespace value"),
                }
                continue;
            }

            match split_dotted(key) {
                Some((Namespace::RawCrash, name)) => raw.push((name, value)),
                Some((Namespace::ProcessedCrash, name)) => processed.push((name, value)),
                None => {
                    plain.insert(key.clone(), value.clone());
                }
            }
        }

        for (namespace, entries) in [
            (Namespace::RawCrash, raw),
            (Namespace::ProcessedCrash, processed),
        ] {
            for (storage_name, value) in entries {
                let public = self
                    .catalog
                    .by_storage(namespace, storage_name)
                    .map(|f| f.public_name.as_str())
                    .unwrap_or(storage_name);
                plain.insert(public.to_string(), value.clone());
            }
        }

        if !self.columns.is_empty() {
            plain.retain(|key, _| self.columns.iter().any(|c| c == key));
        }
        plain
    }
}

fn namespace_of(key: &str) -> Option<Namespace> {
    key.parse().ok()
}

fn split_dotted(key: &str) -> Option<(Namespace, &str)> {
    let (prefix, rest) = key.split_once('.')?;
    Some((namespace_of(prefix)?, rest))
}

/// `hits.total` is a bare number on older servers and `{"value": n}` on newer ones
fn parse_total(total: &Value) -> SearchResult<u64> {
    match total {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| SearchError::database(format!("invalid hit total {}", n))),
        Value::Object(obj) => parse_total(obj.get("value").unwrap_or(&Value::Null)),
        other => Err(SearchError::database(format!("invalid hit total {}", other))),
    }
}

fn parse_facets(response: &Value) -> BTreeMap<String, Vec<FacetBucket>> {
    let mut facets = BTreeMap::new();

    if let Some(map) = response["facets"].as_object() {
        for (name, facet) in map {
            let buckets = facet["terms"]
                .as_array()
                .map(|terms| buckets(terms, "term", "count"))
                .unwrap_or_default();
            facets.insert(name.clone(), buckets);
        }
    }

    // aggregation-style responses
    if let Some(map) = response["aggregations"].as_object() {
        for (name, agg) in map {
            let buckets = agg["buckets"]
                .as_array()
                .map(|items| buckets(items, "key", "doc_count"))
                .unwrap_or_default();
            facets.entry(name.clone()).or_insert(buckets);
        }
    }

    facets
}

fn buckets(items: &[Value], term_key: &str, count_key: &str) -> Vec<FacetBucket> {
    items
        .iter()
        .map(|item| FacetBucket {
            term: item[term_key].clone(),
            count: item[count_key].as_u64().unwrap_or(0),
        })
        .collect()
}
