//! Search backend abstraction and implementations

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

/// Failure reported by a backend call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Non-success HTTP status with the raw response body
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced a response
    #[error("transport error: {0}")]
    Transport(String),

    /// The response could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Index-based query execution
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run `body` against the given indices
    async fn search(&self, indices: &[String], body: &Value) -> Result<Value, BackendError>;

    /// Fetch the live mapping of the given indices
    async fn mapping(&self, indices: &[String]) -> Result<Value, BackendError>;
}

/// Elasticsearch-style HTTP backend
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, indices: &[String], endpoint: &str) -> String {
        format!("{}/{}/{}", self.base_url, indices.join(","), endpoint)
    }

    async fn read(response: reqwest::Response) -> Result<Value, BackendError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl SearchBackend for HttpBackend {
    async fn search(&self, indices: &[String], body: &Value) -> Result<Value, BackendError> {
        let url = self.url(indices, "_search");
        tracing::debug!(url = %url, "Sending search request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Self::read(response).await
    }

    async fn mapping(&self, indices: &[String]) -> Result<Value, BackendError> {
        let url = self.url(indices, "_mapping");
        tracing::debug!(url = %url, "Fetching mapping");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Self::read(response).await
    }
}

/// In-memory backend for tests and local runs.
///
/// Serves stored documents from the requested indices in index order. Filters
/// and wildcard clauses are not evaluated; `from`/`size` and term facets are.
/// Requests touching an index that does not exist fail the way Elasticsearch
/// does, with a 404 naming the first missing index.
#[derive(Default)]
pub struct InMemoryBackend {
    documents: Mutex<BTreeMap<String, Vec<Value>>>,
    mappings: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<Vec<String>>>,
    failures: Mutex<VecDeque<BackendError>>,
    latency: Option<Duration>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty index
    pub fn with_index(self, index: impl Into<String>) -> Self {
        self.documents.lock().entry(index.into()).or_default();
        self
    }

    pub fn with_documents(self, index: impl Into<String>, docs: Vec<Value>) -> Self {
        self.documents.lock().entry(index.into()).or_default().extend(docs);
        self
    }

    pub fn with_mapping(self, index: impl Into<String>, mapping: Value) -> Self {
        let index = index.into();
        self.documents.lock().entry(index.clone()).or_default();
        self.mappings.lock().insert(index, mapping);
        self
    }

    /// Delay every call, e.g. to exercise timeouts and cancellation
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next call fail with `error`; queued failures fire in order
    pub fn fail_next(&self, error: BackendError) {
        self.failures.lock().push_back(error);
    }

    /// Index lists of every call made so far, oldest first
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    async fn begin(&self, indices: &[String]) -> Result<(), BackendError> {
        self.calls.lock().push(indices.to_vec());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let documents = self.documents.lock();
        match indices.iter().find(|index| !documents.contains_key(*index)) {
            Some(missing) => Err(BackendError::Status {
                status: 404,
                body: json!({
                    "error": format!("IndexMissingException[[{}] missing]", missing),
                    "status": 404,
                })
                .to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    async fn search(&self, indices: &[String], body: &Value) -> Result<Value, BackendError> {
        self.begin(indices).await?;

        let matched: Vec<Value> = {
            let documents = self.documents.lock();
            indices
                .iter()
                .filter_map(|index| documents.get(index))
                .flatten()
                .cloned()
                .collect()
        };

        let from = body["from"].as_u64().unwrap_or(0) as usize;
        let size = body["size"].as_u64().unwrap_or(10) as usize;
        let hits: Vec<Value> = matched
            .iter()
            .skip(from)
            .take(size)
            .map(|doc| json!({ "_source": doc }))
            .collect();

        let mut facets = Map::new();
        if let Some(requested) = body["facets"].as_object() {
            for (name, spec) in requested {
                let field = spec["terms"]["field"].as_str().unwrap_or_default();
                let limit = spec["terms"]["size"].as_u64().unwrap_or(10) as usize;
                facets.insert(name.clone(), term_counts(&matched, field, limit));
            }
        }

        Ok(json!({
            "hits": { "total": matched.len(), "hits": hits },
            "facets": facets,
        }))
    }

    async fn mapping(&self, indices: &[String]) -> Result<Value, BackendError> {
        self.begin(indices).await?;

        let mappings = self.mappings.lock();
        let found: Map<String, Value> = indices
            .iter()
            .filter_map(|index| mappings.get(index).map(|m| (index.clone(), m.clone())))
            .collect();
        Ok(Value::Object(found))
    }
}

/// Value at a dotted path; a trailing `.full` sub-field reads its parent
fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_suffix(".full").unwrap_or(path);
    path.split('.').try_fold(doc, |node, key| node.get(key))
}

fn term_counts(docs: &[Value], field: &str, limit: usize) -> Value {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for doc in docs {
        let term = match lookup_path(doc, field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => continue,
            Some(other) => other.to_string(),
        };
        *counts.entry(term).or_default() += 1;
    }

    let mut terms: Vec<(String, u64)> = counts.into_iter().collect();
    terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    terms.truncate(limit);

    let distinct: BTreeSet<&str> = terms.iter().map(|(t, _)| t.as_str()).collect();
    json!({
        "_type": "terms",
        "total": distinct.len(),
        "terms": terms
            .iter()
            .map(|(term, count)| json!({ "term": term, "count": count }))
            .collect::<Vec<_>>(),
    })
}
