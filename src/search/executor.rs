//! Resilient execution across date-partitioned indices.
//!
//! Indices are created lazily, one per time bucket, so a date range routinely
//! names indices that do not exist yet. The executor runs a small state machine:
//!
//! ```text
//! Ready(indices) ──► Executing ──► Success(response)
//!      ▲                 │
//!      │                 ├──► MissingIndex(name) ──► Ready(indices - name)
//!      │                 │
//!      └── (empty) ──► Empty          └──► Fatal(error)
//! ```
//!
//! Each missing index costs one call, so `n` indices converge in at most `n + 1`
//! calls. No backoff is applied: removing the index is a deterministic fix.

use crate::search::backend::{BackendError, SearchBackend};
use crate::search::error::{SearchError, SearchResult};
use crate::state::MissingIndexCache;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

static MISSING_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\]\[]+)\] missing\]").expect("missing-index pattern is valid"));

/// What to do when the backend reports a missing index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingIndexPolicy {
    /// Drop the index and retry (auto-resolved date ranges)
    Heal,
    /// Report `ResourceNotFound` (indices the caller pinned explicitly)
    Fail,
}

/// Executor states, kept for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorState {
    Ready(usize),
    Executing,
    Success,
    MissingIndex(String),
    Empty,
    Fatal,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorState::Ready(n) => write!(f, "ready({} indices)", n),
            ExecutorState::Executing => write!(f, "executing"),
            ExecutorState::Success => write!(f, "success"),
            ExecutorState::MissingIndex(name) => write!(f, "missing-index({})", name),
            ExecutorState::Empty => write!(f, "empty"),
            ExecutorState::Fatal => write!(f, "fatal"),
        }
    }
}

/// Terminal outcome of a healthy run
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// Raw backend response plus the indices that answered
    Success { response: Value, indices: Vec<String> },
    /// Every candidate index was missing
    Empty,
}

/// Backend call made on each iteration
#[derive(Debug, Clone, Copy)]
pub enum Request<'b> {
    Search(&'b Value),
    Mapping,
}

pub struct ResilientExecutor<'a> {
    backend: &'a dyn SearchBackend,
    cache: Option<&'a MissingIndexCache>,
    timeout: Duration,
}

impl<'a> ResilientExecutor<'a> {
    pub fn new(backend: &'a dyn SearchBackend, timeout: Duration) -> Self {
        Self {
            backend,
            cache: None,
            timeout,
        }
    }

    pub fn with_cache(mut self, cache: Option<&'a MissingIndexCache>) -> Self {
        self.cache = cache;
        self
    }

    pub async fn execute(
        &self,
        indices: Vec<String>,
        request: Request<'_>,
        policy: MissingIndexPolicy,
    ) -> SearchResult<Execution> {
        let mut candidates = match (self.cache, policy) {
            (Some(cache), MissingIndexPolicy::Heal) => cache.retain_present(indices).await,
            _ => indices,
        };

        loop {
            let mut state = ExecutorState::Ready(candidates.len());
            tracing::trace!(state = %state, "Executor transition");

            if candidates.is_empty() {
                state = ExecutorState::Empty;
                tracing::debug!(state = %state, "No index left to query");
                return Ok(Execution::Empty);
            }

            state = ExecutorState::Executing;
            tracing::trace!(state = %state, indices = candidates.len(), "Executor transition");

            let result = self.call(&candidates, request).await;
            let error = match result {
                Ok(response) => {
                    tracing::trace!(state = %ExecutorState::Success, "Executor transition");
                    return Ok(Execution::Success {
                        response,
                        indices: candidates,
                    });
                }
                Err(error) => error,
            };

            let Some(name) = missing_index_name(&error) else {
                tracing::debug!(state = %ExecutorState::Fatal, error = %error, "Backend call failed");
                return Err(SearchError::Database(error.to_string()));
            };
            state = ExecutorState::MissingIndex(name.clone());

            if policy == MissingIndexPolicy::Fail {
                return Err(SearchError::ResourceNotFound(format!("index {}", name)));
            }

            let Some(position) = candidates.iter().position(|c| *c == name) else {
                return Err(SearchError::Database(format!(
                    "backend reported missing index {} which was not requested",
                    name
                )));
            };

            tracing::warn!(state = %state, index = %name, "Index missing, retrying without it");
            candidates.remove(position);
            if let Some(cache) = self.cache {
                cache.mark_missing(&name).await;
            }
        }
    }

    async fn call(&self, indices: &[String], request: Request<'_>) -> Result<Value, BackendError> {
        let call = async {
            match request {
                Request::Search(body) => self.backend.search(indices, body).await,
                Request::Mapping => self.backend.mapping(indices).await,
            }
        };

        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(BackendError::Transport(format!(
                    "backend call timed out after {:?}",
                    self.timeout
                )))
            })
    }
}

/// Name of the missing index carried by a 404, if that is what this error is
pub fn missing_index_name(error: &BackendError) -> Option<String> {
    let BackendError::Status { status: 404, body } = error else {
        return None;
    };

    if let Some(captures) = MISSING_INDEX.captures(body) {
        return Some(captures[1].to_string());
    }

    // newer servers: {"error": {"type": "index_not_found_exception", "index": "..."}}
    let payload: Value = serde_json::from_str(body).ok()?;
    let error = &payload["error"];
    if error["type"] == "index_not_found_exception" {
        return error["index"].as_str().map(str::to_string);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::backend::InMemoryBackend;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_index_name_from_legacy_message() {
        let error = BackendError::Status {
            status: 404,
            body: r#"{"error":"IndexMissingException[[socorro_240101] missing]","status":404}"#
                .to_string(),
        };
        assert_eq!(missing_index_name(&error), Some("socorro_240101".to_string()));
    }

    #[test]
    fn test_missing_index_name_from_structured_error() {
        let error = BackendError::Status {
            status: 404,
            body: json!({
                "error": { "type": "index_not_found_exception", "index": "socorro_240102" },
                "status": 404,
            })
            .to_string(),
        };
        assert_eq!(missing_index_name(&error), Some("socorro_240102".to_string()));
    }

    #[test]
    fn test_other_errors_are_not_missing_indices() {
        let server_error = BackendError::Status {
            status: 500,
            body: "[[socorro_240101] missing]".to_string(),
        };
        assert_eq!(missing_index_name(&server_error), None);

        let not_found = BackendError::Status {
            status: 404,
            body: "no handler found".to_string(),
        };
        assert_eq!(missing_index_name(&not_found), None);
        assert_eq!(missing_index_name(&BackendError::Transport("x".to_string())), None);
    }

    #[tokio::test]
    async fn test_heals_missing_indices() {
        let backend = InMemoryBackend::new().with_index("b");
        let executor = ResilientExecutor::new(&backend, Duration::from_secs(5));

        let body = json!({ "size": 10 });
        let outcome = executor
            .execute(names(&["a", "b", "c"]), Request::Search(&body), MissingIndexPolicy::Heal)
            .await
            .unwrap();

        let Execution::Success { indices, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(indices, names(&["b"]));
        assert_eq!(
            backend.calls(),
            vec![names(&["a", "b", "c"]), names(&["b", "c"]), names(&["b"])]
        );
    }

    #[tokio::test]
    async fn test_all_missing_terminates_empty_within_n_plus_one_calls() {
        let backend = InMemoryBackend::new();
        let executor = ResilientExecutor::new(&backend, Duration::from_secs(5));

        let body = json!({});
        let outcome = executor
            .execute(names(&["a", "b", "c", "d"]), Request::Search(&body), MissingIndexPolicy::Heal)
            .await
            .unwrap();

        assert_eq!(outcome, Execution::Empty);
        assert!(backend.call_count() <= 5);
    }

    #[tokio::test]
    async fn test_pinned_indices_fail_with_resource_not_found() {
        let backend = InMemoryBackend::new().with_index("a");
        let executor = ResilientExecutor::new(&backend, Duration::from_secs(5));

        let body = json!({});
        let result = executor
            .execute(names(&["a", "zzz"]), Request::Search(&body), MissingIndexPolicy::Fail)
            .await;

        assert!(matches!(result, Err(SearchError::ResourceNotFound(_))));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unrequested_missing_index_is_fatal() {
        let backend = InMemoryBackend::new().with_index("a");
        backend.fail_next(BackendError::Status {
            status: 404,
            body: "IndexMissingException[[elsewhere] missing]".to_string(),
        });
        let executor = ResilientExecutor::new(&backend, Duration::from_secs(5));

        let body = json!({});
        let result = executor
            .execute(names(&["a"]), Request::Search(&body), MissingIndexPolicy::Heal)
            .await;
        assert!(matches!(result, Err(SearchError::Database(_))));
    }

    #[tokio::test]
    async fn test_other_backend_errors_are_not_retried() {
        let backend = InMemoryBackend::new().with_index("a");
        backend.fail_next(BackendError::Status {
            status: 500,
            body: "boom".to_string(),
        });
        let executor = ResilientExecutor::new(&backend, Duration::from_secs(5));

        let body = json!({});
        let result = executor
            .execute(names(&["a"]), Request::Search(&body), MissingIndexPolicy::Heal)
            .await;

        assert!(matches!(result, Err(SearchError::Database(_))));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_skips_known_missing_indices() {
        let backend = InMemoryBackend::new().with_index("b");
        let cache = MissingIndexCache::new(16, Duration::from_secs(60));
        let executor =
            ResilientExecutor::new(&backend, Duration::from_secs(5)).with_cache(Some(&cache));

        let body = json!({});
        executor
            .execute(names(&["a", "b"]), Request::Search(&body), MissingIndexPolicy::Heal)
            .await
            .unwrap();
        assert!(cache.is_missing("a").await);
        assert_eq!(backend.call_count(), 2);

        executor
            .execute(names(&["a", "b"]), Request::Search(&body), MissingIndexPolicy::Heal)
            .await
            .unwrap();
        assert_eq!(backend.call_count(), 3);
        assert_eq!(backend.calls()[2], names(&["b"]));
    }

    #[tokio::test]
    async fn test_timeout_is_a_database_error() {
        let backend = InMemoryBackend::new()
            .with_index("a")
            .with_latency(Duration::from_millis(200));
        let executor = ResilientExecutor::new(&backend, Duration::from_millis(20));

        let body = json!({});
        let result = executor
            .execute(names(&["a"]), Request::Search(&body), MissingIndexPolicy::Heal)
            .await;
        assert!(matches!(result, Err(SearchError::Database(_))));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ExecutorState::Ready(3).to_string(), "ready(3 indices)");
        assert_eq!(
            ExecutorState::MissingIndex("a".to_string()).to_string(),
            "missing-index(a)"
        );
    }
}
