//! Search orchestration: normalize, resolve, compile, execute, format

use crate::search::backend::SearchBackend;
use crate::search::config::SearchConfig;
use crate::search::error::{SearchError, SearchResult};
use crate::search::executor::{Execution, MissingIndexPolicy, Request, ResilientExecutor};
use crate::search::fields::{FieldCatalog, FieldDefinition};
use crate::search::format::{ResultFormatter, SearchResponse};
use crate::search::indices::{recent_indices, resolve_indices};
use crate::search::mapping::{missing_fields, render_mapping};
use crate::search::params::{normalize, NormalizeOptions, NormalizedParams, RawParams};
use crate::search::query::QueryCompiler;
use crate::search::versions::{self, StaticVersionInfo, VersionInfoProvider};
use crate::state::MissingIndexCache;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a search produced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchOutcome {
    Results(SearchResponse),
    /// `_return_query`: the compiled request, not executed
    Query { indices: Vec<String>, query: Value },
}

impl SearchOutcome {
    pub fn into_results(self) -> Option<SearchResponse> {
        match self {
            SearchOutcome::Results(results) => Some(results),
            SearchOutcome::Query { .. } => None,
        }
    }
}

/// Entry point for crash report searches
pub struct SearchService {
    backend: Arc<dyn SearchBackend>,
    catalog: RwLock<Arc<FieldCatalog>>,
    versions: Arc<dyn VersionInfoProvider>,
    cache: Option<MissingIndexCache>,
    config: SearchConfig,
    fixed_now: Option<DateTime<Utc>>,
}

impl SearchService {
    /// Create a service from configuration.
    ///
    /// Field definitions and version info are read from the configured paths
    /// when set; otherwise the built-in catalog and an empty version table are used.
    pub fn new(backend: Arc<dyn SearchBackend>, config: SearchConfig) -> SearchResult<Self> {
        config.validate()?;

        let catalog = match &config.fields_path {
            Some(path) => FieldCatalog::from_path(path)?,
            None => FieldCatalog::builtin()?,
        };
        let versions = match &config.versions_path {
            Some(path) => StaticVersionInfo::from_path(path)?,
            None => StaticVersionInfo::new(),
        };
        let cache = (config.missing_index_cache_ttl_secs > 0).then(|| {
            MissingIndexCache::new(
                config.missing_index_cache_capacity,
                Duration::from_secs(config.missing_index_cache_ttl_secs),
            )
        });

        tracing::info!(
            fields = catalog.fields().len(),
            catalog_version = catalog.version(),
            versions = versions.len(),
            index_pattern = %config.index_pattern,
            "Search service initialized"
        );

        Ok(Self {
            backend,
            catalog: RwLock::new(Arc::new(catalog)),
            versions: Arc::new(versions),
            cache,
            config,
            fixed_now: None,
        })
    }

    pub fn with_version_info(mut self, versions: Arc<dyn VersionInfoProvider>) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_cache(mut self, cache: Option<MissingIndexCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Pin the clock, mostly for tests
    pub fn with_fixed_time(mut self, now: DateTime<Utc>) -> Self {
        self.fixed_now = Some(now);
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Current field catalog
    pub fn catalog(&self) -> Arc<FieldCatalog> {
        self.catalog.read().clone()
    }

    /// Swap in a new catalog; searches already running keep the old one
    pub fn reload_fields(&self, catalog: FieldCatalog) {
        tracing::info!(
            fields = catalog.fields().len(),
            catalog_version = catalog.version(),
            "Field catalog reloaded"
        );
        *self.catalog.write() = Arc::new(catalog);
    }

    /// Search across the indices covering the requested date range
    pub async fn search(&self, raw: &RawParams) -> SearchResult<SearchOutcome> {
        self.run(raw, None).await
    }

    /// Search exactly the given indices; a missing one is `ResourceNotFound`
    pub async fn search_in(&self, raw: &RawParams, indices: Vec<String>) -> SearchResult<SearchOutcome> {
        if indices.is_empty() {
            return Err(SearchError::bad_argument("at least one index is required"));
        }
        self.run(raw, Some(indices)).await
    }

    /// Search, giving up with `Cancelled` as soon as `cancel` completes
    pub async fn search_until<F>(&self, raw: &RawParams, cancel: F) -> SearchResult<SearchOutcome>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                tracing::debug!("Search cancelled by caller");
                Err(SearchError::Cancelled)
            }
            result = self.search(raw) => result,
        }
    }

    /// Storage fields mapped in the backend that the catalog does not know
    pub async fn get_missing_fields(&self, indices: Option<Vec<String>>) -> SearchResult<Vec<String>> {
        let (indices, policy) = match indices {
            Some(indices) => (indices, MissingIndexPolicy::Fail),
            None => (
                recent_indices(
                    self.now(),
                    self.config.default_window_days,
                    &self.config.index_pattern,
                ),
                MissingIndexPolicy::Heal,
            ),
        };

        let catalog = self.catalog();
        match self.executor().execute(indices, Request::Mapping, policy).await? {
            Execution::Empty => Ok(Vec::new()),
            Execution::Success { response, .. } => Ok(missing_fields(&response, &catalog)),
        }
    }

    /// Index mapping implied by the catalog, optionally with one field replaced
    pub fn get_mapping(&self, overwrite: Option<FieldDefinition>) -> SearchResult<Value> {
        let catalog = self.catalog();
        let mapping = match overwrite {
            Some(field) => render_mapping(&catalog.with_override(field)?, &self.config.doctype),
            None => render_mapping(&catalog, &self.config.doctype),
        };
        Ok(mapping)
    }

    fn now(&self) -> DateTime<Utc> {
        self.fixed_now.unwrap_or_else(Utc::now)
    }

    fn executor(&self) -> ResilientExecutor<'_> {
        ResilientExecutor::new(self.backend.as_ref(), self.config.request_timeout())
            .with_cache(self.cache.as_ref())
    }

    fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            now: self.now(),
            default_window_days: self.config.default_window_days,
            max_window_days: self.config.max_window_days,
            max_results_number: self.config.max_results_number,
            required_params: self.config.required_params.clone(),
        }
    }

    async fn run(&self, raw: &RawParams, pinned: Option<Vec<String>>) -> SearchResult<SearchOutcome> {
        let start = Instant::now();
        let catalog = self.catalog();

        let mut request = normalize(raw, &catalog, &self.normalize_options())?;
        let resolved = self.resolve_versions(&mut request).await?;
        let compiled = QueryCompiler::new(&catalog, self.config.max_facet_terms)
            .compile(&request, &resolved)?;
        let body = compiled.to_json();

        let (indices, policy) = match pinned {
            Some(indices) => (indices, MissingIndexPolicy::Fail),
            None => (
                resolve_indices(
                    request.date_range.from,
                    request.date_range.to,
                    &self.config.index_pattern,
                ),
                MissingIndexPolicy::Heal,
            ),
        };

        if request.return_query {
            return Ok(SearchOutcome::Query { indices, query: body });
        }

        tracing::debug!(
            indices = indices.len(),
            params = request.params.len(),
            facets = request.facets.len(),
            "Executing search"
        );

        let results = match self.executor().execute(indices, Request::Search(&body), policy).await? {
            Execution::Empty => SearchResponse::empty(),
            Execution::Success { response, .. } => ResultFormatter::new(&catalog)
                .with_columns(&request.columns)
                .format(&response)?,
        };

        tracing::info!(
            total = results.total,
            returned = results.hits.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Search completed"
        );
        Ok(SearchOutcome::Results(results))
    }

    async fn resolve_versions(
        &self,
        request: &mut NormalizedParams,
    ) -> SearchResult<Vec<versions::ResolvedVersionFilter>> {
        let keys = versions::extract_version_keys(&mut request.params);
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let info = self.versions.versions_info(&keys).await?;
        Ok(versions::resolve(&keys, &info, &self.config.restricted_channels))
    }
}
