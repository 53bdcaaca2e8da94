//! Crash report search over date-partitioned indices
//!
//! This module turns loosely typed request parameters into backend queries and
//! runs them against whatever indices exist for the requested date range:
//!
//! - **Field Catalog**: public field names, storage paths, types and facetability
//! - **Parameter Normalization**: operator prefixes, aliases, type coercion, date defaults
//! - **Version Resolution**: `product:version` keys rewritten per release channel
//! - **Query Compilation**: boolean filter trees, wildcard clauses, facets, sort
//! - **Resilient Execution**: missing indices dropped and the call retried
//! - **Result Formatting**: storage names mapped back to public names
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │           SearchService                          │
//! ├─────────────────────────────────────────────────┤
//! │  - search()          - search_in()              │
//! │  - search_until()    - get_missing_fields()     │
//! │  - get_mapping()     - reload_fields()          │
//! └─────────────────────────────────────────────────┘
//!          │ normalize → resolve versions → compile
//!          ▼
//! ┌─────────────────────────────────────────────────┐
//! │           ResilientExecutor                      │
//! ├─────────────────────────────────────────────────┤
//! │  - date range → index names                     │
//! │  - 404 "[[index] missing]" → drop, retry        │
//! │  - optional MissingIndexCache                   │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │           SearchBackend                          │
//! ├─────────────────────────────────────────────────┤
//! │  - HttpBackend (Elasticsearch-style REST)       │
//! │  - InMemoryBackend (tests, local runs)          │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use crash_search::search::{HttpBackend, RawParams, SearchConfig, SearchService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SearchConfig::default();
//!     let backend = HttpBackend::new(&config.backend_url, config.request_timeout())?;
//!     let search = SearchService::new(Arc::new(backend), config)?;
//!
//!     let params = RawParams::new()
//!         .with("product", "Firefox")
//!         .with("signature", "~OOM")
//!         .with("_facets", "platform");
//!
//!     if let Some(results) = search.search(&params).await?.into_results() {
//!         println!("Found {} crash reports", results.total);
//!     }
//!
//!     Ok(())
//! }
//! ```

mod backend;
mod config;
mod error;
mod executor;
mod fields;
mod format;
mod indices;
mod mapping;
mod params;
mod query;
mod service;
mod versions;

pub use backend::{BackendError, HttpBackend, InMemoryBackend, SearchBackend};
pub use config::{validate_index_pattern, SearchConfig, SearchConfigBuilder};
pub use error::{SearchError, SearchResult};
pub use executor::{
    missing_index_name, Execution, ExecutorState, MissingIndexPolicy, Request, ResilientExecutor,
};
pub use fields::{DataType, FieldCatalog, FieldDefinition, Namespace, FULL_SUFFIX};
pub use format::{Document, FacetBucket, ResultFormatter, SearchResponse};
pub use indices::{index_name, recent_indices, resolve_indices};
pub use mapping::{mapped_paths, missing_fields, render_mapping};
pub use params::{
    normalize, parse_datetime, DateRange, NormalizeOptions, NormalizedParams, Operator, Pagination,
    RawParams, SearchParam, SortKey,
};
pub use query::{CompiledQuery, FacetSpec, Filter, Fragment, QueryCompiler, SortSpec, Wildcard};
pub use service::{SearchOutcome, SearchService};
pub use versions::{
    ChannelFilter, ResolvedVersionFilter, StaticVersionInfo, VersionInfo, VersionInfoProvider,
};
