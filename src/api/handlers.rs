use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::search::{FieldCatalog, FieldDefinition, RawParams, SearchOutcome};
use axum::{
    body::Bytes,
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        catalog_version: state.search.catalog().version(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub catalog_version: u32,
}

/// Run a search. Repeated keys accumulate (`?product=a&product=b`)
pub async fn search(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<SearchOutcome>> {
    let raw: RawParams = pairs.into_iter().collect();

    let outcome = state
        .search
        .search_until(&raw, tokio::time::sleep(state.request_timeout))
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Default, Deserialize)]
pub struct MissingFieldsQuery {
    /// Comma-separated index names; recent indices when absent
    pub indices: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MissingFieldsResponse {
    pub hits: Vec<String>,
    pub total: usize,
}

/// Storage fields present in the backend but unknown to the catalog
pub async fn missing_fields(
    State(state): State<AppState>,
    Query(query): Query<MissingFieldsQuery>,
) -> Result<Json<MissingFieldsResponse>> {
    let pinned = query.indices.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    });

    let hits = state.search.get_missing_fields(pinned).await?;
    Ok(Json(MissingFieldsResponse {
        total: hits.len(),
        hits,
    }))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct MappingRequest {
    /// Field to add or replace before rendering
    #[serde(default)]
    #[validate(nested)]
    pub overwrite: Option<FieldDefinition>,
}

/// Render the index mapping the catalog implies.
///
/// An empty body renders the catalog as is; anything else must be a valid request.
pub async fn mapping(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        MappingRequest::default()
    } else {
        serde_json::from_slice::<MappingRequest>(&body)
            .map_err(|e| AppError::BadArgument(format!("invalid mapping request: {}", e)))?
    };
    request.validate()?;

    let mapping = state.search.get_mapping(request.overwrite)?;
    Ok(Json(mapping))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FieldsResponse {
    pub version: u32,
    pub fields: Vec<FieldDefinition>,
}

/// List the searchable fields
pub async fn list_fields(State(state): State<AppState>) -> Result<Json<FieldsResponse>> {
    let catalog = state.search.catalog();
    Ok(Json(FieldsResponse {
        version: catalog.version(),
        fields: catalog.fields().to_vec(),
    }))
}

/// Re-read the configured field definition set
pub async fn reload_fields(State(state): State<AppState>) -> Result<Json<FieldsResponse>> {
    let catalog = match &state.search.config().fields_path {
        Some(path) => FieldCatalog::from_json(&tokio::fs::read_to_string(path).await?)?,
        None => FieldCatalog::builtin()?,
    };

    let response = FieldsResponse {
        version: catalog.version(),
        fields: catalog.fields().to_vec(),
    };
    state.search.reload_fields(catalog);
    Ok(Json(response))
}
