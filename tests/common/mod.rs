//! Common test utilities for search integration testing
//!
//! Fixed clock, crash report fixtures and service construction helpers.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use crash_search::search::{
    InMemoryBackend, SearchConfig, SearchService, StaticVersionInfo, VersionInfo,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Clock every integration test runs at: 2024-03-15 12:00 UTC
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
}

/// A processed crash report document as stored in the backend
pub fn crash(signature: &str, product: &str, platform: &str) -> Value {
    json!({
        "processed_crash": {
            "signature": signature,
            "product": product,
            "os_name": platform,
            "date_processed": "2024-03-15T10:00:00Z",
            "uptime": 120,
        },
        "raw_crash": {
            "Accessibility": "Active",
            "useragent_locale": "en-US",
        }
    })
}

/// Version table with one beta, one nightly and one release version
pub fn version_table() -> StaticVersionInfo {
    StaticVersionInfo::new()
        .with(
            "Alpha:3.0b1",
            VersionInfo {
                release_channel: "beta".to_string(),
                major_version: "3.0".to_string(),
                build_ids: ["20240301".to_string(), "20240305".to_string()].into(),
            },
        )
        .with(
            "Alpha:4.0a1",
            VersionInfo {
                release_channel: "nightly".to_string(),
                major_version: "4.0a1".to_string(),
                build_ids: Default::default(),
            },
        )
        .with(
            "Alpha:2.0",
            VersionInfo {
                release_channel: "release".to_string(),
                major_version: "2.0".to_string(),
                build_ids: Default::default(),
            },
        )
}

pub fn config() -> SearchConfig {
    SearchConfig::default()
}

/// Service over `backend` with the fixed clock, version table and no cache
pub fn service(backend: Arc<InMemoryBackend>) -> SearchService {
    service_with(backend, config())
}

pub fn service_with(backend: Arc<InMemoryBackend>, config: SearchConfig) -> SearchService {
    SearchService::new(backend, config)
        .expect("valid test configuration")
        .with_version_info(Arc::new(version_table()))
        .with_cache(None)
        .with_fixed_time(fixed_now())
}
