//! HttpBackend against a mocked Elasticsearch-style server

mod common;

use common::{fixed_now, version_table};
use crash_search::search::*;
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn http_service(url: &str) -> SearchService {
    let config = SearchConfigBuilder::new().backend_url(url).build().unwrap();
    let backend = HttpBackend::new(&config.backend_url, config.request_timeout()).unwrap();

    SearchService::new(Arc::new(backend), config)
        .unwrap()
        .with_version_info(Arc::new(version_table()))
        .with_cache(None)
        .with_fixed_time(fixed_now())
}

fn es_response() -> serde_json::Value {
    json!({
        "took": 3,
        "hits": {
            "total": 1,
            "hits": [{
                "_index": "socorro_240315",
                "_source": {
                    "processed_crash": { "signature": "OOM | small", "os_name": "Windows NT" },
                    "raw_crash": { "useragent_locale": "de" },
                }
            }]
        },
        "facets": {
            "platform": { "_type": "terms", "terms": [{ "term": "Windows NT", "count": 1 }] }
        }
    })
}

#[tokio::test]
async fn test_heals_legacy_missing_index_over_http() {
    let mut server = Server::new_async().await;

    let missing = server
        .mock("POST", "/socorro_240314,socorro_240315/_search")
        .with_status(404)
        .with_body(r#"{"error":"IndexMissingException[[socorro_240314] missing]","status":404}"#)
        .expect(1)
        .create_async()
        .await;
    let found = server
        .mock("POST", "/socorro_240315/_search")
        .match_body(Matcher::PartialJson(json!({
            "size": 100,
            "from": 0,
            "facets": { "platform": { "terms": { "field": "processed_crash.os_name", "size": 50 } } },
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(es_response().to_string())
        .expect(1)
        .create_async()
        .await;

    let service = http_service(&server.url());
    let raw = RawParams::new()
        .with("date", ">=2024-03-14")
        .with("_facets", "platform");
    let result = service.search(&raw).await.unwrap().into_results().unwrap();

    missing.assert_async().await;
    found.assert_async().await;

    assert_eq!(result.total, 1);
    assert_eq!(result.hits[0]["signature"], json!("OOM | small"));
    assert_eq!(result.hits[0]["useragent_locale"], json!("de"));
    assert_eq!(
        result.facets["platform"],
        vec![FacetBucket { term: json!("Windows NT"), count: 1 }]
    );
}

#[tokio::test]
async fn test_heals_structured_missing_index_over_http() {
    let mut server = Server::new_async().await;

    server
        .mock("POST", "/socorro_240314,socorro_240315/_search")
        .with_status(404)
        .with_body(
            json!({
                "error": {
                    "type": "index_not_found_exception",
                    "reason": "no such index",
                    "index": "socorro_240315",
                },
                "status": 404,
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("POST", "/socorro_240314/_search")
        .with_status(200)
        .with_body(json!({ "hits": { "total": { "value": 0, "relation": "eq" }, "hits": [] } }).to_string())
        .create_async()
        .await;

    let service = http_service(&server.url());
    let raw = RawParams::new().with("date", ">=2024-03-14");
    let result = service.search(&raw).await.unwrap().into_results().unwrap();

    assert_eq!(result, SearchResponse::empty());
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let mut server = Server::new_async().await;

    let failing = server
        .mock("POST", "/socorro_240315/_search")
        .with_status(500)
        .with_body("internal failure")
        .expect(1)
        .create_async()
        .await;

    let service = http_service(&server.url());
    let result = service
        .search(&RawParams::new().with("date", ">=2024-03-15"))
        .await;

    failing.assert_async().await;
    assert!(matches!(result, Err(SearchError::Database(_))));
}

#[tokio::test]
async fn test_invalid_json_is_a_database_error() {
    let mut server = Server::new_async().await;

    server
        .mock("POST", "/socorro_240315/_search")
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;

    let service = http_service(&server.url());
    let result = service
        .search(&RawParams::new().with("date", ">=2024-03-15"))
        .await;
    assert!(matches!(result, Err(SearchError::Database(_))));
}

#[tokio::test]
async fn test_missing_fields_over_http() {
    let mut server = Server::new_async().await;

    server
        .mock("GET", "/socorro_240315/_mapping")
        .with_status(200)
        .with_body(
            json!({
                "socorro_240315": {
                    "mappings": {
                        "crash_reports": {
                            "properties": {
                                "processed_crash": { "properties": {
                                    "signature": { "type": "string" },
                                    "mac_crash_info": { "type": "string" },
                                }}
                            }
                        }
                    }
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let service = http_service(&server.url());
    let fields = service
        .get_missing_fields(Some(vec!["socorro_240315".to_string()]))
        .await
        .unwrap();

    assert_eq!(fields, vec!["processed_crash.mac_crash_info"]);
}

#[tokio::test]
async fn test_unreachable_backend_is_a_transport_error() {
    let backend = HttpBackend::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    let result = backend
        .search(&["socorro_240315".to_string()], &json!({}))
        .await;

    assert!(matches!(result, Err(BackendError::Transport(_))));
}
