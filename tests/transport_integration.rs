//! Integration tests for the authenticated transport.
//!
//! Every test runs against a local wiremock server; provider endpoints are
//! redirected there with `Endpoints::with_base`.

mod support;

use std::time::Duration;

use reqwest::Method;
use support::socket_guard::start_mock_server_or_skip;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use yfwire::auth::{CookieStore, NETSCAPE_HEADER};
use yfwire::config::{ClientConfig, CookieJarConfig, Endpoints};
use yfwire::transport::{RequestBody, RequestOptions, Transport, TransportError};

fn test_config(base: &str) -> ClientConfig {
    ClientConfig {
        retries: 3,
        retry_delay: Duration::from_millis(5),
        pacing_delay: Duration::ZERO,
        cookie_jar: CookieJarConfig {
            enabled: false,
            path: None,
        },
        endpoints: Endpoints::with_base(base),
        ..ClientConfig::default()
    }
}

/// Mounts a working basic flow: bootstrap sets `A3`, the crumb endpoint returns `crumb`.
async fn mount_basic_auth(server: &MockServer, crumb: &str) {
    Mock::given(method("GET"))
        .and(path("/bootstrap"))
        .respond_with(
            ResponseTemplate::new(404).insert_header("Set-Cookie", "A3=session-a3; Max-Age=3600; Path=/"),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/test/getcrumb"))
        .respond_with(ResponseTemplate::new(200).set_body_string(crumb))
        .mount(server)
        .await;
}

async fn requests_to(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == request_path)
        .count()
}

#[tokio::test]
async fn test_transient_status_exhausts_all_attempts() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server.uri())).unwrap();
    let err = transport
        .get_text(&format!("{}/data", server.uri()))
        .await
        .unwrap_err();

    match err {
        TransportError::MaxRetriesExceeded { attempts, last, .. } => {
            assert_eq!(attempts, 4, "retries=3 means four attempts");
            assert!(matches!(*last, TransportError::HttpStatus { status: 500, .. }));
        }
        other => panic!("expected MaxRetriesExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_transient_then_success_returns_body() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server.uri())).unwrap();
    let body = transport.get_text(&format!("{}/data", server.uri())).await.unwrap();

    assert_eq!(body, "ok");
    assert_eq!(requests_to(&server, "/data").await, 3);
}

#[tokio::test]
async fn test_not_found_on_public_path_is_not_retried() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server.uri())).unwrap();
    let err = transport
        .get_text(&format!("{}/missing", server.uri()))
        .await
        .unwrap_err();

    assert!(
        matches!(err, TransportError::Client { status: 404, .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_public_path_skips_crumb_acquisition() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_basic_auth(&server, "unused").await;
    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server.uri())).unwrap();
    let body = transport.get_text(&format!("{}/public", server.uri())).await.unwrap();

    assert_eq!(body, "hello");
    assert_eq!(requests_to(&server, "/v1/test/getcrumb").await, 0);
    assert!(!transport.auth().has_crumb());
}

#[tokio::test]
async fn test_authenticated_path_gets_crumb_and_cookies() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_basic_auth(&server, "crumb-123").await;
    Mock::given(method("GET"))
        .and(path("/v7/finance/quote"))
        .and(query_param("symbols", "AAPL"))
        .and(query_param("crumb", "crumb-123"))
        .and(header("Cookie", "A3=session-a3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"quoteResponse":{"result":[]}}"#))
        .expect(1)
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server.uri())).unwrap();
    let value: serde_json::Value = transport
        .get_json(&format!("{}/v7/finance/quote?symbols=AAPL", server.uri()))
        .await
        .unwrap();

    assert!(value["quoteResponse"]["result"].is_array());
    assert!(transport.auth().has_crumb());
}

#[tokio::test]
async fn test_crumb_is_cached_across_requests() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_basic_auth(&server, "cached").await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .and(query_param("crumb", "cached"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(3)
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server.uri())).unwrap();
    let url = format!("{}/v8/finance/chart/AAPL", server.uri());
    for _ in 0..3 {
        transport.get_text(&url).await.unwrap();
    }

    assert_eq!(requests_to(&server, "/v1/test/getcrumb").await, 1);
}

#[tokio::test]
async fn test_auth_rejection_reacquires_crumb_and_retries() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/bootstrap"))
        .respond_with(ResponseTemplate::new(200).insert_header("Set-Cookie", "A3=fresh; Max-Age=3600"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/test/getcrumb"))
        .respond_with(ResponseTemplate::new(200).set_body_string("stale"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/test/getcrumb"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v10/finance/quoteSummary/AAPL"))
        .and(query_param("crumb", "stale"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid Crumb"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v10/finance/quoteSummary/AAPL"))
        .and(query_param("crumb", "fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_string("summary"))
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server.uri())).unwrap();
    let body = transport
        .get_text(&format!("{}/v10/finance/quoteSummary/AAPL", server.uri()))
        .await
        .unwrap();

    assert_eq!(body, "summary");
    assert_eq!(requests_to(&server, "/v1/test/getcrumb").await, 2);
    assert_eq!(requests_to(&server, "/bootstrap").await, 2, "cookies were reset");
}

#[tokio::test]
async fn test_invalid_crumb_body_on_bad_request_counts_as_auth_failure() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_basic_auth(&server, "c").await;
    Mock::given(method("GET"))
        .and(path("/v7/finance/options/AAPL"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string(r#"{"finance":{"error":{"description":"Invalid Crumb"}}}"#),
        )
        .expect(4)
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server.uri())).unwrap();
    let err = transport
        .get_text(&format!("{}/v7/finance/options/AAPL", server.uri()))
        .await
        .unwrap_err();

    match err {
        TransportError::MaxRetriesExceeded { last, .. } => {
            assert!(matches!(*last, TransportError::Authentication { status: 400, .. }));
        }
        other => panic!("expected MaxRetriesExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_zero_retries_makes_single_attempt() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.retries = 0;
    let transport = Transport::new(&config).unwrap();
    let err = transport
        .get_text(&format!("{}/data", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TransportError::MaxRetriesExceeded { attempts: 1, .. }
    ));
}

#[tokio::test]
async fn test_get_json_reports_decode_error() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/not-json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server.uri())).unwrap();
    let err = transport
        .get_json::<serde_json::Value>(&format!("{}/not-json", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Decode { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_post_json_body_and_custom_headers() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .and(path("/screener"))
        .and(header("X-Test", "yes"))
        .and(wiremock::matchers::body_json(serde_json::json!({"size": 25})))
        .respond_with(ResponseTemplate::new(200).set_body_string("posted"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = Transport::new(&test_config(&server.uri())).unwrap();
    let body = RequestBody::Json(serde_json::json!({"size": 25}));
    let options = RequestOptions {
        headers: vec![("X-Test".to_string(), "yes".to_string())],
        timeout: Some(Duration::from_secs(5)),
    };
    let response = transport
        .request(
            Method::POST,
            &format!("{}/screener", server.uri()),
            Some(&body),
            Some(&options),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "posted");
}

#[tokio::test]
async fn test_malformed_url_is_rejected_without_network() {
    let transport = Transport::new(&test_config("http://127.0.0.1:9")).unwrap();
    let err = transport.get_text("not a url").await.unwrap_err();
    assert!(matches!(err, TransportError::InvalidUrl { .. }));
}

#[tokio::test]
async fn test_cookies_persist_to_jar_and_reload() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_basic_auth(&server, "jar").await;

    let temp = TempDir::new().unwrap();
    let jar = temp.path().join("nested").join("cookies.txt");
    let mut config = test_config(&server.uri());
    config.cookie_jar = CookieJarConfig {
        enabled: true,
        path: Some(jar.clone()),
    };

    let transport = Transport::new(&config).unwrap();
    assert_eq!(transport.auth().get_crumb().await.as_deref(), Some("jar"));

    let contents = std::fs::read_to_string(&jar).unwrap();
    assert!(contents.starts_with(NETSCAPE_HEADER));
    assert!(contents.contains("A3\tsession-a3"));

    let reloaded = CookieStore::new(Some(jar));
    let names: Vec<String> = reloaded.all().into_iter().map(|cookie| cookie.name).collect();
    assert_eq!(names, vec!["A3"]);
}
