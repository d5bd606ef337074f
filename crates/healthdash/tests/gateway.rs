//! Gateway client behaviour against a mock HCGateway server.

use chrono::{Duration, TimeZone, Utc};
use healthdash::config::GatewayConfig;
use healthdash::gateway::{GatewayClient, HealthSource};
use healthdash::Error;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> GatewayConfig {
    GatewayConfig {
        base_url: format!("{}/", server.uri()),
        username: Some("alice".to_string()),
        password: Some("secret".to_string()),
        timeout_secs: 5,
        retry_attempts: 3,
        retry_base_ms: 1,
        retry_max_ms: 5,
    }
}

fn token_body(token: &str, expiry: chrono::DateTime<Utc>) -> Value {
    json!({
        "token": token,
        "refresh": format!("{token}-refresh"),
        "expiry": expiry.to_rfc3339(),
    })
}

async fn mount_login(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/api/v2/login"))
        .and(body_json(json!({"username": "alice", "password": "secret"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body(token, Utc::now() + Duration::hours(1))),
        )
        .mount(server)
        .await;
}

fn since() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, 23, 0, 0, 0).unwrap()
}

fn steps_items() -> Value {
    json!([
        {"_id": "r1", "start": "2025-08-23T08:00:00Z", "end": "2025-08-23T08:15:00Z",
         "app": "com.fit", "data": {"steps": {"count": 500}}},
        {"_id": "r2", "start": "2025-08-23T09:00:00Z", "end": "2025-08-23T09:15:00Z",
         "app": "com.fit", "data": {"steps": {"count": 800}}}
    ])
}

#[tokio::test]
async fn fetch_logs_in_and_sends_since_query() {
    let server = MockServer::start().await;
    mount_login(&server, "tok1").await;

    Mock::given(method("POST"))
        .and(path("/api/v2/fetch/steps"))
        .and(header("authorization", "Bearer tok1"))
        .and(body_json(json!({"queries": {"start": {"$gte": "2025-08-23T00:00:00Z"}}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(steps_items()))
        .expect(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(&config_for(&server)).unwrap();
    let records = client.fetch("steps", since()).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].key, "r1");
    assert_eq!(records[1].value("steps", "count"), Some(800.0));
}

#[tokio::test]
async fn token_is_reused_between_fetches() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v2/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("tok1", Utc::now() + Duration::hours(1))),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v2/fetch/steps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;

    let client = GatewayClient::new(&config_for(&server)).unwrap();
    client.fetch("steps", since()).await.unwrap();
    client.fetch("steps", since()).await.unwrap();
}

#[tokio::test]
async fn unauthorized_fetch_refreshes_and_repeats_once() {
    let server = MockServer::start().await;
    mount_login(&server, "tok1").await;

    Mock::given(method("POST"))
        .and(path("/api/v2/fetch/steps"))
        .and(header("authorization", "Bearer tok1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v2/refresh"))
        .and(body_json(json!({"refresh": "tok1-refresh"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("tok2", Utc::now() + Duration::hours(1))),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v2/fetch/steps"))
        .and(header("authorization", "Bearer tok2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(steps_items()))
        .expect(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(&config_for(&server)).unwrap();
    let records = client.fetch("steps", since()).await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn repeated_unauthorized_is_returned() {
    let server = MockServer::start().await;
    mount_login(&server, "tok1").await;

    Mock::given(method("POST"))
        .and(path("/api/v2/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("tok2", Utc::now() + Duration::hours(1))),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v2/fetch/steps"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = GatewayClient::new(&config_for(&server)).unwrap();
    let err = client.fetch("steps", since()).await.unwrap_err();
    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn expiring_token_is_refreshed_before_use() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v2/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("stale", Utc::now() + Duration::minutes(2))),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v2/refresh"))
        .and(body_json(json!({"refresh": "stale-refresh"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("fresh", Utc::now() + Duration::hours(1))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(&config_for(&server)).unwrap();
    assert_eq!(client.ensure_token().await.unwrap(), "stale");
    assert_eq!(client.ensure_token().await.unwrap(), "fresh");
    assert_eq!(client.ensure_token().await.unwrap(), "fresh");
}

#[tokio::test]
async fn failed_refresh_falls_back_to_login() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v2/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("stale", Utc::now() - Duration::minutes(1))),
        )
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v2/refresh"))
        .respond_with(ResponseTemplate::new(403).set_body_string("refresh revoked"))
        .expect(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(&config_for(&server)).unwrap();
    client.ensure_token().await.unwrap();
    assert_eq!(client.ensure_token().await.unwrap(), "stale");
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    mount_login(&server, "tok1").await;

    Mock::given(method("POST"))
        .and(path("/api/v2/fetch/steps"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v2/fetch/steps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(steps_items()))
        .expect(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(&config_for(&server)).unwrap();
    let records = client.fetch("steps", since()).await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn retries_stop_after_configured_attempts() {
    let server = MockServer::start().await;
    mount_login(&server, "tok1").await;

    Mock::given(method("POST"))
        .and(path("/api/v2/fetch/steps"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;

    let client = GatewayClient::new(&config_for(&server)).unwrap();
    let err = client.fetch("steps", since()).await.unwrap_err();

    match err {
        Error::GatewayStatus { status, body, .. } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn non_json_success_body_is_retried() {
    let server = MockServer::start().await;
    mount_login(&server, "tok1").await;

    Mock::given(method("POST"))
        .and(path("/api/v2/fetch/steps"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>upstream hiccup</html>"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v2/fetch/steps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(steps_items()))
        .expect(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(&config_for(&server)).unwrap();
    let records = client.fetch("steps", since()).await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn non_json_success_body_fails_after_configured_attempts() {
    let server = MockServer::start().await;
    mount_login(&server, "tok1").await;

    Mock::given(method("POST"))
        .and(path("/api/v2/fetch/steps"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .expect(3)
        .mount(&server)
        .await;

    let client = GatewayClient::new(&config_for(&server)).unwrap();
    let err = client.fetch("steps", since()).await.unwrap_err();
    assert!(matches!(err, Error::Json(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn client_errors_fail_without_retry() {
    let server = MockServer::start().await;
    mount_login(&server, "tok1").await;

    Mock::given(method("POST"))
        .and(path("/api/v2/fetch/mood"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such method"))
        .expect(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(&config_for(&server)).unwrap();
    let err = client.fetch("mood", since()).await.unwrap_err();
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn non_array_body_yields_no_records() {
    let server = MockServer::start().await;
    mount_login(&server, "tok1").await;

    Mock::given(method("POST"))
        .and(path("/api/v2/fetch/steps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "nothing"})))
        .mount(&server)
        .await;

    let client = GatewayClient::new(&config_for(&server)).unwrap();
    assert!(client.fetch("steps", since()).await.unwrap().is_empty());
}

#[tokio::test]
async fn rejected_login_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v2/login"))
        .respond_with(ResponseTemplate::new(403).set_body_string("bad credentials"))
        .expect(1)
        .mount(&server)
        .await;

    let client = GatewayClient::new(&config_for(&server)).unwrap();
    let err = client.fetch("steps", since()).await.unwrap_err();
    assert!(err.to_string().contains("bad credentials"));
}
