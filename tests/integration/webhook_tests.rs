//! Integration tests for webhook HTTP delivery
//!
//! These run the emitter against a real local HTTP server (wiremock) to
//! exercise retries, terminal failures, signatures and endpoint isolation.

use keygate_core::webhook::{events, sign_payload, WebhookConfig, WebhookEmitter, WebhookEndpoint};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoint(url: String) -> WebhookEndpoint {
    WebhookEndpoint {
        url,
        events: Vec::new(),
        secret: None,
        headers: HashMap::new(),
        max_retries: 3,
        timeout: Duration::from_secs(2),
    }
}

fn emitter_for(endpoints: Vec<WebhookEndpoint>) -> WebhookEmitter {
    WebhookEmitter::new(WebhookConfig {
        enabled: true,
        endpoints,
    })
}

#[tokio::test]
async fn test_successful_delivery_carries_event_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let emitter = emitter_for(vec![endpoint(format!("{}/hook", server.uri()))]);
    let outcomes = emitter
        .emit(events::REGISTERED, json!({"agent_id": "agt_test_1"}))
        .await;

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].status, Some(200));
    assert_eq!(outcomes[0].attempts, 1);

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    assert_eq!(
        request.headers.get("x-webhook-event").unwrap().to_str().unwrap(),
        "registered"
    );
    let event_id = request.headers.get("x-webhook-id").unwrap().to_str().unwrap();
    assert!(event_id.starts_with("evt_"));
    assert!(request.headers.get("x-webhook-timestamp").is_some());

    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["type"], "registered");
    assert_eq!(body["id"], event_id);
    assert_eq!(body["data"]["agent_id"], "agt_test_1");
}

#[tokio::test]
async fn test_hmac_signature_matches_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut signed = endpoint(server.uri());
    signed.secret = Some("whsec_test".to_string());
    let emitter = emitter_for(vec![signed]);
    emitter.emit(events::REGISTERED, json!({"k": "v"})).await;

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let signature = request
        .headers
        .get("x-webhook-signature")
        .expect("signature header must be present when a secret is configured")
        .to_str()
        .unwrap();
    let raw_body = String::from_utf8(request.body.clone()).unwrap();
    assert_eq!(signature, sign_payload("whsec_test", &raw_body));
}

#[tokio::test]
async fn test_no_signature_header_without_secret() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let emitter = emitter_for(vec![endpoint(server.uri())]);
    emitter.emit(events::REGISTERED, json!({})).await;

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("x-webhook-signature").is_none());
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let emitter = emitter_for(vec![endpoint(server.uri())]);
    let outcomes = emitter.emit(events::REGISTERED, json!({})).await;

    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].success);
    assert_eq!(outcomes[0].status, Some(500));
    assert_eq!(outcomes[0].attempts, 3);
}

#[tokio::test]
async fn test_client_error_is_terminal_on_first_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let emitter = emitter_for(vec![endpoint(server.uri())]);
    let outcomes = emitter.emit(events::REGISTERED, json!({})).await;

    assert!(!outcomes[0].success);
    assert_eq!(outcomes[0].status, Some(404));
    assert_eq!(outcomes[0].attempts, 1);
}

#[tokio::test]
async fn test_429_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let emitter = emitter_for(vec![endpoint(server.uri())]);
    let outcomes = emitter.emit(events::REGISTERED, json!({})).await;

    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].attempts, 2);
}

#[tokio::test]
async fn test_endpoint_failures_are_isolated() {
    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&healthy)
        .await;
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&broken)
        .await;

    let emitter = emitter_for(vec![endpoint(broken.uri()), endpoint(healthy.uri())]);
    let outcomes = emitter.emit(events::REGISTERED, json!({})).await;

    assert_eq!(outcomes.len(), 2);
    let ok = outcomes.iter().find(|o| o.endpoint == healthy.uri()).unwrap();
    let bad = outcomes.iter().find(|o| o.endpoint == broken.uri()).unwrap();
    assert!(ok.success);
    assert!(!bad.success);
}

#[tokio::test]
async fn test_subscription_filtering_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut filtered = endpoint(server.uri());
    filtered.events = vec![events::BANNED.to_string()];
    let emitter = emitter_for(vec![filtered]);

    let skipped = emitter.emit(events::REGISTERED, json!({})).await;
    assert!(skipped.is_empty());

    let delivered = emitter.emit(events::BANNED, json!({})).await;
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].success);
}

#[tokio::test]
async fn test_failing_listener_does_not_block_http_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let emitter = emitter_for(vec![endpoint(server.uri())]);
    emitter.on(events::WILDCARD, |_| anyhow::bail!("listener exploded"));

    let outcomes = emitter.emit(events::REGISTERED, json!({})).await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
}
