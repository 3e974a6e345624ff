//! End-to-end: the full admit-and-govern lifecycle through an assembled
//! engine, with webhook fan-out observed over real HTTP.

use crate::common::{setup_test_logging, test_config, TestKey};
use keygate_core::{AgentStatus, Gate, GateAction, Keygate, RateLimitPolicy, RegistrationRequest};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_agent_lifecycle_end_to_end() {
    setup_test_logging();

    let hook_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&hook_server)
        .await;

    let mut config = test_config();
    config.rate_limit = RateLimitPolicy {
        requests: 3,
        window: "1h".to_string(),
    };
    config.reputation.gates = vec![Gate {
        min_reputation: 40.0,
        scopes: None,
        action: GateAction::Block,
    }];
    config.webhooks.endpoints = vec![keygate_core::WebhookEndpoint {
        url: hook_server.uri(),
        events: Vec::new(),
        secret: Some("whsec_e2e".to_string()),
        headers: HashMap::new(),
        max_retries: 3,
        timeout: std::time::Duration::from_secs(2),
    }];
    let keygate = Keygate::from_config(config).unwrap();

    let seen_events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen_events);
    keygate.emitter().on("*", move |event| {
        assert!(event.id.starts_with("evt_"));
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    // 1. register: challenge issued for the requested scopes
    let key = TestKey::generate();
    let challenge = keygate
        .protocol()
        .register(RegistrationRequest {
            public_key: key.public_key_hex(),
            scopes: vec!["data.read".to_string(), "payments.send".to_string()],
            wallet_address: Some("0xabc123".to_string()),
            metadata: HashMap::from([("team".to_string(), "search".to_string())]),
        })
        .await
        .unwrap();

    // 2. verify: sign the exact issued message, receive credentials
    let verified = keygate
        .protocol()
        .verify(&challenge.agent_id, &key.sign(&challenge.message))
        .await
        .unwrap();
    let agent = keygate
        .store()
        .get_agent(&verified.agent_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(agent.wallet_address.as_deref(), Some("0xabc123"));
    assert_eq!(agent.metadata.get("team").map(String::as_str), Some("search"));

    // 3. the guard path: token, gate, rate limit, usage accounting
    let claims = keygate.protocol().verify_token(&verified.token).unwrap();
    assert_eq!(claims.sub, verified.agent_id);

    assert!(keygate
        .reputation()
        .check_gate(agent.reputation, Some("data.read"))
        .allowed);

    for _ in 0..3 {
        assert!(keygate.limiter().check(&verified.agent_id).await.allowed);
    }
    assert!(!keygate.limiter().check(&verified.agent_id).await.allowed);

    let agent = keygate
        .protocol()
        .record_request(&verified.agent_id, true)
        .await
        .unwrap();
    assert_eq!(agent.total_requests, 1);

    // 4. drive reputation below the gate: three payment failures, 50 → 35
    for _ in 0..3 {
        keygate
            .protocol()
            .record_payment(&verified.agent_id, 5.0, false)
            .await
            .unwrap();
    }
    let agent = keygate
        .store()
        .get_agent(&verified.agent_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(agent.reputation, 35.0);
    let gated = keygate
        .reputation()
        .check_gate(agent.reputation, Some("data.read"));
    assert!(!gated.allowed);
    assert_eq!(gated.required_score, Some(40.0));

    // 5. externally driven suspension and reactivation
    let agent = keygate
        .protocol()
        .set_status(&verified.agent_id, AgentStatus::Suspended)
        .await
        .unwrap();
    assert!(!agent.is_active());
    let agent = keygate
        .protocol()
        .set_status(&verified.agent_id, AgentStatus::Active)
        .await
        .unwrap();
    assert!(agent.is_active());

    // detached deliveries for registered + suspended + reactivated
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(seen_events.load(Ordering::SeqCst) >= 3);
    let delivered = hook_server.received_requests().await.unwrap();
    assert!(delivered.len() >= 3);
    for request in &delivered {
        let raw = String::from_utf8(request.body.clone()).unwrap();
        let signature = request
            .headers
            .get("x-webhook-signature")
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(signature, keygate_core::webhook::sign_payload("whsec_e2e", &raw));
    }
}

#[tokio::test]
async fn test_webhook_failures_never_fail_the_protocol() {
    // no HTTP server listening at all: every delivery errors out
    let mut config = test_config();
    config.webhooks.endpoints = vec![keygate_core::WebhookEndpoint {
        url: "http://127.0.0.1:9".to_string(),
        events: Vec::new(),
        secret: None,
        headers: HashMap::new(),
        max_retries: 1,
        timeout: std::time::Duration::from_millis(200),
    }];
    let keygate = Keygate::from_config(config).unwrap();

    let key = TestKey::generate();
    let challenge = keygate
        .protocol()
        .register(RegistrationRequest {
            public_key: key.public_key_hex(),
            scopes: vec!["data.read".to_string()],
            wallet_address: None,
            metadata: HashMap::new(),
        })
        .await
        .unwrap();

    // verify succeeds even though the registered event cannot be delivered
    let verified = keygate
        .protocol()
        .verify(&challenge.agent_id, &key.sign(&challenge.message))
        .await
        .unwrap();
    assert!(verified.api_key.starts_with("ak_test_"));

    // direct emit reports the failure as a structured outcome instead
    let outcomes = keygate.emitter().emit("registered", json!({})).await;
    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].success);
    assert!(outcomes[0].error.is_some());
    assert_eq!(outcomes[0].attempts, 1);
}
