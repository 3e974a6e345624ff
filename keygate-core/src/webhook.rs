//! Webhook Emitter
//!
//! Fans lifecycle events out to in-process listeners (synchronously, in
//! registration order) and to configured HTTP endpoints (concurrently, with
//! retry and per-attempt timeouts). One endpoint's failure never affects
//! another's delivery, and no delivery failure ever reaches the caller that
//! triggered the event.

use crate::error::{KeygateError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle event types fired by the protocol layer
pub mod events {
    /// A new agent completed registration
    pub const REGISTERED: &str = "registered";
    /// A returning agent authenticated
    pub const AUTHENTICATED: &str = "authenticated";
    /// An agent was suspended
    pub const SUSPENDED: &str = "suspended";
    /// An agent was banned
    pub const BANNED: &str = "banned";
    /// A suspended agent was reactivated
    pub const REACTIVATED: &str = "reactivated";
    /// Wildcard listener subscription
    pub const WILDCARD: &str = "*";
}

/// An immutable emitted event; constructed once, never mutated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Unique event id (`evt_…`)
    pub id: String,

    /// Event type
    #[serde(rename = "type")]
    pub event_type: String,

    /// Emission timestamp
    pub timestamp: DateTime<Utc>,

    /// Free-form payload
    pub data: serde_json::Value,
}

impl WebhookEvent {
    fn new(event_type: &str, data: serde_json::Value) -> Self {
        Self {
            id: format!("evt_{}", Uuid::new_v4().simple()),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            data,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

/// A configured delivery endpoint; configuration only, never mutated at runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    /// Delivery URL
    pub url: String,

    /// Event types this endpoint subscribes to; empty means all
    #[serde(default)]
    pub events: Vec<String>,

    /// HMAC-SHA256 signing secret for the payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Extra headers sent with every delivery
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Delivery attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-attempt request timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl WebhookEndpoint {
    fn subscribes_to(&self, event_type: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == event_type)
    }
}

/// Webhook subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Master switch; when disabled `emit` only notifies in-process listeners
    pub enabled: bool,

    /// Configured endpoints
    pub endpoints: Vec<WebhookEndpoint>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoints: Vec::new(),
        }
    }
}

impl WebhookConfig {
    /// Fail-fast validation of endpoint URLs and retry settings
    pub fn validate(&self) -> Result<()> {
        for endpoint in &self.endpoints {
            url::Url::parse(&endpoint.url).map_err(|e| {
                KeygateError::Configuration(format!(
                    "Invalid webhook URL '{}': {}",
                    endpoint.url, e
                ))
            })?;
            if endpoint.max_retries == 0 {
                return Err(KeygateError::Configuration(format!(
                    "webhook endpoint '{}' must allow at least one attempt",
                    endpoint.url
                )));
            }
        }
        Ok(())
    }
}

/// Result of one endpoint's delivery (including all retries)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    /// Endpoint URL
    pub endpoint: String,

    /// Whether a 2xx response was obtained
    pub success: bool,

    /// Last HTTP status observed, if any response arrived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Last error, if the delivery failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Attempts made
    pub attempts: u32,
}

type ListenerFn = Box<dyn Fn(&WebhookEvent) -> anyhow::Result<()> + Send + Sync>;

struct Listener {
    event_type: String,
    callback: ListenerFn,
}

/// Fan-out emitter for lifecycle events
pub struct WebhookEmitter {
    config: WebhookConfig,
    client: reqwest::Client,
    listeners: std::sync::RwLock<Vec<Listener>>,
}

impl WebhookEmitter {
    /// Build an emitter from validated configuration
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            listeners: std::sync::RwLock::new(Vec::new()),
        }
    }

    /// Register an in-process listener for one event type or the `"*"` wildcard
    ///
    /// Listeners run synchronously before HTTP fan-out, in registration order.
    pub fn on<F>(&self, event_type: impl Into<String>, callback: F)
    where
        F: Fn(&WebhookEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.push(Listener {
            event_type: event_type.into(),
            callback: Box::new(callback),
        });
    }

    /// Emit an event: notify listeners, then deliver to every subscribed
    /// endpoint concurrently
    ///
    /// Returns one outcome per attempted endpoint; empty when the emitter is
    /// disabled or no endpoint subscribes to the type.
    pub async fn emit(&self, event_type: &str, data: serde_json::Value) -> Vec<DeliveryOutcome> {
        let event = WebhookEvent::new(event_type, data);
        self.notify_listeners(&event);

        if !self.config.enabled {
            return Vec::new();
        }
        let targets: Vec<&WebhookEndpoint> = self
            .config
            .endpoints
            .iter()
            .filter(|e| e.subscribes_to(event_type))
            .collect();
        if targets.is_empty() {
            return Vec::new();
        }

        let body = match serde_json::to_string(&event) {
            Ok(body) => body,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "failed to serialize webhook body");
                return Vec::new();
            }
        };

        let deliveries = targets
            .into_iter()
            .map(|endpoint| self.deliver(endpoint, &event, &body));
        futures::future::join_all(deliveries).await
    }

    /// Emit as a detached task; outcomes surface only via logs
    ///
    /// This is the fire-and-forget path used by the protocol layer: the
    /// triggering call never observes (or waits for) delivery results.
    pub fn emit_detached(self: Arc<Self>, event_type: &str, data: serde_json::Value) {
        let emitter = self;
        let event_type = event_type.to_string();
        tokio::spawn(async move {
            for outcome in emitter.emit(&event_type, data).await {
                if outcome.success {
                    debug!(
                        endpoint = %outcome.endpoint,
                        attempts = outcome.attempts,
                        "webhook delivered"
                    );
                } else {
                    warn!(
                        endpoint = %outcome.endpoint,
                        attempts = outcome.attempts,
                        status = ?outcome.status,
                        error = ?outcome.error,
                        "webhook delivery failed"
                    );
                }
            }
        });
    }

    fn notify_listeners(&self, event: &WebhookEvent) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            if listener.event_type != event.event_type
                && listener.event_type != events::WILDCARD
            {
                continue;
            }
            if let Err(e) = (listener.callback)(event) {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "webhook listener failed"
                );
            }
        }
    }

    async fn deliver(
        &self,
        endpoint: &WebhookEndpoint,
        event: &WebhookEvent,
        body: &str,
    ) -> DeliveryOutcome {
        let headers = build_headers(endpoint, event, body);
        let mut last_status = None;
        let mut last_error = None;

        for attempt in 1..=endpoint.max_retries {
            let result = self
                .client
                .post(&endpoint.url)
                .timeout(endpoint.timeout)
                .headers(headers.clone())
                .body(body.to_string())
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status.as_u16());
                    if status.is_success() {
                        return DeliveryOutcome {
                            endpoint: endpoint.url.clone(),
                            success: true,
                            status: last_status,
                            error: None,
                            attempts: attempt,
                        };
                    }
                    // 4xx other than 429 will not get better on retry
                    if status.is_client_error() && status.as_u16() != 429 {
                        return DeliveryOutcome {
                            endpoint: endpoint.url.clone(),
                            success: false,
                            status: last_status,
                            error: Some(format!("HTTP {}", status.as_u16())),
                            attempts: attempt,
                        };
                    }
                    last_error = Some(format!("HTTP {}", status.as_u16()));
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }

            if attempt < endpoint.max_retries {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }

        DeliveryOutcome {
            endpoint: endpoint.url.clone(),
            success: false,
            status: last_status,
            error: last_error,
            attempts: endpoint.max_retries,
        }
    }
}

/// Capped exponential backoff: `min(1000 * 2^(attempt-1), 10000)` ms
fn backoff_delay(attempt: u32) -> Duration {
    let ms = 1000u64
        .saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16))
        .min(10_000);
    Duration::from_millis(ms)
}

/// HMAC-SHA256 hex signature over the raw body
pub fn sign_payload(secret: &str, body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn build_headers(endpoint: &WebhookEndpoint, event: &WebhookEvent, body: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    let mut put = |name: &str, value: String| match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(&value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => warn!(header = name, "skipping malformed webhook header"),
    };

    put("x-webhook-event", event.event_type.clone());
    put("x-webhook-id", event.id.clone());
    put("x-webhook-timestamp", event.timestamp.timestamp().to_string());
    if let Some(secret) = &endpoint.secret {
        put("x-webhook-signature", sign_payload(secret, body));
    }
    for (name, value) in &endpoint.headers {
        put(name, value.clone());
    }
    headers
}
