//! Challenge/Auth Protocol
//!
//! Orchestrates identity primitives, the store, the token service and the
//! webhook emitter to run registration and re-authentication. Per agent id
//! the registration machine is `unregistered → challenge_pending → active`;
//! a challenge independently goes `pending → consumed` or `pending →
//! expired`, both terminal.

use crate::config::KeygateConfig;
use crate::error::{KeygateError, Result};
use crate::identity::{self, Mode};
use crate::model::{AgentDraft, AgentStatus, AgentUpdate, Challenge, RegistrationRequest};
use crate::ratelimit::RateLimitPolicy;
use crate::reputation::{ReputationEngine, ReputationEvent};
use crate::store::AgentStore;
use crate::token::TokenService;
use crate::webhook::{events, WebhookEmitter};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Challenge issuance and authentication-freshness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// How long an issued challenge stays valid (default 300s)
    #[serde(with = "humantime_serde")]
    pub ttl: std::time::Duration,

    /// Maximum |server time − caller timestamp| accepted on `authenticate`
    ///
    /// Bounds replay of a previously signed auth message.
    #[serde(with = "humantime_serde")]
    pub auth_timestamp_tolerance: std::time::Duration,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            ttl: std::time::Duration::from_secs(crate::DEFAULT_CHALLENGE_TTL_SECS),
            auth_timestamp_tolerance: std::time::Duration::from_secs(300),
        }
    }
}

impl ChallengeConfig {
    /// Fail-fast validation
    pub fn validate(&self) -> Result<()> {
        if self.ttl.as_secs() == 0 {
            return Err(KeygateError::Configuration(
                "challenge ttl must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Response to a successful `register` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResponse {
    /// Agent id allocated for this registration
    pub agent_id: String,
    /// The challenge nonce
    pub nonce: String,
    /// The exact message to sign
    pub message: String,
    /// When the challenge expires
    pub expires_at: DateTime<Utc>,
}

/// Response to a successful `verify` call
///
/// `api_key` is the raw credential secret, returned here exactly once; only
/// its hash is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    /// The now-active agent's id
    pub agent_id: String,
    /// Raw api key (shown once)
    pub api_key: String,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Signed access token
    pub token: String,
    /// Token expiry
    pub token_expires_at: DateTime<Utc>,
    /// The agent's rate-limit policy
    pub rate_limit: RateLimitPolicy,
}

/// Response to a successful `authenticate` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Agent id
    pub agent_id: String,
    /// Fresh signed access token
    pub token: String,
    /// Token expiry
    pub token_expires_at: DateTime<Utc>,
    /// Granted scopes
    pub scopes: Vec<String>,
}

/// Response to a successful api-key rotation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotatedKey {
    /// Agent id (unchanged)
    pub agent_id: String,
    /// The new raw api key (shown once)
    pub api_key: String,
}

/// The challenge-response registration and authentication protocol
pub struct AgentProtocol {
    store: Arc<dyn AgentStore>,
    emitter: Arc<WebhookEmitter>,
    tokens: TokenService,
    reputation: ReputationEngine,
    mode: Mode,
    catalogue: Vec<String>,
    challenge: ChallengeConfig,
    default_rate_limit: RateLimitPolicy,
}

impl AgentProtocol {
    /// Assemble the protocol from its collaborators and validated config
    pub fn new(
        store: Arc<dyn AgentStore>,
        emitter: Arc<WebhookEmitter>,
        tokens: TokenService,
        reputation: ReputationEngine,
        config: &KeygateConfig,
    ) -> Self {
        Self {
            store,
            emitter,
            tokens,
            reputation,
            mode: config.mode,
            catalogue: config.scopes.clone(),
            challenge: config.challenge.clone(),
            default_rate_limit: config.rate_limit.clone(),
        }
    }

    /// Begin registration: validate the request and issue a time-boxed challenge
    ///
    /// Two pending registrations may share a public key; only a *verified*
    /// agent holding the key is a conflict.
    pub async fn register(&self, request: RegistrationRequest) -> Result<ChallengeResponse> {
        if request.public_key.is_empty() {
            return Err(KeygateError::Validation("public_key is required".into()));
        }
        if request.scopes.is_empty() {
            return Err(KeygateError::Validation(
                "at least one scope must be requested".into(),
            ));
        }
        let unknown: Vec<&str> = request
            .scopes
            .iter()
            .filter(|s| !self.catalogue.contains(*s))
            .map(|s| s.as_str())
            .collect();
        if !unknown.is_empty() {
            return Err(KeygateError::Validation(format!(
                "Unknown scopes: {}",
                unknown.join(", ")
            )));
        }
        if self
            .store
            .get_agent_by_public_key(&request.public_key)
            .await?
            .is_some()
        {
            return Err(KeygateError::Conflict(
                "Public key already registered".into(),
            ));
        }

        let now = Utc::now();
        let agent_id = identity::generate_agent_id(self.mode);
        let nonce = identity::generate_nonce();
        let message = format!(
            "{}:register:{}:{}:{}",
            crate::PROTOCOL_NAME,
            agent_id,
            now.timestamp(),
            nonce
        );
        let ttl = Duration::from_std(self.challenge.ttl)
            .map_err(|e| KeygateError::Configuration(format!("Challenge ttl out of range: {}", e)))?;
        let expires_at = now + ttl;

        self.store
            .create_challenge(Challenge {
                agent_id: agent_id.clone(),
                nonce: nonce.clone(),
                message: message.clone(),
                expires_at,
                created_at: now,
                registration: request,
            })
            .await?;

        info!(%agent_id, "registration challenge issued");
        Ok(ChallengeResponse {
            agent_id,
            nonce,
            message,
            expires_at,
        })
    }

    /// Complete registration: verify the signed challenge and activate the agent
    pub async fn verify(&self, agent_id: &str, signature_hex: &str) -> Result<VerifyResponse> {
        let challenge = self
            .store
            .get_challenge(agent_id)
            .await?
            .ok_or_else(|| KeygateError::NotFound(format!("No challenge for agent: {}", agent_id)))?;

        let now = Utc::now();
        if challenge.is_expired(now) {
            self.store.delete_challenge(agent_id).await?;
            return Err(KeygateError::Expired("Challenge expired".into()));
        }

        // a failed signature leaves the challenge intact until its own expiry
        if !identity::verify_signature(
            &challenge.registration.public_key,
            &challenge.message,
            signature_hex,
        ) {
            return Err(KeygateError::Signature(
                "Challenge signature verification failed".into(),
            ));
        }

        let api_key = identity::generate_api_key(self.mode);
        let scopes = dedup_scopes(challenge.registration.scopes.clone());
        let agent = self
            .store
            .create_agent(AgentDraft {
                id: agent_id.to_string(),
                public_key: challenge.registration.public_key.clone(),
                scopes: scopes.clone(),
                api_key_hash: identity::hash_api_key(&api_key),
                rate_limit: self.default_rate_limit.clone(),
                reputation: self.reputation.initial_score(),
                metadata: challenge.registration.metadata.clone(),
                wallet_address: challenge.registration.wallet_address.clone(),
            })
            .await?;

        self.store.delete_challenge(agent_id).await?;

        Arc::clone(&self.emitter).emit_detached(
            events::REGISTERED,
            json!({ "agent_id": agent.id, "scopes": scopes }),
        );

        let issued = self.tokens.issue(&agent)?;
        info!(agent_id = %agent.id, "agent registered");
        Ok(VerifyResponse {
            agent_id: agent.id,
            api_key,
            scopes,
            token: issued.token,
            token_expires_at: issued.expires_at,
            rate_limit: agent.rate_limit,
        })
    }

    /// Re-authenticate a returning agent over a caller-timestamped message
    ///
    /// The timestamp must fall within the configured freshness window, which
    /// bounds how long a captured signed message stays replayable.
    pub async fn authenticate(
        &self,
        agent_id: &str,
        signature_hex: &str,
        timestamp: i64,
    ) -> Result<AuthResponse> {
        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| KeygateError::NotFound(format!("Agent not found: {}", agent_id)))?;

        let skew = (Utc::now().timestamp() - timestamp).unsigned_abs();
        if skew > self.challenge.auth_timestamp_tolerance.as_secs() {
            return Err(KeygateError::Validation(
                "timestamp outside the accepted freshness window".into(),
            ));
        }

        let message = format!("{}:auth:{}:{}", crate::PROTOCOL_NAME, agent_id, timestamp);
        if !identity::verify_signature(&agent.public_key, &message, signature_hex) {
            return Err(KeygateError::Signature(
                "Authentication signature verification failed".into(),
            ));
        }

        let agent = self
            .store
            .update_agent(
                agent_id,
                AgentUpdate {
                    last_auth_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        Arc::clone(&self.emitter)
            .emit_detached(events::AUTHENTICATED, json!({ "agent_id": agent.id }));

        let issued = self.tokens.issue(&agent)?;
        debug!(agent_id = %agent.id, "agent authenticated");
        Ok(AuthResponse {
            agent_id: agent.id,
            token: issued.token,
            token_expires_at: issued.expires_at,
            scopes: agent.scopes,
        })
    }

    /// Externally driven lifecycle transition (suspend, ban, reactivate)
    ///
    /// Fires the matching lifecycle event.
    pub async fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<crate::model::Agent> {
        let agent = self
            .store
            .update_agent(
                agent_id,
                AgentUpdate {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await?;

        let event_type = match status {
            AgentStatus::Active => events::REACTIVATED,
            AgentStatus::Suspended => events::SUSPENDED,
            AgentStatus::Banned => events::BANNED,
        };
        Arc::clone(&self.emitter)
            .emit_detached(event_type, json!({ "agent_id": agent.id, "status": status }));

        info!(agent_id = %agent.id, ?status, "agent status changed");
        Ok(agent)
    }

    /// Guard-layer bookkeeping: count one request and score its outcome
    pub async fn record_request(&self, agent_id: &str, success: bool) -> Result<crate::model::Agent> {
        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| KeygateError::NotFound(format!("Agent not found: {}", agent_id)))?;

        let event = if success {
            ReputationEvent::RequestSuccess
        } else {
            ReputationEvent::RequestError
        };
        self.store
            .update_agent(
                agent_id,
                AgentUpdate {
                    reputation: Some(self.reputation.calculate_score(agent.reputation, event)),
                    increment_requests: Some(1),
                    ..Default::default()
                },
            )
            .await
    }

    /// Record a payment outcome: accrue the paid amount and score the event
    pub async fn record_payment(
        &self,
        agent_id: &str,
        amount: f64,
        success: bool,
    ) -> Result<crate::model::Agent> {
        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| KeygateError::NotFound(format!("Agent not found: {}", agent_id)))?;

        let event = if success {
            ReputationEvent::PaymentSuccess
        } else {
            ReputationEvent::PaymentFailure
        };
        self.store
            .update_agent(
                agent_id,
                AgentUpdate {
                    reputation: Some(self.reputation.calculate_score(agent.reputation, event)),
                    increment_paid: success.then_some(amount),
                    ..Default::default()
                },
            )
            .await
    }

    /// Re-issue the agent's api key
    ///
    /// The raw key is returned once; only the new hash is persisted and the
    /// store's hash index follows the rotation.
    pub async fn rotate_api_key(&self, agent_id: &str) -> Result<RotatedKey> {
        if self.store.get_agent(agent_id).await?.is_none() {
            return Err(KeygateError::NotFound(format!("Agent not found: {}", agent_id)));
        }

        let api_key = identity::generate_api_key(self.mode);
        let agent = self
            .store
            .update_agent(
                agent_id,
                AgentUpdate {
                    api_key_hash: Some(identity::hash_api_key(&api_key)),
                    ..Default::default()
                },
            )
            .await?;

        info!(agent_id = %agent.id, "api key rotated");
        Ok(RotatedKey {
            agent_id: agent.id,
            api_key,
        })
    }

    /// Drop every challenge past its expiry
    pub async fn clean_expired_challenges(&self) -> Result<usize> {
        self.store.clean_expired_challenges().await
    }

    /// Spawn the periodic expired-challenge sweep as a detached task
    ///
    /// The sweep interleaves safely with request-driven challenge mutation;
    /// abort the returned handle to stop it.
    pub fn spawn_challenge_sweeper(&self, every: std::time::Duration) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = store.clean_expired_challenges().await {
                    tracing::warn!(error = %e, "challenge sweep failed");
                }
            }
        })
    }

    /// Verify a previously issued access token
    pub fn verify_token(&self, token: &str) -> Result<crate::token::TokenClaims> {
        self.tokens.verify(token)
    }
}

/// Deduplicate scopes while preserving first-seen order
fn dedup_scopes(scopes: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    scopes.into_iter().filter(|s| seen.insert(s.clone())).collect()
}
