//! # keygate-core: trust-and-policy engine for agent callers
//!
//! Admits and governs non-human ("agent") callers alongside human traffic:
//! agents prove identity via Ed25519 challenge-response, receive scoped
//! credentials, and are continuously policed by reputation and rate-limit
//! policy, with lifecycle events fanned out over webhooks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  AGENT (programmatic caller)                         │
//! │  register → sign challenge → verify → api key/token  │
//! └──────────────────────────────────────────────────────┘
//!                         ↓
//!       ┌────────────────────────────────────┐
//!       │  AgentProtocol                     │
//!       │  challenge issuance, verification, │
//!       │  token issuance, lifecycle ops     │
//!       └────────────────────────────────────┘
//!          ↓              ↓              ↓
//!   ┌────────────┐ ┌──────────────┐ ┌──────────────────┐
//!   │ AgentStore │ │ Reputation   │ │ WebhookEmitter   │
//!   │ (pluggable)│ │ + RateLimiter│ │ (fire-and-forget)│
//!   └────────────┘ └──────────────┘ └──────────────────┘
//! ```
//!
//! Transport adapters sit above [`AgentProtocol`] and translate
//! [`KeygateError`] kinds to their own status codes.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod identity;
pub mod model;
pub mod protocol;
pub mod ratelimit;
pub mod reputation;
pub mod store;
pub mod token;
pub mod webhook;

// Re-exports for convenience
pub use config::{KeygateConfig, StorageConfig};
pub use error::{KeygateError, Result};
pub use identity::Mode;
pub use model::{Agent, AgentDraft, AgentStatus, AgentUpdate, Challenge, RegistrationRequest};
pub use protocol::{
    AgentProtocol, AuthResponse, ChallengeConfig, ChallengeResponse, RotatedKey, VerifyResponse,
};
pub use ratelimit::{RateLimitDecision, RateLimitPolicy, RateLimiter};
pub use reputation::{
    Gate, GateAction, GateDecision, ReputationConfig, ReputationEngine, ReputationEvent,
    ReputationWeights,
};
pub use store::{AgentStore, MemoryStore};
pub use token::{IssuedToken, TokenClaims, TokenConfig, TokenService};
pub use webhook::{
    DeliveryOutcome, WebhookConfig, WebhookEmitter, WebhookEndpoint, WebhookEvent,
};

use std::sync::Arc;

/// Protocol name, embedded in every challenge and auth message
pub const PROTOCOL_NAME: &str = "keygate";

/// Default challenge time-to-live (seconds)
pub const DEFAULT_CHALLENGE_TTL_SECS: u64 = 300;

/// Default access-token lifetime (seconds)
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// The assembled engine: store, emitter, limiter, engine and protocol
///
/// Built once from a validated [`KeygateConfig`]; all members are shareable
/// across request handlers.
pub struct Keygate {
    store: Arc<dyn AgentStore>,
    emitter: Arc<WebhookEmitter>,
    limiter: Arc<RateLimiter>,
    reputation: ReputationEngine,
    protocol: Arc<AgentProtocol>,
}

impl std::fmt::Debug for Keygate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keygate").finish_non_exhaustive()
    }
}

impl Keygate {
    /// Build the engine from configuration, validating it first
    pub fn from_config(config: KeygateConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn AgentStore> = match config.storage.backend.as_str() {
            "memory" => Arc::new(MemoryStore::new()),
            other => {
                return Err(KeygateError::Configuration(format!(
                    "Unknown storage backend: {}",
                    other
                )))
            }
        };
        let emitter = Arc::new(WebhookEmitter::new(config.webhooks.clone()));
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit)?);
        let reputation = ReputationEngine::new(config.reputation.clone());
        let tokens = TokenService::new(config.token.clone());
        let protocol = Arc::new(AgentProtocol::new(
            Arc::clone(&store),
            Arc::clone(&emitter),
            tokens,
            reputation.clone(),
            &config,
        ));

        Ok(Self {
            store,
            emitter,
            limiter,
            reputation,
            protocol,
        })
    }

    /// The storage backend
    pub fn store(&self) -> &Arc<dyn AgentStore> {
        &self.store
    }

    /// The webhook emitter
    pub fn emitter(&self) -> &Arc<WebhookEmitter> {
        &self.emitter
    }

    /// The default rate limiter
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The reputation engine
    pub fn reputation(&self) -> &ReputationEngine {
        &self.reputation
    }

    /// The challenge/auth protocol
    pub fn protocol(&self) -> &Arc<AgentProtocol> {
        &self.protocol
    }
}
