//! Data Model
//!
//! Agent and Challenge records plus the draft/update shapes consumed by the
//! storage contract. All timestamps are UTC.

use crate::ratelimit::RateLimitPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a registered agent
///
/// Suspension and ban are externally driven transitions on the record; the
/// registration protocol only ever produces `Active` agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Admitted and in good standing
    Active,
    /// Temporarily barred (reversible)
    Suspended,
    /// Permanently barred
    Banned,
}

/// A registered non-human caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent identifier (`agt_live_…` / `agt_test_…`)
    pub id: String,

    /// Ed25519 verification key, hex-encoded; unique across all agents
    pub public_key: String,

    /// Granted scope identifiers (ordered, semantically unique)
    pub scopes: Vec<String>,

    /// SHA-256 hash of the api key; the raw key is never persisted
    pub api_key_hash: String,

    /// Per-agent rate-limit policy
    pub rate_limit: RateLimitPolicy,

    /// Trust score, clamped to [0,100] after every mutation
    pub reputation: f64,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Optional payment wallet address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,

    /// Lifecycle status
    pub status: AgentStatus,

    /// Registration timestamp
    pub created_at: DateTime<Utc>,

    /// Most recent successful authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_auth_at: Option<DateTime<Utc>>,

    /// Cumulative request counter
    pub total_requests: u64,

    /// Cumulative paid amount
    pub total_paid: f64,
}

impl Agent {
    /// Whether the agent may currently be admitted
    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}

/// The payload a caller submits to begin registration
///
/// Held inside the pending [`Challenge`] and materialized into an [`Agent`]
/// once the caller proves key possession.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// Ed25519 public key, hex-encoded
    pub public_key: String,

    /// Requested scope identifiers
    pub scopes: Vec<String>,

    /// Optional payment wallet address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,

    /// Free-form metadata carried onto the agent record
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A pending registration handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    /// Agent id allocated for this registration
    pub agent_id: String,

    /// Random nonce embedded in the message
    pub nonce: String,

    /// Full message the caller must sign
    pub message: String,

    /// Hard expiry; past this the challenge is dead
    pub expires_at: DateTime<Utc>,

    /// Issuance timestamp
    pub created_at: DateTime<Utc>,

    /// The registration payload this challenge materializes into
    pub registration: RegistrationRequest,
}

impl Challenge {
    /// Whether the challenge is past its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Input shape for `create_agent`
#[derive(Debug, Clone)]
pub struct AgentDraft {
    /// Agent id (allocated by the protocol)
    pub id: String,
    /// Ed25519 public key, hex-encoded
    pub public_key: String,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// SHA-256 hash of the issued api key
    pub api_key_hash: String,
    /// Per-agent rate-limit policy
    pub rate_limit: RateLimitPolicy,
    /// Initial reputation score
    pub reputation: f64,
    /// Free-form metadata
    pub metadata: HashMap<String, String>,
    /// Optional wallet address
    pub wallet_address: Option<String>,
}

/// Partial update for `update_agent`
///
/// `None` fields are left untouched. The increment fields are deltas and
/// must be applied atomically relative to other concurrent updates on the
/// same agent id.
#[derive(Debug, Clone, Default)]
pub struct AgentUpdate {
    /// Replace granted scopes
    pub scopes: Option<Vec<String>>,
    /// Replace the api-key hash (key rotation)
    pub api_key_hash: Option<String>,
    /// Replace the rate-limit policy
    pub rate_limit: Option<RateLimitPolicy>,
    /// Replace the reputation score (clamped on write)
    pub reputation: Option<f64>,
    /// Replace metadata
    pub metadata: Option<HashMap<String, String>>,
    /// Replace lifecycle status
    pub status: Option<AgentStatus>,
    /// Set the last-authentication timestamp
    pub last_auth_at: Option<DateTime<Utc>>,
    /// Add to the cumulative request counter
    pub increment_requests: Option<u64>,
    /// Add to the cumulative paid amount
    pub increment_paid: Option<f64>,
}
