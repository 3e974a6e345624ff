//! Agent Store
//!
//! The storage contract the protocol layer runs against, plus the in-memory
//! reference backend. Production backends must provide the same atomicity
//! guarantees (unique public key on create, atomic counter deltas on update)
//! via transactions or per-key locking.

use crate::error::{KeygateError, Result};
use crate::model::{Agent, AgentDraft, AgentStatus, AgentUpdate, Challenge};
use crate::reputation::clamp_score;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Storage contract for agents and pending challenges
///
/// Challenges are keyed by agent id; at most one pending challenge exists
/// per agent id.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Persist a new agent; `Conflict` if the public key is already taken.
    ///
    /// Concurrent creates with the same public key must resolve to exactly
    /// one success.
    async fn create_agent(&self, draft: AgentDraft) -> Result<Agent>;

    /// Look up an agent by id
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>>;

    /// Look up an agent by its hex-encoded public key
    async fn get_agent_by_public_key(&self, public_key: &str) -> Result<Option<Agent>>;

    /// Look up an agent by its api-key hash
    async fn get_agent_by_api_key_hash(&self, hash: &str) -> Result<Option<Agent>>;

    /// Apply a partial update; `NotFound` if the id is unknown.
    ///
    /// The increment deltas are applied atomically relative to other
    /// concurrent updates on the same agent id.
    async fn update_agent(&self, id: &str, update: AgentUpdate) -> Result<Agent>;

    /// Remove an agent; `false` if the id was unknown
    async fn delete_agent(&self, id: &str) -> Result<bool>;

    /// Persist a pending challenge, replacing any prior one for the agent id
    async fn create_challenge(&self, challenge: Challenge) -> Result<()>;

    /// Look up the pending challenge for an agent id
    async fn get_challenge(&self, agent_id: &str) -> Result<Option<Challenge>>;

    /// Remove a challenge; `false` if none existed
    async fn delete_challenge(&self, agent_id: &str) -> Result<bool>;

    /// Drop every challenge past its expiry; returns how many were removed
    async fn clean_expired_challenges(&self) -> Result<usize>;
}

#[derive(Default)]
struct MemoryInner {
    agents: HashMap<String, Agent>,
    // secondary indices for O(1) lookup
    by_public_key: HashMap<String, String>,
    by_api_key_hash: HashMap<String, String>,
    challenges: HashMap<String, Challenge>,
}

/// In-memory reference backend
///
/// A single `RwLock` over all collections: uniqueness check and insert run
/// under one write guard, which gives the create/update atomicity the
/// contract requires.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored agents
    pub async fn agent_count(&self) -> usize {
        self.inner.read().await.agents.len()
    }

    /// Number of pending challenges
    pub async fn challenge_count(&self) -> usize {
        self.inner.read().await.challenges.len()
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn create_agent(&self, draft: AgentDraft) -> Result<Agent> {
        let mut inner = self.inner.write().await;

        if inner.by_public_key.contains_key(&draft.public_key) {
            return Err(KeygateError::Conflict(format!(
                "Public key already registered: {}",
                draft.public_key
            )));
        }
        if inner.agents.contains_key(&draft.id) {
            return Err(KeygateError::Conflict(format!(
                "Agent id already exists: {}",
                draft.id
            )));
        }

        let agent = Agent {
            id: draft.id.clone(),
            public_key: draft.public_key.clone(),
            scopes: draft.scopes,
            api_key_hash: draft.api_key_hash.clone(),
            rate_limit: draft.rate_limit,
            reputation: clamp_score(draft.reputation),
            metadata: draft.metadata,
            wallet_address: draft.wallet_address,
            status: AgentStatus::Active,
            created_at: Utc::now(),
            last_auth_at: None,
            total_requests: 0,
            total_paid: 0.0,
        };

        inner
            .by_public_key
            .insert(draft.public_key, draft.id.clone());
        inner
            .by_api_key_hash
            .insert(draft.api_key_hash, draft.id.clone());
        inner.agents.insert(draft.id, agent.clone());

        debug!(agent_id = %agent.id, "agent persisted");
        Ok(agent)
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        Ok(self.inner.read().await.agents.get(id).cloned())
    }

    async fn get_agent_by_public_key(&self, public_key: &str) -> Result<Option<Agent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_public_key
            .get(public_key)
            .and_then(|id| inner.agents.get(id))
            .cloned())
    }

    async fn get_agent_by_api_key_hash(&self, hash: &str) -> Result<Option<Agent>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_api_key_hash
            .get(hash)
            .and_then(|id| inner.agents.get(id))
            .cloned())
    }

    async fn update_agent(&self, id: &str, update: AgentUpdate) -> Result<Agent> {
        let mut inner = self.inner.write().await;

        let mut rotated = None;
        let agent = inner
            .agents
            .get_mut(id)
            .ok_or_else(|| KeygateError::NotFound(format!("Agent not found: {}", id)))?;

        if let Some(scopes) = update.scopes {
            agent.scopes = scopes;
        }
        if let Some(hash) = update.api_key_hash {
            if hash != agent.api_key_hash {
                rotated = Some((agent.api_key_hash.clone(), hash.clone()));
                agent.api_key_hash = hash;
            }
        }
        if let Some(rate_limit) = update.rate_limit {
            agent.rate_limit = rate_limit;
        }
        if let Some(reputation) = update.reputation {
            agent.reputation = clamp_score(reputation);
        }
        if let Some(metadata) = update.metadata {
            agent.metadata = metadata;
        }
        if let Some(status) = update.status {
            agent.status = status;
        }
        if let Some(at) = update.last_auth_at {
            agent.last_auth_at = Some(at);
        }
        if let Some(delta) = update.increment_requests {
            agent.total_requests = agent.total_requests.saturating_add(delta);
        }
        if let Some(delta) = update.increment_paid {
            agent.total_paid += delta;
        }

        let updated = agent.clone();
        if let Some((old_hash, new_hash)) = rotated {
            inner.by_api_key_hash.remove(&old_hash);
            inner.by_api_key_hash.insert(new_hash, id.to_string());
        }
        Ok(updated)
    }

    async fn delete_agent(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(agent) = inner.agents.remove(id) else {
            return Ok(false);
        };
        inner.by_public_key.remove(&agent.public_key);
        inner.by_api_key_hash.remove(&agent.api_key_hash);
        inner.challenges.remove(id);
        Ok(true)
    }

    async fn create_challenge(&self, challenge: Challenge) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .challenges
            .insert(challenge.agent_id.clone(), challenge);
        Ok(())
    }

    async fn get_challenge(&self, agent_id: &str) -> Result<Option<Challenge>> {
        Ok(self.inner.read().await.challenges.get(agent_id).cloned())
    }

    async fn delete_challenge(&self, agent_id: &str) -> Result<bool> {
        Ok(self.inner.write().await.challenges.remove(agent_id).is_some())
    }

    async fn clean_expired_challenges(&self) -> Result<usize> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let before = inner.challenges.len();
        inner.challenges.retain(|_, c| !c.is_expired(now));
        let removed = before - inner.challenges.len();
        if removed > 0 {
            debug!(removed, "cleaned expired challenges");
        }
        Ok(removed)
    }
}
