//! Access Tokens
//!
//! Compact signed tokens (HS256) binding an agent's identity, scopes and key
//! to an issue/expiry window. Verification distinguishes an expired token
//! from one signed with the wrong secret.

use crate::error::{KeygateError, Result};
use crate::model::Agent;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// HMAC signing secret
    pub secret: String,

    /// Token lifetime (default one hour)
    #[serde(with = "humantime_serde")]
    pub lifetime: std::time::Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            lifetime: std::time::Duration::from_secs(crate::DEFAULT_TOKEN_LIFETIME_SECS),
        }
    }
}

impl TokenConfig {
    /// Fail-fast validation; an empty secret cannot sign anything useful
    pub fn validate(&self) -> Result<()> {
        if self.secret.is_empty() {
            return Err(KeygateError::Configuration(
                "token secret must not be empty".into(),
            ));
        }
        if self.lifetime.as_secs() == 0 {
            return Err(KeygateError::Configuration(
                "token lifetime must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Claims carried inside an issued token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Agent id
    pub sub: String,

    /// Granted scopes at issue time
    pub scopes: Vec<String>,

    /// The agent's hex-encoded public key
    pub public_key: String,

    /// Agent metadata snapshot
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Issued-at, unix seconds
    pub iat: i64,

    /// Expiry, unix seconds
    pub exp: i64,
}

/// A freshly issued token and its expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    /// The encoded token
    pub token: String,

    /// When it stops verifying
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies agent access tokens
#[derive(Debug, Clone)]
pub struct TokenService {
    config: TokenConfig,
}

impl TokenService {
    /// Build a service from validated configuration
    pub fn new(config: TokenConfig) -> Self {
        Self { config }
    }

    /// Issue a token for an agent
    pub fn issue(&self, agent: &Agent) -> Result<IssuedToken> {
        let now = Utc::now();
        let lifetime = Duration::from_std(self.config.lifetime)
            .map_err(|e| KeygateError::Configuration(format!("Token lifetime out of range: {}", e)))?;
        let expires_at = now + lifetime;

        let claims = TokenClaims {
            sub: agent.id.clone(),
            scopes: agent.scopes.clone(),
            public_key: agent.public_key.clone(),
            metadata: agent.metadata.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.secret.as_bytes()),
        )
        .map_err(|e| KeygateError::Internal(format!("Token encoding failed: {}", e)))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Verify a token and return its claims
    ///
    /// `Expired` for a token past its expiry, `Signature` for anything
    /// cryptographically wrong. Zero leeway.
    pub fn verify(&self, token: &str) -> Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.config.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                KeygateError::Expired("Token expired".into())
            }
            _ => KeygateError::Signature(format!("Token verification failed: {}", e)),
        })?;

        Ok(data.claims)
    }
}
