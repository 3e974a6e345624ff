//! Identity Primitives
//!
//! Ed25519 key pairs and detached signatures, SHA-256 credential-secret
//! hashing, and generators for agent ids, api keys and challenge nonces.
//! Everything crosses the wire hex-encoded.

use crate::error::{KeygateError, Result};
use ed25519_compact::{KeyPair, Noise, PublicKey, SecretKey, Signature};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Environment mode, reflected in id and api-key prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Production credentials (`agt_live_…` / `ak_live_…`)
    Live,
    /// Test credentials (`agt_test_…` / `ak_test_…`)
    Test,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Test
    }
}

impl Mode {
    fn infix(&self) -> &'static str {
        match self {
            Mode::Live => "live",
            Mode::Test => "test",
        }
    }
}

/// Generate an Ed25519 key pair (32-byte public key, 64-byte secret key)
pub fn generate_keypair() -> KeyPair {
    KeyPair::generate()
}

/// Sign a UTF-8 message with a hex-encoded secret key
///
/// Returns the detached 64-byte signature, hex-encoded.
pub fn sign_message(secret_key_hex: &str, message: &str) -> Result<String> {
    let bytes = hex::decode(secret_key_hex)
        .map_err(|e| KeygateError::Validation(format!("Invalid secret key hex: {}", e)))?;
    let sk = SecretKey::from_slice(&bytes)
        .map_err(|e| KeygateError::Validation(format!("Invalid secret key: {}", e)))?;
    let sig = sk.sign(message.as_bytes(), Some(Noise::generate()));
    Ok(hex::encode(sig.as_ref()))
}

/// Verify a detached signature against a hex-encoded public key
///
/// Returns `false` for malformed keys, malformed signatures, bad hex, or a
/// failed verification. Never errors.
pub fn verify_signature(public_key_hex: &str, message: &str, signature_hex: &str) -> bool {
    let Ok(key_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(pk) = PublicKey::from_slice(&key_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    pk.verify(message.as_bytes(), &sig).is_ok()
}

/// SHA-256 hash of an api key, hex-encoded
///
/// Only this hash is ever persisted; the raw key is returned to the caller
/// exactly once at issuance.
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a globally-unique agent id with a mode-specific prefix
pub fn generate_agent_id(mode: Mode) -> String {
    format!("agt_{}_{}", mode.infix(), Uuid::new_v4().simple())
}

/// Generate a fresh api key with a mode-specific prefix (24 random bytes, hex)
pub fn generate_api_key(mode: Mode) -> String {
    let mut bytes = [0u8; 24];
    OsRng.fill_bytes(&mut bytes);
    format!("ak_{}_{}", mode.infix(), hex::encode(bytes))
}

/// Generate a cryptographically secure challenge nonce (16 random bytes, hex)
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
