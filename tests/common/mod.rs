//! Common test utilities shared across integration and E2E tests

use ed25519_compact::{KeyPair, Noise};
use keygate_core::{
    Keygate, KeygateConfig, RegistrationRequest, TokenConfig, VerifyResponse,
};
use std::collections::HashMap;

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// An agent-side Ed25519 key pair with signing helpers
pub struct TestKey {
    keypair: KeyPair,
}

impl TestKey {
    /// Generate a fresh key pair
    pub fn generate() -> Self {
        Self {
            keypair: KeyPair::generate(),
        }
    }

    /// Hex-encoded public key, as submitted at registration
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.pk.as_ref())
    }

    /// Sign a message the way a real agent would, returning hex
    pub fn sign(&self, message: &str) -> String {
        let sig = self.keypair.sk.sign(message.as_bytes(), Some(Noise::generate()));
        hex::encode(sig.as_ref())
    }
}

/// A config with a small scope catalogue and a usable token secret
pub fn test_config() -> KeygateConfig {
    KeygateConfig {
        scopes: vec![
            "data.read".to_string(),
            "data.write".to_string(),
            "payments.send".to_string(),
        ],
        token: TokenConfig {
            secret: "test-signing-secret".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Assemble an engine from [`test_config`]
pub fn test_keygate() -> Keygate {
    Keygate::from_config(test_config()).expect("test config must validate")
}

/// A registration request for `key` with the given scopes
pub fn registration(key: &TestKey, scopes: &[&str]) -> RegistrationRequest {
    RegistrationRequest {
        public_key: key.public_key_hex(),
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
        wallet_address: None,
        metadata: HashMap::new(),
    }
}

/// Run the full register → sign → verify handshake for `key`
pub async fn register_and_verify(
    keygate: &Keygate,
    key: &TestKey,
    scopes: &[&str],
) -> VerifyResponse {
    let challenge = keygate
        .protocol()
        .register(registration(key, scopes))
        .await
        .expect("register should issue a challenge");
    let signature = key.sign(&challenge.message);
    keygate
        .protocol()
        .verify(&challenge.agent_id, &signature)
        .await
        .expect("verify should activate the agent")
}
