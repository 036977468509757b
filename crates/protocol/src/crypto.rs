//! Signing keys, randomness and expiry helpers for zome call signing.
//!
//! Keys are Ed25519. The public half of a key pair doubles as the caller's
//! identity once wrapped in an [`AgentPubKey`].

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ed25519_dalek::{
    Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH,
    SIGNATURE_LENGTH,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::hash::AgentPubKey;

/// Length of a capability secret in bytes.
pub const CAP_SECRET_LENGTH: usize = 64;

/// Length of a call nonce in bytes.
pub const NONCE_LENGTH: usize = 32;

/// How far into the future a signed call stays valid by default.
pub const DEFAULT_EXPIRY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// A 64-byte Ed25519 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_bytes")] pub [u8; SIGNATURE_LENGTH]);

impl Signature {
    /// Creates a new Signature from raw bytes.
    pub fn from_bytes(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of this signature.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    fn as_ed25519(&self) -> Ed25519Signature {
        Ed25519Signature::from_bytes(&self.0)
    }
}

/// A single-use 256-bit nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nonce256Bit(#[serde(with = "serde_bytes")] pub [u8; NONCE_LENGTH]);

impl Nonce256Bit {
    /// Returns the raw bytes of this nonce.
    pub fn as_bytes(&self) -> &[u8; NONCE_LENGTH] {
        &self.0
    }
}

/// A capability secret, presented with a call to prove it may use a grant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapSecret(#[serde(with = "serde_bytes")] pub [u8; CAP_SECRET_LENGTH]);

impl CapSecret {
    /// Returns the raw bytes of this secret.
    pub fn as_bytes(&self) -> &[u8; CAP_SECRET_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for CapSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CapSecret(<redacted>)")
    }
}

/// An Ed25519 key pair used to sign zome calls.
#[derive(Clone)]
pub struct SigningKeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl SigningKeyPair {
    /// Generates a new key pair from OS randomness.
    pub fn generate() -> Result<Self> {
        let mut secret = [0u8; SECRET_KEY_LENGTH];
        OsRng.try_fill_bytes(&mut secret)?;
        Ok(Self::from_secret_key_bytes(&secret))
    }

    /// Restores a key pair from its secret key bytes.
    pub fn from_secret_key_bytes(bytes: &[u8; SECRET_KEY_LENGTH]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Returns the public key.
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Returns the identity derived from the public key.
    pub fn agent_pub_key(&self) -> AgentPubKey {
        AgentPubKey::from_ed25519(&self.verifying_key)
    }

    /// Signs a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public_key", &self.agent_pub_key())
            .finish_non_exhaustive()
    }
}

/// Verifies a signature against a public key.
pub fn verify_signature(key: &VerifyingKey, message: &[u8], signature: &Signature) -> Result<()> {
    key.verify(message, &signature.as_ed25519())
        .map_err(|e| ProtocolError::InvalidSignature(e.to_string()))
}

/// Generates a key pair and the identity that represents it.
pub fn generate_signing_key_pair() -> Result<(SigningKeyPair, AgentPubKey)> {
    let key_pair = SigningKeyPair::generate()?;
    let identity = key_pair.agent_pub_key();
    Ok((key_pair, identity))
}

/// Generates a fresh nonce.
pub fn random_nonce() -> Result<Nonce256Bit> {
    let mut bytes = [0u8; NONCE_LENGTH];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(Nonce256Bit(bytes))
}

/// Generates a fresh capability secret.
pub fn random_cap_secret() -> Result<CapSecret> {
    let mut bytes = [0u8; CAP_SECRET_LENGTH];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(CapSecret(bytes))
}

/// Current time in microseconds since the Unix epoch.
pub fn now_micros() -> Result<i64> {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ProtocolError::ClockSkew(e.to_string()))?;
    i64::try_from(since_epoch.as_micros())
        .map_err(|_| ProtocolError::ClockSkew("timestamp out of range".to_string()))
}

/// Expiry timestamp `window` from now, in microseconds since the Unix epoch.
pub fn nonce_expiration(window: Duration) -> Result<i64> {
    let window = i64::try_from(window.as_micros())
        .map_err(|_| ProtocolError::ClockSkew("expiry window out of range".to_string()))?;
    now_micros()?
        .checked_add(window)
        .ok_or_else(|| ProtocolError::ClockSkew("expiry overflows".to_string()))
}
