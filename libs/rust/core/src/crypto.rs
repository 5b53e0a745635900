//! SHA-256 digests and Ed25519 signatures.
//!
//! Nodes sign the raw 32 digest bytes, never the hex rendering. A signature that fails to
//! parse or verify is reported as `false`: it comes from an untrusted peer and is expected.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("private key must be 32 bytes, got {0}")]
    PrivateKeyLength(usize),
    #[error("public key must be 32 bytes, got {0}")]
    PublicKeyLength(usize),
    #[error("malformed public key: {0}")]
    MalformedPublicKey(#[from] ed25519_dalek::SignatureError),
}

/// SHA-256 output. Serialized as a lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(#[serde(with = "hex::serde")] [u8; 32]);

impl Digest {
    pub fn of(bytes: &[u8]) -> Self { Self::from_hasher(Sha256::new_with_prefix(bytes)) }

    pub fn from_hasher(hasher: Sha256) -> Self { Self(hasher.finalize().into()) }

    pub fn as_bytes(&self) -> &[u8; 32] { &self.0 }

    pub fn to_hex(&self) -> String { hex::encode(self.0) }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.to_hex()) }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", hex::encode(&self.0[..8]))
    }
}

pub fn signing_key_from_bytes(bytes: &[u8]) -> Result<SigningKey, CryptoError> {
    let secret: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::PrivateKeyLength(bytes.len()))?;
    Ok(SigningKey::from_bytes(&secret))
}

pub fn verifying_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    let public: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::PublicKeyLength(bytes.len()))?;
    Ok(VerifyingKey::from_bytes(&public)?)
}

pub fn sign(message: &[u8], key: &SigningKey) -> Vec<u8> {
    key.sign(message).to_bytes().to_vec()
}

pub fn verify(message: &[u8], signature: &[u8], key: &VerifyingKey) -> bool {
    let Ok(signature) = Signature::from_slice(signature) else { return false };
    key.verify(message, &signature).is_ok()
}
