//! Ed25519 key handling
//!
//! Key types:
//! - `KeyPair`: Ed25519 key pair used by identities and by the server master key
//! - `PublicKey`: Ed25519 public key for verification

use crate::error::{CoreError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Ed25519 key pair
#[derive(Clone)]
pub struct KeyPair {
    /// Key identifier
    kid: String,
    /// Ed25519 signing key (private)
    signing_key: SigningKey,
    /// Ed25519 verifying key (public)
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("kid", &self.kid)
            .field("signing_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate(kid: impl Into<String>) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(kid, signing_key)
    }

    /// Create a key pair from an existing signing key
    pub fn from_signing_key(kid: impl Into<String>, signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            kid: kid.into(),
            signing_key,
            verifying_key,
        }
    }

    /// Create a key pair from a 32-byte seed
    pub fn from_bytes(kid: impl Into<String>, bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(kid, SigningKey::from_bytes(bytes))
    }

    /// Create a key pair from a base64-encoded seed
    pub fn from_base64(kid: impl Into<String>, encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CoreError::InvalidKeyMaterial(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidKeyMaterial("expected 32 byte seed".into()))?;
        Ok(Self::from_bytes(kid, &bytes))
    }

    /// Get the key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            kid: self.kid.clone(),
            verifying_key: self.verifying_key,
        }
    }

    /// Get the raw signing key bytes
    pub fn signing_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Get the raw verifying key bytes
    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// PKCS#8 DER encoding of the private key, as consumed by JWT signers
    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>> {
        let document = self
            .signing_key
            .to_pkcs8_der()
            .map_err(|e| CoreError::CryptoError(e.to_string()))?;
        Ok(document.as_bytes().to_vec())
    }

    /// Sign arbitrary bytes
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Ed25519 public key for verification
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Key identifier
    kid: String,
    /// Ed25519 verifying key
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey").field("kid", &self.kid).finish()
    }
}

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(kid: impl Into<String>, bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)?;
        Ok(Self {
            kid: kid.into(),
            verifying_key,
        })
    }

    /// Create a public key from its base64 encoding
    pub fn from_base64(kid: impl Into<String>, encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CoreError::InvalidKeyMaterial(e.to_string()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            CoreError::InvalidKeyMaterial("expected 32 byte Ed25519 public key".into())
        })?;
        Self::from_bytes(kid, &bytes)
    }

    /// Get the key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Get the raw verifying key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Verify a detached signature over `message`
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let signature_bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| CoreError::CryptoError("Invalid signature length".into()))?;
        let signature = Signature::from_bytes(&signature_bytes);
        self.verifying_key
            .verify(message, &signature)
            .map_err(CoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate("master");
        assert_eq!(kp.kid(), "master");
        assert_eq!(kp.public_key().kid(), "master");
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate("master");
        let sig = kp.sign(b"payload");

        assert!(kp.public_key().verify(b"payload", &sig).is_ok());
        assert!(kp.public_key().verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn test_verification_fails_with_wrong_key() {
        let kp1 = KeyPair::generate("key-1");
        let kp2 = KeyPair::generate("key-2");
        let sig = kp1.sign(b"payload");

        assert!(kp2.public_key().verify(b"payload", &sig).is_err());
    }

    #[test]
    fn test_keypair_from_bytes_is_deterministic() {
        let kp1 = KeyPair::generate("key-1");
        let kp2 = KeyPair::from_bytes("key-2", &kp1.signing_key_bytes());

        assert_eq!(kp2.verifying_key_bytes(), kp1.verifying_key_bytes());
        assert_eq!(kp2.kid(), "key-2");
    }

    #[test]
    fn test_short_signature_rejected() {
        let kp = KeyPair::generate("master");
        assert!(kp.public_key().verify(b"payload", &[0u8; 12]).is_err());
    }

    #[test]
    fn test_public_key_base64() {
        let kp = KeyPair::generate("master");
        let encoded = STANDARD.encode(kp.verifying_key_bytes());
        let pk = PublicKey::from_base64("master", &encoded).unwrap();
        assert_eq!(pk.to_bytes(), kp.verifying_key_bytes());

        assert!(PublicKey::from_base64("master", "AAAA").is_err());
    }

    #[test]
    fn test_pkcs8_export() {
        let kp = KeyPair::generate("master");
        let der = kp.to_pkcs8_der().unwrap();
        assert!(!der.is_empty());
    }
}
