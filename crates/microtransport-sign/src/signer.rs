//! Signer implementations. Each algorithm's private key type stays behind
//! its own [`Signer`] impl; verification is a free function keyed only on
//! the algorithm tag and the public key, since a verifier never needs (and
//! must never receive) private key material.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature as EdSignature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use p256::ecdsa::{
    signature::Signer as EcdsaSign, signature::Verifier as EcdsaVerify, Signature as P256Signature,
    SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey,
};
use rand_core::OsRng;
use serde_json::{Map, Value};

use crate::canonical::canonical_json_bytes;
use crate::error::SignError;

/// Which algorithm produced (or should verify) a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Ed25519,
    EcdsaP256,
}

/// A holder of private key material that can sign canonical-JSON payloads.
/// The private key never leaves an implementor of this trait.
pub trait Signer {
    fn sign(&self, payload: &Map<String, Value>) -> Result<String, SignError>;
    fn public_key_b64(&self) -> String;
    fn algorithm(&self) -> Algorithm;
}

/// Default signer: Ed25519 over the canonical JSON bytes.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Ed25519Signer {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load from a 32-byte seed, base64-encoded.
    pub fn from_seed_b64(seed_b64: &str) -> Result<Self, SignError> {
        let bytes = BASE64
            .decode(seed_b64)
            .map_err(|e| SignError::InvalidEncoding(e.to_string()))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| SignError::InvalidKey)?;
        Ok(Ed25519Signer {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Base64 seed for this signer's private key. Callers must store this
    /// securely; it is the only way key material leaves the signer, and
    /// only at the caller's explicit request.
    pub fn seed_b64(&self) -> String {
        BASE64.encode(self.signing_key.to_bytes())
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, payload: &Map<String, Value>) -> Result<String, SignError> {
        let bytes = canonical_json_bytes(payload)?;
        let sig: EdSignature = self.signing_key.sign(&bytes);
        Ok(BASE64.encode(sig.to_bytes()))
    }

    fn public_key_b64(&self) -> String {
        BASE64.encode(self.signing_key.verifying_key().to_bytes())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Ed25519
    }
}

/// ECDSA (P-256) fallback signer for keystores that cannot produce Ed25519
/// keys.
pub struct EcdsaSigner {
    signing_key: P256SigningKey,
}

impl EcdsaSigner {
    pub fn generate() -> Self {
        EcdsaSigner {
            signing_key: P256SigningKey::random(&mut OsRng),
        }
    }
}

impl Signer for EcdsaSigner {
    fn sign(&self, payload: &Map<String, Value>) -> Result<String, SignError> {
        let bytes = canonical_json_bytes(payload)?;
        let sig: P256Signature = EcdsaSign::sign(&self.signing_key, &bytes);
        Ok(BASE64.encode(sig.to_der().as_bytes()))
    }

    fn public_key_b64(&self) -> String {
        BASE64.encode(
            self.signing_key
                .verifying_key()
                .to_encoded_point(true)
                .as_bytes(),
        )
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::EcdsaP256
    }
}

/// Verify `signature_b64` over `payload`'s canonical JSON form against
/// `public_key_b64`, per `algorithm`.
pub fn verify(
    payload: &Map<String, Value>,
    signature_b64: &str,
    public_key_b64: &str,
    algorithm: Algorithm,
) -> Result<bool, SignError> {
    let bytes = canonical_json_bytes(payload)?;
    let sig_bytes = BASE64
        .decode(signature_b64)
        .map_err(|e| SignError::InvalidEncoding(e.to_string()))?;
    let key_bytes = BASE64
        .decode(public_key_b64)
        .map_err(|e| SignError::InvalidEncoding(e.to_string()))?;

    match algorithm {
        Algorithm::Ed25519 => {
            let key_arr: [u8; 32] = key_bytes.try_into().map_err(|_| SignError::InvalidKey)?;
            let verifying_key =
                VerifyingKey::from_bytes(&key_arr).map_err(|_| SignError::InvalidKey)?;
            let sig_arr: [u8; 64] = sig_bytes.try_into().map_err(|_| SignError::InvalidSignature)?;
            let signature = EdSignature::from_bytes(&sig_arr);
            Ok(verifying_key.verify(&bytes, &signature).is_ok())
        }
        Algorithm::EcdsaP256 => {
            let verifying_key = P256VerifyingKey::from_sec1_bytes(&key_bytes)
                .map_err(|_| SignError::InvalidKey)?;
            let signature = P256Signature::from_der(&sig_bytes)
                .map_err(|_| SignError::InvalidSignature)?;
            Ok(EcdsaVerify::verify(&verifying_key, &bytes, &signature).is_ok())
        }
    }
}
