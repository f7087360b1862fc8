//! # microtransport-sign
//!
//! Sign/verify facade over canonical-JSON payload maps. Default algorithm is
//! Ed25519; an ECDSA (P-256) fallback is available for keystores that
//! cannot produce Ed25519 keys. No private key material crosses this
//! facade's boundary — callers hold a [`Signer`] and ask it to sign;
//! verification only ever needs a public key.

pub mod canonical;
pub mod error;
pub mod signer;

pub use canonical::canonical_json_bytes;
pub use error::SignError;
pub use signer::{verify, Algorithm, EcdsaSigner, Ed25519Signer, Signer};
