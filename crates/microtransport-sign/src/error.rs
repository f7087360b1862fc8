use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("invalid base64: {0}")]
    InvalidEncoding(String),
    #[error("invalid key bytes")]
    InvalidKey,
    #[error("invalid signature bytes")]
    InvalidSignature,
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("signing backend failure")]
    BackendFailure,
}
