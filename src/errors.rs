//! Error types for the x402 envelope.
//!
//! Every failure the engine can observe is one [`X402Error`] variant, and every
//! variant maps onto an [`ErrorClassification`] so callers can decide what to do
//! without matching on message text.

use crate::classify::ErrorClassification;
use serde_json::Value;
use thiserror::Error;

/// Main error type for x402 envelope operations.
#[derive(Error, Debug)]
pub enum X402Error {
    /// Error during HTTP request/response handling
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Error during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error during Base64 encoding/decoding
    #[error("Base64 error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    /// Error parsing URL
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    /// The server and client disagree about the protocol itself: unknown
    /// version, empty `accepts`, missing challenge, or a repeated challenge.
    #[error("Protocol error: {message}")]
    ProtocolError {
        /// What was wrong with the exchange
        message: String,
        /// Raw server payload, kept for diagnosis
        raw: Value,
    },

    /// Rate limiting, facilitator outage or network failure
    #[error("Transient failure (status {status}): {message}")]
    Transient {
        /// HTTP status, `0` when no response was received
        status: u16,
        /// Server or transport message
        message: String,
    },

    /// A previously signed transaction for the same account sequence is still pending
    #[error("Nonce conflict (status {status}): {message}")]
    NonceConflict {
        /// HTTP status of the rejected submission
        status: u16,
        /// Server message naming the conflict
        message: String,
    },

    /// The server rejected the request for a reason retrying cannot fix
    #[error("Request rejected (status {status}): {message}")]
    RequestRejected {
        /// HTTP status of the rejection
        status: u16,
        /// Server message
        message: String,
    },

    /// The signing collaborator could not produce a signature
    #[error("Signer error: {0}")]
    SignerError(String),

    /// Ownership proof was not accepted (HTTP 403)
    #[error("Authorization failed: {message}")]
    AuthorizationError {
        /// Server message
        message: String,
        /// Owner the server has on record, when it says so
        registered_owner: Option<String>,
    },

    /// The target resource does not exist (HTTP 404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid payment payload
    #[error("Invalid payment payload: {0}")]
    InvalidPayload(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type alias for x402 envelope operations.
pub type Result<T> = std::result::Result<T, X402Error>;

impl X402Error {
    /// Builds a [`X402Error::ProtocolError`] carrying the raw payload.
    pub fn protocol(message: impl Into<String>, raw: Value) -> Self {
        X402Error::ProtocolError {
            message: message.into(),
            raw,
        }
    }

    /// How the retry machinery should treat this error.
    pub fn classification(&self) -> ErrorClassification {
        match self {
            X402Error::HttpError(_) | X402Error::Transient { .. } => ErrorClassification::Retryable,
            X402Error::NonceConflict { .. } => ErrorClassification::NonceConflict,
            _ => ErrorClassification::Fatal,
        }
    }
}

impl From<ethers::core::types::SignatureError> for X402Error {
    fn from(err: ethers::core::types::SignatureError) -> Self {
        X402Error::SignerError(err.to_string())
    }
}

impl From<ethers::signers::WalletError> for X402Error {
    fn from(err: ethers::signers::WalletError) -> Self {
        X402Error::SignerError(err.to_string())
    }
}
