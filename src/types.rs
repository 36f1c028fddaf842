//! Wire types for the x402 payment envelope.
//!
//! Two shapes of payment terms exist on the wire: the flat legacy body and the
//! versioned `accepts` body. Both are modelled here as they arrive; the
//! [`requirements`](crate::requirements) module normalizes them for signing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version of the versioned x402 body this client understands.
pub const X402_VERSION: u32 = 2;

/// Header carrying the signed transaction in the flat form.
pub const PAYMENT_HEADER: &str = "X-PAYMENT";

/// Header carrying the declared token type in the flat form.
pub const PAYMENT_TOKEN_TYPE_HEADER: &str = "X-PAYMENT-TOKEN-TYPE";

/// Header carrying the encoded [`PaymentPayload`] in the versioned form.
pub const PAYMENT_SIGNATURE_HEADER: &str = "PAYMENT-SIGNATURE";

/// Settlement confirmation header sent with versioned responses.
pub const PAYMENT_RESPONSE_HEADER: &str = "PAYMENT-RESPONSE";

/// Settlement confirmation header sent with flat responses.
pub const LEGACY_PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// Server-specified retry delay.
pub const RETRY_AFTER_HEADER: &str = "Retry-After";

/// Flat legacy payment terms.
///
/// # Examples
///
/// ```
/// use x402_envelope::types::FlatRequirements;
/// use serde_json::json;
///
/// let terms: FlatRequirements = serde_json::from_value(json!({
///     "maxAmountRequired": "1000",
///     "resource": "/api/names/register",
///     "payTo": "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7",
///     "network": "mainnet",
///     "nonce": "abc123",
///     "expiresAt": "2030-01-01T00:00:00Z",
///     "tokenType": "STX"
/// })).unwrap();
/// assert_eq!(terms.token_type.as_deref(), Some("STX"));
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FlatRequirements {
    /// Amount in the token's smallest unit
    #[serde(rename = "maxAmountRequired")]
    pub max_amount_required: String,

    /// The resource URL or identifier
    pub resource: String,

    /// Recipient address
    #[serde(rename = "payTo")]
    pub pay_to: String,

    /// Network identifier
    pub network: String,

    /// Server-issued payment nonce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// RFC 3339 expiry of these terms
    #[serde(rename = "expiresAt", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,

    /// Token to pay with (e.g. "STX", "sBTC")
    #[serde(rename = "tokenType", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Token contract, for contract-issued tokens
    #[serde(rename = "tokenContract", default, skip_serializing_if = "Option::is_none")]
    pub token_contract: Option<String>,
}

/// Resource descriptor of the versioned form.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResourceInfo {
    /// The resource URL
    pub url: String,

    /// Remaining descriptor fields, echoed untouched
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Scheme-specific extras of an accepted payment option.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AcceptedExtra {
    /// Server-issued payment nonce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Token to pay with
    #[serde(rename = "tokenType", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Token contract, for contract-issued tokens
    #[serde(rename = "tokenContract", default, skip_serializing_if = "Option::is_none")]
    pub token_contract: Option<String>,

    /// Unrecognized extra fields, echoed untouched
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// One payment option from the versioned `accepts` list.
///
/// Unknown fields are preserved so the option can be echoed back verbatim in
/// [`PaymentPayload::accepted`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AcceptedRequirements {
    /// Payment scheme (e.g. "exact")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    /// Network identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Amount in the token's smallest unit
    pub amount: String,

    /// Asset identifier
    pub asset: String,

    /// Recipient address
    #[serde(rename = "payTo")]
    pub pay_to: String,

    /// Maximum time in seconds the payment stays valid
    #[serde(rename = "maxTimeoutSeconds")]
    pub max_timeout_seconds: u64,

    /// Scheme-specific extras
    #[serde(default)]
    pub extra: AcceptedExtra,

    /// Remaining fields, echoed untouched
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Versioned payment-required body.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VersionedRequirements {
    /// Protocol version
    #[serde(rename = "x402Version")]
    pub x402_version: u32,

    /// What is being paid for
    pub resource: ResourceInfo,

    /// Accepted payment options; the first one is authoritative
    pub accepts: Vec<AcceptedRequirements>,

    /// Optional error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A payment-required body in either of its wire shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentRequired {
    /// Flat legacy terms
    Flat(FlatRequirements),
    /// Versioned `accepts` terms
    Versioned(VersionedRequirements),
}

/// Inner payload carrying the signed transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionPayload {
    /// Signed transaction, opaque to this crate
    pub transaction: String,
}

/// Payment payload sent back in the [`PAYMENT_SIGNATURE_HEADER`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentPayload {
    /// Protocol version
    #[serde(rename = "x402Version")]
    pub x402_version: u32,

    /// The payment option being satisfied, exactly as offered
    pub accepted: AcceptedRequirements,

    /// The signed transaction
    pub payload: TransactionPayload,
}

/// Settlement confirmation decoded from the payment response header.
///
/// Informational only; the engine never acts on its contents.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SettlementResponse {
    /// Whether settlement succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    /// Settled transaction id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,

    /// Network of the settled transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Address that paid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,

    /// Anything else the server reported
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Single-use ownership challenge.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Challenge {
    /// Single-use challenge identifier
    #[serde(rename = "challengeId")]
    pub challenge_id: String,

    /// Hex-encoded structured-data message
    pub message: String,

    /// Hex-encoded structured-data domain
    pub domain: String,

    /// RFC 3339 expiry
    #[serde(rename = "expiresAt", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Challenge-phase response body.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChallengeEnvelope {
    /// Whether the server wants an ownership signature
    #[serde(rename = "requiresSignature", default)]
    pub requires_signature: bool,

    /// The challenge to sign
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<Challenge>,
}
