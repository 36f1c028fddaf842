//! Parsing of payment-required bodies into a normalized signing request.
//!
//! Both wire shapes are first decoded into the [`PaymentRequired`] union and
//! then normalized by [`PaymentRequired::into_signing_request`], so nothing
//! downstream has to branch on field presence.

use crate::codec::generate_nonce;
use crate::errors::{Result, X402Error};
use crate::executor::ResponseBody;
use crate::types::{AcceptedRequirements, FlatRequirements, PaymentRequired, VersionedRequirements, X402_VERSION};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;

/// Default validity window applied when flat terms carry no `expiresAt`.
pub const DEFAULT_FLAT_TIMEOUT_SECONDS: i64 = 300;

/// Which wire shape a signing request came from, and what must be echoed back.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentForm {
    /// Flat terms: answered with the signed transaction and token type headers
    Flat,
    /// Versioned terms: answered with an encoded payload echoing `accepted`
    Versioned {
        /// The authoritative (first) accepted option
        accepted: AcceptedRequirements,
    },
}

/// Normalized terms handed to the payment signer.
#[derive(Debug, Clone, PartialEq)]
pub struct SigningRequest {
    /// Amount in the token's smallest unit
    pub max_amount_required: String,
    /// Resource being paid for
    pub resource: String,
    /// Recipient address
    pub pay_to: String,
    /// Network identifier
    pub network: String,
    /// Payment nonce, server-issued or freshly generated
    pub nonce: String,
    /// When these terms stop being valid
    pub expires_at: DateTime<Utc>,
    /// Token to pay with
    pub token_type: Option<String>,
    /// Token contract or asset identifier
    pub token_contract: Option<String>,
    /// Wire shape of the originating terms
    pub form: PaymentForm,
}

impl PaymentRequired {
    /// Decodes a payment-required JSON body into one of the two wire shapes.
    ///
    /// A declared `x402Version` other than [`X402_VERSION`] is rejected; a body
    /// without one is treated as flat terms.
    pub fn from_json(body: &Value) -> Result<Self> {
        if !body.is_object() {
            return Err(X402Error::protocol("payment terms are not a JSON object", body.clone()));
        }

        match body.get("x402Version") {
            Some(version) => {
                if version.as_u64() != Some(u64::from(X402_VERSION)) {
                    return Err(X402Error::protocol(
                        format!("unsupported x402Version {version}, expected {X402_VERSION}"),
                        body.clone(),
                    ));
                }
                let terms: VersionedRequirements = serde_json::from_value(body.clone())
                    .map_err(|e| X402Error::protocol(format!("malformed versioned terms: {e}"), body.clone()))?;
                if terms.accepts.is_empty() {
                    return Err(X402Error::protocol("payment terms accept no payment options", body.clone()));
                }
                Ok(PaymentRequired::Versioned(terms))
            }
            None => {
                let terms: FlatRequirements = serde_json::from_value(body.clone())
                    .map_err(|e| X402Error::protocol(format!("malformed flat terms: {e}"), body.clone()))?;
                Ok(PaymentRequired::Flat(terms))
            }
        }
    }

    /// Normalizes either shape into the flat signing request.
    ///
    /// A missing nonce is replaced by a fresh random one. For the versioned
    /// shape, expiry is `now + maxTimeoutSeconds` of the first accepted option.
    pub fn into_signing_request(self, now: DateTime<Utc>) -> Result<SigningRequest> {
        match self {
            PaymentRequired::Flat(terms) => {
                let expires_at = match &terms.expires_at {
                    Some(raw) => DateTime::parse_from_rfc3339(raw)
                        .map(|at| at.with_timezone(&Utc))
                        .map_err(|e| {
                            X402Error::protocol(
                                format!("invalid expiresAt '{raw}': {e}"),
                                serde_json::to_value(&terms).unwrap_or(Value::Null),
                            )
                        })?,
                    None => now + ChronoDuration::seconds(DEFAULT_FLAT_TIMEOUT_SECONDS),
                };

                Ok(SigningRequest {
                    max_amount_required: terms.max_amount_required,
                    resource: terms.resource,
                    pay_to: terms.pay_to,
                    network: terms.network,
                    nonce: terms.nonce.unwrap_or_else(generate_nonce),
                    expires_at,
                    token_type: terms.token_type,
                    token_contract: terms.token_contract,
                    form: PaymentForm::Flat,
                })
            }
            PaymentRequired::Versioned(terms) => {
                let raw = serde_json::to_value(&terms).unwrap_or(Value::Null);
                let resource = terms.resource.url;
                let accepted = terms
                    .accepts
                    .into_iter()
                    .next()
                    .ok_or_else(|| X402Error::protocol("payment terms accept no payment options", raw))?;

                let timeout = i64::try_from(accepted.max_timeout_seconds).unwrap_or(i64::MAX);
                let expires_at = now
                    .checked_add_signed(ChronoDuration::seconds(timeout.min(i64::from(u32::MAX))))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);

                Ok(SigningRequest {
                    max_amount_required: accepted.amount.clone(),
                    resource,
                    pay_to: accepted.pay_to.clone(),
                    network: accepted.network.clone().unwrap_or_default(),
                    nonce: accepted.extra.nonce.clone().unwrap_or_else(generate_nonce),
                    expires_at,
                    token_type: accepted.extra.token_type.clone(),
                    token_contract: accepted
                        .extra
                        .token_contract
                        .clone()
                        .or_else(|| Some(accepted.asset.clone())),
                    form: PaymentForm::Versioned { accepted },
                })
            }
        }
    }
}

/// Parses a payment-required response body into a signing request.
///
/// Non-JSON bodies, unknown versions and empty `accepts` lists all fail with
/// [`X402Error::ProtocolError`], which is never retried.
///
/// # Examples
///
/// ```
/// use x402_envelope::executor::ResponseBody;
/// use x402_envelope::requirements::{parse_payment_required, PaymentForm};
/// use serde_json::json;
///
/// let body = ResponseBody::Json(json!({
///     "x402Version": 2,
///     "resource": {"url": "https://api.example.com/names"},
///     "accepts": [{
///         "amount": "1000",
///         "asset": "STX",
///         "payTo": "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7",
///         "maxTimeoutSeconds": 60,
///         "extra": {"nonce": "abc"}
///     }]
/// }));
///
/// let request = parse_payment_required(&body).unwrap();
/// assert_eq!(request.nonce, "abc");
/// assert!(matches!(request.form, PaymentForm::Versioned { .. }));
/// ```
pub fn parse_payment_required(body: &ResponseBody) -> Result<SigningRequest> {
    parse_payment_required_at(body, Utc::now())
}

/// Same as [`parse_payment_required`] with an explicit clock.
pub fn parse_payment_required_at(body: &ResponseBody, now: DateTime<Utc>) -> Result<SigningRequest> {
    match body {
        ResponseBody::Json(value) => PaymentRequired::from_json(value)?.into_signing_request(now),
        ResponseBody::Text(text) => Err(X402Error::protocol(
            "payment terms are not JSON",
            Value::String(text.clone()),
        )),
    }
}
