//! Challenge-response authentication for ownership-gated mutations.
//!
//! Transfers and deletes of an owned resource take two paid round trips. The
//! first submits the mutation unsigned and gets back a single-use challenge;
//! the second resubmits the same body with the owner's signature over that
//! challenge. Each round trip is a complete [`RetryCoordinator`] flow, so the
//! payment envelope and its retries apply to both.

use crate::classify::ErrorClassification;
use crate::errors::X402Error;
use crate::executor::{HttpResponse, OutgoingRequest};
use crate::retry::{FlowFailure, FlowOutcome, FlowSuccess, RetryCoordinator, RetryState};
use crate::signers::StructuredDataSigner;
use crate::types::{Challenge, ChallengeEnvelope, SettlementResponse};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// The two round trips of an ownership mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengePhase {
    /// Unsigned submission that should yield a challenge
    Challenge,
    /// Signed resubmission
    Sign,
}

impl fmt::Display for ChallengePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengePhase::Challenge => f.write_str("challenge"),
            ChallengePhase::Sign => f.write_str("sign"),
        }
    }
}

/// Payment bookkeeping of one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseReport {
    /// Retry bookkeeping of the phase's payment flow
    pub state: RetryState,
    /// Settlement confirmation of the phase's payment
    pub settlement: Option<SettlementResponse>,
}

impl From<&FlowSuccess> for PhaseReport {
    fn from(success: &FlowSuccess) -> Self {
        Self {
            state: success.state,
            settlement: success.settlement.clone(),
        }
    }
}

/// Proof that an ownership mutation was applied.
#[derive(Debug, Clone)]
pub struct OwnershipReceipt {
    /// Address the server verified as owner
    pub verified_by: String,
    /// The consumed challenge
    pub challenge_id: String,
    /// Final server response
    pub response: HttpResponse,
    /// Challenge phase bookkeeping
    pub challenge_phase: PhaseReport,
    /// Sign phase bookkeeping
    pub sign_phase: PhaseReport,
}

/// Why an ownership mutation was not applied.
#[derive(Debug, Error)]
#[error("{phase} phase failed ({classification}): {error}")]
pub struct OwnershipFailure {
    /// Phase that failed
    pub phase: ChallengePhase,
    /// Classification of the failure
    pub classification: ErrorClassification,
    /// Whether the payment retry budget ran out
    pub exhausted: bool,
    /// The underlying error
    #[source]
    pub error: X402Error,
    /// Last response observed, if any
    pub response: Option<HttpResponse>,
    /// Retry bookkeeping of the failing phase
    pub state: RetryState,
}

impl OwnershipFailure {
    fn fatal(phase: ChallengePhase, error: X402Error, response: Option<HttpResponse>, state: RetryState) -> Self {
        Self {
            phase,
            classification: ErrorClassification::Fatal,
            exhausted: false,
            error,
            response,
            state,
        }
    }

    fn from_flow(phase: ChallengePhase, failure: FlowFailure, exhausted: bool) -> Self {
        Self {
            phase,
            classification: failure.classification,
            exhausted,
            error: failure.error,
            response: failure.response,
            state: failure.state,
        }
    }
}

/// Runs the two-phase ownership protocol on top of the payment envelope.
pub struct ChallengeAuthenticator {
    coordinator: RetryCoordinator,
    signer: Arc<dyn StructuredDataSigner>,
}

impl ChallengeAuthenticator {
    /// Creates an authenticator signing challenges with `signer`.
    pub fn new(coordinator: RetryCoordinator, signer: Arc<dyn StructuredDataSigner>) -> Self {
        Self { coordinator, signer }
    }

    /// The payment coordinator used for both phases.
    pub fn coordinator(&self) -> &RetryCoordinator {
        &self.coordinator
    }

    /// Applies an ownership-gated mutation.
    ///
    /// `request` carries the mutation body (a JSON object, or none). The
    /// signature and challenge id are added to it for the second phase.
    pub async fn execute(&self, request: &OutgoingRequest) -> Result<OwnershipReceipt, OwnershipFailure> {
        let mut body = match &request.body {
            None => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(OwnershipFailure::fatal(
                    ChallengePhase::Challenge,
                    X402Error::InvalidPayload("mutation body must be a JSON object".to_string()),
                    None,
                    RetryState::default(),
                ))
            }
        };

        let verbose = self.coordinator.config().verbose;
        let first = self.run_phase(ChallengePhase::Challenge, request).await?;
        let challenge = extract_challenge(&first.response)
            .and_then(|challenge| ensure_live(challenge, Utc::now()))
            .map_err(|error| {
                OwnershipFailure::fatal(ChallengePhase::Challenge, error, Some(first.response.clone()), first.state)
            })?;

        if verbose {
            info!(challenge_id = %challenge.challenge_id, url = %request.url, "signing ownership challenge");
        } else {
            debug!(challenge_id = %challenge.challenge_id, url = %request.url, "signing ownership challenge");
        }

        let signature = self
            .signer
            .sign_structured_data(&challenge.domain, &challenge.message)
            .await
            .map_err(|error| {
                let error = match error {
                    X402Error::SignerError(_) => error,
                    other => X402Error::SignerError(other.to_string()),
                };
                OwnershipFailure::fatal(ChallengePhase::Sign, error, None, RetryState::default())
            })?;

        body.insert("signature".to_string(), Value::String(signature));
        body.insert("challengeId".to_string(), Value::String(challenge.challenge_id.clone()));
        let signed = OutgoingRequest {
            body: Some(Value::Object(body)),
            ..request.clone()
        };

        let second = self.run_phase(ChallengePhase::Sign, &signed).await?;
        let verified_by = self
            .resolve(&second.response)
            .map_err(|error| OwnershipFailure::fatal(ChallengePhase::Sign, error, Some(second.response.clone()), second.state))?;

        info!(
            challenge_id = %challenge.challenge_id,
            verified_by = %verified_by,
            "ownership mutation applied"
        );

        Ok(OwnershipReceipt {
            verified_by,
            challenge_id: challenge.challenge_id,
            challenge_phase: PhaseReport::from(&first),
            sign_phase: PhaseReport::from(&second),
            response: second.response,
        })
    }

    async fn run_phase(&self, phase: ChallengePhase, request: &OutgoingRequest) -> Result<FlowSuccess, OwnershipFailure> {
        let outcome = self
            .coordinator
            .run_guarded(request, move |response: &HttpResponse| rejection(phase, response))
            .await;

        match outcome {
            FlowOutcome::Done(success) if success.response.is_success() => Ok(success),
            FlowOutcome::Done(success) => {
                let response = success.response;
                let error = rejection(phase, &response).unwrap_or_else(|| {
                    let body = response.error_body();
                    X402Error::RequestRejected {
                        status: response.status,
                        message: body.text().unwrap_or_else(|| format!("HTTP {}", response.status)),
                    }
                });
                warn!(%phase, status = response.status, error = %error, "ownership request rejected");
                Err(OwnershipFailure::fatal(phase, error, Some(response), success.state))
            }
            FlowOutcome::Failed(failure) => Err(OwnershipFailure::from_flow(phase, failure, false)),
            FlowOutcome::Exhausted(failure) => Err(OwnershipFailure::from_flow(phase, failure, true)),
        }
    }

    /// Checks the sign-phase response and returns the verified owner.
    ///
    /// The mutation counts as applied only when the body says
    /// `success: true`.
    fn resolve(&self, response: &HttpResponse) -> Result<String, X402Error> {
        let body = response.json().cloned().unwrap_or(Value::Null);

        let envelope: Option<ChallengeEnvelope> = serde_json::from_value(body.clone()).ok();
        if envelope.map(|e| e.requires_signature).unwrap_or(false) {
            return Err(X402Error::protocol(
                "server issued a second challenge for a signed request",
                body,
            ));
        }

        match body.get("success").and_then(Value::as_bool) {
            Some(true) => {}
            Some(false) => {
                return Err(challenge_rejection(response).unwrap_or_else(|| X402Error::RequestRejected {
                    status: response.status,
                    message: response
                        .error_body()
                        .text()
                        .unwrap_or_else(|| "mutation reported failure".to_string()),
                }))
            }
            None => {
                return Err(X402Error::protocol(
                    "signed mutation response did not report success",
                    body,
                ))
            }
        }

        let address = self.signer.address();
        match body.get("verifiedBy").and_then(Value::as_str) {
            Some(verified) if !verified.eq_ignore_ascii_case(&address) => Err(X402Error::AuthorizationError {
                message: format!("server verified {verified}, expected {address}"),
                registered_owner: Some(verified.to_string()),
            }),
            Some(verified) => Ok(verified.to_string()),
            None => Ok(address),
        }
    }
}

/// Error codes for a challenge the server will not accept (again).
const CHALLENGE_REJECTION_CODES: [&str; 5] = [
    "CHALLENGE_CONSUMED",
    "CHALLENGE_NOT_FOUND",
    "CHALLENGE_EXPIRED",
    "CHALLENGE_INVALID",
    "INVALID_CHALLENGE",
];

/// Error-text fragments with the same meaning, matched lowercase.
const CHALLENGE_REJECTION_PHRASES: [&str; 8] = [
    "challenge already consumed",
    "challenge consumed",
    "challenge already used",
    "challenge not found",
    "unknown challenge",
    "invalid challenge",
    "challenge expired",
    "challenge has expired",
];

/// Errors that end a phase at once, before any retry is considered.
fn rejection(phase: ChallengePhase, response: &HttpResponse) -> Option<X402Error> {
    match phase {
        ChallengePhase::Challenge => ownership_error(response),
        ChallengePhase::Sign => challenge_rejection(response).or_else(|| ownership_error(response)),
    }
}

/// A signed submission refused because its challenge is spent or unknown.
///
/// Resending the same challenge id can never succeed, so this is a protocol
/// error regardless of the status it arrived with.
fn challenge_rejection(response: &HttpResponse) -> Option<X402Error> {
    let body = response.error_body();
    let code = body.code().map(str::to_string);
    let text = body.text();

    let by_code = code
        .as_deref()
        .map(|code| CHALLENGE_REJECTION_CODES.iter().any(|known| code.eq_ignore_ascii_case(known)))
        .unwrap_or(false);
    let by_text = text
        .as_deref()
        .map(str::to_lowercase)
        .map(|text| CHALLENGE_REJECTION_PHRASES.iter().any(|phrase| text.contains(phrase)))
        .unwrap_or(false);

    if !(by_code || by_text) {
        return None;
    }

    let reason = text.or(code).unwrap_or_else(|| format!("HTTP {}", response.status));
    Some(X402Error::protocol(
        format!("challenge rejected (HTTP {}): {reason}", response.status),
        response.json().cloned().unwrap_or(Value::Null),
    ))
}

/// Maps ownership-specific statuses onto their errors.
fn ownership_error(response: &HttpResponse) -> Option<X402Error> {
    let message = || {
        response
            .error_body()
            .text()
            .unwrap_or_else(|| format!("HTTP {}", response.status))
    };

    match response.status {
        403 => Some(X402Error::AuthorizationError {
            message: message(),
            registered_owner: response
                .json()
                .and_then(|body| body.get("registeredOwner"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        404 => Some(X402Error::NotFound(message())),
        _ => None,
    }
}

fn extract_challenge(response: &HttpResponse) -> Result<Challenge, X402Error> {
    let body = response.json().cloned().unwrap_or(Value::Null);
    let envelope: ChallengeEnvelope = serde_json::from_value(body.clone())
        .map_err(|e| X402Error::protocol(format!("malformed challenge response: {e}"), body.clone()))?;

    match envelope {
        ChallengeEnvelope {
            requires_signature: true,
            challenge: Some(challenge),
        } => Ok(challenge),
        _ => Err(X402Error::protocol("ownership mutation returned no challenge", body)),
    }
}

fn ensure_live(challenge: Challenge, now: DateTime<Utc>) -> Result<Challenge, X402Error> {
    let expires_at = challenge
        .expires_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok());

    match expires_at {
        Some(at) if at.with_timezone(&Utc) <= now => Err(X402Error::protocol(
            format!("challenge {} expired at {}", challenge.challenge_id, at),
            serde_json::to_value(&challenge).unwrap_or(Value::Null),
        )),
        _ => Ok(challenge),
    }
}
