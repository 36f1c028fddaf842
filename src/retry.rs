//! The payment retry state machine.
//!
//! One logical request moves through
//! `Idle → FetchingTerms → Signing → Submitting → Evaluating`, and from
//! `Evaluating` either terminates or goes through `Sleeping` back to
//! `FetchingTerms`. Every attempt re-probes the server for fresh terms, so a
//! nonce is never signed twice.
//!
//! ```text
//! Idle ─► FetchingTerms ─► Signing ─► Submitting ─► Evaluating ─► Done
//!              ▲   │ (not 402)  │ (protocol/signer)     │
//!              │   └─► Done     └─► Failed              ├─► Failed (fatal / exhausted)
//!              └────────────── Sleeping ◄───────────────┘
//! ```

use crate::classify::{ErrorClassification, ErrorClassifier};
use crate::codec::{encode_payment_payload, settlement_from_response};
use crate::config::RetryConfig;
use crate::errors::X402Error;
use crate::executor::{HttpResponse, OutgoingRequest, RequestExecutor};
use crate::requirements::{parse_payment_required, PaymentForm, SigningRequest};
use crate::signers::{PaymentSigner, SignedTransaction};
use crate::types::{
    SettlementResponse, PAYMENT_HEADER, PAYMENT_SIGNATURE_HEADER, PAYMENT_TOKEN_TYPE_HEADER,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

macro_rules! transition {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!($($arg)+)
        } else {
            debug!($($arg)+)
        }
    };
}

/// Waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspends the flow for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Per-flow retry bookkeeping, reset for every top-level call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts started so far (1-based once the flow is running)
    pub attempt: u32,
    /// Retries taken after a failed attempt
    pub retry_count: u32,
    /// Whether any attempt hit a nonce conflict
    pub was_nonce_conflict: bool,
}

/// A flow that reached the resource.
#[derive(Debug)]
pub struct FlowSuccess {
    /// Final response, verbatim
    pub response: HttpResponse,
    /// Decoded settlement confirmation, when the server sent one
    pub settlement: Option<SettlementResponse>,
    /// Whether a payment was made (false when the probe was not a 402)
    pub paid: bool,
    /// Retry bookkeeping at termination
    pub state: RetryState,
}

/// A flow that ended without reaching the resource.
#[derive(Debug)]
pub struct FlowFailure {
    /// Classification of the last failure
    pub classification: ErrorClassification,
    /// The last error observed
    pub error: X402Error,
    /// The last response observed, if the failure had one
    pub response: Option<HttpResponse>,
    /// Retry bookkeeping at termination
    pub state: RetryState,
}

/// Result of one payment flow.
#[derive(Debug)]
pub enum FlowOutcome {
    /// The resource was reached (or no payment was asked for)
    Done(FlowSuccess),
    /// A non-retryable failure
    Failed(FlowFailure),
    /// Retryable failures used up the retry budget
    Exhausted(FlowFailure),
}

impl FlowOutcome {
    /// Retry bookkeeping at termination.
    pub fn state(&self) -> RetryState {
        match self {
            FlowOutcome::Done(success) => success.state,
            FlowOutcome::Failed(failure) | FlowOutcome::Exhausted(failure) => failure.state,
        }
    }

    /// Whether the flow reached the resource.
    pub fn is_done(&self) -> bool {
        matches!(self, FlowOutcome::Done(_))
    }

    /// Converts into a `Result`, merging both failure kinds.
    pub fn into_result(self) -> std::result::Result<FlowSuccess, FlowFailure> {
        match self {
            FlowOutcome::Done(success) => Ok(success),
            FlowOutcome::Failed(failure) | FlowOutcome::Exhausted(failure) => Err(failure),
        }
    }
}

/// What one network round trip produced.
#[derive(Debug)]
pub enum Attempt {
    /// An HTTP response, of any status
    Response(HttpResponse),
    /// No response at all
    Transport(X402Error),
}

/// States of the payment flow.
#[derive(Debug)]
pub enum FlowPhase {
    /// Nothing sent yet
    Idle,
    /// About to probe for fresh payment terms
    FetchingTerms,
    /// Holding a 402 response to parse and sign
    Signing {
        /// The payment-required response
        terms: HttpResponse,
    },
    /// Holding a signed transaction to submit
    Submitting {
        /// Normalized terms that were signed
        request: SigningRequest,
        /// Signer output
        transaction: SignedTransaction,
    },
    /// Holding the outcome of a round trip to judge
    Evaluating {
        /// What came back
        attempt: Attempt,
    },
    /// Waiting before the next attempt
    Sleeping {
        /// How long to wait
        delay: Duration,
    },
    /// Terminal success
    Done(FlowSuccess),
    /// Terminal failure
    Failed {
        /// What went wrong
        failure: FlowFailure,
        /// Whether the retry budget ran out
        exhausted: bool,
    },
}

impl FlowPhase {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowPhase::Done(_) | FlowPhase::Failed { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            FlowPhase::Idle => "idle",
            FlowPhase::FetchingTerms => "fetching-terms",
            FlowPhase::Signing { .. } => "signing",
            FlowPhase::Submitting { .. } => "submitting",
            FlowPhase::Evaluating { .. } => "evaluating",
            FlowPhase::Sleeping { .. } => "sleeping",
            FlowPhase::Done(_) => "done",
            FlowPhase::Failed { .. } => "failed",
        }
    }
}

/// Delay before the next attempt.
///
/// A server-specified `retry_after` wins; otherwise nonce conflicts wait the
/// fixed conflict delay and everything else backs off as
/// `min(base * 2^retry_index, max_delay)`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use x402_envelope::classify::ErrorClassification;
/// use x402_envelope::config::RetryConfig;
/// use x402_envelope::retry::compute_delay;
///
/// let config = RetryConfig::new()
///     .with_base_delay(Duration::from_millis(100))
///     .with_max_delay(Duration::from_millis(500));
///
/// assert_eq!(compute_delay(&config, ErrorClassification::Retryable, 2, None), Duration::from_millis(400));
/// assert_eq!(compute_delay(&config, ErrorClassification::Retryable, 3, None), Duration::from_millis(500));
/// assert_eq!(
///     compute_delay(&config, ErrorClassification::Retryable, 3, Some(Duration::from_secs(2))),
///     Duration::from_secs(2)
/// );
/// ```
pub fn compute_delay(
    config: &RetryConfig,
    classification: ErrorClassification,
    retry_index: u32,
    retry_after: Option<Duration>,
) -> Duration {
    if let Some(delay) = retry_after {
        return delay;
    }
    match classification {
        ErrorClassification::NonceConflict => config.nonce_conflict_delay,
        _ => {
            let factor = 2u32.checked_pow(retry_index).unwrap_or(u32::MAX);
            config.base_delay.saturating_mul(factor).min(config.max_delay)
        }
    }
}

/// Drives paid requests through the retry state machine.
///
/// The coordinator keeps no state between calls; each [`run`](Self::run)
/// starts from a fresh [`RetryState`].
pub struct RetryCoordinator {
    config: RetryConfig,
    classifier: ErrorClassifier,
    executor: Arc<dyn RequestExecutor>,
    signer: Arc<dyn PaymentSigner>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryCoordinator {
    /// Creates a coordinator that sleeps with tokio.
    pub fn new(config: RetryConfig, executor: Arc<dyn RequestExecutor>, signer: Arc<dyn PaymentSigner>) -> Self {
        let classifier = ErrorClassifier::new(config.nonce_matcher.clone());
        Self {
            config,
            classifier,
            executor,
            signer,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replaces the sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs one paid request to completion.
    ///
    /// Ordinary protocol failures are reported in the returned outcome, never
    /// as a panic or an early error.
    pub async fn run(&self, request: &OutgoingRequest) -> FlowOutcome {
        self.run_guarded(request, |_: &HttpResponse| None).await
    }

    /// Runs one paid request, letting `guard` veto rejected responses.
    ///
    /// Every non-2xx submission response is shown to `guard` before it is
    /// classified. An error returned by the guard ends the flow as
    /// [`ErrorClassification::Fatal`], whatever the status or body says.
    pub async fn run_guarded<G>(&self, request: &OutgoingRequest, guard: G) -> FlowOutcome
    where
        G: Fn(&HttpResponse) -> Option<X402Error> + Send + Sync,
    {
        let mut state = RetryState::default();
        let mut phase = FlowPhase::Idle;

        loop {
            let next = match phase {
                FlowPhase::Evaluating {
                    attempt: Attempt::Response(response),
                } if !response.is_success() => match guard(&response) {
                    Some(error) => fatal(error, Some(response), &state),
                    None => {
                        let phase = FlowPhase::Evaluating {
                            attempt: Attempt::Response(response),
                        };
                        self.step(phase, &mut state, request).await
                    }
                },
                phase => self.step(phase, &mut state, request).await,
            };

            phase = match next {
                FlowPhase::Done(success) => return FlowOutcome::Done(success),
                FlowPhase::Failed { failure, exhausted: true } => return FlowOutcome::Exhausted(failure),
                FlowPhase::Failed { failure, exhausted: false } => return FlowOutcome::Failed(failure),
                next => next,
            };
        }
    }

    /// Performs a single transition. Terminal phases are returned unchanged.
    pub async fn step(&self, phase: FlowPhase, state: &mut RetryState, request: &OutgoingRequest) -> FlowPhase {
        let from = phase.name();
        let next = match phase {
            FlowPhase::Idle => {
                state.attempt = 1;
                FlowPhase::FetchingTerms
            }
            FlowPhase::FetchingTerms => self.fetch_terms(state, request).await,
            FlowPhase::Signing { terms } => self.sign(state, terms).await,
            FlowPhase::Submitting { request: terms, transaction } => {
                self.submit(state, request, &terms, &transaction).await
            }
            FlowPhase::Evaluating { attempt } => self.evaluate(state, attempt),
            FlowPhase::Sleeping { delay } => {
                self.sleeper.sleep(delay).await;
                state.attempt += 1;
                FlowPhase::FetchingTerms
            }
            terminal @ (FlowPhase::Done(_) | FlowPhase::Failed { .. }) => terminal,
        };

        transition!(
            self.config.verbose,
            from,
            to = next.name(),
            attempt = state.attempt,
            retry_count = state.retry_count,
            url = %request.url,
            "payment flow transition"
        );
        next
    }

    async fn fetch_terms(&self, state: &RetryState, request: &OutgoingRequest) -> FlowPhase {
        match self.executor.execute(request, &[]).await {
            Ok(response) if response.is_payment_required() => FlowPhase::Signing { terms: response },
            Ok(response) => FlowPhase::Done(FlowSuccess {
                response,
                settlement: None,
                paid: false,
                state: *state,
            }),
            Err(error) => FlowPhase::Evaluating {
                attempt: Attempt::Transport(error),
            },
        }
    }

    async fn sign(&self, state: &RetryState, terms: HttpResponse) -> FlowPhase {
        let request = match parse_payment_required(&terms.body) {
            Ok(request) => request,
            Err(error) => return fatal(error, Some(terms), state),
        };

        match self.signer.sign_payment(&request).await {
            Ok(transaction) => FlowPhase::Submitting { request, transaction },
            Err(error) => {
                let error = match error {
                    X402Error::SignerError(_) => error,
                    other => X402Error::SignerError(other.to_string()),
                };
                fatal(error, None, state)
            }
        }
    }

    async fn submit(
        &self,
        state: &RetryState,
        request: &OutgoingRequest,
        terms: &SigningRequest,
        transaction: &SignedTransaction,
    ) -> FlowPhase {
        let headers = match &terms.form {
            PaymentForm::Flat => {
                let mut headers = vec![(PAYMENT_HEADER.to_string(), transaction.to_string())];
                if let Some(token_type) = &terms.token_type {
                    headers.push((PAYMENT_TOKEN_TYPE_HEADER.to_string(), token_type.clone()));
                }
                headers
            }
            PaymentForm::Versioned { accepted } => match encode_payment_payload(transaction.as_str(), accepted) {
                Ok(encoded) => vec![(PAYMENT_SIGNATURE_HEADER.to_string(), encoded)],
                Err(error) => return fatal(error, None, state),
            },
        };

        let attempt = match self.executor.execute(request, &headers).await {
            Ok(response) => Attempt::Response(response),
            Err(error) => Attempt::Transport(error),
        };
        FlowPhase::Evaluating { attempt }
    }

    fn evaluate(&self, state: &mut RetryState, attempt: Attempt) -> FlowPhase {
        let (classification, error, response, retry_after) = match attempt {
            Attempt::Response(response) if response.is_success() => {
                let settlement = settlement_from_response(&response);
                return FlowPhase::Done(FlowSuccess {
                    response,
                    settlement,
                    paid: true,
                    state: *state,
                });
            }
            Attempt::Response(response) => {
                let body = response.error_body();
                let text = body.text();
                let classification = self.classifier.classify(response.status, body.code(), text.as_deref());
                let message = text.unwrap_or_else(|| format!("HTTP {}", response.status));
                let error = match classification {
                    ErrorClassification::NonceConflict => X402Error::NonceConflict {
                        status: response.status,
                        message,
                    },
                    ErrorClassification::Retryable => X402Error::Transient {
                        status: response.status,
                        message,
                    },
                    ErrorClassification::Fatal => X402Error::RequestRejected {
                        status: response.status,
                        message,
                    },
                };
                let retry_after = response.retry_after();
                (classification, error, Some(response), retry_after)
            }
            Attempt::Transport(error) => {
                let text = error.to_string();
                let classification = self.classifier.classify(0, Some("NETWORK_ERROR"), Some(&text));
                (classification, error, None, None)
            }
        };

        if classification == ErrorClassification::NonceConflict {
            state.was_nonce_conflict = true;
        }

        let failure = |state: &RetryState, classification, error, response| FlowFailure {
            classification,
            error,
            response,
            state: *state,
        };

        if !classification.is_retryable() {
            warn!(attempt = state.attempt, error = %error, "payment attempt failed");
            return FlowPhase::Failed {
                failure: failure(state, classification, error, response),
                exhausted: false,
            };
        }

        if state.retry_count >= self.config.max_retries {
            warn!(
                attempt = state.attempt,
                max_retries = self.config.max_retries,
                error = %error,
                "payment retries exhausted"
            );
            return FlowPhase::Failed {
                failure: failure(state, classification, error, response),
                exhausted: true,
            };
        }

        let delay = compute_delay(&self.config, classification, state.retry_count, retry_after);
        state.retry_count += 1;
        warn!(
            attempt = state.attempt,
            retry_count = state.retry_count,
            %classification,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying payment with fresh terms"
        );
        FlowPhase::Sleeping { delay }
    }
}

fn fatal(error: X402Error, response: Option<HttpResponse>, state: &RetryState) -> FlowPhase {
    warn!(attempt = state.attempt, error = %error, "payment flow aborted");
    FlowPhase::Failed {
        failure: FlowFailure {
            classification: ErrorClassification::Fatal,
            error,
            response,
            state: *state,
        },
        exhausted: false,
    }
}
