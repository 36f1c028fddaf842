//! # x402-envelope
//!
//! Client-side retry and challenge-response envelope for x402 pay-per-request HTTP APIs.
//!
//! Metered endpoints answer an unauthenticated request with HTTP 402 and
//! machine-readable payment terms. The client signs a transaction satisfying
//! those terms, resubmits, and the server settles and returns the real
//! response. This crate owns that loop for a single logical request: it
//! re-probes for fresh terms on every attempt, tells rate limiting apart from
//! account-nonce conflicts, backs off accordingly, and stops after a bounded
//! number of retries.
//!
//! Ownership-gated mutations (transfers, deletes) add a second protocol on top:
//! the server answers with a single-use challenge that the owner signs before
//! the mutation is applied. See [`challenge::ChallengeAuthenticator`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use x402_envelope::config::RetryConfig;
//! use x402_envelope::executor::{OutgoingRequest, ReqwestExecutor};
//! use x402_envelope::retry::{FlowOutcome, RetryCoordinator};
//! use x402_envelope::signers::local_key::LocalKeySigner;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = Arc::new(LocalKeySigner::new("0xYOUR_PRIVATE_KEY")?);
//! let coordinator = RetryCoordinator::new(
//!     RetryConfig::default(),
//!     Arc::new(ReqwestExecutor::new()),
//!     signer,
//! );
//!
//! let request = OutgoingRequest::post("https://api.example.com/names", json!({"name": "alice"}))?;
//! match coordinator.run(&request).await {
//!     FlowOutcome::Done(success) => println!("status {}", success.response.status),
//!     FlowOutcome::Failed(failure) => eprintln!("failed: {}", failure.error),
//!     FlowOutcome::Exhausted(failure) => eprintln!("gave up: {}", failure.error),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Protocol Overview
//!
//! 1. **Probe**: the request is sent without payment
//! 2. **Terms**: the server answers 402 with flat or versioned payment terms
//! 3. **Sign**: the [`signers::PaymentSigner`] signs a transaction for those terms
//! 4. **Submit**: the request is resent with the payment header(s)
//! 5. **Evaluate**: success ends the flow; failures are classified as
//!    retryable, nonce conflict, or fatal
//! 6. **Retry**: after a delay the flow starts over at step 1 with fresh terms
//!
//! ## References
//!
//! - [x402 Specification](https://github.com/coinbase/x402)
//! - [x402.org](https://x402.org)

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod challenge;
pub mod classify;
pub mod codec;
pub mod config;
pub mod errors;
pub mod executor;
pub mod requirements;
pub mod retry;
pub mod signers;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used items
pub use challenge::{ChallengeAuthenticator, OwnershipFailure, OwnershipReceipt};
pub use classify::{ErrorClassification, ErrorClassifier, NonceConflictMatcher, VocabularyMatcher};
pub use config::RetryConfig;
pub use errors::{Result, X402Error};
pub use executor::{ErrorBody, HttpResponse, OutgoingRequest, ReqwestExecutor, RequestExecutor, ResponseBody};
pub use requirements::{PaymentForm, SigningRequest};
pub use retry::{FlowOutcome, RetryCoordinator, RetryState, Sleeper, TokioSleeper};
pub use signers::{PaymentSigner, SignedTransaction, StructuredDataSigner};
pub use types::{
    Challenge, PaymentPayload, PaymentRequired, SettlementResponse, X402_VERSION,
};
