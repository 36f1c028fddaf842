//! Signing collaborators.
//!
//! The envelope never looks inside what these produce: a payment signer turns
//! normalized terms into an opaque signed transaction, and a structured-data
//! signer turns a challenge into an ownership signature.

pub mod local_key;

use crate::errors::Result;
use crate::requirements::SigningRequest;
use async_trait::async_trait;
use std::fmt;

/// Signed transaction, forwarded to the server untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignedTransaction(pub String);

impl SignedTransaction {
    /// The transaction as it goes on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SignedTransaction {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Produces signed payment transactions.
#[async_trait]
pub trait PaymentSigner: Send + Sync {
    /// Signs a transaction satisfying `request`.
    ///
    /// Any error is treated as fatal for the whole flow.
    async fn sign_payment(&self, request: &SigningRequest) -> Result<SignedTransaction>;
}

/// Produces structured-data (domain-separated) signatures.
#[async_trait]
pub trait StructuredDataSigner: Send + Sync {
    /// Address of the signing account.
    fn address(&self) -> String;

    /// Signs the `domain`/`message` descriptors of a challenge as one unit.
    async fn sign_structured_data(&self, domain: &str, message: &str) -> Result<String>;
}
