//! Signer backed by a local secp256k1 key.
//!
//! Payment signing produces a signed transfer authorization in the style of
//! EIP-3009: the payer authorizes exactly the required amount to the payee for
//! the validity window of the terms, bound to the server's nonce. Challenge
//! signing follows the EIP-712 layout `0x1901 ‖ domainHash ‖ messageHash`.

use crate::errors::{Result, X402Error};
use crate::requirements::SigningRequest;
use crate::signers::{PaymentSigner, SignedTransaction, StructuredDataSigner};
use async_trait::async_trait;
use chrono::Utc;
use ethers::abi::Token;
use ethers::core::utils::keccak256;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Signature, H256, U256};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

const DOMAIN_NAME: &str = "x402";

/// Signed transfer authorization, the opaque "transaction" of this signer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransferAuthorization {
    /// Address of the payer
    pub from: String,

    /// Address of the payee
    pub to: String,

    /// Amount to transfer (uint256 as string)
    pub value: String,

    /// Network the payment is for
    pub network: String,

    /// Asset or token contract being transferred
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,

    /// Timestamp after which the authorization is valid
    #[serde(rename = "validAfter")]
    pub valid_after: String,

    /// Timestamp before which the authorization is valid
    #[serde(rename = "validBefore")]
    pub valid_before: String,

    /// 32-byte nonce bound to the server's payment nonce
    pub nonce: String,

    /// 65-byte signature (r ‖ s ‖ v) as hex
    pub signature: String,
}

impl TransferAuthorization {
    /// Decodes an authorization from the hex transaction produced by [`LocalKeySigner`].
    pub fn from_transaction(transaction: &str) -> Result<Self> {
        let bytes = hex::decode(transaction.trim_start_matches("0x"))
            .map_err(|e| X402Error::InvalidPayload(format!("Invalid transaction hex: {}", e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Signs payments and ownership challenges with a local private key.
#[derive(Debug, Clone)]
pub struct LocalKeySigner {
    wallet: LocalWallet,
}

impl LocalKeySigner {
    /// Creates a signer from a hex private key (with or without `0x`).
    ///
    /// # Examples
    ///
    /// ```
    /// use x402_envelope::signers::local_key::LocalKeySigner;
    /// use x402_envelope::signers::StructuredDataSigner;
    ///
    /// let signer = LocalKeySigner::new(
    ///     "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
    /// ).unwrap();
    /// assert_eq!(signer.address(), "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266");
    /// ```
    pub fn new(private_key: &str) -> Result<Self> {
        let wallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| X402Error::SignerError(format!("Invalid private key: {}", e)))?;
        Ok(Self { wallet })
    }

    /// Wraps an existing wallet.
    pub fn from_wallet(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    fn sign_digest(&self, digest: H256) -> Result<String> {
        let signature = self.wallet.sign_hash(digest)?;
        Ok(format!("0x{}", hex::encode(signature_bytes(&signature))))
    }
}

#[async_trait]
impl PaymentSigner for LocalKeySigner {
    async fn sign_payment(&self, request: &SigningRequest) -> Result<SignedTransaction> {
        let value = U256::from_dec_str(&request.max_amount_required).map_err(|e| {
            X402Error::SignerError(format!("Invalid amount '{}': {}", request.max_amount_required, e))
        })?;
        let valid_after = Utc::now().timestamp().max(0) as u64;
        let valid_before = request.expires_at.timestamp().max(0) as u64;
        let nonce = nonce_bytes(&request.nonce);
        let from = format!("{:?}", self.wallet.address());

        let digest = authorization_digest(
            &request.network,
            request.token_contract.as_deref().unwrap_or_default(),
            &from,
            &request.pay_to,
            value,
            valid_after,
            valid_before,
            nonce,
        );

        let authorization = TransferAuthorization {
            from,
            to: request.pay_to.clone(),
            value: value.to_string(),
            network: request.network.clone(),
            asset: request.token_contract.clone(),
            valid_after: valid_after.to_string(),
            valid_before: valid_before.to_string(),
            nonce: format!("0x{}", hex::encode(nonce)),
            signature: self.sign_digest(digest)?,
        };

        let json = serde_json::to_vec(&authorization)?;
        Ok(SignedTransaction(format!("0x{}", hex::encode(json))))
    }
}

#[async_trait]
impl StructuredDataSigner for LocalKeySigner {
    fn address(&self) -> String {
        format!("{:?}", self.wallet.address())
    }

    async fn sign_structured_data(&self, domain: &str, message: &str) -> Result<String> {
        let domain = decode_descriptor("domain", domain)?;
        let message = decode_descriptor("message", message)?;
        self.sign_digest(challenge_digest(&domain, &message))
    }
}

/// EIP-712 style digest of a challenge: `keccak256(0x1901 ‖ keccak256(domain) ‖ keccak256(message))`.
pub fn challenge_digest(domain: &[u8], message: &[u8]) -> H256 {
    typed_digest(keccak256(domain), keccak256(message))
}

/// Recovers the address that signed a challenge, for server-side verification.
pub fn recover_challenge_signer(domain: &str, message: &str, signature: &str) -> Result<String> {
    let domain = decode_descriptor("domain", domain)?;
    let message = decode_descriptor("message", message)?;
    let bytes = hex::decode(signature.trim_start_matches("0x"))
        .map_err(|e| X402Error::SignerError(format!("Invalid signature hex: {}", e)))?;
    let signature = Signature::try_from(bytes.as_slice())?;
    let recovered = signature.recover(challenge_digest(&domain, &message))?;
    Ok(format!("{:?}", recovered))
}

/// Maps a server nonce onto 32 bytes: a 32-byte hex nonce is used as is,
/// anything else is hashed with Keccak-256.
pub fn nonce_bytes(nonce: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    let hex_part = nonce.strip_prefix("0x").unwrap_or(nonce);
    if hex_part.len() == 64 && hex::decode_to_slice(hex_part, &mut out).is_ok() {
        return out;
    }
    out.copy_from_slice(&Keccak256::digest(nonce.as_bytes()));
    out
}

#[allow(clippy::too_many_arguments)]
fn authorization_digest(
    network: &str,
    asset: &str,
    from: &str,
    to: &str,
    value: U256,
    valid_after: u64,
    valid_before: u64,
    nonce: [u8; 32],
) -> H256 {
    let domain_type_hash = keccak256(b"EIP712Domain(string name,string network,string asset)");
    let domain_separator = keccak256(ethers::abi::encode(&[
        Token::FixedBytes(domain_type_hash.to_vec()),
        Token::FixedBytes(keccak256(DOMAIN_NAME.as_bytes()).to_vec()),
        Token::FixedBytes(keccak256(network.as_bytes()).to_vec()),
        Token::FixedBytes(keccak256(asset.as_bytes()).to_vec()),
    ]));

    let type_hash = keccak256(
        b"TransferWithAuthorization(string from,string to,uint256 value,uint256 validAfter,uint256 validBefore,bytes32 nonce)",
    );
    let struct_hash = keccak256(ethers::abi::encode(&[
        Token::FixedBytes(type_hash.to_vec()),
        Token::FixedBytes(keccak256(from.as_bytes()).to_vec()),
        Token::FixedBytes(keccak256(to.as_bytes()).to_vec()),
        Token::Uint(value),
        Token::Uint(U256::from(valid_after)),
        Token::Uint(U256::from(valid_before)),
        Token::FixedBytes(nonce.to_vec()),
    ]));

    typed_digest(domain_separator, struct_hash)
}

fn typed_digest(domain_hash: [u8; 32], struct_hash: [u8; 32]) -> H256 {
    let mut message = Vec::with_capacity(66);
    message.extend_from_slice(b"\x19\x01");
    message.extend_from_slice(&domain_hash);
    message.extend_from_slice(&struct_hash);
    H256::from(keccak256(&message))
}

fn decode_descriptor(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| X402Error::SignerError(format!("Challenge {} is not hex: {}", field, e)))
}

fn signature_bytes(signature: &Signature) -> Vec<u8> {
    let mut r_bytes = [0u8; 32];
    signature.r.to_big_endian(&mut r_bytes);
    let mut s_bytes = [0u8; 32];
    signature.s.to_big_endian(&mut s_bytes);

    let mut sig_bytes = Vec::with_capacity(65);
    sig_bytes.extend_from_slice(&r_bytes);
    sig_bytes.extend_from_slice(&s_bytes);
    sig_bytes.push(signature.v as u8);
    sig_bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirements::PaymentForm;
    use chrono::Duration as ChronoDuration;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const TEST_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    fn signing_request(nonce: &str) -> SigningRequest {
        SigningRequest {
            max_amount_required: "10000".to_string(),
            resource: "/api/names/register".to_string(),
            pay_to: "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEbb".to_string(),
            network: "8453".to_string(),
            nonce: nonce.to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(300),
            token_type: Some("USDC".to_string()),
            token_contract: Some("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string()),
            form: PaymentForm::Flat,
        }
    }

    #[test]
    fn test_invalid_key() {
        assert!(matches!(LocalKeySigner::new("not a key"), Err(X402Error::SignerError(_))));
    }

    #[tokio::test]
    async fn test_challenge_signature_recovers_signer() {
        let signer = LocalKeySigner::new(TEST_KEY).unwrap();
        assert_eq!(signer.address(), TEST_ADDRESS);

        let domain = format!("0x{}", hex::encode(b"{\"name\":\"names\",\"chainId\":1}"));
        let message = format!("0x{}", hex::encode(b"{\"action\":\"delete\",\"name\":\"alice\"}"));
        let signature = signer.sign_structured_data(&domain, &message).await.unwrap();

        assert_eq!(signature.len(), 2 + 130);
        assert_eq!(recover_challenge_signer(&domain, &message, &signature).unwrap(), TEST_ADDRESS);

        let other_message = format!("0x{}", hex::encode(b"{\"action\":\"transfer\"}"));
        let recovered = recover_challenge_signer(&domain, &other_message, &signature);
        assert!(recovered.map(|address| address != TEST_ADDRESS).unwrap_or(true));
    }

    #[tokio::test]
    async fn test_non_hex_descriptor_is_signer_error() {
        let signer = LocalKeySigner::new(TEST_KEY).unwrap();
        let err = signer.sign_structured_data("zz-not-hex", "0x00").await.unwrap_err();
        assert!(matches!(err, X402Error::SignerError(_)));
    }

    #[tokio::test]
    async fn test_payment_authorization() {
        let signer = LocalKeySigner::new(TEST_KEY).unwrap();
        let request = signing_request("server-nonce-1");
        let transaction = signer.sign_payment(&request).await.unwrap();

        let authorization = TransferAuthorization::from_transaction(transaction.as_str()).unwrap();
        assert_eq!(authorization.from, TEST_ADDRESS);
        assert_eq!(authorization.to, request.pay_to);
        assert_eq!(authorization.value, "10000");
        assert_eq!(authorization.valid_before, request.expires_at.timestamp().to_string());
        assert_eq!(authorization.nonce, format!("0x{}", hex::encode(nonce_bytes("server-nonce-1"))));
        assert_eq!(authorization.signature.len(), 2 + 130);
    }

    #[tokio::test]
    async fn test_invalid_amount_is_signer_error() {
        let signer = LocalKeySigner::new(TEST_KEY).unwrap();
        let mut request = signing_request("n");
        request.max_amount_required = "ten".to_string();
        assert!(matches!(
            signer.sign_payment(&request).await.unwrap_err(),
            X402Error::SignerError(_)
        ));
    }

    #[test]
    fn test_nonce_bytes() {
        let hex_nonce = format!("0x{}", "ab".repeat(32));
        assert_eq!(nonce_bytes(&hex_nonce), [0xab; 32]);
        assert_ne!(nonce_bytes("short-nonce"), [0u8; 32]);
        assert_eq!(nonce_bytes("short-nonce"), nonce_bytes("short-nonce"));
        assert_ne!(nonce_bytes("a"), nonce_bytes("b"));
    }
}
