//! Header codec for payment payloads and settlement confirmations.
//!
//! Both directions use Base64-encoded JSON so the values survive as single
//! HTTP header values.

use crate::errors::{Result, X402Error};
use crate::executor::HttpResponse;
use crate::types::{
    AcceptedRequirements, PaymentPayload, SettlementResponse, TransactionPayload,
    LEGACY_PAYMENT_RESPONSE_HEADER, PAYMENT_RESPONSE_HEADER, X402_VERSION,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::warn;

/// Builds the payment payload for a signed transaction and encodes it as
/// Base64 JSON for the payment signature header.
///
/// # Examples
///
/// ```
/// use x402_envelope::codec::{decode_payment_payload, encode_payment_payload};
/// use x402_envelope::types::AcceptedRequirements;
/// use serde_json::json;
///
/// let accepted: AcceptedRequirements = serde_json::from_value(json!({
///     "amount": "1000",
///     "asset": "STX",
///     "payTo": "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7",
///     "maxTimeoutSeconds": 60
/// })).unwrap();
///
/// let encoded = encode_payment_payload("0xsigned", &accepted).unwrap();
/// let decoded = decode_payment_payload(&encoded).unwrap();
/// assert_eq!(decoded.payload.transaction, "0xsigned");
/// assert_eq!(decoded.accepted, accepted);
/// ```
pub fn encode_payment_payload(transaction: &str, accepted: &AcceptedRequirements) -> Result<String> {
    let payload = PaymentPayload {
        x402_version: X402_VERSION,
        accepted: accepted.clone(),
        payload: TransactionPayload {
            transaction: transaction.to_string(),
        },
    };
    let json = serde_json::to_string(&payload)?;
    Ok(BASE64.encode(json.as_bytes()))
}

/// Decodes a Base64 JSON payment payload, the inverse of [`encode_payment_payload`].
pub fn decode_payment_payload(encoded: &str) -> Result<PaymentPayload> {
    let decoded = BASE64.decode(encoded.trim().as_bytes())?;
    let json_str = String::from_utf8(decoded)
        .map_err(|e| X402Error::InvalidPayload(format!("Invalid UTF-8: {}", e)))?;
    let payload: PaymentPayload = serde_json::from_str(&json_str)?;
    Ok(payload)
}

/// Decodes a settlement confirmation header value.
///
/// Returns `None` when the header is absent. A malformed value is logged and
/// also yields `None`: settlement confirmation is informational only.
pub fn decode_settlement(header: Option<&str>) -> Option<SettlementResponse> {
    let encoded = header?;
    match try_decode_settlement(encoded) {
        Ok(settlement) => Some(settlement),
        Err(err) => {
            warn!(error = %err, "ignoring malformed settlement header");
            None
        }
    }
}

/// Reads the settlement confirmation from a response, preferring the
/// versioned header over the legacy one.
pub fn settlement_from_response(response: &HttpResponse) -> Option<SettlementResponse> {
    let header = response
        .header(PAYMENT_RESPONSE_HEADER)
        .or_else(|| response.header(LEGACY_PAYMENT_RESPONSE_HEADER));
    decode_settlement(header)
}

/// Encodes a settlement record the way servers put it in the response header.
pub fn encode_settlement(settlement: &SettlementResponse) -> Result<String> {
    let json = serde_json::to_string(settlement)?;
    Ok(BASE64.encode(json.as_bytes()))
}

fn try_decode_settlement(encoded: &str) -> Result<SettlementResponse> {
    let decoded = BASE64.decode(encoded.trim().as_bytes())?;
    Ok(serde_json::from_slice(&decoded)?)
}

/// Generates a random 32-byte payment nonce.
///
/// # Examples
///
/// ```
/// use x402_envelope::codec::generate_nonce;
///
/// let nonce = generate_nonce();
/// assert_eq!(nonce.len(), 66); // "0x" + 64 hex chars
/// ```
pub fn generate_nonce() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let nonce: [u8; 32] = rng.gen();
    format!("0x{}", hex::encode(nonce))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ResponseBody;
    use crate::types::AcceptedExtra;
    use serde_json::{json, Map};
    use std::collections::HashMap;

    fn accepted() -> AcceptedRequirements {
        AcceptedRequirements {
            scheme: Some("exact".to_string()),
            network: Some("stacks:2147483648".to_string()),
            amount: "2500".to_string(),
            asset: "SP3DX3H4FEYZJZ586MFBS25ZW3HZDMEW92260R2PR.Wrapped-Bitcoin".to_string(),
            pay_to: "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM".to_string(),
            max_timeout_seconds: 90,
            extra: AcceptedExtra {
                nonce: Some("n-42".to_string()),
                token_type: Some("sBTC".to_string()),
                token_contract: None,
                other: Map::new(),
            },
            other: Map::new(),
        }
    }

    #[test]
    fn test_payload_round_trip() {
        let encoded = encode_payment_payload("0x80800000000400", &accepted()).unwrap();
        let decoded = decode_payment_payload(&encoded).unwrap();

        assert_eq!(decoded.x402_version, X402_VERSION);
        assert_eq!(decoded.payload.transaction, "0x80800000000400");
        assert_eq!(decoded.accepted, accepted());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let first = encode_payment_payload("tx", &accepted()).unwrap();
        let second = encode_payment_payload("tx", &accepted()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_payment_payload("not base64!!").unwrap_err(),
            X402Error::Base64Error(_)
        ));
    }

    #[test]
    fn test_decode_settlement() {
        let encoded = BASE64.encode(
            json!({"success": true, "transaction": "0xabc", "network": "stacks:1", "blockHeight": 9})
                .to_string(),
        );

        let settlement = decode_settlement(Some(&encoded)).unwrap();
        assert_eq!(settlement.success, Some(true));
        assert_eq!(settlement.transaction.as_deref(), Some("0xabc"));
        assert_eq!(settlement.other["blockHeight"], 9);
    }

    #[test]
    fn test_decode_settlement_absent_or_malformed() {
        assert!(decode_settlement(None).is_none());
        assert!(decode_settlement(Some("%%%")).is_none());
    }

    #[test]
    fn test_settlement_from_legacy_header() {
        let settlement = SettlementResponse {
            transaction: Some("0xdef".to_string()),
            ..Default::default()
        };
        let mut headers = HashMap::new();
        headers.insert(
            "x-payment-response".to_string(),
            encode_settlement(&settlement).unwrap(),
        );
        let response = HttpResponse {
            status: 200,
            body: ResponseBody::Text(String::new()),
            headers,
        };

        assert_eq!(settlement_from_response(&response), Some(settlement));
    }

    #[test]
    fn test_generate_nonce() {
        let nonce1 = generate_nonce();
        let nonce2 = generate_nonce();

        assert_eq!(nonce1.len(), 66);
        assert!(nonce1.starts_with("0x"));
        assert_ne!(nonce1, nonce2);
    }
}
