//! The network seam of the envelope.
//!
//! [`RequestExecutor`] performs one HTTP exchange and always hands back a
//! uniform [`HttpResponse`], whether the body was JSON or not. The retry and
//! challenge machinery only ever talks to the network through this trait.

use crate::errors::Result;
use crate::types::RETRY_AFTER_HEADER;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// A request the caller wants to make, replayed on every attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRequest {
    /// HTTP method
    pub method: Method,
    /// Target URL
    pub url: Url,
    /// Caller headers, sent on every attempt
    pub headers: Vec<(String, String)>,
    /// Optional JSON body
    pub body: Option<Value>,
}

impl OutgoingRequest {
    /// Creates a request without headers or body.
    pub fn new(method: Method, url: &str) -> Result<Self> {
        Ok(Self {
            method,
            url: Url::parse(url)?,
            headers: Vec::new(),
            body: None,
        })
    }

    /// Creates a GET request.
    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    /// Creates a POST request with a JSON body.
    ///
    /// # Examples
    ///
    /// ```
    /// use x402_envelope::executor::OutgoingRequest;
    /// use serde_json::json;
    ///
    /// let request = OutgoingRequest::post("https://api.example.com/names", json!({"name": "alice"}))
    ///     .unwrap()
    ///     .with_header("X-Client", "demo");
    /// assert_eq!(request.headers.len(), 1);
    /// ```
    pub fn post(url: &str, body: Value) -> Result<Self> {
        Ok(Self::new(Method::POST, url)?.with_body(body))
    }

    /// Creates a DELETE request with a JSON body.
    pub fn delete(url: &str, body: Value) -> Result<Self> {
        Ok(Self::new(Method::DELETE, url)?.with_body(body))
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Response body, decoded as JSON when possible.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Body parsed as JSON
    Json(Value),
    /// Body that was not JSON, kept verbatim
    Text(String),
}

impl ResponseBody {
    /// Attempts a JSON decode and falls back to the raw text.
    pub fn parse(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Text(text),
        }
    }

    /// The JSON value, if the body was JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(_) => None,
        }
    }
}

/// One HTTP response, reduced to what the envelope needs.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Decoded body
    pub body: ResponseBody,
    /// Headers keyed by lowercase name
    pub headers: HashMap<String, String>,
}

impl HttpResponse {
    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether this is a 402 Payment Required response.
    pub fn is_payment_required(&self) -> bool {
        self.status == 402
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The JSON body, if any.
    pub fn json(&self) -> Option<&Value> {
        self.body.as_json()
    }

    /// Server-specified retry delay from the `Retry-After` header.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_at(Utc::now())
    }

    /// Same as [`HttpResponse::retry_after`] with an explicit clock.
    ///
    /// Accepts delta-seconds (integer or fractional) and HTTP-dates.
    pub fn retry_after_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let raw = self.header(RETRY_AFTER_HEADER)?.trim();
        if let Ok(seconds) = raw.parse::<f64>() {
            return Duration::try_from_secs_f64(seconds).ok();
        }
        let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
        Some((at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// The body reduced to an error code and message.
    pub fn error_body(&self) -> ErrorBody {
        ErrorBody::from_body(&self.body)
    }
}

/// Error details extracted from a failed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorBody {
    /// JSON object body
    Structured {
        /// Server error code
        code: Option<String>,
        /// Joined error text
        message: Option<String>,
    },
    /// Anything that was not a JSON object
    Raw(String),
}

impl ErrorBody {
    /// Extracts error details from a response body.
    ///
    /// # Examples
    ///
    /// ```
    /// use x402_envelope::executor::{ErrorBody, ResponseBody};
    /// use serde_json::json;
    ///
    /// let body = ResponseBody::Json(json!({"error": "Settlement failed", "code": "FACILITATOR_ERROR"}));
    /// let error = ErrorBody::from_body(&body);
    /// assert_eq!(error.code(), Some("FACILITATOR_ERROR"));
    /// assert_eq!(error.text().as_deref(), Some("Settlement failed"));
    ///
    /// let raw = ErrorBody::from_body(&ResponseBody::Text("Bad Gateway".to_string()));
    /// assert_eq!(raw, ErrorBody::Raw("Bad Gateway".to_string()));
    /// ```
    pub fn from_body(body: &ResponseBody) -> Self {
        match body {
            ResponseBody::Json(Value::Object(map)) => Self::from_object(map),
            ResponseBody::Json(Value::String(text)) => ErrorBody::Raw(text.clone()),
            ResponseBody::Json(other) => ErrorBody::Raw(other.to_string()),
            ResponseBody::Text(text) => ErrorBody::Raw(text.clone()),
        }
    }

    fn from_object(map: &Map<String, Value>) -> Self {
        let mut code = map.get("code").and_then(Value::as_str).map(str::to_string);
        let mut parts: Vec<String> = Vec::new();

        for key in ["error", "message", "details", "reason"] {
            match map.get(key) {
                Some(Value::String(text)) if !text.is_empty() => parts.push(text.clone()),
                Some(Value::Object(inner)) if key == "error" => {
                    if code.is_none() {
                        code = inner.get("code").and_then(Value::as_str).map(str::to_string);
                    }
                    for inner_key in ["message", "reason"] {
                        if let Some(text) = inner.get(inner_key).and_then(Value::as_str) {
                            parts.push(text.to_string());
                        }
                    }
                }
                Some(Value::Null) | Some(Value::String(_)) | None => {}
                Some(other) => parts.push(other.to_string()),
            }
        }

        let message = (!parts.is_empty()).then(|| parts.join(": "));
        ErrorBody::Structured { code, message }
    }

    /// Server error code, if one was given.
    pub fn code(&self) -> Option<&str> {
        match self {
            ErrorBody::Structured { code, .. } => code.as_deref(),
            ErrorBody::Raw(_) => None,
        }
    }

    /// Human-readable error text, if any.
    pub fn text(&self) -> Option<String> {
        match self {
            ErrorBody::Structured { message, .. } => message.clone(),
            ErrorBody::Raw(text) if text.is_empty() => None,
            ErrorBody::Raw(text) => Some(text.clone()),
        }
    }
}

/// Performs HTTP exchanges for the envelope.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Sends `request` with the extra `headers` attached.
    ///
    /// Errors are reserved for transport failures; any HTTP status, including
    /// error statuses, is returned as a response.
    async fn execute(&self, request: &OutgoingRequest, headers: &[(String, String)]) -> Result<HttpResponse>;
}

/// [`RequestExecutor`] backed by a reqwest client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestExecutor {
    client: Client,
}

impl ReqwestExecutor {
    /// Creates an executor with a default reqwest client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an executor around an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RequestExecutor for ReqwestExecutor {
    async fn execute(&self, request: &OutgoingRequest, headers: &[(String, String)]) -> Result<HttpResponse> {
        let mut builder = self.client.request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter().chain(headers) {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let text = response.text().await?;

        Ok(HttpResponse {
            status,
            body: ResponseBody::parse(text),
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response_with(headers: &[(&str, &str)], body: ResponseBody) -> HttpResponse {
        HttpResponse {
            status: 429,
            body,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_body_parse_falls_back_to_text() {
        assert_eq!(ResponseBody::parse("{\"ok\":true}".to_string()), ResponseBody::Json(json!({"ok": true})));
        assert_eq!(
            ResponseBody::parse("<html>oops</html>".to_string()),
            ResponseBody::Text("<html>oops</html>".to_string())
        );
        assert_eq!(ResponseBody::parse(String::new()), ResponseBody::Text(String::new()));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = response_with(&[("Payment-Response", "abc")], ResponseBody::Text(String::new()));
        assert_eq!(response.header("PAYMENT-RESPONSE"), Some("abc"));
        assert_eq!(response.header("payment-response"), Some("abc"));
        assert_eq!(response.header("x-payment-response"), None);
    }

    #[test]
    fn test_retry_after_seconds() {
        let response = response_with(&[("Retry-After", "2")], ResponseBody::Text(String::new()));
        assert_eq!(response.retry_after(), Some(Duration::from_millis(2000)));

        let fractional = response_with(&[("Retry-After", "0.5")], ResponseBody::Text(String::new()));
        assert_eq!(fractional.retry_after(), Some(Duration::from_millis(500)));

        let negative = response_with(&[("Retry-After", "-1")], ResponseBody::Text(String::new()));
        assert_eq!(negative.retry_after(), None);

        let missing = response_with(&[], ResponseBody::Text(String::new()));
        assert_eq!(missing.retry_after(), None);
    }

    #[test]
    fn test_retry_after_out_of_range() {
        for raw in ["1e20", "inf", "NaN"] {
            let response = response_with(&[("Retry-After", raw)], ResponseBody::Text(String::new()));
            assert_eq!(response.retry_after(), None, "Retry-After: {raw}");
        }
    }

    #[test]
    fn test_retry_after_http_date() {
        let now = DateTime::parse_from_rfc3339("2015-10-21T07:28:00Z").unwrap().with_timezone(&Utc);
        let response = response_with(
            &[("Retry-After", "Wed, 21 Oct 2015 07:28:10 GMT")],
            ResponseBody::Text(String::new()),
        );
        assert_eq!(response.retry_after_at(now), Some(Duration::from_secs(10)));

        let past = now + chrono::Duration::seconds(60);
        assert_eq!(response.retry_after_at(past), Some(Duration::ZERO));
    }

    #[test]
    fn test_structured_error_body() {
        let body = ResponseBody::Json(json!({
            "error": "Payment settlement failed",
            "code": "SETTLEMENT_FAILED",
            "details": {"reason": "ConflictingNonceInMempool"}
        }));
        let error = ErrorBody::from_body(&body);

        assert_eq!(error.code(), Some("SETTLEMENT_FAILED"));
        let text = error.text().unwrap();
        assert!(text.starts_with("Payment settlement failed"));
        assert!(text.contains("ConflictingNonceInMempool"));
    }

    #[test]
    fn test_nested_error_object() {
        let body = ResponseBody::Json(json!({"error": {"code": "FACILITATOR_UNAVAILABLE", "message": "facilitator down"}}));
        let error = ErrorBody::from_body(&body);
        assert_eq!(error.code(), Some("FACILITATOR_UNAVAILABLE"));
        assert_eq!(error.text().as_deref(), Some("facilitator down"));
    }

    #[test]
    fn test_raw_error_body() {
        assert_eq!(ErrorBody::from_body(&ResponseBody::Text(String::new())).text(), None);
        assert_eq!(
            ErrorBody::from_body(&ResponseBody::Json(json!("nonce too low"))),
            ErrorBody::Raw("nonce too low".to_string())
        );
    }

    #[test]
    fn test_outgoing_request_builders() {
        let request = OutgoingRequest::delete("https://api.example.com/names/alice", json!({"owner": "SP1"})).unwrap();
        assert_eq!(request.method, Method::DELETE);
        assert_eq!(request.body, Some(json!({"owner": "SP1"})));
        assert!(OutgoingRequest::get("not a url").is_err());
    }
}
