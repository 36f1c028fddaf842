//! In-memory doubles shared by the unit tests.

use crate::errors::{Result, X402Error};
use crate::executor::{HttpResponse, OutgoingRequest, RequestExecutor, ResponseBody};
use crate::requirements::SigningRequest;
use crate::retry::Sleeper;
use crate::signers::{PaymentSigner, SignedTransaction, StructuredDataSigner};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

pub fn response(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        body: ResponseBody::Json(body),
        headers: HashMap::new(),
    }
}

pub fn response_with_header(status: u16, body: Value, name: &str, value: &str) -> HttpResponse {
    let mut response = response(status, body);
    response.headers.insert(name.to_ascii_lowercase(), value.to_string());
    response
}

pub fn flat_terms(nonce: &str) -> Value {
    json!({
        "maxAmountRequired": "1000",
        "resource": "/api/names/register",
        "payTo": "SP2J6ZY48GV1EZ5V2V5RB9MP66SW86PYKKNRV9EJ7",
        "network": "mainnet",
        "nonce": nonce,
        "expiresAt": "2099-01-01T00:00:00Z",
        "tokenType": "STX"
    })
}

/// One recorded exchange.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Answers unauthenticated probes and paid submissions from two scripts.
///
/// An empty probe script answers 402 with fresh flat terms; an empty
/// submission script answers 200.
#[derive(Default)]
pub struct ScriptedExecutor {
    probes: Mutex<VecDeque<Result<HttpResponse>>>,
    submissions: Mutex<VecDeque<Result<HttpResponse>>>,
    probe_log: Mutex<Vec<Recorded>>,
    submission_log: Mutex<Vec<Recorded>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(self, response: HttpResponse) -> Self {
        self.probes.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn submission(self, response: HttpResponse) -> Self {
        self.submissions.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn submission_error(self, message: &str) -> Self {
        self.submissions
            .lock()
            .unwrap()
            .push_back(Err(X402Error::Transient { status: 0, message: message.to_string() }));
        self
    }

    pub fn probes(&self) -> Vec<Recorded> {
        self.probe_log.lock().unwrap().clone()
    }

    pub fn submissions(&self) -> Vec<Recorded> {
        self.submission_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequestExecutor for ScriptedExecutor {
    async fn execute(&self, request: &OutgoingRequest, headers: &[(String, String)]) -> Result<HttpResponse> {
        let recorded = Recorded {
            body: request.body.clone(),
            headers: headers.to_vec(),
        };

        if headers.is_empty() {
            let count = {
                let mut log = self.probe_log.lock().unwrap();
                log.push(recorded);
                log.len()
            };
            self.probes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(response(402, flat_terms(&format!("nonce-{count}")))))
        } else {
            self.submission_log.lock().unwrap().push(recorded);
            self.submissions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(response(200, json!({"success": true}))))
        }
    }
}

/// Signs by echoing the nonce, optionally failing.
#[derive(Default)]
pub struct FakeSigner {
    pub fail: bool,
    seen: Mutex<Vec<String>>,
}

impl FakeSigner {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn nonces(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentSigner for FakeSigner {
    async fn sign_payment(&self, request: &SigningRequest) -> Result<SignedTransaction> {
        self.seen.lock().unwrap().push(request.nonce.clone());
        if self.fail {
            return Err(X402Error::SignerError("key is locked".to_string()));
        }
        Ok(SignedTransaction(format!("signed:{}", request.nonce)))
    }
}

/// Structured-data signer that returns a fixed signature and counts calls.
pub struct FakeOwner {
    pub address: String,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeOwner {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl StructuredDataSigner for FakeOwner {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn sign_structured_data(&self, domain: &str, message: &str) -> Result<String> {
        self.calls.lock().unwrap().push((domain.to_string(), message.to_string()));
        Ok(format!("sig({domain},{message})"))
    }
}

/// Records requested delays instead of waiting.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}
