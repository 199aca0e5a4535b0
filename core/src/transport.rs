//! One logical request/response cycle with retries.
//!
//! # Design
//! `Transport::execute` turns a `RequestDescriptor` into an `HttpRequest`,
//! sends it through the backend and sorts the result into success, a
//! transient failure (retried) or a rejection (returned at once). Retry
//! bookkeeping lives in a `RetryState` local to the call, so a transport can
//! be shared between threads without locking. Mutating verbs get one
//! idempotency key per logical call, reused by every retry of that call.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::counter::RequestCounter;
use crate::error::{Error, Result};
use crate::http::{HttpBackend, HttpRequest, HttpResponse};
use crate::redact::redact_pairs;
use crate::request::RequestDescriptor;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

const DEFAULT_CONTENT_TYPE: &str = "application/json";
const TRANSIENT_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Delay before attempt `attempt` (1-based): none before the first, then
/// linear in the attempt number.
pub fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    unit.checked_mul(attempt.saturating_sub(1)).unwrap_or(Duration::MAX)
}

#[derive(Debug)]
struct RetryState {
    attempt: u32,
    max_attempts: u32,
    last_error: Option<String>,
}

impl RetryState {
    fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            last_error: None,
        }
    }

    /// Advance to the next attempt; `None` once the budget is spent.
    fn next_attempt(&mut self) -> Option<u32> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.attempt)
    }

    fn exhausted(self) -> Error {
        Error::Communication {
            attempts: self.attempt,
            last_error: self
                .last_error
                .unwrap_or_else(|| "no attempt was made".to_string()),
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Success(Vec<u8>),
    Transient(String),
    Rejected(Error),
}

fn classify(response: HttpResponse) -> Outcome {
    if response.is_success() {
        return Outcome::Success(response.body);
    }
    if TRANSIENT_STATUSES.contains(&response.status) {
        return Outcome::Transient(format!("HTTP {}", response.status));
    }
    Outcome::Rejected(rejection(response.status, &response.body))
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    errors: Vec<RemoteError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteError {
    #[serde(default)]
    error_code: Value,
    #[serde(default)]
    error_reason: Option<String>,
    #[serde(default)]
    error_source: Option<String>,
}

/// Build a `RemoteRejection` from the service's `{"errors":[...]}` body,
/// falling back to code `UNKNOWN` and the raw body text.
fn rejection(status: u16, body: &[u8]) -> Error {
    let first = serde_json::from_slice::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.errors.into_iter().next());

    let Some(remote) = first else {
        return Error::RemoteRejection {
            status,
            code: "UNKNOWN".to_string(),
            reason: String::from_utf8_lossy(body).into_owned(),
        };
    };

    let code = match remote.error_code {
        Value::String(s) => s,
        Value::Null => "UNKNOWN".to_string(),
        other => other.to_string(),
    };
    let reason = match (remote.error_reason, remote.error_source) {
        (Some(reason), Some(source)) => format!("{reason}: {source}"),
        (Some(reason), None) => reason,
        (None, Some(source)) => source,
        (None, None) => String::from_utf8_lossy(body).into_owned(),
    };
    Error::RemoteRejection {
        status,
        code,
        reason,
    }
}

/// Retrying executor bound to one service tenant.
#[derive(Debug)]
pub struct Transport<B> {
    backend: B,
    authorization: String,
    max_attempts: u32,
    backoff_unit: Duration,
    counter: Arc<RequestCounter>,
}

impl<B: HttpBackend> Transport<B> {
    pub fn new(backend: B, config: &ServiceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            authorization: config.credentials.basic_auth(),
            max_attempts: config.max_attempts,
            backoff_unit: config.backoff_unit(),
            counter: Arc::new(RequestCounter::new()),
        })
    }

    /// Count attempts on a caller-owned counter instead of a private one.
    pub fn with_counter(mut self, counter: Arc<RequestCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn counter(&self) -> &Arc<RequestCounter> {
        &self.counter
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run `descriptor` to completion and return the 2xx body unchanged.
    pub fn execute(&self, descriptor: &RequestDescriptor) -> Result<Vec<u8>> {
        let idempotency_key = descriptor
            .method
            .is_mutating()
            .then(|| Uuid::new_v4().to_string());
        let request = self.build_request(descriptor, idempotency_key.as_deref())?;

        let mut state = RetryState::new(self.max_attempts);
        while let Some(attempt) = state.next_attempt() {
            let delay = backoff_delay(attempt, self.backoff_unit);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }

            tracing::info!(
                method = %request.method,
                url = %request.url,
                attempt,
                params = ?redact_pairs(&request.query),
                headers = ?redact_pairs(&request.headers),
                "sending request"
            );
            self.counter.increment();

            let outcome = match self.backend.send(&request) {
                Ok(response) => classify(response),
                Err(e) => Outcome::Transient(e.to_string()),
            };

            match outcome {
                Outcome::Success(body) => {
                    tracing::debug!(
                        url = %request.url,
                        attempt,
                        bytes = body.len(),
                        "request succeeded"
                    );
                    return Ok(body);
                }
                Outcome::Rejected(err) => {
                    tracing::warn!(url = %request.url, attempt, error = %err, "request rejected");
                    return Err(err);
                }
                Outcome::Transient(reason) => {
                    tracing::warn!(
                        url = %request.url,
                        attempt,
                        max_attempts = self.max_attempts,
                        reason = %reason,
                        "transient failure"
                    );
                    state.last_error = Some(reason);
                }
            }
        }

        Err(state.exhausted())
    }

    fn build_request(
        &self,
        descriptor: &RequestDescriptor,
        idempotency_key: Option<&str>,
    ) -> Result<HttpRequest> {
        let mut headers = vec![
            ("Accept".to_string(), DEFAULT_CONTENT_TYPE.to_string()),
            ("Authorization".to_string(), self.authorization.clone()),
        ];

        let body = match &descriptor.body {
            Some(value) => {
                let bytes = serde_json::to_vec(value).map_err(|e| Error::Serialization {
                    message: e.to_string(),
                })?;
                let content_type = descriptor
                    .content_type
                    .as_deref()
                    .unwrap_or(DEFAULT_CONTENT_TYPE);
                headers.push(("Content-Type".to_string(), content_type.to_string()));
                Some(bytes)
            }
            None => None,
        };

        if let Some(key) = idempotency_key {
            headers.push((IDEMPOTENCY_HEADER.to_string(), key.to_string()));
        }
        headers.extend(descriptor.headers.iter().cloned());

        Ok(HttpRequest {
            method: descriptor.method,
            url: descriptor.url.clone(),
            query: descriptor.params.clone(),
            headers,
            body,
        })
    }
}
