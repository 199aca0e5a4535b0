//! HTTP transport types and the backend seam.
//!
//! # Design
//! Requests and responses are plain owned data. The transport builds an
//! `HttpRequest`, hands it to an `HttpBackend` and classifies the returned
//! `HttpResponse`; nothing above this module touches a socket. Non-2xx
//! statuses come back as data so the transport alone decides what is
//! transient. `UreqBackend` is the production implementation; tests script
//! their own backends.

use std::fmt;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Verbs that carry an idempotency token across retries.
    pub fn is_mutating(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// First header value matching `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connection error: {0}")]
pub struct ConnectionError(pub String);

/// Executes one HTTP round-trip.
///
/// Implementations must return `Ok` for every status code the server
/// answers with and reserve `Err` for failures where no response arrived.
pub trait HttpBackend: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ConnectionError>;
}

impl<B: HttpBackend + ?Sized> HttpBackend for Box<B> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ConnectionError> {
        (**self).send(request)
    }
}

impl<B: HttpBackend + ?Sized> HttpBackend for std::sync::Arc<B> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ConnectionError> {
        (**self).send(request)
    }
}

/// Blocking backend over a shared `ureq` agent.
#[derive(Debug, Clone)]
pub struct UreqBackend {
    agent: ureq::Agent,
}

impl UreqBackend {
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn decorate<B>(
    mut builder: ureq::RequestBuilder<B>,
    request: &HttpRequest,
) -> ureq::RequestBuilder<B> {
    for (key, value) in &request.query {
        builder = builder.query(key.as_str(), value.as_str());
    }
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

impl HttpBackend for UreqBackend {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ConnectionError> {
        let url = request.url.as_str();
        let body = request.body.as_deref();
        let result = match request.method {
            HttpMethod::Get => decorate(self.agent.get(url), request).call(),
            HttpMethod::Delete => decorate(self.agent.delete(url), request).call(),
            HttpMethod::Post => send_with_body(decorate(self.agent.post(url), request), body),
            HttpMethod::Put => send_with_body(decorate(self.agent.put(url), request), body),
            HttpMethod::Patch => send_with_body(decorate(self.agent.patch(url), request), body),
        };
        let mut response = result.map_err(|e| ConnectionError(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        // A full service window can exceed ureq's default 10 MiB read cap.
        let body = response
            .body_mut()
            .with_config()
            .limit(u64::MAX)
            .read_to_vec()
            .map_err(|e| ConnectionError(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn send_with_body(
    builder: ureq::RequestBuilder<ureq::typestate::WithBody>,
    body: Option<&[u8]>,
) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    match body {
        Some(bytes) => builder.send(bytes),
        None => builder.send_empty(),
    }
}
