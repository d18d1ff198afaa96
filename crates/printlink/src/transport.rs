//! Single HTTPS request/response abstraction.
//!
//! The loop owns exactly one [`HttpTransport`] and is its only caller, so
//! implementations need no connection pooling or interior locking. Service
//! statuses (4xx/5xx) come back as responses; only transport-level failures
//! (DNS, TCP, TLS) are errors.

use std::collections::HashMap;
use std::io::Read as _;
use std::time::Duration;

use crate::error::{SdkError, SdkResult};

/// HTTP method subset the protocol uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path plus query, e.g. `/p/telemetry`.
    pub path: String,
    /// JSON body; `None` sends an empty body.
    pub body: Option<Vec<u8>>,
    /// Extra headers beyond the transport's own.
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn with_json(mut self, body: &serde_json::Value) -> Self {
        self.body = serde_json::to_vec(body).ok();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// One inbound response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names lowercased.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Header lookup, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Parses the body as JSON, `None` when empty or malformed.
    pub fn json(&self) -> Option<serde_json::Value> {
        if self.body.is_empty() {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking single-request transport.
pub trait HttpTransport: Send + Sync {
    /// Sends one request and reads the whole response.
    ///
    /// Errors only on transport failure; HTTP error statuses are responses.
    fn send(&self, request: &HttpRequest) -> SdkResult<HttpResponse>;
}

/// Production transport over `ureq`.
pub struct UreqTransport {
    agent: ureq::Agent,
    base_url: String,
}

impl UreqTransport {
    /// Creates a transport for `base_url` with a per-request `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl HttpTransport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> SdkResult<HttpResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut req = match request.method {
            Method::Get => self.agent.get(&url),
            Method::Post => self.agent.post(&url),
        };
        for (name, value) in &request.headers {
            req = req.set(name, value);
        }
        if request.body.is_some() {
            req = req.set("Content-Type", "application/json");
        }

        let result = match &request.body {
            Some(body) => req.send_bytes(body),
            None => req.call(),
        };
        let response = match result {
            Ok(response) => response,
            // Service-level errors carry a response worth reading.
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => {
                return Err(SdkError::NetworkUnavailable(err.to_string()));
            }
        };

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers_names()
            .into_iter()
            .filter_map(|name| {
                response
                    .header(&name)
                    .map(|v| (name.to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|err| SdkError::NetworkUnavailable(err.to_string()))?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
