//! Request, response and interaction types

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::matching::normalize_url;

/// Outgoing HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// HTTP method, as transmitted
    pub method: String,
    /// Normalized URL
    pub url: String,
    /// Headers in insertion order
    pub headers: Vec<(String, String)>,
    /// Request body (`None` when empty)
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a request without headers or body
    #[must_use]
    pub fn new(method: impl Into<String>, url: &str) -> Self {
        Self {
            method: method.into(),
            url: normalize_url(url),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Create a GET request
    #[must_use]
    pub fn get(url: &str) -> Self {
        Self::new("GET", url)
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body; an empty body is stored as no body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.body = if body.is_empty() { None } else { Some(body) };
        self
    }

    /// Look up a header value by case-insensitive name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        crate::matching::find_header(&self.headers, name)
    }

    /// Merge default headers; values already on the request win
    #[must_use]
    pub fn appending_headers(mut self, defaults: &[(String, String)]) -> Self {
        for (name, value) in defaults {
            if self.header(name).is_none() {
                self.headers.push((name.clone(), value.clone()));
            }
        }
        self
    }

    /// Replace the body with upload data
    #[must_use]
    pub fn appending_body(self, body: Bytes) -> Self {
        self.with_body(body)
    }
}

/// Recorded HTTP response head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Final URL of the response, if known
    pub url: Option<String>,
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
}

impl Response {
    /// Create a response with a status and no headers
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            url: None,
            status,
            headers: Vec::new(),
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Look up a header value by case-insensitive name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        crate::matching::find_header(&self.headers, name)
    }
}

/// One completed request/response exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    /// Request as sent
    pub request: Request,
    /// Response head
    pub response: Response,
    /// Response body
    pub response_data: Option<Bytes>,
    /// Unix timestamp (seconds) of the capture
    pub recorded_at: u64,
}

impl Interaction {
    /// Capture an exchange that just happened
    #[must_use]
    pub fn new(request: Request, response: Response, response_data: Option<Bytes>) -> Self {
        let recorded_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            request,
            response,
            response_data,
            recorded_at,
        }
    }
}
