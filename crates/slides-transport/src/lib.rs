//! # slides-transport
//!
//! The HTTP boundary used by the `slides2png` conversion orchestrator.
//!
//! Requests are **fire-and-forget**: [`Transport::dispatch`] hands a request to
//! the transport and immediately returns a [`RequestHandle`]. Everything that
//! happens afterwards (byte-level progress, failure, TLS failure, completion)
//! is reported asynchronously as a [`TransportEvent`] tagged with that handle
//! and pushed into the [`TransportSink`] the transport was built with.
//!
//! ```text
//!  orchestrator ──dispatch(req)──▶ transport ──(tokio task)──▶ server
//!       ▲                              │
//!       └──── TransportEvent ◀── sink ─┘   Progress* then exactly one of
//!                                          Completed | Failed | TlsFailed
//! ```
//!
//! The orchestrator never waits on a request: it returns after dispatch and
//! resumes when the terminal event for the handle arrives. Because events
//! travel through a channel, the handle returned by `dispatch` is always known
//! to the caller before any event carrying it can be observed.
//!
//! [`HttpTransport`] is the reqwest-backed implementation. Tests substitute
//! their own [`Transport`] that records requests and lets the test inject
//! events by hand.

use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;

mod error;
mod http;

pub use error::TransportErrorKind;
pub use http::{HttpTransport, HttpTransportConfig};
pub use reqwest::{Method, Url};

// ── Handles ──────────────────────────────────────────────────────────────

/// Opaque identifier of one in-flight request.
///
/// Handles are allocated monotonically per transport instance and are never
/// reused, so a late event can always be told apart from a newer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(u64);

impl RequestHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Requests ─────────────────────────────────────────────────────────────

/// A request body.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    /// No body (GET, or a POST whose parameters live in the query string).
    #[default]
    Empty,
    /// Raw bytes sent with the given content type. Upload progress is reported.
    Bytes { data: Bytes, content_type: String },
    /// `application/x-www-form-urlencoded` pairs, encoded in insertion order.
    Form(Vec<(String, String)>),
    /// `multipart/form-data` parts, in order.
    Multipart(Vec<FormPart>),
}

impl RequestBody {
    /// Number of payload bytes whose upload is tracked for progress.
    pub fn tracked_len(&self) -> u64 {
        match self {
            RequestBody::Bytes { data, .. } => data.len() as u64,
            RequestBody::Multipart(parts) => parts.iter().map(|p| p.data.len() as u64).sum(),
            RequestBody::Empty | RequestBody::Form(_) => 0,
        }
    }
}

/// One part of a multipart body.
#[derive(Debug, Clone)]
pub struct FormPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: String,
    pub data: Bytes,
}

impl FormPart {
    /// A JSON part (`text/json`) serialised from `value`.
    pub fn json(name: impl Into<String>, value: &serde_json::Value) -> Self {
        Self {
            name: name.into(),
            file_name: None,
            content_type: "text/json".to_string(),
            data: Bytes::from(value.to_string()),
        }
    }

    /// A binary file part (`application/octet-stream`).
    pub fn file(name: impl Into<String>, file_name: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            file_name: Some(file_name.into()),
            content_type: "application/octet-stream".to_string(),
            data,
        }
    }
}

/// A transport-agnostic HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: Url) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add `Authorization: Bearer {token}`.
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// First value of a request header, compared case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// ── Responses ────────────────────────────────────────────────────────────

/// A fully received HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn from_parts(status: u16, headers: Vec<(String, String)>, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// A `200 OK` carrying `value` as `application/json`.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(200)
            .with_header("Content-Type", "application/json; charset=utf-8")
            .with_body(value.to_string())
    }

    /// Value of the first header called `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

// ── Events ───────────────────────────────────────────────────────────────

/// Which way bytes are flowing for a [`TransportEvent::Progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Everything a transport reports about a dispatched request.
///
/// Each handle receives any number of `Progress` events followed by exactly
/// one terminal event.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Progress {
        handle: RequestHandle,
        direction: Direction,
        transferred: u64,
        total: Option<u64>,
    },
    /// Network-level failure, or an HTTP error status. For HTTP errors the
    /// response is attached so its body can be inspected.
    Failed {
        handle: RequestHandle,
        kind: TransportErrorKind,
        response: Option<HttpResponse>,
    },
    /// TLS handshake or certificate failure.
    TlsFailed {
        handle: RequestHandle,
        details: Vec<String>,
    },
    Completed {
        handle: RequestHandle,
        response: HttpResponse,
    },
}

impl TransportEvent {
    pub fn handle(&self) -> RequestHandle {
        match self {
            TransportEvent::Progress { handle, .. }
            | TransportEvent::Failed { handle, .. }
            | TransportEvent::TlsFailed { handle, .. }
            | TransportEvent::Completed { handle, .. } => *handle,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportEvent::Progress { .. })
    }
}

/// Where a transport pushes its events.
pub type TransportSink = mpsc::UnboundedSender<TransportEvent>;

/// The receiving end of a [`TransportSink`].
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Create a connected sink/receiver pair.
pub fn event_channel() -> (TransportSink, TransportEvents) {
    mpsc::unbounded_channel()
}

/// Issues requests without waiting for them.
///
/// Implementations must return promptly; all outcomes are reported through
/// the sink the transport was constructed with.
pub trait Transport: Send + Sync {
    fn dispatch(&self, request: HttpRequest) -> RequestHandle;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn dispatch(&self, request: HttpRequest) -> RequestHandle {
        (**self).dispatch(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handle_display() {
        assert_eq!(RequestHandle::from_raw(7).to_string(), "#7");
    }

    #[test]
    fn response_headers_are_case_insensitive() {
        let resp = HttpResponse::new(200).with_header("Content-Disposition", "attachment");
        assert_eq!(resp.header("content-disposition"), Some("attachment"));
        assert_eq!(resp.header("CONTENT-DISPOSITION"), Some("attachment"));
        assert_eq!(resp.header("content-type"), None);
    }

    #[test]
    fn json_response_has_json_content_type() {
        let resp = HttpResponse::json(&json!({"a": 1}));
        assert!(resp.content_type().unwrap().contains("application/json"));
        assert_eq!(resp.body(), br#"{"a":1}"#);
    }

    #[test]
    fn bearer_sets_authorization() {
        let url = Url::parse("https://example.com/x").unwrap();
        let req = HttpRequest::get(url).bearer("tok");
        assert_eq!(req.header_value("authorization"), Some("Bearer tok"));
    }

    #[test]
    fn tracked_len_counts_upload_payloads() {
        let body = RequestBody::Multipart(vec![
            FormPart::json("data", &json!({"Width": 1})),
            FormPart::file("file0", "a.pptx", Bytes::from_static(b"12345")),
        ]);
        assert_eq!(body.tracked_len(), 11 + 5);
        assert_eq!(RequestBody::Empty.tracked_len(), 0);
    }

    #[test]
    fn only_progress_is_non_terminal() {
        let h = RequestHandle::from_raw(1);
        let p = TransportEvent::Progress {
            handle: h,
            direction: Direction::Upload,
            transferred: 1,
            total: Some(2),
        };
        assert!(!p.is_terminal());
        let c = TransportEvent::Completed {
            handle: h,
            response: HttpResponse::new(200),
        };
        assert!(c.is_terminal());
        assert_eq!(c.handle(), h);
    }
}
