//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use serde_json::json;
use slides2png::{ConversionMode, ConvertError, ConverterConfig, ConverterEvent, Orchestrator};
use slides_transport::{HttpRequest, HttpResponse, Method, RequestHandle, Transport, TransportEvent};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const API_BASE: &str = "https://api.example.test";

/// Records every dispatched request and never answers; tests inject the
/// replies by hand.
#[derive(Default)]
pub struct RecordingTransport {
    next: AtomicU64,
    requests: Mutex<Vec<(RequestHandle, HttpRequest)>>,
}

impl Transport for RecordingTransport {
    fn dispatch(&self, request: HttpRequest) -> RequestHandle {
        let handle = RequestHandle::from_raw(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        self.requests.lock().unwrap().push((handle, request));
        handle
    }
}

impl RecordingTransport {
    pub fn requests(&self) -> Vec<(RequestHandle, HttpRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last(&self) -> (RequestHandle, HttpRequest) {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no request dispatched")
    }

    pub fn with_method(&self, method: Method) -> Vec<(RequestHandle, HttpRequest)> {
        self.requests()
            .into_iter()
            .filter(|(_, r)| r.method == method)
            .collect()
    }
}

pub fn config() -> ConverterConfig {
    ConverterConfig::builder()
        .api_base(API_BASE)
        .client_id("client-1")
        .client_secret("secret-1")
        .build()
        .unwrap()
}

/// An orchestrator over a [`RecordingTransport`], plus a scratch directory.
pub struct Harness {
    pub orch: Orchestrator<RecordingTransport>,
    pub events: mpsc::UnboundedReceiver<ConverterEvent>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(config: ConverterConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            orch: Orchestrator::new(config, RecordingTransport::default(), tx),
            events: rx,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// A source file of `size` bytes (sparse; contents are zeros).
    pub fn deck(&self, name: &str, size: u64) -> PathBuf {
        let path = self.dir.path().join(name);
        File::create(&path).unwrap().set_len(size).unwrap();
        path
    }

    pub fn dest(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    /// Start a job writing into [`Harness::dest`].
    pub fn start(&mut self, source: &Path, mode: ConversionMode) -> Result<(), ConvertError> {
        let dest = self.dest();
        self.orch.start(source, &dest, mode)
    }

    pub fn transport(&self) -> &RecordingTransport {
        self.orch.transport()
    }

    pub fn complete(&mut self, handle: RequestHandle, response: HttpResponse) {
        self.orch
            .handle_transport_event(TransportEvent::Completed { handle, response });
    }

    /// Answer the most recent request.
    pub fn complete_last(&mut self, response: HttpResponse) {
        let (handle, _) = self.transport().last();
        self.complete(handle, response);
    }

    pub fn drain(&mut self) -> Vec<ConverterEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }
}

// ── Canned replies ───────────────────────────────────────────────────────

pub fn token_reply() -> HttpResponse {
    HttpResponse::json(&json!({"access_token": "tok-1", "token_type": "Bearer", "expires_in": 3600}))
}

pub fn upload_reply(stored: &str) -> HttpResponse {
    HttpResponse::json(&json!({"uploaded": [stored], "errors": []}))
}

pub fn split_reply(hrefs: &[&str]) -> HttpResponse {
    let slides: Vec<_> = hrefs.iter().map(|h| json!({"href": h, "relation": "self"})).collect();
    HttpResponse::json(&json!({ "slides": slides }))
}

pub fn png_reply(file_name: &str) -> HttpResponse {
    HttpResponse::new(200)
        .with_header("Content-Type", "image/png")
        .with_header("Content-Disposition", format!("attachment; filename={file_name}"))
        .with_body(vec![0x89, b'P', b'N', b'G'])
}

pub fn statuses(events: &[ConverterEvent]) -> Vec<slides2png::ConversionStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            ConverterEvent::StatusChanged(s) => Some(*s),
            _ => None,
        })
        .collect()
}

pub fn progress(events: &[ConverterEvent]) -> Vec<f32> {
    events
        .iter()
        .filter_map(|e| match e {
            ConverterEvent::Progress(v) => Some(*v),
            _ => None,
        })
        .collect()
}

pub fn errors(events: &[ConverterEvent]) -> Vec<(slides2png::ErrorKind, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            ConverterEvent::Error { kind, message } => Some((*kind, message.clone())),
            _ => None,
        })
        .collect()
}
