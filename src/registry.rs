//! Reply registry: which stage issued which in-flight request.
//!
//! Completions arrive in whatever order the network delivers them. Each
//! dispatched request is registered under its [`RequestHandle`] the moment
//! `dispatch` returns, and removed when its terminal event is processed, so
//! the orchestrator can route any reply back to the handler that expects it.

use crate::job::JobId;
use slides_transport::RequestHandle;
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// The orchestrator stage a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Client-credentials token exchange.
    Token,
    /// Raw upload to cloud storage.
    Upload,
    /// Server-side split and render.
    Split,
    /// Retrieval of one rendered slide; `index` is its 0-based queue position.
    Download { index: usize },
    /// Single-shot multipart upload + convert.
    UploadAndConvert,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Token => f.write_str("Bearer token"),
            Stage::Upload => f.write_str("Upload"),
            Stage::Split => f.write_str("Split/Convert"),
            Stage::Download { index } => write!(f, "Download slide {}", index + 1),
            Stage::UploadAndConvert => f.write_str("Upload/Convert"),
        }
    }
}

/// One in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub handle: RequestHandle,
    pub stage: Stage,
    /// The job that dispatched the request.
    pub job: JobId,
}

/// Handle-keyed arena of in-flight requests.
#[derive(Debug, Default)]
pub struct ReplyRegistry {
    pending: HashMap<RequestHandle, PendingRequest>,
}

impl ReplyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: RequestHandle, stage: Stage, job: JobId) {
        let previous = self.pending.insert(handle, PendingRequest { handle, stage, job });
        if let Some(prev) = previous {
            warn!("request {} registered twice (was {}, now {})", handle, prev.stage, stage);
        }
    }

    /// Look up a request without removing it (used for progress events).
    pub fn resolve(&self, handle: RequestHandle) -> Option<PendingRequest> {
        self.pending.get(&handle).copied()
    }

    /// Remove a request once its terminal event has been handled.
    pub fn forget(&mut self, handle: RequestHandle) -> Option<PendingRequest> {
        self.pending.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
