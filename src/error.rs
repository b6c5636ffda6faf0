//! Error types for the slides2png library.
//!
//! Every error is terminal for the job that raised it: the orchestrator moves
//! to [`crate::ConversionStatus::Failed`], surfaces the message on the event
//! channel and waits for a fresh start. [`ConvertError::kind`] groups the
//! variants into the five families callers usually branch on.

use crate::registry::Stage;
use slides_transport::{RequestHandle, TransportErrorKind};
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`ConvertError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad local input: missing, empty, too large, unreadable.
    Validation,
    /// The token endpoint was unreachable or answered nonsense.
    Auth,
    /// A reply had the wrong shape, arrived for the wrong stage, or could not
    /// be matched to a request.
    Protocol,
    /// Network or TLS failure reported by the transport.
    Transport,
    /// A start was requested while a job is still in flight.
    State,
    /// Local I/O, configuration or runtime problems.
    Internal,
}

/// All errors returned by the slides2png library.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Validation ────────────────────────────────────────────────────────
    #[error("File {path} does not exist")]
    FileNotFound { path: PathBuf },

    #[error("File {path} is empty (size = 0)")]
    EmptyFile { path: PathBuf },

    #[error("File {path} is too big: {size} bytes. Must be at most {limit} bytes")]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Presentation file '{path}' can't be opened: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Target path '{path}' does not exist and can't be created: {source}")]
    DestinationUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Auth ──────────────────────────────────────────────────────────────
    #[error("Bearer token request failed: {detail}")]
    AuthFailed { detail: String },

    // ── Protocol ──────────────────────────────────────────────────────────
    #[error("{stage} reply is malformed: {detail}")]
    MalformedReply { stage: Stage, detail: String },

    #[error("{stage} reply arrived while the job is {status}")]
    WrongStage { stage: Stage, status: String },

    #[error("A reply finished for request {handle}, which is not registered")]
    UnknownHandle { handle: RequestHandle },

    #[error("{stage}: {detail}")]
    MissingJobField { stage: Stage, detail: String },

    // ── Transport ─────────────────────────────────────────────────────────
    #[error("Error: {kind} ({stage})")]
    TransportFailed {
        stage: Stage,
        kind: TransportErrorKind,
    },

    #[error("SSL errors occurred ({stage}): {}", details.join("; "))]
    TlsFailed { stage: Stage, details: Vec<String> },

    // ── State ─────────────────────────────────────────────────────────────
    #[error("Conversion already in progress ({status})... Please wait!")]
    AlreadyRunning { status: String },

    // ── I/O ───────────────────────────────────────────────────────────────
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config ────────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Runtime ───────────────────────────────────────────────────────────
    /// The worker task is gone (panicked or shut down).
    #[error("Converter worker is no longer running")]
    WorkerGone,

    #[error("Internal error: {0}")]
    Internal(String),

    /// A job failed on the worker; carries the reported message and family.
    #[error("{message}")]
    JobFailed { kind: ErrorKind, message: String },
}

impl ConvertError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::FileNotFound { .. }
            | ConvertError::EmptyFile { .. }
            | ConvertError::FileTooLarge { .. }
            | ConvertError::Unreadable { .. }
            | ConvertError::DestinationUnavailable { .. } => ErrorKind::Validation,
            ConvertError::AuthFailed { .. } => ErrorKind::Auth,
            ConvertError::MalformedReply { .. }
            | ConvertError::WrongStage { .. }
            | ConvertError::UnknownHandle { .. }
            | ConvertError::MissingJobField { .. } => ErrorKind::Protocol,
            ConvertError::TransportFailed { .. } | ConvertError::TlsFailed { .. } => {
                ErrorKind::Transport
            }
            ConvertError::AlreadyRunning { .. } => ErrorKind::State,
            ConvertError::OutputWriteFailed { .. }
            | ConvertError::InvalidConfig(_)
            | ConvertError::WorkerGone
            | ConvertError::Internal(_) => ErrorKind::Internal,
            ConvertError::JobFailed { kind, .. } => *kind,
        }
    }
}
