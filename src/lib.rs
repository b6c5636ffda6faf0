//! # slides2png
//!
//! Convert presentation documents into per-slide images through a remote
//! conversion service.
//!
//! ## Why this crate?
//!
//! Rendering PowerPoint faithfully needs a full office engine. The Aspose
//! Slides cloud API already has one, so this crate does the client side: it
//! authenticates, uploads the deck, asks the service to render it and pulls
//! the results back. Every HTTP exchange is fire-and-forget and may complete
//! in any order; one state machine keeps track of which reply belongs where.
//!
//! ## Workflow
//!
//! ```text
//! deck.pptx
//!  │
//!  ├─ 1. Validate  non-empty, at most 35 MiB, destination writable
//!  ├─ 2. Token     client-credentials exchange (only when none is cached)
//!  ├─ 3. Upload    PUT into a fresh storage folder            0.00 – 0.33
//!  ├─ 4. Split     server renders every slide (estimated)     0.33 – 0.66
//!  └─ 5. Download  one GET per slide, in parallel             0.66 – 1.00
//! ```
//!
//! The single-shot mode ([`ConversionMode::SingleShot`]) replaces steps 3–5
//! with one multipart request whose reply is an archive of all slides.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slides2png::{convert, ConverterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConverterConfig::builder()
//!         .client_id("my-client-id")
//!         .client_secret("my-client-secret")
//!         .build()?;
//!     let output = convert("deck.pptx", "slides/", &config).await?;
//!     eprintln!("{} slides in {} ms", output.files.len(), output.duration_ms);
//!     Ok(())
//! }
//! ```
//!
//! For step-by-step control (or to drive the state machine over your own
//! transport) use [`Converter`] and its [`EventStream`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `slides2png` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! slides2png = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod collector;
pub mod config;
pub mod converter;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod token;
pub mod wire;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use collector::{Collected, ResultCollector};
pub use config::{ConversionMode, ConverterConfig, ConverterConfigBuilder};
pub use converter::{
    convert, convert_from_bytes, convert_observed, convert_sync, observe, ConversionOutput,
    Converter, EventStream,
};
pub use error::{ConvertError, ErrorKind};
pub use job::{ConversionStatus, Resume, MAX_SOURCE_BYTES};
pub use orchestrator::{ConverterEvent, EventSink, Orchestrator};
pub use progress::{ConversionObserver, NoopObserver};
pub use registry::{ReplyRegistry, Stage};
pub use token::{Credential, TokenManager};
