//! Caller-facing worker and the one-call conversion entry points.
//!
//! [`Converter::spawn`] moves an [`Orchestrator`] onto its own tokio task.
//! The caller talks to it with commands ([`Converter::start`],
//! [`Converter::step`]) and reads its [`ConverterEvent`]s from the returned
//! [`EventStream`]. The worker serializes everything that touches job state:
//! commands, transport events and estimate ticks are handled one at a time.
//!
//! For the common case of "convert this file and tell me where the slides
//! are", use [`convert`] (or [`convert_sync`] outside an async context).

use crate::config::{ConversionMode, ConverterConfig};
use crate::error::ConvertError;
use crate::job::{ConversionStatus, Resume};
use crate::orchestrator::{ConverterEvent, Orchestrator};
use crate::progress::{ConversionObserver, NoopObserver};
use crate::wire;
use futures::StreamExt;
use serde::Serialize;
use slides_transport::{
    HttpTransport, HttpTransportConfig, Transport, TransportEvents, TransportSink,
};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, info};

/// A boxed stream of orchestrator events. Ends when the worker stops.
pub type EventStream = Pin<Box<dyn Stream<Item = ConverterEvent> + Send>>;

/// Result of a completed conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    /// Produced files, in arrival order.
    pub files: Vec<PathBuf>,
    pub mode: ConversionMode,
    /// Wall-clock time from start to Done.
    pub duration_ms: u64,
}

enum Command {
    Start {
        source: PathBuf,
        destination: PathBuf,
        mode: ConversionMode,
        reply: oneshot::Sender<Result<(), ConvertError>>,
    },
    Step {
        resume: Resume,
        reply: oneshot::Sender<Result<(), ConvertError>>,
    },
    Status {
        reply: oneshot::Sender<ConversionStatus>,
    },
}

/// Handle to a running orchestrator worker.
///
/// Cloning is cheap; all clones drive the same worker. The worker exits once
/// every handle is dropped and no job is in flight.
#[derive(Clone)]
pub struct Converter {
    commands: mpsc::UnboundedSender<Command>,
    mode: ConversionMode,
}

impl Converter {
    /// Start a worker backed by [`HttpTransport`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: ConverterConfig) -> Result<(Self, EventStream), ConvertError> {
        let timeout_secs = config.request_timeout_secs;
        Self::spawn_with(config, move |sink| {
            let transport_config = HttpTransportConfig {
                request_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
                user_agent: concat!("slides2png/", env!("CARGO_PKG_VERSION")).to_string(),
                ..HttpTransportConfig::default()
            };
            HttpTransport::with_config(sink, transport_config)
                .map_err(|e| ConvertError::Internal(format!("Failed to build HTTP client: {e}")))
        })
    }

    /// Start a worker over a transport built by `make_transport`, which
    /// receives the sink it must report events into.
    pub fn spawn_with<T, F>(
        config: ConverterConfig,
        make_transport: F,
    ) -> Result<(Self, EventStream), ConvertError>
    where
        T: Transport + 'static,
        F: FnOnce(TransportSink) -> Result<T, ConvertError>,
    {
        let (sink, transport_events) = slides_transport::event_channel();
        let transport = make_transport(sink)?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let mode = config.mode;

        let orchestrator = Orchestrator::new(config, transport, event_tx);
        tokio::spawn(run_worker(orchestrator, command_rx, transport_events));

        Ok((
            Self {
                commands: command_tx,
                mode,
            },
            Box::pin(UnboundedReceiverStream::new(event_rx)),
        ))
    }

    /// Start a job in the configured mode. Returns once the worker has
    /// accepted or rejected it; the outcome arrives on the event stream.
    pub async fn start(
        &self,
        source: impl AsRef<Path>,
        destination: impl AsRef<Path>,
    ) -> Result<(), ConvertError> {
        self.start_with_mode(source, destination, self.mode).await
    }

    pub async fn start_with_mode(
        &self,
        source: impl AsRef<Path>,
        destination: impl AsRef<Path>,
        mode: ConversionMode,
    ) -> Result<(), ConvertError> {
        let source = source.as_ref().to_path_buf();
        let destination = destination.as_ref().to_path_buf();
        self.request(|reply| Command::Start {
            source,
            destination,
            mode,
            reply,
        })
        .await?
    }

    /// Enter `resume` by hand (for `unattended = false`).
    pub async fn step(&self, resume: Resume) -> Result<(), ConvertError> {
        self.request(|reply| Command::Step { resume, reply }).await?
    }

    pub async fn status(&self) -> Result<ConversionStatus, ConvertError> {
        self.request(|reply| Command::Status { reply }).await
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ConvertError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| ConvertError::WorkerGone)?;
        rx.await.map_err(|_| ConvertError::WorkerGone)
    }
}

async fn run_worker<T: Transport>(
    mut orchestrator: Orchestrator<T>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut transport_events: TransportEvents,
) {
    let mut ticker: Option<Interval> = None;
    let mut epoch = orchestrator.estimate_epoch();
    let mut commands_open = true;

    loop {
        tokio::select! {
            cmd = commands.recv(), if commands_open => match cmd {
                Some(cmd) => handle_command(&mut orchestrator, cmd),
                None => commands_open = false,
            },
            Some(event) = transport_events.recv() => orchestrator.handle_transport_event(event),
            _ = next_tick(&mut ticker) => orchestrator.on_estimate_tick(),
        }

        if !commands_open && orchestrator.status().accepts_start() {
            break;
        }

        if orchestrator.is_estimating() {
            if ticker.is_none() || orchestrator.estimate_epoch() != epoch {
                epoch = orchestrator.estimate_epoch();
                let period = orchestrator.config().estimate_period();
                let mut interval =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker = Some(interval);
            }
        } else {
            ticker = None;
        }
    }
    debug!("Converter worker stopped");
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn handle_command<T: Transport>(orchestrator: &mut Orchestrator<T>, command: Command) {
    match command {
        Command::Start {
            source,
            destination,
            mode,
            reply,
        } => {
            let _ = reply.send(orchestrator.start(&source, &destination, mode));
        }
        Command::Step { resume, reply } => {
            let _ = reply.send(orchestrator.step(resume));
        }
        Command::Status { reply } => {
            let _ = reply.send(orchestrator.status());
        }
    }
}

/// Feed `events` into `observer` until the job finishes.
///
/// Returns the produced files on Done, or the reported error once the job
/// has Failed. Errors from a rejected start are passed to the observer but
/// do not end observation.
pub async fn observe(
    events: &mut EventStream,
    observer: &dyn ConversionObserver,
) -> Result<Vec<PathBuf>, ConvertError> {
    let mut status = ConversionStatus::Idle;
    while let Some(event) = events.next().await {
        match event {
            ConverterEvent::Progress(v) => observer.on_progress(v),
            ConverterEvent::StatusChanged(s) => {
                status = s;
                observer.on_status_changed(s);
            }
            ConverterEvent::Debug(m) => observer.on_debug(&m),
            ConverterEvent::Error { kind, message } => {
                observer.on_error(&message);
                if status == ConversionStatus::Failed {
                    return Err(ConvertError::JobFailed { kind, message });
                }
            }
            ConverterEvent::Done(files) => {
                observer.on_done(&files);
                return Ok(files);
            }
        }
    }
    Err(ConvertError::WorkerGone)
}

/// Convert `source` into `destination` and wait for the result.
///
/// # Example
/// ```rust,no_run
/// use slides2png::{convert, ConverterConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConverterConfig::builder()
///     .client_id(std::env::var("SLIDES2PNG_CLIENT_ID")?)
///     .client_secret(std::env::var("SLIDES2PNG_CLIENT_SECRET")?)
///     .build()?;
/// let output = convert("deck.pptx", "slides/", &config).await?;
/// for file in &output.files {
///     println!("{}", file.display());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn convert(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    config: &ConverterConfig,
) -> Result<ConversionOutput, ConvertError> {
    convert_observed(source, destination, config, &NoopObserver).await
}

/// [`convert`] reporting every event to `observer`.
pub async fn convert_observed(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    config: &ConverterConfig,
    observer: &dyn ConversionObserver,
) -> Result<ConversionOutput, ConvertError> {
    let started = Instant::now();
    let (converter, mut events) = Converter::spawn(config.clone())?;
    converter.start(source, destination).await?;
    let files = observe(&mut events, observer).await?;

    let duration_ms = started.elapsed().as_millis() as u64;
    info!("Converted into {} file(s) in {duration_ms} ms", files.len());
    Ok(ConversionOutput {
        files,
        mode: config.mode,
        duration_ms,
    })
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    config: &ConverterConfig,
) -> Result<ConversionOutput, ConvertError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ConvertError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(convert(source, destination, config))
}

/// Convert a presentation held in memory.
///
/// `bytes` are written to a managed temporary directory under `file_name`
/// (the name the service sees) and removed when this returns.
pub async fn convert_from_bytes(
    bytes: &[u8],
    file_name: &str,
    destination: impl AsRef<Path>,
    config: &ConverterConfig,
) -> Result<ConversionOutput, ConvertError> {
    let name = wire::sanitize_file_name(file_name).ok_or_else(|| {
        ConvertError::InvalidConfig(format!("'{file_name}' is not a usable file name"))
    })?;
    let dir = tempfile::tempdir().map_err(|e| ConvertError::Internal(format!("tempdir: {e}")))?;
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).map_err(|e| ConvertError::Internal(format!("tempfile write: {e}")))?;
    // `dir` is removed when `convert` returns
    convert(&path, destination, config).await
}
