//! The conversion state machine.
//!
//! [`Orchestrator`] owns the job, the reply registry, the token manager and
//! the result collector. It is driven purely by method calls: caller
//! commands ([`Orchestrator::start`], [`Orchestrator::step`]), transport
//! events ([`Orchestrator::handle_transport_event`]) and estimate ticks
//! ([`Orchestrator::on_estimate_tick`]). It never blocks and never spawns;
//! [`crate::Converter`] runs it on a dedicated worker task.
//!
//! ```text
//! Idle ─start─▶ RefreshingToken ─token─▶ (stage that asked for it)
//! Idle ─start─▶ Uploading ─▶ ConvertingRemote ─▶ Downloading ─▶ Done
//! any ─error─▶ Failed            Failed | Done ─start─▶ Idle
//! ```

use crate::collector::{Collected, ResultCollector};
use crate::config::{ConversionMode, ConverterConfig};
use crate::error::{ConvertError, ErrorKind};
use crate::job::{self, ConversionJob, ConversionStatus, JobId, Resume};
use crate::progress::{fraction, Band, ProgressEstimator, ProgressMeter};
use crate::registry::{PendingRequest, ReplyRegistry, Stage};
use crate::token::TokenManager;
use crate::wire;
use serde_json::Value;
use slides_transport::{
    Direction, HttpRequest, HttpResponse, RequestHandle, Transport, TransportErrorKind,
    TransportEvent,
};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything the orchestrator reports to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ConverterEvent {
    /// Overall progress in `[0, 1]`.
    Progress(f32),
    StatusChanged(ConversionStatus),
    /// Diagnostics: reply bodies, header dumps, byte counts.
    Debug(String),
    /// A human-readable error. The job is Failed, except for a rejected
    /// start, which leaves the running job alone.
    Error { kind: ErrorKind, message: String },
    /// Produced files, in arrival order.
    Done(Vec<PathBuf>),
}

pub type EventSink = mpsc::UnboundedSender<ConverterEvent>;

/// One conversion state machine bound to one transport.
pub struct Orchestrator<T: Transport> {
    config: ConverterConfig,
    transport: T,
    events: EventSink,
    registry: ReplyRegistry,
    tokens: TokenManager,
    collector: ResultCollector,
    status: ConversionStatus,
    job: Option<ConversionJob>,
    next_job: JobId,
    meter: ProgressMeter,
    estimator: Option<ProgressEstimator>,
    estimate_epoch: u64,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(config: ConverterConfig, transport: T, events: EventSink) -> Self {
        Self {
            config,
            transport,
            events,
            registry: ReplyRegistry::new(),
            tokens: TokenManager::new(),
            collector: ResultCollector::new(),
            status: ConversionStatus::Idle,
            job: None,
            next_job: JobId::first(),
            meter: ProgressMeter::default(),
            estimator: None,
            estimate_epoch: 0,
        }
    }

    pub fn status(&self) -> ConversionStatus {
        self.status
    }

    pub fn job(&self) -> Option<&ConversionJob> {
        self.job.as_ref()
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Requests dispatched but not yet finished, across all jobs.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// True while the conversion estimate timer should be ticking.
    pub fn is_estimating(&self) -> bool {
        self.estimator.is_some()
    }

    /// Bumped every time a new estimate starts, so a driver can restart its
    /// timer from zero.
    pub fn estimate_epoch(&self) -> u64 {
        self.estimate_epoch
    }

    // ── Commands ─────────────────────────────────────────────────────────

    /// Begin converting `source` into `destination`.
    ///
    /// Rejected with [`ConvertError::AlreadyRunning`] while a job is in
    /// flight; that rejection leaves the running job untouched. Any other
    /// error fails the new job.
    pub fn start(
        &mut self,
        source: &Path,
        destination: &Path,
        mode: ConversionMode,
    ) -> Result<(), ConvertError> {
        if !self.status.accepts_start() {
            let err = ConvertError::AlreadyRunning {
                status: self.status.to_string(),
            };
            warn!("{err}");
            self.emit(ConverterEvent::Error {
                kind: err.kind(),
                message: err.to_string(),
            });
            return Err(err);
        }

        self.estimator = None;
        self.job = None;
        self.collector.reset(0);
        self.set_status(ConversionStatus::Idle);

        let prepared = job::validate_source(source, self.config.max_source_bytes).and_then(
            |src| job::prepare_destination(destination).map(|dest| (src, dest)),
        );
        let (source, destination) = match prepared {
            Ok(v) => v,
            Err(e) => return Err(self.fail(e)),
        };

        let id = self.next_job;
        self.next_job = id.next();
        info!(
            "Starting {id}: {} ({} bytes, {mode}) → {}",
            source.path.display(),
            source.size,
            destination.display()
        );
        self.job = Some(ConversionJob::new(id, source, destination));
        self.meter.enter(Band::UPLOAD);
        self.emit(ConverterEvent::Progress(0.0));

        let first = match mode {
            ConversionMode::SplitPages => Resume::Upload,
            ConversionMode::SingleShot => Resume::UploadAndConvert,
        };
        self.enter(first).map_err(|e| self.fail(e))
    }

    /// Enter a stage by hand. Used when `unattended` is off.
    pub fn step(&mut self, resume: Resume) -> Result<(), ConvertError> {
        if self.job.is_none() || self.status.accepts_start() {
            return Err(ConvertError::WrongStage {
                stage: stage_of(resume),
                status: self.status.to_string(),
            });
        }
        self.enter(resume).map_err(|e| self.fail(e))
    }

    /// Advance the conversion estimate by one tick.
    pub fn on_estimate_tick(&mut self) {
        let Some(estimator) = self.estimator.as_mut() else {
            return;
        };
        let value = estimator.tick();
        if estimator.ticks() >= estimator.expected_ticks() {
            debug!("Conversion estimate reached the end of its band");
            self.estimator = None;
        }
        self.report_value(value);
    }

    /// Route one transport event to the stage that issued its request.
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        let handle = event.handle();
        let pending = if event.is_terminal() {
            self.registry.forget(handle)
        } else {
            self.registry.resolve(handle)
        };
        let Some(pending) = pending else {
            return self.on_unregistered(event);
        };

        if self.job.as_ref().map(|j| j.id) != Some(pending.job) {
            if event.is_terminal() {
                warn!(
                    "Discarding {} reply {handle} from replaced {}",
                    pending.stage, pending.job
                );
            }
            return;
        }

        if self.status == ConversionStatus::Failed {
            return self.drain(pending, event);
        }

        let stage = pending.stage;
        let result = match event {
            TransportEvent::Progress {
                direction,
                transferred,
                total,
                ..
            } => {
                self.on_progress(stage, direction, transferred, total);
                Ok(())
            }
            TransportEvent::Failed { kind, response, .. } => {
                Err(self.on_failure(stage, kind, response))
            }
            TransportEvent::TlsFailed { details, .. } => {
                for d in &details {
                    self.debug(format!("TLS error ({stage}): {d}"));
                }
                Err(ConvertError::TlsFailed { stage, details })
            }
            TransportEvent::Completed { response, .. } => self.on_completed(stage, response),
        };
        if let Err(e) = result {
            self.fail(e);
        }
    }

    // ── Stage entry ──────────────────────────────────────────────────────

    fn enter(&mut self, resume: Resume) -> Result<(), ConvertError> {
        use ConversionStatus::*;

        let allowed: &[ConversionStatus] = match resume {
            Resume::Upload | Resume::UploadAndConvert => &[Idle, RefreshingToken],
            Resume::Split => &[Uploading, RefreshingToken],
            Resume::Download => &[ConvertingRemote, RefreshingToken],
        };
        self.expect_status(stage_of(resume), allowed)?;

        let token = match self.tokens.cached() {
            Some(credential) => credential.as_str().to_string(),
            None => return self.refresh_token(resume),
        };
        if let Some(job) = self.job.as_mut() {
            job.resume_after_token = None;
        }

        match resume {
            Resume::Upload => self.begin_upload(&token),
            Resume::Split => self.begin_split(&token),
            Resume::Download => self.begin_download(&token),
            Resume::UploadAndConvert => self.begin_single_shot(&token),
        }
    }

    fn refresh_token(&mut self, resume: Resume) -> Result<(), ConvertError> {
        let job = self.job.as_mut().ok_or_else(no_job)?;
        job.resume_after_token = Some(resume);
        let id = job.id;

        let request = TokenManager::request(&self.config)?;
        self.set_status(ConversionStatus::RefreshingToken);
        let handle = self.dispatch(Stage::Token, id, request);
        self.debug(format!("Requesting bearer token before {resume} ({handle})"));
        Ok(())
    }

    fn begin_upload(&mut self, token: &str) -> Result<(), ConvertError> {
        let folder = Uuid::new_v4().to_string();
        let job = self.job.as_mut().ok_or_else(no_job)?;
        job.server_folder = folder.clone();
        job.server_file_name.clear();
        let request = wire::upload_request(&self.config, &job.source, &folder, token)?;
        let (id, size) = (job.id, job.source.size);

        self.set_status(ConversionStatus::Uploading);
        self.meter.enter(Band::UPLOAD);
        let handle = self.dispatch(Stage::Upload, id, request);
        self.debug(format!("Uploading {size} bytes into folder {folder} ({handle})"));
        Ok(())
    }

    fn begin_split(&mut self, token: &str) -> Result<(), ConvertError> {
        let job = self.job.as_ref().ok_or_else(no_job)?;
        if job.server_file_name.is_empty() {
            return Err(ConvertError::MissingJobField {
                stage: Stage::Split,
                detail: "the uploaded file name is not known yet".into(),
            });
        }
        let request =
            wire::split_request(&self.config, &job.server_file_name, &job.server_folder, token)?;
        let id = job.id;

        self.set_status(ConversionStatus::ConvertingRemote);
        self.meter.enter(Band::CONVERT);
        let handle = self.dispatch(Stage::Split, id, request);
        self.debug(format!("Split requested ({handle})"));
        self.arm_estimator();
        Ok(())
    }

    fn begin_download(&mut self, token: &str) -> Result<(), ConvertError> {
        let job = self.job.as_ref().ok_or_else(no_job)?;
        if job.download_queue.is_empty() {
            return Err(ConvertError::MissingJobField {
                stage: Stage::Split,
                detail: "download queue is empty".into(),
            });
        }
        let mut requests = Vec::with_capacity(job.download_queue.len());
        for (index, href) in job.download_queue.iter().enumerate() {
            let url = wire::resolve_locator(&self.config, href).map_err(|detail| {
                ConvertError::MalformedReply {
                    stage: Stage::Download { index },
                    detail,
                }
            })?;
            requests.push((index, wire::download_request(url, token)));
        }
        let id = job.id;

        self.estimator = None;
        self.set_status(ConversionStatus::Downloading);
        self.meter.enter(Band::DOWNLOAD);
        self.collector.reset(requests.len());
        self.report_fraction(0.0);
        self.debug(format!("Downloading {} slides", requests.len()));
        for (index, request) in requests {
            self.dispatch(Stage::Download { index }, id, request);
        }
        Ok(())
    }

    fn begin_single_shot(&mut self, token: &str) -> Result<(), ConvertError> {
        let job = self.job.as_ref().ok_or_else(no_job)?;
        let request = wire::convert_request(&self.config, &job.source, token)?;
        let (id, size) = (job.id, job.source.size);

        self.set_status(ConversionStatus::Uploading);
        self.meter.enter(Band::UPLOAD);
        let handle = self.dispatch(Stage::UploadAndConvert, id, request);
        self.debug(format!("Uploading {size} bytes for conversion ({handle})"));
        Ok(())
    }

    // ── Transport events ─────────────────────────────────────────────────

    fn on_unregistered(&mut self, event: TransportEvent) {
        let handle = event.handle();
        if !event.is_terminal() {
            debug!("Progress for unregistered request {handle}");
            return;
        }
        if self.status.accepts_start() {
            warn!("Reply for unregistered request {handle} while {}", self.status);
            self.debug(format!(
                "Ignoring reply for unregistered request {handle}: no job is running"
            ));
            return;
        }
        self.fail(ConvertError::UnknownHandle { handle });
    }

    /// Replies that arrive once the job has failed are only dumped.
    fn drain(&mut self, pending: PendingRequest, event: TransportEvent) {
        let response = match event {
            TransportEvent::Completed { response, .. } => Some(response),
            TransportEvent::Failed { response, .. } => response,
            TransportEvent::Progress { .. } | TransportEvent::TlsFailed { .. } => None,
        };
        if let Some(response) = response {
            self.debug(format!(
                "{} reply {} after failure (HTTP {}): {}",
                pending.stage,
                pending.handle,
                response.status,
                wire::body_preview(response.body())
            ));
        }
    }

    fn on_progress(
        &mut self,
        stage: Stage,
        direction: Direction,
        transferred: u64,
        total: Option<u64>,
    ) {
        let total_str = total.map_or_else(|| "?".to_string(), |t| t.to_string());
        match (stage, direction) {
            (Stage::Upload, Direction::Upload) => {
                self.debug(format!("Uploaded {transferred} of {total_str} bytes"));
                if let Some(f) = fraction(transferred, total) {
                    self.report_fraction(f);
                }
            }
            (Stage::UploadAndConvert, Direction::Upload) => {
                if self.status != ConversionStatus::Uploading {
                    return;
                }
                self.debug(format!("Uploaded {transferred} of {total_str} bytes"));
                if let Some(f) = fraction(transferred, total) {
                    self.report_fraction(f);
                }
                if total.is_some_and(|t| t > 0 && transferred >= t) {
                    self.set_status(ConversionStatus::ConvertingRemote);
                    self.meter.enter(Band::CONVERT);
                    self.arm_estimator();
                }
            }
            (Stage::UploadAndConvert, Direction::Download) => {
                if self.status != ConversionStatus::Downloading {
                    self.estimator = None;
                    self.set_status(ConversionStatus::Downloading);
                    self.meter.enter(Band::DOWNLOAD);
                }
                self.debug(format!("Received {transferred} of {total_str} bytes"));
                if let Some(f) = fraction(transferred, total) {
                    self.report_fraction(f);
                }
            }
            (Stage::Download { index }, Direction::Download) => {
                self.debug(format!(
                    "Slide {}: received {transferred} of {total_str} bytes",
                    index + 1
                ));
            }
            _ => {}
        }
    }

    fn on_failure(
        &mut self,
        stage: Stage,
        kind: TransportErrorKind,
        response: Option<HttpResponse>,
    ) -> ConvertError {
        if let Some(response) = &response {
            self.debug(format!(
                "{stage} failed with HTTP {}: {}",
                response.status,
                wire::body_preview(response.body())
            ));
            if let Some(msg) = serde_json::from_slice::<Value>(response.body())
                .ok()
                .as_ref()
                .and_then(wire::service_error)
            {
                self.debug(msg);
            }
        }
        if kind == TransportErrorKind::AuthenticationRequired {
            self.tokens.clear();
        }
        match stage {
            Stage::Token => ConvertError::AuthFailed {
                detail: kind.to_string(),
            },
            _ => ConvertError::TransportFailed { stage, kind },
        }
    }

    fn on_completed(&mut self, stage: Stage, response: HttpResponse) -> Result<(), ConvertError> {
        self.debug(format!(
            "{stage} reply (HTTP {}) headers:\n{}",
            response.status,
            wire::header_dump(&response)
        ));
        match stage {
            Stage::Token => self.on_token_reply(&response),
            Stage::Upload => self.on_upload_reply(&response),
            Stage::Split => self.on_split_reply(&response),
            Stage::Download { index } => self.on_slide_reply(index, &response),
            Stage::UploadAndConvert => self.on_archive_reply(&response),
        }
    }

    fn on_token_reply(&mut self, response: &HttpResponse) -> Result<(), ConvertError> {
        self.expect_status(Stage::Token, &[ConversionStatus::RefreshingToken])?;
        if let Err(e) = self.tokens.accept_reply(response) {
            self.debug(format!(
                "Token reply body: {}",
                wire::body_preview(response.body())
            ));
            return Err(e);
        }

        if !self.config.unattended {
            info!("Bearer token cached; waiting for the next step");
            return Ok(());
        }
        match self.job.as_mut().and_then(|j| j.resume_after_token.take()) {
            Some(resume) => {
                debug!("Resuming {resume} after token refresh");
                self.enter(resume)
            }
            None => {
                warn!("Bearer token arrived but no stage was waiting for it");
                Ok(())
            }
        }
    }

    fn on_upload_reply(&mut self, response: &HttpResponse) -> Result<(), ConvertError> {
        self.expect_status(Stage::Upload, &[ConversionStatus::Uploading])?;
        let body = self.reply_json(Stage::Upload, response)?;
        let stored = wire::parse_upload_reply(&body)?;

        let job = self.job.as_mut().ok_or_else(no_job)?;
        let original = job.source.name.clone();
        job.server_file_name = stored.clone();
        if stored != original {
            self.debug(format!("Service stored '{original}' as '{stored}'"));
        }
        self.report_fraction(1.0);
        info!("Upload complete: {stored}");

        if self.config.unattended {
            self.enter(Resume::Split)
        } else {
            Ok(())
        }
    }

    fn on_split_reply(&mut self, response: &HttpResponse) -> Result<(), ConvertError> {
        self.expect_status(Stage::Split, &[ConversionStatus::ConvertingRemote])?;
        self.estimator = None;
        let body = self.reply_json(Stage::Split, response)?;
        let manifest = wire::parse_split_reply(&body)?;
        for note in manifest.skipped {
            self.debug(note);
        }
        if manifest.hrefs.is_empty() {
            return Err(ConvertError::MissingJobField {
                stage: Stage::Split,
                detail: "download queue is empty".into(),
            });
        }

        let count = manifest.hrefs.len();
        self.job.as_mut().ok_or_else(no_job)?.download_queue = manifest.hrefs;
        self.report_fraction(1.0);
        info!("Split produced {count} slides");

        if self.config.unattended {
            self.enter(Resume::Download)
        } else {
            Ok(())
        }
    }

    fn on_slide_reply(&mut self, index: usize, response: &HttpResponse) -> Result<(), ConvertError> {
        let stage = Stage::Download { index };
        self.expect_status(stage, &[ConversionStatus::Downloading])?;

        let job = self.job.as_ref().ok_or_else(no_job)?;
        let href = job
            .download_queue
            .get(index)
            .ok_or_else(|| ConvertError::MissingJobField {
                stage,
                detail: format!("no locator queued at position {index}"),
            })?;
        let locator = wire::resolve_locator(&self.config, href)
            .map_err(|detail| ConvertError::MalformedReply { stage, detail })?;
        let name = wire::slide_file_name(response, &locator, index, &self.config.image_format);
        let produced = self.collector.produced();
        let unique = wire::dedupe_file_name(&name, |candidate| {
            produced.contains(&job.destination.join(candidate))
        });
        if unique != name {
            self.debug(format!("{stage}: '{name}' already written, saving as '{unique}'"));
        }
        let path = job.destination.join(unique);

        write_output(&path, response.body())?;
        self.debug(format!(
            "Saved {} ({} bytes)",
            path.display(),
            response.body().len()
        ));

        match self.collector.add(path) {
            Collected::Pending { received, expected } => {
                self.report_fraction(received as f32 / expected as f32);
            }
            Collected::Complete(files) => self.finish(files),
            Collected::Rejected => warn!("{stage} finished after the job was complete"),
        }
        Ok(())
    }

    fn on_archive_reply(&mut self, response: &HttpResponse) -> Result<(), ConvertError> {
        use ConversionStatus::*;
        self.expect_status(
            Stage::UploadAndConvert,
            &[Uploading, ConvertingRemote, Downloading],
        )?;
        self.estimator = None;
        if self.status != Downloading {
            self.set_status(Downloading);
            self.meter.enter(Band::DOWNLOAD);
        }

        let job = self.job.as_ref().ok_or_else(no_job)?;
        let name = wire::archive_file_name(response, &self.config.default_archive_name);
        let path = job.destination.join(name);
        write_output(&path, response.body())?;
        self.debug(format!(
            "Saved {} ({} bytes)",
            path.display(),
            response.body().len()
        ));

        self.collector.reset(1);
        if let Collected::Complete(files) = self.collector.add(path) {
            self.finish(files);
        }
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn dispatch(&mut self, stage: Stage, job: JobId, request: HttpRequest) -> RequestHandle {
        debug!("{} {} ({stage})", request.method, request.url);
        let handle = self.transport.dispatch(request);
        self.registry.register(handle, stage, job);
        handle
    }

    fn expect_status(
        &self,
        stage: Stage,
        allowed: &[ConversionStatus],
    ) -> Result<(), ConvertError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(ConvertError::WrongStage {
                stage,
                status: self.status.to_string(),
            })
        }
    }

    /// Parse a JSON reply, dumping the body to diagnostics when it is not
    /// JSON and surfacing any service `error` object.
    fn reply_json(&mut self, stage: Stage, response: &HttpResponse) -> Result<Value, ConvertError> {
        match wire::json_body(response) {
            Ok(body) => {
                if let Some(msg) = wire::service_error(&body) {
                    self.debug(msg);
                }
                Ok(body)
            }
            Err(detail) => {
                self.debug(format!(
                    "{stage} reply body: {}",
                    wire::body_preview(response.body())
                ));
                Err(ConvertError::MalformedReply { stage, detail })
            }
        }
    }

    fn arm_estimator(&mut self) {
        self.estimator = Some(ProgressEstimator::new(
            Band::CONVERT,
            self.config.expected_conversion(),
            self.config.estimate_period(),
        ));
        self.estimate_epoch += 1;
    }

    fn finish(&mut self, files: Vec<PathBuf>) {
        self.estimator = None;
        if let Some(job) = self.job.as_mut() {
            job.download_queue.clear();
        }
        self.emit(ConverterEvent::Progress(1.0));
        self.set_status(ConversionStatus::Done);
        info!("Conversion finished: {} file(s)", files.len());
        self.emit(ConverterEvent::Done(files));
    }

    fn fail(&mut self, err: ConvertError) -> ConvertError {
        self.estimator = None;
        error!("{err}");
        self.set_status(ConversionStatus::Failed);
        self.emit(ConverterEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        });
        err
    }

    fn set_status(&mut self, status: ConversionStatus) {
        if self.status != status {
            info!("Status {} → {status}", self.status);
            self.status = status;
            self.emit(ConverterEvent::StatusChanged(status));
        }
    }

    fn report_fraction(&mut self, f: f32) {
        if let Some(v) = self.meter.fraction(f) {
            self.emit(ConverterEvent::Progress(v));
        }
    }

    fn report_value(&mut self, v: f32) {
        if let Some(v) = self.meter.value(v) {
            self.emit(ConverterEvent::Progress(v));
        }
    }

    fn debug(&self, message: String) {
        debug!("{message}");
        self.emit(ConverterEvent::Debug(message));
    }

    fn emit(&self, event: ConverterEvent) {
        // Nobody listening is fine; the job still runs to completion.
        let _ = self.events.send(event);
    }
}

fn stage_of(resume: Resume) -> Stage {
    match resume {
        Resume::Upload => Stage::Upload,
        Resume::Split => Stage::Split,
        Resume::Download => Stage::Download { index: 0 },
        Resume::UploadAndConvert => Stage::UploadAndConvert,
    }
}

fn no_job() -> ConvertError {
    ConvertError::Internal("no active job".into())
}

fn write_output(path: &Path, data: &[u8]) -> Result<(), ConvertError> {
    std::fs::write(path, data).map_err(|e| ConvertError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    })
}
