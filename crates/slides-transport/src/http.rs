//! reqwest-backed [`Transport`].
//!
//! Every dispatch becomes one tokio task. The task streams the request body
//! in fixed-size chunks so upload progress can be reported as hyper pulls
//! them, then drains the response body chunk by chunk for download progress,
//! and finally sends exactly one terminal event.

use crate::error::{error_chain, is_tls_failure};
use crate::{
    Direction, HttpRequest, HttpResponse, RequestBody, RequestHandle, Transport,
    TransportErrorKind, TransportEvent, TransportSink,
};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Whole-request timeout. `None` waits for as long as the server does.
    pub request_timeout: Option<Duration>,
    pub user_agent: String,
    /// Upload chunk size; one progress event is reported per chunk.
    pub upload_chunk_size: usize,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(300)),
            user_agent: concat!("slides-transport/", env!("CARGO_PKG_VERSION")).to_string(),
            upload_chunk_size: 64 * 1024,
        }
    }
}

/// Fire-and-forget HTTP transport built on a shared [`reqwest::Client`].
///
/// [`Transport::dispatch`] spawns onto the current tokio runtime, so it must
/// be called from within one.
pub struct HttpTransport {
    client: reqwest::Client,
    sink: TransportSink,
    next_handle: AtomicU64,
    chunk_size: usize,
}

impl HttpTransport {
    pub fn new(sink: TransportSink) -> Result<Self, reqwest::Error> {
        Self::with_config(sink, HttpTransportConfig::default())
    }

    pub fn with_config(
        sink: TransportSink,
        config: HttpTransportConfig,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            sink,
            next_handle: AtomicU64::new(0),
            chunk_size: config.upload_chunk_size.max(1),
        })
    }
}

impl Transport for HttpTransport {
    fn dispatch(&self, request: HttpRequest) -> RequestHandle {
        let handle = RequestHandle::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        debug!("dispatch {} {} {}", handle, request.method, request.url);

        let client = self.client.clone();
        let sink = self.sink.clone();
        let chunk_size = self.chunk_size;
        tokio::spawn(async move {
            let event = execute(&client, handle, request, &sink, chunk_size).await;
            if sink.send(event).is_err() {
                warn!("request {} finished after its receiver was dropped", handle);
            }
        });

        handle
    }
}

/// Run one request to completion and produce its terminal event.
async fn execute(
    client: &reqwest::Client,
    handle: RequestHandle,
    request: HttpRequest,
    sink: &TransportSink,
    chunk_size: usize,
) -> TransportEvent {
    let builder = match build_request(client, handle, request, sink, chunk_size) {
        Ok(b) => b,
        Err(e) => return classify_error(handle, &e),
    };

    let response = match builder.send().await {
        Ok(r) => r,
        Err(e) => return classify_error(handle, &e),
    };

    let status = response.status().as_u16();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )
        })
        .collect();
    let total = response.content_length();

    let mut body = Vec::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);
    let mut received = 0u64;
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(c) => {
                received += c.len() as u64;
                body.extend_from_slice(&c);
                let _ = sink.send(TransportEvent::Progress {
                    handle,
                    direction: Direction::Download,
                    transferred: received,
                    total,
                });
            }
            Err(e) => return classify_error(handle, &e),
        }
    }

    let response = HttpResponse::from_parts(status, headers, Bytes::from(body));
    match TransportErrorKind::from_status(status) {
        Some(kind) => TransportEvent::Failed {
            handle,
            kind,
            response: Some(response),
        },
        None => TransportEvent::Completed { handle, response },
    }
}

fn build_request(
    client: &reqwest::Client,
    handle: RequestHandle,
    request: HttpRequest,
    sink: &TransportSink,
    chunk_size: usize,
) -> Result<reqwest::RequestBuilder, reqwest::Error> {
    let total = request.body.tracked_len();
    let sent = Arc::new(AtomicU64::new(0));

    let mut builder = client.request(request.method, request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let builder = match request.body {
        RequestBody::Empty => builder,
        RequestBody::Bytes { data, content_type } => {
            let len = data.len();
            let stream = progress_stream(handle, data, chunk_size, sent, total, sink.clone());
            builder
                .header(CONTENT_TYPE, content_type)
                .header(CONTENT_LENGTH, len)
                .body(reqwest::Body::wrap_stream(stream))
        }
        RequestBody::Form(pairs) => builder.form(&pairs),
        RequestBody::Multipart(parts) => {
            let mut form = Form::new();
            for part in parts {
                let len = part.data.len() as u64;
                let stream = progress_stream(
                    handle,
                    part.data,
                    chunk_size,
                    Arc::clone(&sent),
                    total,
                    sink.clone(),
                );
                let mut p = Part::stream_with_length(reqwest::Body::wrap_stream(stream), len)
                    .mime_str(&part.content_type)?;
                if let Some(file_name) = part.file_name {
                    p = p.file_name(file_name);
                }
                form = form.part(part.name, p);
            }
            builder.multipart(form)
        }
    };

    Ok(builder)
}

/// Yield `data` in chunks, reporting cumulative upload progress as each
/// chunk is pulled by the connection.
fn progress_stream(
    handle: RequestHandle,
    data: Bytes,
    chunk_size: usize,
    sent: Arc<AtomicU64>,
    total: u64,
    sink: TransportSink,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(chunk_size.max(1))
        .map(|start| data.slice(start..(start + chunk_size).min(data.len())))
        .collect();

    stream::iter(chunks).map(move |chunk| {
        let n = chunk.len() as u64;
        let transferred = sent.fetch_add(n, Ordering::Relaxed) + n;
        let _ = sink.send(TransportEvent::Progress {
            handle,
            direction: Direction::Upload,
            transferred,
            total: Some(total),
        });
        Ok(chunk)
    })
}

fn classify_error(handle: RequestHandle, err: &reqwest::Error) -> TransportEvent {
    if is_tls_failure(err) {
        return TransportEvent::TlsFailed {
            handle,
            details: vec![error_chain(err)],
        };
    }
    let kind = TransportErrorKind::from_reqwest(err);
    debug!("request {} failed ({}): {}", handle, kind, error_chain(err));
    TransportEvent::Failed {
        handle,
        kind,
        response: None,
    }
}
