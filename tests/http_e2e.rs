//! End-to-end tests over the real HTTP transport.
//!
//! A wiremock server stands in for the conversion service, so the whole
//! path (token exchange, upload, split, downloads, single-shot archive) runs
//! through reqwest without touching the network.

use futures::StreamExt;
use serde_json::json;
use slides2png::{
    convert, convert_from_bytes, convert_observed, observe, ConversionMode, ConversionObserver,
    ConversionStatus, ConvertError, Converter, ConverterConfig, ConverterEvent, ErrorKind,
    EventStream, NoopObserver, Resume,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{body_string_contains, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

fn config(server: &MockServer) -> ConverterConfig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    ConverterConfig::builder()
        .api_base(server.uri())
        .client_id("e2e-client")
        .client_secret("e2e-secret")
        .expected_conversion_secs(1)
        .estimate_tick_ms(20)
        .request_timeout_secs(10)
        .build()
        .unwrap()
}

fn write_deck(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, vec![0x50u8; 200 * 1024]).unwrap();
    path
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=e2e-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-e2e",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

/// Token, upload and a three-slide split whose locators point back at the
/// mock server.
async fn mount_split_service(server: &MockServer) {
    mount_token(server).await;

    Mock::given(method("PUT"))
        .and(path_regex(r"^/v3\.0/slides/storage/file/[0-9a-f-]{36}/deck\.pptx$"))
        .and(header("authorization", "Bearer tok-e2e"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploaded": ["deck.pptx"],
            "errors": []
        })))
        .mount(server)
        .await;

    let slides: Vec<_> = (1..=3)
        .map(|n| json!({ "href": format!("{}/files/slide_{n}.png", server.uri()) }))
        .collect();
    Mock::given(method("POST"))
        .and(path("/v3.0/slides/deck.pptx/split"))
        .and(query_param("format", "png"))
        .and(query_param("width", "1920"))
        .and(query_param("height", "1080"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "slides": slides })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/files/slide_\d\.png$"))
        .and(header("authorization", "Bearer tok-e2e"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "image/png")
                .set_body_bytes(PNG.to_vec()),
        )
        .mount(server)
        .await;
}

async fn mount_single_shot_service(server: &MockServer) {
    mount_token(server).await;
    Mock::given(method("POST"))
        .and(path("/v3.0/slides/convert/Png"))
        .and(query_param("fontsFolder", "fonts"))
        .and(body_string_contains(r#"name="file0""#))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/zip")
                .insert_header("Content-Disposition", "attachment; filename=\"deck.zip\"")
                .set_body_bytes(b"PK\x03\x04archive".to_vec()),
        )
        .mount(server)
        .await;
}

/// Wait for a diagnostic event containing `needle`.
async fn wait_for_debug(events: &mut EventStream, needle: &str) {
    let found = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = events.next().await {
            if matches!(&event, ConverterEvent::Debug(m) if m.contains(needle)) {
                return true;
            }
        }
        false
    })
    .await;
    assert!(matches!(found, Ok(true)), "no debug event containing {needle:?}");
}

#[derive(Default)]
struct Recorder {
    progress: Mutex<Vec<f32>>,
    statuses: Mutex<Vec<ConversionStatus>>,
}

impl ConversionObserver for Recorder {
    fn on_progress(&self, value: f32) {
        self.progress.lock().unwrap().push(value);
    }

    fn on_status_changed(&self, status: ConversionStatus) {
        self.statuses.lock().unwrap().push(status);
    }
}

// ── Split workflow ───────────────────────────────────────────────────────

#[tokio::test]
async fn split_workflow_writes_every_slide() {
    let server = MockServer::start().await;
    mount_split_service(&server).await;
    let dir = TempDir::new().unwrap();
    let deck = write_deck(&dir, "deck.pptx");
    let dest = dir.path().join("slides");

    let recorder = Recorder::default();
    let output = assert_ok!(convert_observed(&deck, &dest, &config(&server), &recorder).await);

    assert_eq!(output.mode, ConversionMode::SplitPages);
    assert_eq!(output.files.len(), 3);
    for n in 1..=3 {
        let file = dest.join(format!("slide_{n}.png"));
        assert_eq!(std::fs::read(&file).unwrap(), PNG, "{}", file.display());
    }

    let progress = recorder.progress.lock().unwrap().clone();
    assert_eq!(progress.last().copied(), Some(1.0));
    for pair in progress.windows(2) {
        assert!(pair[0] <= pair[1], "progress went backwards: {progress:?}");
    }
    assert_eq!(
        recorder.statuses.lock().unwrap().as_slice(),
        [
            ConversionStatus::RefreshingToken,
            ConversionStatus::Uploading,
            ConversionStatus::ConvertingRemote,
            ConversionStatus::Downloading,
            ConversionStatus::Done,
        ]
    );

    // One token, one upload, one split, three downloads.
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 6);
}

#[tokio::test]
async fn manual_steps_drive_the_same_workflow() {
    let server = MockServer::start().await;
    mount_split_service(&server).await;
    let dir = TempDir::new().unwrap();
    let deck = write_deck(&dir, "deck.pptx");
    let dest = dir.path().join("slides");

    let mut cfg = config(&server);
    cfg.unattended = false;
    let (converter, mut events) = Converter::spawn(cfg).unwrap();

    assert_ok!(converter.start(&deck, &dest).await);
    wait_for_debug(&mut events, "Bearer token reply (HTTP 200)").await;
    assert_eq!(
        converter.status().await.unwrap(),
        ConversionStatus::RefreshingToken
    );

    assert_ok!(converter.step(Resume::Upload).await);
    wait_for_debug(&mut events, "Upload reply (HTTP 200)").await;
    assert_eq!(converter.status().await.unwrap(), ConversionStatus::Uploading);

    assert_ok!(converter.step(Resume::Split).await);
    wait_for_debug(&mut events, "Split/Convert reply (HTTP 200)").await;

    assert_ok!(converter.step(Resume::Download).await);
    let files = assert_ok!(observe(&mut events, &NoopObserver).await);
    assert_eq!(files.len(), 3);
}

// ── Single-shot workflow ─────────────────────────────────────────────────

#[tokio::test]
async fn single_shot_saves_the_archive() {
    let server = MockServer::start().await;
    mount_single_shot_service(&server).await;
    let dir = TempDir::new().unwrap();
    let deck = write_deck(&dir, "deck.pptx");
    let dest = dir.path().join("out");

    let mut cfg = config(&server);
    cfg.mode = ConversionMode::SingleShot;
    let output = assert_ok!(convert(&deck, &dest, &cfg).await);

    assert_eq!(output.files, vec![dest.join("deck.zip")]);
    assert_eq!(
        std::fs::read(dest.join("deck.zip")).unwrap(),
        b"PK\x03\x04archive"
    );
}

#[tokio::test]
async fn in_memory_source_is_converted() {
    let server = MockServer::start().await;
    mount_single_shot_service(&server).await;
    let dir = TempDir::new().unwrap();

    let mut cfg = config(&server);
    cfg.mode = ConversionMode::SingleShot;
    let output =
        assert_ok!(convert_from_bytes(b"not really a deck", "../talk.pptx", dir.path(), &cfg).await);
    assert_eq!(output.files.len(), 1);
    assert!(output.files[0].starts_with(dir.path()));

    let received = server.received_requests().await.unwrap();
    let upload = String::from_utf8_lossy(&received[1].body).into_owned();
    assert!(upload.contains(r#"filename="talk.pptx""#), "{upload}");
}

// ── Failures ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn rejected_credentials_fail_as_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_client"})),
        )
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let deck = write_deck(&dir, "deck.pptx");

    let err = assert_err!(convert(&deck, dir.path(), &config(&server)).await);
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert!(matches!(err, ConvertError::JobFailed { .. }));

    // Nothing beyond the token request was attempted.
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_slide_fails_the_job() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uploaded": ["deck.pptx"]})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v3.0/slides/deck.pptx/split"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "slides": [{"href": format!("{}/files/gone.png", server.uri())}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such slide"))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let deck = write_deck(&dir, "deck.pptx");

    let err = assert_err!(convert(&deck, dir.path().join("out"), &config(&server)).await);
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(err.to_string().contains("Content not found"), "{err}");
}

#[tokio::test]
async fn second_start_is_refused_while_busy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "tok-e2e"}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let deck = write_deck(&dir, "deck.pptx");

    let (converter, _events) = Converter::spawn(config(&server)).unwrap();
    assert_ok!(converter.start(&deck, dir.path()).await);
    let err = assert_err!(converter.start(&deck, dir.path()).await);
    assert!(matches!(err, ConvertError::AlreadyRunning { .. }));
    assert_eq!(
        converter.status().await.unwrap(),
        ConversionStatus::RefreshingToken
    );
}

#[tokio::test]
async fn invalid_source_is_reported_without_network() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let empty = dir.path().join("empty.pptx");
    std::fs::write(&empty, b"").unwrap();

    let err = assert_err!(convert(&empty, dir.path(), &config(&server)).await);
    assert_eq!(err.kind(), ErrorKind::Validation);
    let missing = assert_err!(convert(Path::new("/no/such/deck.pptx"), dir.path(), &config(&server)).await);
    assert!(matches!(missing, ConvertError::FileNotFound { .. }));
    assert!(server.received_requests().await.unwrap().is_empty());
}
