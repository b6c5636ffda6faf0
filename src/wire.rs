//! Wire contract with the slides cloud service.
//!
//! Request builders for each stage, reply-shape validation, and output file
//! naming. Nothing in here dispatches or mutates job state.

use crate::config::ConverterConfig;
use crate::error::ConvertError;
use crate::job::SourceFile;
use crate::registry::Stage;
use serde_json::{json, Value};
use slides_transport::{FormPart, HttpRequest, HttpResponse, RequestBody, Url};
use tracing::debug;

const JSON: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

// ── URLs ─────────────────────────────────────────────────────────────────

/// `{api_base}/{segments...}`, each segment percent-encoded.
pub fn endpoint(config: &ConverterConfig, segments: &[&str]) -> Result<Url, ConvertError> {
    let mut url = config.api_base_url()?;
    url.path_segments_mut()
        .map_err(|_| ConvertError::InvalidConfig(format!("api_base '{}' has no path", config.api_base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Resolve a locator from a split reply. Absolute URLs are used as-is.
/// Anything else, including root-relative paths, lands under `api_base`
/// with its path prefix kept, as [`endpoint`] does.
pub fn resolve_locator(config: &ConverterConfig, href: &str) -> Result<Url, String> {
    if let Ok(url) = Url::parse(href) {
        return Ok(url);
    }
    let mut base = config.api_base_url().map_err(|e| e.to_string())?;
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(href.trim_start_matches('/'))
        .map_err(|e| format!("'{href}' is not a valid locator: {e}"))
}

// ── Requests ─────────────────────────────────────────────────────────────

/// `PUT /v3.0/slides/storage/file/{folder}/{name}` with the raw document.
pub fn upload_request(
    config: &ConverterConfig,
    source: &SourceFile,
    folder: &str,
    token: &str,
) -> Result<HttpRequest, ConvertError> {
    let url = endpoint(
        config,
        &["v3.0", "slides", "storage", "file", folder, &source.name],
    )?;
    Ok(HttpRequest::put(url)
        .header("Accept", JSON)
        .bearer(token)
        .body(RequestBody::Bytes {
            data: source.bytes.clone(),
            content_type: OCTET_STREAM.to_string(),
        }))
}

/// `POST /v3.0/slides/{name}/split?...` rendering every slide into
/// `{folder}/split`.
pub fn split_request(
    config: &ConverterConfig,
    file_name: &str,
    folder: &str,
    token: &str,
) -> Result<HttpRequest, ConvertError> {
    let mut url = endpoint(config, &["v3.0", "slides", file_name, "split"])?;
    url.query_pairs_mut()
        .append_pair("folder", folder)
        .append_pair("format", &config.image_format)
        .append_pair("width", &config.width.to_string())
        .append_pair("height", &config.height.to_string())
        .append_pair("destFolder", &format!("{folder}/split"))
        .append_pair("fontsFolder", &config.fonts_folder);
    Ok(HttpRequest::post(url).header("Accept", JSON).bearer(token))
}

/// `GET {href}` for one rendered slide.
pub fn download_request(url: Url, token: &str) -> HttpRequest {
    HttpRequest::get(url).bearer(token)
}

/// `POST /v3.0/slides/convert/{Format}` carrying the options and the
/// document as multipart parts `data` and `file0`.
pub fn convert_request(
    config: &ConverterConfig,
    source: &SourceFile,
    token: &str,
) -> Result<HttpRequest, ConvertError> {
    let format = service_format_name(&config.image_format);
    let mut url = endpoint(config, &["v3.0", "slides", "convert", &format])?;
    url.query_pairs_mut()
        .append_pair("fontsFolder", &config.fonts_folder);

    let options = json!({ "Height": config.height, "Width": config.width });
    Ok(HttpRequest::post(url).bearer(token).body(RequestBody::Multipart(vec![
        FormPart::json("data", &options),
        FormPart::file("file0", source.name.clone(), source.bytes.clone()),
    ])))
}

/// `png` → `Png`, as the convert endpoint spells its formats.
fn service_format_name(format: &str) -> String {
    let mut chars = format.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

// ── Replies ──────────────────────────────────────────────────────────────

/// Parse a reply body as JSON. Only bodies labelled `application/json` are
/// parsed.
pub fn json_body(response: &HttpResponse) -> Result<Value, String> {
    let content_type = response.content_type().unwrap_or("");
    if !content_type.to_ascii_lowercase().contains(JSON) {
        return Err(format!(
            "reply is not JSON (Content-Type: '{content_type}', {} bytes)",
            response.body().len()
        ));
    }
    serde_json::from_slice(response.body()).map_err(|e| format!("reply is not valid JSON: {e}"))
}

/// The `error` object some replies carry, rendered for diagnostics.
pub fn service_error(body: &Value) -> Option<String> {
    let error = body.get("error")?.as_object()?;
    let code = error.get("code")?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("no message");
    Some(format!("Service error {code}: {message}"))
}

/// Name under which the service stored the upload: `uploaded` must be an
/// array holding exactly one string.
pub fn parse_upload_reply(body: &Value) -> Result<String, ConvertError> {
    let malformed = |detail: String| ConvertError::MalformedReply {
        stage: Stage::Upload,
        detail,
    };
    let uploaded = body
        .get("uploaded")
        .ok_or_else(|| malformed("no 'uploaded' field".into()))?
        .as_array()
        .ok_or_else(|| malformed("'uploaded' is not an array".into()))?;
    match uploaded.as_slice() {
        [Value::String(name)] if !name.is_empty() => Ok(name.clone()),
        [_] => Err(malformed("'uploaded' entry is not a file name".into())),
        other => Err(malformed(format!(
            "'uploaded' must list exactly one file, got {}",
            other.len()
        ))),
    }
}

/// Locators listed by a split reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitManifest {
    /// Download locators, in slide order.
    pub hrefs: Vec<String>,
    /// One note per skipped entry.
    pub skipped: Vec<String>,
}

/// `slides` must be an array; entries that are not objects with a string
/// `href` are skipped.
pub fn parse_split_reply(body: &Value) -> Result<SplitManifest, ConvertError> {
    let slides = body
        .get("slides")
        .and_then(Value::as_array)
        .ok_or_else(|| ConvertError::MalformedReply {
            stage: Stage::Split,
            detail: "'slides' is missing or not an array".into(),
        })?;

    let mut manifest = SplitManifest::default();
    for (i, entry) in slides.iter().enumerate() {
        match entry.get("href").and_then(Value::as_str) {
            Some(href) if entry.is_object() && !href.is_empty() => {
                manifest.hrefs.push(href.to_string())
            }
            _ => manifest
                .skipped
                .push(format!("Skipping slides[{i}] without href: {entry}")),
        }
    }
    debug!(
        "Split manifest: {} locators, {} skipped",
        manifest.hrefs.len(),
        manifest.skipped.len()
    );
    Ok(manifest)
}

// ── File names ───────────────────────────────────────────────────────────

/// Extract the `filename=` parameter of a `Content-Disposition` header.
///
/// The header is split on `;` and each trimmed segment is matched against
/// the `filename=` prefix. The value is unquoted and reduced to its final
/// path component.
pub fn content_disposition_filename(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|segment| {
            let (key, value) = segment.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("filename")
                .then(|| value.trim())
        })
        .and_then(sanitize_file_name)
}

/// Reduce `raw` to a bare file name safe to join onto the destination.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let unquoted = raw.trim().trim_matches('"').trim_matches('\'');
    let name = unquoted
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(unquoted)
        .trim();
    match name {
        "" | "." | ".." => None,
        n => Some(n.to_string()),
    }
}

/// Output name for slide `index` (0-based): `Content-Disposition`, else the
/// locator's last path segment when it has an extension, else
/// `slide-{n}.{format}`.
pub fn slide_file_name(response: &HttpResponse, locator: &Url, index: usize, format: &str) -> String {
    response
        .header("content-disposition")
        .and_then(content_disposition_filename)
        .or_else(|| {
            locator
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|last| last.contains('.'))
                .and_then(sanitize_file_name)
        })
        .unwrap_or_else(|| format!("slide-{}.{format}", index + 1))
}

/// Output name for a single-shot archive: `Content-Disposition`, else
/// `fallback`.
pub fn archive_file_name(response: &HttpResponse, fallback: &str) -> String {
    response
        .header("content-disposition")
        .and_then(content_disposition_filename)
        .unwrap_or_else(|| fallback.to_string())
}

/// `name` if `taken` rejects it, else `{stem}-{n}.{ext}` with the smallest
/// free `n` from 2 up.
pub fn dedupe_file_name(name: &str, mut taken: impl FnMut(&str) -> bool) -> String {
    if !taken(name) {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    (2u64..)
        .map(|n| match ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        })
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// A printable rendering of a reply body for the diagnostic channel.
pub fn body_preview(body: &[u8]) -> String {
    const MAX_CHARS: usize = 4096;
    match std::str::from_utf8(body) {
        Ok(text) if text.chars().count() > MAX_CHARS => {
            let head: String = text.chars().take(MAX_CHARS).collect();
            format!("{head}… ({} bytes total)", body.len())
        }
        Ok(text) => text.to_string(),
        Err(_) => format!("<{} bytes of binary data>", body.len()),
    }
}

/// All response headers as `name: value` lines.
pub fn header_dump(response: &HttpResponse) -> String {
    response
        .header_pairs()
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}
