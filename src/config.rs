//! Configuration for a conversion.
//!
//! Everything the orchestrator needs to know about the remote service and
//! about its own pacing lives in [`ConverterConfig`], built via
//! [`ConverterConfigBuilder`]. Defaults target the public Aspose Slides cloud
//! API and render 1920×1080 PNGs.

use crate::error::ConvertError;
use crate::job::MAX_SOURCE_BYTES;
use serde::{Deserialize, Serialize};
use slides_transport::Url;
use std::fmt;
use std::time::Duration;

/// Default service root.
pub const DEFAULT_API_BASE: &str = "https://api.aspose.cloud";

/// Which remote workflow to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConversionMode {
    /// Upload to storage, split into per-slide images, download each one.
    #[default]
    SplitPages,
    /// One multipart request uploads and converts; the reply is the archive.
    SingleShot,
}

impl fmt::Display for ConversionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionMode::SplitPages => f.write_str("split"),
            ConversionMode::SingleShot => f.write_str("single-shot"),
        }
    }
}

/// Configuration for a [`crate::Converter`] or [`crate::Orchestrator`].
///
/// # Example
/// ```rust
/// use slides2png::{ConversionMode, ConverterConfig};
///
/// let config = ConverterConfig::builder()
///     .client_id("my-client")
///     .client_secret("my-secret")
///     .mode(ConversionMode::SingleShot)
///     .size(1280, 720)
///     .build()
///     .unwrap();
/// assert_eq!(config.width, 1280);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Service root, e.g. `https://api.aspose.cloud`. Default: [`DEFAULT_API_BASE`].
    pub api_base: String,

    /// OAuth client identifier used for the client-credentials exchange.
    pub client_id: String,

    /// OAuth client secret. Never printed by `Debug`.
    pub client_secret: String,

    /// Which workflow `start` runs. Default: [`ConversionMode::SplitPages`].
    pub mode: ConversionMode,

    /// Target slide width in pixels. Default: 1920.
    pub width: u32,

    /// Target slide height in pixels. Default: 1080.
    pub height: u32,

    /// Output format for the split stage. Default: `png`.
    pub image_format: String,

    /// Server-side folder holding custom fonts. Default: `fonts`.
    pub fonts_folder: String,

    /// Largest source accepted, in bytes. Default: 35 MiB (service limit).
    pub max_source_bytes: u64,

    /// Assumed duration of the remote conversion, used to extrapolate
    /// progress while it runs. Default: 15.
    pub expected_conversion_secs: u64,

    /// Interval between estimate ticks in milliseconds. Default: 500.
    pub estimate_tick_ms: u64,

    /// Advance to the next stage automatically. Default: true.
    ///
    /// When false, each stage (including the one interrupted by a token
    /// refresh) must be entered explicitly with [`crate::Converter::step`].
    pub unattended: bool,

    /// Whole-request timeout passed to the HTTP transport. Default: 300.
    pub request_timeout_secs: u64,

    /// File name used when a single-shot reply carries no filename. Default: `result.zip`.
    pub default_archive_name: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            mode: ConversionMode::default(),
            width: 1920,
            height: 1080,
            image_format: "png".to_string(),
            fonts_folder: "fonts".to_string(),
            max_source_bytes: MAX_SOURCE_BYTES,
            expected_conversion_secs: 15,
            estimate_tick_ms: 500,
            unattended: true,
            request_timeout_secs: 300,
            default_archive_name: "result.zip".to_string(),
        }
    }
}

impl fmt::Debug for ConverterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterConfig")
            .field("api_base", &self.api_base)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &if self.client_secret.is_empty() { "" } else { "<redacted>" },
            )
            .field("mode", &self.mode)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("image_format", &self.image_format)
            .field("fonts_folder", &self.fonts_folder)
            .field("max_source_bytes", &self.max_source_bytes)
            .field("expected_conversion_secs", &self.expected_conversion_secs)
            .field("estimate_tick_ms", &self.estimate_tick_ms)
            .field("unattended", &self.unattended)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("default_archive_name", &self.default_archive_name)
            .finish()
    }
}

impl ConverterConfig {
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }

    /// Parsed [`Self::api_base`].
    pub fn api_base_url(&self) -> Result<Url, ConvertError> {
        let url = Url::parse(&self.api_base).map_err(|e| {
            ConvertError::InvalidConfig(format!("api_base '{}' is not a URL: {e}", self.api_base))
        })?;
        if url.cannot_be_a_base() {
            return Err(ConvertError::InvalidConfig(format!(
                "api_base '{}' cannot be used as a base URL",
                self.api_base
            )));
        }
        Ok(url)
    }

    pub fn estimate_period(&self) -> Duration {
        Duration::from_millis(self.estimate_tick_ms)
    }

    pub fn expected_conversion(&self) -> Duration {
        Duration::from_secs(self.expected_conversion_secs)
    }
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api_base = base.into();
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.config.client_id = id.into();
        self
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.client_secret = secret.into();
        self
    }

    pub fn mode(mut self, mode: ConversionMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Target slide size in pixels.
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.config.width = width;
        self.config.height = height;
        self
    }

    pub fn image_format(mut self, format: impl Into<String>) -> Self {
        self.config.image_format = format.into();
        self
    }

    pub fn fonts_folder(mut self, folder: impl Into<String>) -> Self {
        self.config.fonts_folder = folder.into();
        self
    }

    pub fn max_source_bytes(mut self, bytes: u64) -> Self {
        self.config.max_source_bytes = bytes;
        self
    }

    pub fn expected_conversion_secs(mut self, secs: u64) -> Self {
        self.config.expected_conversion_secs = secs;
        self
    }

    pub fn estimate_tick_ms(mut self, ms: u64) -> Self {
        self.config.estimate_tick_ms = ms;
        self
    }

    pub fn unattended(mut self, v: bool) -> Self {
        self.config.unattended = v;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn default_archive_name(mut self, name: impl Into<String>) -> Self {
        self.config.default_archive_name = name.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, ConvertError> {
        let c = &self.config;
        c.api_base_url()?;
        if c.width == 0 || c.height == 0 {
            return Err(ConvertError::InvalidConfig(format!(
                "Slide size must be non-zero, got {}x{}",
                c.width, c.height
            )));
        }
        if c.max_source_bytes == 0 {
            return Err(ConvertError::InvalidConfig(
                "max_source_bytes must be ≥ 1".into(),
            ));
        }
        if c.estimate_tick_ms == 0 {
            return Err(ConvertError::InvalidConfig(
                "estimate_tick_ms must be ≥ 1".into(),
            ));
        }
        if c.default_archive_name.trim().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "default_archive_name must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
