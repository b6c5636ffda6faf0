//! CLI binary for slides2png.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConverterConfig` and prints the produced files.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use slides2png::{
    convert_observed, ConversionMode, ConversionObserver, ConversionStatus, ConverterConfig,
    NoopObserver,
};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

/// Progress in the bar is kept in thousandths.
const BAR_SCALE: f32 = 1000.0;

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Renders a single progress bar whose prefix follows the job status.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Self {
        let bar = ProgressBar::new(BAR_SCALE as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold:<12}  [{bar:42.green/238}] {percent:>3}%  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl ConversionObserver for CliObserver {
    fn on_progress(&self, value: f32) {
        self.bar.set_position((value.clamp(0.0, 1.0) * BAR_SCALE) as u64);
    }

    fn on_status_changed(&self, status: ConversionStatus) {
        let prefix = match status {
            ConversionStatus::Idle => "Preparing",
            ConversionStatus::RefreshingToken => "Signing in",
            ConversionStatus::Uploading => "Uploading",
            ConversionStatus::ConvertingRemote => "Converting",
            ConversionStatus::Downloading => "Downloading",
            ConversionStatus::Done => "Done",
            ConversionStatus::Failed => "Failed",
        };
        self.bar.set_prefix(prefix);
    }

    fn on_error(&self, message: &str) {
        self.bar.println(format!("  {} {}", red("✗"), red(message)));
    }

    fn on_done(&self, files: &[PathBuf]) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} file(s) written",
            green("✔"),
            bold(&files.len().to_string())
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Split a deck into one PNG per slide
  slides2png deck.pptx -o slides/

  # One request, one archive
  slides2png --mode single deck.pptx -o out/

  # Smaller slides
  slides2png --width 1280 --height 720 deck.pptx

  # JSON output (list of produced files)
  slides2png --json deck.pptx > result.json

ENVIRONMENT VARIABLES:
  SLIDES2PNG_CLIENT_ID      OAuth client id for the conversion service
  SLIDES2PNG_CLIENT_SECRET  OAuth client secret
  SLIDES2PNG_API_BASE       Service root (default https://api.aspose.cloud)
  RUST_LOG                  Override log filtering (e.g. slides2png=debug)
"#;

/// Convert presentations to PNG slides through a remote conversion service.
#[derive(Parser, Debug)]
#[command(
    name = "slides2png",
    version,
    about = "Convert presentations to PNG slides through a remote conversion service",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Presentation file (at most 35 MiB).
    input: PathBuf,

    /// Directory the slides are written to (created if missing).
    #[arg(short, long, env = "SLIDES2PNG_OUTPUT", default_value = ".")]
    output: PathBuf,

    /// Conversion workflow.
    #[arg(long, env = "SLIDES2PNG_MODE", value_enum, default_value = "split")]
    mode: ModeArg,

    /// OAuth client id.
    #[arg(long, env = "SLIDES2PNG_CLIENT_ID", default_value = "")]
    client_id: String,

    /// OAuth client secret.
    #[arg(long, env = "SLIDES2PNG_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    client_secret: String,

    /// Service root URL.
    #[arg(long, env = "SLIDES2PNG_API_BASE", default_value = slides2png::config::DEFAULT_API_BASE)]
    api_base: String,

    /// Slide width in pixels.
    #[arg(long, env = "SLIDES2PNG_WIDTH", default_value_t = 1920)]
    width: u32,

    /// Slide height in pixels.
    #[arg(long, env = "SLIDES2PNG_HEIGHT", default_value_t = 1080)]
    height: u32,

    /// Assumed remote conversion time in seconds (drives the estimate).
    #[arg(long, env = "SLIDES2PNG_EXPECTED_SECS", default_value_t = 15)]
    expected_secs: u64,

    /// Print the result as JSON instead of one path per line.
    #[arg(long, env = "SLIDES2PNG_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SLIDES2PNG_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SLIDES2PNG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SLIDES2PNG_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ModeArg {
    Split,
    Single,
}

impl From<ModeArg> for ConversionMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Split => ConversionMode::SplitPages,
            ModeArg::Single => ConversionMode::SingleShot,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar provides all the feedback that matters, so library
    // logs are kept to errors while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;

    // ── Run conversion ───────────────────────────────────────────────────
    let result = if show_progress {
        let observer = CliObserver::new();
        let result = convert_observed(&cli.input, &cli.output, &config, &observer).await;
        if result.is_err() {
            observer.bar.abandon();
        }
        result
    } else {
        convert_observed(&cli.input, &cli.output, &config, &NoopObserver).await
    };
    let output =
        result.with_context(|| format!("Conversion of {} failed", cli.input.display()))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        for file in &output.files {
            println!("{}", file.display());
        }
        if !cli.quiet {
            eprintln!(
                "{}",
                dim(&format!(
                    "{} file(s) in {}ms ({})",
                    output.files.len(),
                    output.duration_ms,
                    output.mode
                ))
            );
        }
    }

    Ok(())
}

/// Map CLI args to `ConverterConfig`.
fn build_config(cli: &Cli) -> Result<ConverterConfig> {
    ConverterConfig::builder()
        .api_base(cli.api_base.clone())
        .client_id(cli.client_id.clone())
        .client_secret(cli.client_secret.clone())
        .mode(cli.mode.clone().into())
        .size(cli.width, cli.height)
        .expected_conversion_secs(cli.expected_secs)
        .build()
        .context("Invalid configuration")
}
