//! CLI binary for receipt2csv.
//!
//! A thin shim over the library crate that maps CLI flags to `BatchConfig`
//! and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use receipt2csv::{
    run_batch, BatchConfig, BatchProgressCallback, ProgressCallback, SkipReason,
    DEFAULT_UPLOAD_ENDPOINT,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus per-image log lines.
/// Designed to work correctly when images complete out-of-order
/// (the pool is concurrent).
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-image wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_batch_start
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(spinner_style);
        bar.set_prefix("Scanning");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(&index)
            .map(|t| t.elapsed().as_millis() as f64 / 1000.0)
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_images: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");

        self.bar.set_length(total_images as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_images} receipt images…"))
        ));
    }

    fn on_image_start(&self, index: usize, _total: usize, path: String) {
        self.start_times
            .lock()
            .unwrap()
            .insert(index, Instant::now());
        self.bar.set_message(path);
    }

    fn on_image_skipped(&self, index: usize, _total: usize, path: String, reason: SkipReason) {
        // Fingerprint-gate skips arrive after on_image_start; drop the timer.
        self.start_times.lock().unwrap().remove(&index);
        self.bar
            .println(format!("  {} {}  {}", dim("•"), dim(&path), dim(&format!("({reason})"))));
        self.bar.inc(1);
    }

    fn on_image_complete(&self, index: usize, _total: usize, path: String) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            path,
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_image_error(&self, index: usize, _total: usize, path: String, error: String) {
        let secs = self.elapsed_secs(index);
        // Truncate very long error messages to keep output tidy.
        let msg = if error.len() > 100 {
            format!("{}\u{2026}", &error[..99])
        } else {
            error
        };
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            path,
            red(&msg),
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total: usize, _processed: usize, _skipped: usize, _failed: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process ./receipts into ./receipts_results.csv
  receipt2csv

  # A different folder and output file
  receipt2csv scans/ -o scans.csv

  # Upload each new image and store the download URL in the CSV
  receipt2csv --upload

  # Use a specific model
  receipt2csv --provider openai --model gpt-4.1

  # More workers (only if the model backend can take it)
  receipt2csv -c 4

  # Machine-readable run stats
  receipt2csv --json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY            OpenAI API key
  ANTHROPIC_API_KEY         Anthropic API key
  GEMINI_API_KEY            Google Gemini API key
  RECEIPT2CSV_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  RECEIPT2CSV_MODEL         Override model ID

DEDUPLICATION:
  Already-listed paths are skipped without touching the model. A renamed or
  copied image is also skipped: its pixel content is fingerprinted and
  matched against the etag column. Delete a row (or the file) to reprocess.

SETUP:
  1. Set an API key:   export OPENAI_API_KEY=sk-...
  2. Run:              receipt2csv path/to/receipts
"#;

/// Extract totals, dates, and issuers from receipt images into a CSV.
#[derive(Parser, Debug)]
#[command(
    name = "receipt2csv",
    version,
    about = "Extract totals, dates, and issuers from receipt images into a CSV",
    long_about = "Walk a folder of receipt photos, ask a vision language model for each \
receipt's total, date, and issuer, normalize the answers, and append them to a CSV ledger. \
Already-processed images (by path or by pixel content) are skipped, so reruns are cheap.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Folder containing receipt images (*.jpg / *.jpeg / *.png).
    #[arg(default_value = "receipts", env = "RECEIPT2CSV_FOLDER")]
    folder: PathBuf,

    /// CSV ledger path, read at start and rewritten at the end.
    #[arg(short, long, default_value = "receipts_results.csv", env = "RECEIPT2CSV_OUTPUT")]
    output: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-nano, claude-sonnet-4-20250514).
    #[arg(long, env = "RECEIPT2CSV_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "RECEIPT2CSV_PROVIDER")]
    provider: Option<String>,

    /// Number of images processed concurrently.
    #[arg(short, long, env = "RECEIPT2CSV_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    /// Upload each new image and store its download URL.
    #[arg(long, env = "RECEIPT2CSV_UPLOAD")]
    upload: bool,

    /// Upload endpoint (multipart POST, JSON response).
    #[arg(long, env = "RECEIPT2CSV_UPLOAD_ENDPOINT", default_value = DEFAULT_UPLOAD_ENDPOINT)]
    upload_endpoint: String,

    /// Expiry value sent with each upload.
    #[arg(long, env = "RECEIPT2CSV_EXPIRY", default_value = "1h")]
    expiry: String,

    /// Retries per inference/upload call.
    #[arg(long, env = "RECEIPT2CSV_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Max LLM output tokens per answer.
    #[arg(long, env = "RECEIPT2CSV_MAX_TOKENS", default_value_t = 128)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "RECEIPT2CSV_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Per-inference-call timeout in seconds.
    #[arg(long, env = "RECEIPT2CSV_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Per-upload timeout in seconds.
    #[arg(long, env = "RECEIPT2CSV_UPLOAD_TIMEOUT", default_value_t = 30)]
    upload_timeout: u64,

    /// Output run statistics as JSON instead of the human summary.
    #[arg(long, env = "RECEIPT2CSV_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "RECEIPT2CSV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "RECEIPT2CSV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "RECEIPT2CSV_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let mut builder = BatchConfig::builder()
        .folder(&cli.folder)
        .output(&cli.output)
        .concurrency(cli.concurrency)
        .upload(cli.upload)
        .upload_endpoint(&cli.upload_endpoint)
        .upload_expiry(&cli.expiry)
        .max_retries(cli.max_retries)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .upload_timeout_secs(cli.upload_timeout);

    if let Some(cb) = progress_cb {
        builder = builder.progress_callback(cb);
    }

    let mut config = builder.build().context("Invalid configuration")?;
    config.model = cli.model.clone();
    config.provider_name = cli.provider.clone();

    // ── Run the batch ────────────────────────────────────────────────────
    let output = run_batch(&config).await.context("Batch run failed")?;
    let stats = &output.stats;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(stats).context("Failed to serialise stats")?
        );
        return Ok(());
    }

    if !cli.quiet {
        let skipped = stats.skipped_known_path + stats.skipped_known_fingerprint;
        if stats.ledger_written {
            eprintln!(
                "{} {} new rows  →  {}",
                green("✔"),
                bold(&stats.processed.to_string()),
                bold(&cli.output.display().to_string()),
            );
        } else {
            eprintln!(
                "{} no new rows — ledger left untouched",
                if stats.failed == 0 { green("✔") } else { cyan("⚠") }
            );
        }
        eprintln!(
            "   {} discovered  /  {} skipped  /  {} failed  —  {}ms",
            dim(&stats.discovered.to_string()),
            dim(&skipped.to_string()),
            if stats.failed > 0 {
                red(&stats.failed.to_string())
            } else {
                dim("0")
            },
            stats.total_duration_ms,
        );
        if stats.uploaded > 0 {
            eprintln!("   {} images uploaded", dim(&stats.uploaded.to_string()));
        }
        for failure in &output.failures {
            eprintln!("   {} {}", red("✗"), failure.error);
        }
    }

    Ok(())
}
