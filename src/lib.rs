//! # receipt2csv
//!
//! Batch-extract structured fields from receipt images into a CSV ledger
//! using vision language models.
//!
//! ## Why this crate?
//!
//! A shoebox of receipt photos is write-only storage: the totals, dates, and
//! merchants are in there, but nothing can query them. This crate points a
//! VLM at each image, asks it three pointed questions, normalizes the
//! answers into typed values, and appends the results to a CSV — skipping
//! anything it has already processed, even when a file was renamed or
//! copied, by fingerprinting pixel content.
//!
//! ## Pipeline Overview
//!
//! ```text
//! folder of images
//!  │
//!  ├─ 1. Discover     enumerate *.jpg / *.jpeg / *.png
//!  ├─ 2. Dedup        path gate, then pixel-fingerprint gate
//!  ├─ 3. Publish      optional upload to a short-lived host
//!  ├─ 4. Ask          three questions per image (total / date / issuer)
//!  ├─ 5. Normalize    "$12.50 total" → 12.50, "June 14" → 2025-06-14
//!  └─ 6. Persist      merge into the CSV ledger, written once at the end
//! ```
//!
//! Images are processed by a bounded worker pool (default 2 — sized to the
//! model backend, not the CPU). The ledger is written exactly once, after
//! every task has finished, and only if the run produced new rows. Running
//! twice over the same folder is a no-op.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use receipt2csv::{run_batch, BatchConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = BatchConfig::builder()
//!         .folder("receipts")
//!         .output("receipts_results.csv")
//!         .build()?;
//!     let output = run_batch(&config).await?;
//!     println!(
//!         "{} new rows, {} skipped, {} failed",
//!         output.stats.processed,
//!         output.stats.skipped_known_path + output.stats.skipped_known_fingerprint,
//!         output.stats.failed,
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `receipt2csv` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! receipt2csv = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod ledger;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::run_batch;
pub use config::{BatchConfig, BatchConfigBuilder, DEFAULT_UPLOAD_ENDPOINT};
pub use error::{BatchError, ImageError};
pub use ledger::{Ledger, LedgerSnapshot};
pub use output::{BatchOutput, BatchStats, ImageFailure, ImageOutcome, Record, SkipReason};
pub use pipeline::normalize::{normalize_amount, normalize_date, AmountField, DateField};
pub use pipeline::qa::{DocumentQa, FieldAnswers, QaError, RetryPolicy, StaticQa, VisionQa};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
