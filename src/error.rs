//! Error types for the receipt2csv library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BatchError`] — **Fatal**: the run cannot proceed at all (missing
//!   input folder, unreadable ledger, provider not configured). Returned as
//!   `Err(BatchError)` from [`crate::batch::run_batch`].
//!
//! * [`ImageError`] — **Non-fatal**: a single image failed (unreadable
//!   file, inference error after retries) but every other image is fine.
//!   Carried inside [`crate::output::ImageOutcome::Failed`] so callers can
//!   inspect partial success rather than losing the whole batch to one bad
//!   receipt.
//!
//! Skips (already-processed images) are not errors at all — they are
//! ordinary outcomes, see [`crate::output::SkipReason`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the receipt2csv library.
///
/// Image-level failures use [`ImageError`] and are collected in
/// [`crate::output::BatchOutput`] rather than propagated here.
#[derive(Debug, Error)]
pub enum BatchError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input folder does not exist.
    #[error("Receipt folder not found: '{path}'\nCheck the path exists and is readable.")]
    FolderNotFound { path: PathBuf },

    /// The input path exists but is not a directory.
    #[error("'{path}' is not a directory")]
    NotAFolder { path: PathBuf },

    /// The input folder exists but could not be enumerated.
    #[error("Failed to read receipt folder '{path}': {source}")]
    FolderReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Ledger errors ─────────────────────────────────────────────────────
    /// The ledger CSV exists but could not be parsed.
    #[error("Failed to read ledger '{path}': {source}\nFix or remove the file and rerun.")]
    LedgerReadFailed {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// The ledger could not be written back.
    #[error("Failed to write ledger '{path}': {detail}")]
    LedgerWriteFailed { path: PathBuf, detail: String },

    // ── Inference errors ──────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single image.
///
/// Stored in [`crate::output::ImageOutcome::Failed`]. The batch continues;
/// the image is simply absent from the merged results this run and will be
/// retried on the next run (its path never enters the ledger).
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    /// The file could not be read from disk.
    #[error("{path}: read failed: {detail}")]
    ReadFailed { path: PathBuf, detail: String },

    /// An inference call failed after all retries.
    ///
    /// One failing field question drops the whole record — a row with a
    /// total but no date is worse for downstream review than no row.
    #[error("{path}: '{question}' failed after {retries} retries: {detail}")]
    QaFailed {
        path: PathBuf,
        question: String,
        retries: u32,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_not_found_display() {
        let e = BatchError::FolderNotFound {
            path: PathBuf::from("/no/such/dir"),
        };
        assert!(e.to_string().contains("/no/such/dir"));
    }

    #[test]
    fn qa_failed_display() {
        let e = ImageError::QaFailed {
            path: PathBuf::from("r1.jpg"),
            question: "What is the total purchase?".into(),
            retries: 3,
            detail: "HTTP 503".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("r1.jpg"), "got: {msg}");
        assert!(msg.contains("3 retries"), "got: {msg}");
    }
}
