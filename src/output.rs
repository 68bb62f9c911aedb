//! Result types: the ledger row, per-image outcomes, and run statistics.

use crate::error::ImageError;
use crate::pipeline::normalize::{AmountField, DateField};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One row of the ledger CSV.
///
/// Column names and order are fixed — ledgers written by earlier versions of
/// the tool must keep loading, so the content fingerprint stays under its
/// historical `etag` header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Path the image was discovered under, as given (the identifier key).
    pub image_path: String,
    /// Normalized purchase total, or the model's raw answer.
    pub total: AmountField,
    /// Normalized ISO-8601 date, or the model's raw answer.
    pub receipt_date: DateField,
    /// Issuer name as answered by the model, trimmed but not normalized.
    pub receipt_issuer: String,
    /// Pixel-content fingerprint (the content key). Absent when the image
    /// could not be decoded.
    #[serde(rename = "etag")]
    pub fingerprint: Option<String>,
    /// Remote download URL when upload was enabled and succeeded.
    pub image_url: Option<String>,
}

/// Why an image produced no new row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Its path is already in the ledger (exact re-run).
    KnownPath,
    /// Its pixel content matches an existing row (renamed/copied duplicate).
    KnownFingerprint,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::KnownPath => f.write_str("already processed"),
            SkipReason::KnownFingerprint => f.write_str("duplicate content"),
        }
    }
}

/// Terminal state of one image's trip through the pipeline.
///
/// Every dispatched image resolves to exactly one of these; none of them
/// aborts the batch.
#[derive(Debug)]
pub enum ImageOutcome {
    /// A complete record, ready to merge.
    Processed(Record),
    /// Deduplicated — silent no-op apart from logging.
    Skipped { path: PathBuf, reason: SkipReason },
    /// Failed; absent from this run's output, retried next run.
    Failed { path: PathBuf, error: ImageError },
}

/// A failed image retained in [`BatchOutput`] for post-run reporting.
#[derive(Debug, Clone)]
pub struct ImageFailure {
    pub path: PathBuf,
    pub error: ImageError,
}

/// Counters for a completed run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    /// Images found in the input folder.
    pub discovered: usize,
    /// New records merged into the ledger.
    pub processed: usize,
    /// Skipped because the path was already known.
    pub skipped_known_path: usize,
    /// Skipped because the pixel content was already known.
    pub skipped_known_fingerprint: usize,
    /// Images that failed and produced no row.
    pub failed: usize,
    /// Records that carry a remote URL.
    pub uploaded: usize,
    /// Whether the ledger file was rewritten (false when nothing new).
    pub ledger_written: bool,
    /// Wall-clock for the whole run.
    pub total_duration_ms: u64,
}

/// Everything a completed run produced.
#[derive(Debug)]
pub struct BatchOutput {
    /// Records merged this run, in completion order.
    pub records: Vec<Record>,
    /// Per-image failures (the batch completed regardless).
    pub failures: Vec<ImageFailure>,
    pub stats: BatchStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::{normalize_amount, normalize_date};

    fn sample() -> Record {
        Record {
            image_path: "receipts/r1.jpg".into(),
            total: normalize_amount("$12.50 total"),
            receipt_date: normalize_date("December 22, 2014"),
            receipt_issuer: "ACME MART".into(),
            fingerprint: Some("ab".repeat(32)),
            image_url: None,
        }
    }

    #[test]
    fn csv_header_and_row_shape() {
        let mut w = csv::Writer::from_writer(Vec::new());
        w.serialize(sample()).unwrap();
        let data = String::from_utf8(w.into_inner().unwrap()).unwrap();
        let mut lines = data.lines();
        assert_eq!(
            lines.next().unwrap(),
            "image_path,total,receipt_date,receipt_issuer,etag,image_url"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("receipts/r1.jpg,12.50,2014-12-22,ACME MART,"));
        // image_url is empty, not the literal "None"
        assert!(row.ends_with(','));
    }

    #[test]
    fn csv_round_trip_preserves_absent_fields() {
        let record = Record {
            fingerprint: None,
            image_url: None,
            ..sample()
        };
        let mut w = csv::Writer::from_writer(Vec::new());
        w.serialize(&record).unwrap();
        let data = w.into_inner().unwrap();

        let mut r = csv::Reader::from_reader(data.as_slice());
        let back: Record = r.deserialize().next().unwrap().unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn skip_reason_display() {
        assert_eq!(SkipReason::KnownPath.to_string(), "already processed");
        assert_eq!(SkipReason::KnownFingerprint.to_string(), "duplicate content");
    }
}
