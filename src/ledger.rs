//! Dedup ledger: the persisted table of already-processed receipts.
//!
//! The ledger is read once at startup, consulted through an immutable
//! [`LedgerSnapshot`] while the worker pool runs, mutated only on the
//! orchestrating task during the merge phase, and written back at most once
//! at the end. That lifecycle is what makes the concurrent phase lock-free:
//! workers only ever see the snapshot, and nothing touches the file until
//! every worker has finished.
//!
//! Two uniqueness invariants hold at all times: no two records share an
//! `image_path`, and no two records share a fingerprint. The fingerprint
//! invariant is the stronger one — it survives files being renamed or
//! copied between runs.

use crate::error::BatchError;
use crate::output::Record;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The in-memory ledger plus its backing CSV path.
pub struct Ledger {
    path: PathBuf,
    records: Vec<Record>,
    paths: HashSet<String>,
    fingerprints: HashSet<String>,
    /// Row count at load time; the file is rewritten only if we grew past it.
    baseline: usize,
}

impl Ledger {
    /// Load the ledger CSV, or start empty if the file does not exist yet.
    ///
    /// A file that exists but fails to parse is fatal — silently starting
    /// empty would reprocess everything and duplicate the output on the
    /// next successful write.
    pub fn load(path: &Path) -> Result<Self, BatchError> {
        let mut records: Vec<Record> = Vec::new();
        if path.exists() {
            let mut reader =
                csv::Reader::from_path(path).map_err(|e| BatchError::LedgerReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            for row in reader.deserialize() {
                records.push(row.map_err(|e| BatchError::LedgerReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?);
            }
            debug!("Loaded {} ledger rows from {}", records.len(), path.display());
        } else {
            debug!("No ledger at {}, starting empty", path.display());
        }

        let paths = records.iter().map(|r| r.image_path.clone()).collect();
        let fingerprints = records
            .iter()
            .filter_map(|r| r.fingerprint.clone())
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            baseline: records.len(),
            paths,
            fingerprints,
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Immutable membership view for the concurrent phase.
    ///
    /// Workers check against this frozen view; records merged later in the
    /// same run are intentionally not visible through it.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            paths: self.paths.clone(),
            fingerprints: self.fingerprints.clone(),
        }
    }

    /// Append a record, upholding both uniqueness invariants.
    ///
    /// Returns `false` (and keeps the ledger unchanged) if either key is
    /// already present — reachable when one run sees the same content under
    /// two new paths, since workers dedup against the start-of-run snapshot.
    pub fn merge(&mut self, record: Record) -> bool {
        if self.paths.contains(&record.image_path) {
            warn!("{}: already in ledger, not merging", record.image_path);
            return false;
        }
        if let Some(fp) = &record.fingerprint {
            if self.fingerprints.contains(fp) {
                warn!(
                    "{}: content already in ledger under another path, not merging",
                    record.image_path
                );
                return false;
            }
        }

        self.paths.insert(record.image_path.clone());
        if let Some(fp) = &record.fingerprint {
            self.fingerprints.insert(fp.clone());
        }
        self.records.push(record);
        true
    }

    /// Whether any record was merged since load.
    pub fn dirty(&self) -> bool {
        self.records.len() > self.baseline
    }

    /// Rewrite the whole CSV, atomically, iff something was merged.
    ///
    /// Returns whether a write happened. Atomic means temp file + rename:
    /// a crash mid-write leaves the previous ledger intact, never a
    /// half-written one.
    pub fn persist_if_changed(&self) -> Result<bool, BatchError> {
        if !self.dirty() {
            info!("No new records; ledger left untouched");
            return Ok(false);
        }

        let tmp_path = self.path.with_extension("csv.tmp");
        let write_err = |detail: String| BatchError::LedgerWriteFailed {
            path: self.path.clone(),
            detail,
        };

        let mut writer = csv::Writer::from_path(&tmp_path).map_err(|e| write_err(e.to_string()))?;
        for record in &self.records {
            writer
                .serialize(record)
                .map_err(|e| write_err(e.to_string()))?;
        }
        writer.flush().map_err(|e| write_err(e.to_string()))?;
        drop(writer);

        std::fs::rename(&tmp_path, &self.path).map_err(|e| write_err(e.to_string()))?;
        info!(
            "Wrote {} rows ({} new) to {}",
            self.records.len(),
            self.records.len() - self.baseline,
            self.path.display()
        );
        Ok(true)
    }
}

/// Frozen membership view shared read-only by the worker pool.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    paths: HashSet<String>,
    fingerprints: HashSet<String>,
}

impl LedgerSnapshot {
    /// Cheap first gate: exact re-run over the same file list.
    pub fn contains_path(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// Second gate: renamed/copied duplicates, by pixel content.
    pub fn contains_fingerprint(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::{normalize_amount, normalize_date};

    fn record(path: &str, fingerprint: Option<&str>) -> Record {
        Record {
            image_path: path.to_string(),
            total: normalize_amount("$10.00"),
            receipt_date: normalize_date("26/08/2002"),
            receipt_issuer: "SHOP".into(),
            fingerprint: fingerprint.map(str::to_string),
            image_url: None,
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::load(&dir.path().join("out.csv")).unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.dirty());
    }

    #[test]
    fn persist_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("out.csv");

        let mut ledger = Ledger::load(&csv_path).unwrap();
        assert!(ledger.merge(record("a.jpg", Some("f1"))));
        assert!(ledger.merge(record("b.jpg", Some("f2"))));
        assert!(ledger.persist_if_changed().unwrap());

        let reloaded = Ledger::load(&csv_path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.records(), ledger.records());
        let snap = reloaded.snapshot();
        assert!(snap.contains_path("a.jpg"));
        assert!(snap.contains_fingerprint("f2"));
        assert!(!snap.contains_path("c.jpg"));
    }

    #[test]
    fn unchanged_ledger_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("out.csv");
        let ledger = Ledger::load(&csv_path).unwrap();
        assert!(!ledger.persist_if_changed().unwrap());
        assert!(!csv_path.exists(), "no-op persist must not create the file");
    }

    #[test]
    fn merge_rejects_duplicate_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::load(&dir.path().join("out.csv")).unwrap();
        assert!(ledger.merge(record("a.jpg", Some("f1"))));
        assert!(!ledger.merge(record("a.jpg", Some("f9"))));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn merge_rejects_duplicate_fingerprint_under_new_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::load(&dir.path().join("out.csv")).unwrap();
        assert!(ledger.merge(record("a.jpg", Some("f1"))));
        assert!(!ledger.merge(record("copy-of-a.jpg", Some("f1"))));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn unfingerprinted_records_merge_freely() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::load(&dir.path().join("out.csv")).unwrap();
        assert!(ledger.merge(record("a.jpg", None)));
        assert!(ledger.merge(record("b.jpg", None)));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn snapshot_does_not_see_later_merges() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = Ledger::load(&dir.path().join("out.csv")).unwrap();
        let snap = ledger.snapshot();
        ledger.merge(record("a.jpg", Some("f1")));
        assert!(!snap.contains_path("a.jpg"));
        assert!(!snap.contains_fingerprint("f1"));
    }
}
