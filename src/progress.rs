//! Progress-callback trait for per-image batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive
//! real-time events as the pool processes each image.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers
//! can forward events to a channel, a log, or a terminal progress bar
//! without the library knowing how the host application communicates. The
//! trait is `Send + Sync` so it works when images are processed
//! concurrently.
//!
//! All payloads are owned values (`String`, not `&str`): passing borrows
//! into a boxed callback from inside spawned futures trips the compiler's
//! higher-ranked `Send` inference, and owned payloads sidestep that class
//! of error entirely.

use crate::output::SkipReason;
use std::sync::Arc;

/// Called by the batch pipeline as it processes each image.
///
/// Events for different images may arrive out of order and concurrently
/// from different tasks; implementations must synchronise shared state.
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, after discovery, before any image is dispatched.
    fn on_batch_start(&self, total_images: usize) {
        let _ = total_images;
    }

    /// Called when an image's task begins (1-indexed position in discovery
    /// order).
    fn on_image_start(&self, index: usize, total: usize, path: String) {
        let _ = (index, total, path);
    }

    /// Called when an image is deduplicated away.
    fn on_image_skipped(&self, index: usize, total: usize, path: String, reason: SkipReason) {
        let _ = (index, total, path, reason);
    }

    /// Called when an image produced a complete record.
    fn on_image_complete(&self, index: usize, total: usize, path: String) {
        let _ = (index, total, path);
    }

    /// Called when an image failed after all retries.
    fn on_image_error(&self, index: usize, total: usize, path: String, error: String) {
        let _ = (index, total, path, error);
    }

    /// Called once after every dispatched task has finished, before the
    /// ledger is persisted.
    fn on_batch_complete(&self, total: usize, processed: usize, skipped: usize, failed: usize) {
        let _ = (total, processed, skipped, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
