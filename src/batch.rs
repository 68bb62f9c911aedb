//! Batch orchestration: the full run from discovery to persistence.
//!
//! ## Shape of a run
//!
//! ```text
//! ledger load ──▶ snapshot ──▶ discover
//!                                 │
//!                     ┌───────────┴───────────┐
//!                     ▼ worker pool (bounded) ▼
//!            hash → dedup → upload → ask ×3 → normalize
//!                     └───────────┬───────────┘
//!                                 ▼ barrier (all tasks joined)
//!                          merge → persist once
//! ```
//!
//! The ledger is only ever read through a start-of-run snapshot during the
//! concurrent phase and only ever mutated on this task after the barrier, so
//! the shared table needs no locking. Persistence happens exactly once,
//! after the whole batch drains — never incrementally — and only if the run
//! produced something new.
//!
//! Every per-image failure is contained to that image: it is logged, counted,
//! and the rest of the batch is unaffected.

use crate::config::BatchConfig;
use crate::error::{BatchError, ImageError};
use crate::ledger::{Ledger, LedgerSnapshot};
use crate::output::{BatchOutput, BatchStats, ImageFailure, ImageOutcome, Record, SkipReason};
use crate::pipeline::qa::{self, DocumentQa, RetryPolicy, VisionQa};
use crate::pipeline::{discover, encode, fingerprint, normalize, publish};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Run one batch over the configured folder.
///
/// # Returns
/// `Ok(BatchOutput)` on success, even if some images failed (check
/// `output.stats.failed` and `output.failures`).
///
/// # Errors
/// Returns `Err(BatchError)` only for fatal errors: missing folder,
/// unreadable or unwritable ledger, no usable inference provider.
pub async fn run_batch(config: &BatchConfig) -> Result<BatchOutput, BatchError> {
    let total_start = Instant::now();
    info!("Starting batch over {}", config.folder.display());

    // ── Step 1: Load ledger and freeze the dedup view ────────────────────
    let mut ledger = Ledger::load(&config.output)?;
    let snapshot = Arc::new(ledger.snapshot());
    info!("Ledger has {} existing rows", ledger.len());

    // ── Step 2: Discover inputs ──────────────────────────────────────────
    let images = discover::discover_images(&config.folder, &config.extensions)?;
    let total = images.len();
    info!("Found {} candidate images", total);

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    // ── Step 3: Resolve the QA capability ────────────────────────────────
    let qa_capability = resolve_qa(config)?;

    // ── Step 4: HTTP client for uploads (shared across workers) ──────────
    let uploader = if config.upload {
        Some(
            reqwest::Client::builder()
                .timeout(Duration::from_secs(config.upload_timeout_secs))
                .build()
                .map_err(|e| BatchError::Internal(format!("HTTP client: {e}")))?,
        )
    } else {
        None
    };

    // ── Step 5: Dispatch through the bounded worker pool ─────────────────
    let ctx = Arc::new(WorkerCtx {
        config: config.clone(),
        snapshot,
        qa: qa_capability,
        uploader,
        policy: config.retry_policy(),
        total,
    });

    let outcomes: Vec<ImageOutcome> = stream::iter(images.into_iter().enumerate().map(
        |(i, path)| {
            let ctx = Arc::clone(&ctx);
            async move { process_one(ctx, i + 1, path).await }
        },
    ))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    // ── Step 6: Merge after the barrier (single task, ledger mutable) ────
    let mut stats = BatchStats {
        discovered: total,
        ..Default::default()
    };
    let mut records = Vec::new();
    let mut failures = Vec::new();

    for outcome in outcomes {
        match outcome {
            ImageOutcome::Processed(record) => {
                let has_url = record.image_url.is_some();
                if ledger.merge(record.clone()) {
                    stats.processed += 1;
                    if has_url {
                        stats.uploaded += 1;
                    }
                    records.push(record);
                } else {
                    // Same content under two new paths within one run; the
                    // snapshot could not catch it, the merge gate did.
                    stats.skipped_known_fingerprint += 1;
                }
            }
            ImageOutcome::Skipped {
                reason: SkipReason::KnownPath,
                ..
            } => stats.skipped_known_path += 1,
            ImageOutcome::Skipped {
                reason: SkipReason::KnownFingerprint,
                ..
            } => stats.skipped_known_fingerprint += 1,
            ImageOutcome::Failed { path, error } => {
                stats.failed += 1;
                failures.push(ImageFailure { path, error });
            }
        }
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(
            total,
            stats.processed,
            stats.skipped_known_path + stats.skipped_known_fingerprint,
            stats.failed,
        );
    }

    // ── Step 7: Persist once ─────────────────────────────────────────────
    stats.ledger_written = ledger.persist_if_changed()?;
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Batch complete: {} new, {} skipped, {} failed, {}ms",
        stats.processed,
        stats.skipped_known_path + stats.skipped_known_fingerprint,
        stats.failed,
        stats.total_duration_ms
    );

    Ok(BatchOutput {
        records,
        failures,
        stats,
    })
}

// ── Worker ───────────────────────────────────────────────────────────────

/// Everything a worker task needs, shared behind one `Arc`.
struct WorkerCtx {
    config: BatchConfig,
    snapshot: Arc<LedgerSnapshot>,
    qa: Arc<dyn DocumentQa>,
    uploader: Option<reqwest::Client>,
    policy: RetryPolicy,
    total: usize,
}

/// Process one image end-to-end and return its terminal state.
///
/// Never returns an error: anything fatal to this image becomes
/// [`ImageOutcome::Failed`] and the batch moves on.
async fn process_one(ctx: Arc<WorkerCtx>, index: usize, path: PathBuf) -> ImageOutcome {
    let disp = path.display().to_string();
    let cb = ctx.config.progress_callback.as_ref();

    // Gate 1 (cheap): identifier already known — exact re-run.
    if ctx.snapshot.contains_path(&disp) {
        info!("{disp}: already processed, skipping");
        if let Some(cb) = cb {
            cb.on_image_skipped(index, ctx.total, disp, SkipReason::KnownPath);
        }
        return ImageOutcome::Skipped {
            path,
            reason: SkipReason::KnownPath,
        };
    }

    if let Some(cb) = cb {
        cb.on_image_start(index, ctx.total, disp.clone());
    }

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let error = ImageError::ReadFailed {
                path: path.clone(),
                detail: e.to_string(),
            };
            warn!("{error}");
            if let Some(cb) = cb {
                cb.on_image_error(index, ctx.total, disp, error.to_string());
            }
            return ImageOutcome::Failed { path, error };
        }
    };

    // Gate 2 (content): fingerprint the decoded pixels. Decode failure is
    // recoverable — the image just cannot be matched by content, only by
    // path, and the record merges without an etag.
    let fp = match image::load_from_memory(&bytes) {
        Ok(img) => Some(fingerprint::fingerprint(&img)),
        Err(e) => {
            warn!("{disp}: decode failed ({e}), proceeding without fingerprint");
            None
        }
    };
    if let Some(fp) = &fp {
        if ctx.snapshot.contains_fingerprint(fp) {
            info!("{disp}: duplicate content, skipping");
            if let Some(cb) = cb {
                cb.on_image_skipped(index, ctx.total, disp, SkipReason::KnownFingerprint);
            }
            return ImageOutcome::Skipped {
                path,
                reason: SkipReason::KnownFingerprint,
            };
        }
    }

    // Both gates passed — now the expensive work is justified.
    let image_url = match &ctx.uploader {
        Some(client) => {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| disp.clone());
            publish::publish(client, &ctx.config, &bytes, &filename, &ctx.policy).await
        }
        None => None,
    };

    let qa_image = encode::encode_for_qa(&bytes, encode::mime_for(&path));
    let answers = match qa::extract_fields(ctx.qa.as_ref(), &qa_image, &ctx.policy).await {
        Ok(answers) => answers,
        Err((question, e)) => {
            let error = ImageError::QaFailed {
                path: path.clone(),
                question,
                retries: ctx.policy.max_retries,
                detail: e.to_string(),
            };
            warn!("{error}");
            if let Some(cb) = cb {
                cb.on_image_error(index, ctx.total, disp, error.to_string());
            }
            return ImageOutcome::Failed { path, error };
        }
    };

    let record = Record {
        image_path: disp.clone(),
        total: normalize::normalize_amount(&answers.total),
        receipt_date: normalize::normalize_date(&answers.date),
        receipt_issuer: answers.issuer.trim().to_string(),
        fingerprint: fp,
        image_url,
    };

    if let Some(cb) = cb {
        cb.on_image_complete(index, ctx.total, disp);
    }
    ImageOutcome::Processed(record)
}

// ── Capability resolution ────────────────────────────────────────────────

/// Resolve the QA capability, from most-specific to least-specific.
///
/// 1. **Pre-built capability** (`config.qa`) — used as-is. This is how
///    tests substitute a stub, and how callers wrap custom middleware.
/// 2. **Pre-built provider** (`config.provider`) — wrapped in [`VisionQa`].
/// 3. **Named provider + model** (`config.provider_name`) — constructed via
///    the provider factory, which reads the matching API key env var.
/// 4. **Environment pair** (`RECEIPT2CSV_LLM_PROVIDER` +
///    `RECEIPT2CSV_MODEL`) — honoured before auto-detection so an explicit
///    environment-level choice wins even when several API keys are present.
/// 5. **Full auto-detection** — prefer OpenAI when its key is set, else
///    scan all known key variables.
fn resolve_qa(config: &BatchConfig) -> Result<Arc<dyn DocumentQa>, BatchError> {
    if let Some(ref qa) = config.qa {
        return Ok(Arc::clone(qa));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(VisionQa::new(
        provider,
        config.temperature,
        config.max_tokens,
    )))
}

fn resolve_provider(config: &BatchConfig) -> Result<Arc<dyn LLMProvider>, BatchError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return qa::create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("RECEIPT2CSV_LLM_PROVIDER"),
        std::env::var("RECEIPT2CSV_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return qa::create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return qa::create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| BatchError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::qa::StaticQa;

    #[test]
    fn resolve_qa_prefers_injected_capability() {
        let config = BatchConfig::builder()
            .qa(Arc::new(StaticQa::new().answer("total", "$1.00")))
            // A provider name that would fail to construct — must never be
            // consulted when a capability is injected.
            .provider_name("no-such-provider")
            .build()
            .unwrap();
        assert!(resolve_qa(&config).is_ok());
    }
}
