//! Configuration types for a receipt batch run.
//!
//! All run behaviour is controlled through [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. Keeping every knob in one struct makes it trivial
//! to share configs across tasks and to see, in one place, everything the
//! original hard-coded script buried in its source (folder path, output
//! filename, worker count, model handle).
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::error::BatchError;
use crate::pipeline::qa::{DocumentQa, RetryPolicy};
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default upload endpoint: multipart POST, JSON response with a nested
/// `data.url`, minutes-scale retention.
pub const DEFAULT_UPLOAD_ENDPOINT: &str = "https://tmpfiles.org/api/v1/upload";

/// Configuration for one batch run.
///
/// Built via [`BatchConfig::builder()`] or [`BatchConfig::default()`].
///
/// # Example
/// ```rust
/// use receipt2csv::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .folder("receipts")
///     .output("receipts_results.csv")
///     .concurrency(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Folder scanned for receipt images. Default: `receipts`.
    pub folder: PathBuf,

    /// Ledger CSV path, read at start and rewritten at the end.
    /// Default: `receipts_results.csv`.
    pub output: PathBuf,

    /// Accepted file extensions, matched case-insensitively.
    /// Default: `jpg`, `jpeg`, `png`.
    pub extensions: Vec<String>,

    /// Worker-pool size. Default: 2.
    ///
    /// This bounds concurrent *inference* calls, so size it to the model
    /// backend's capacity, not to CPU count — the pool is the only
    /// admission control in front of the shared accelerator. Each worker
    /// handles one image end-to-end (hash → dedup → upload → three
    /// questions → normalize).
    pub concurrency: usize,

    /// Upload each new image to the remote host. Default: false.
    pub upload: bool,

    /// Upload endpoint. Default: [`DEFAULT_UPLOAD_ENDPOINT`].
    pub upload_endpoint: String,

    /// Expiry value sent with each upload. Default: `1h`.
    ///
    /// The host retains files for minutes-to-hours; the stored URL is a
    /// short-lived review convenience, not an archive.
    pub upload_expiry: String,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses the
    /// provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed QA capability. Takes precedence over every provider
    /// knob — this is the test seam.
    pub qa: Option<Arc<dyn DocumentQa>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Near-zero keeps the model faithful to what is printed on the
    /// receipt; creativity only hurts transcription.
    pub temperature: f32,

    /// Maximum tokens per answer. Default: 128.
    ///
    /// Answers are single values ("$12.50", a date, a store name); 128
    /// leaves room for the occasional verbose model without paying for it.
    pub max_tokens: usize,

    /// Maximum retry attempts per inference/upload call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff).
    /// Default: 500. Doubles after each attempt: 500 ms → 1 s → 2 s.
    pub retry_backoff_ms: u64,

    /// Per-inference-call timeout in seconds. Default: 60.
    ///
    /// Without it a hung call would pin its worker slot for the rest of
    /// the run.
    pub api_timeout_secs: u64,

    /// Per-upload-request timeout in seconds. Default: 30.
    pub upload_timeout_secs: u64,

    /// Optional per-image progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("receipts"),
            output: PathBuf::from("receipts_results.csv"),
            extensions: vec!["jpg".into(), "jpeg".into(), "png".into()],
            concurrency: 2,
            upload: false,
            upload_endpoint: DEFAULT_UPLOAD_ENDPOINT.to_string(),
            upload_expiry: "1h".to_string(),
            model: None,
            provider_name: None,
            provider: None,
            qa: None,
            temperature: 0.1,
            max_tokens: 128,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            upload_timeout_secs: 30,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("folder", &self.folder)
            .field("output", &self.output)
            .field("extensions", &self.extensions)
            .field("concurrency", &self.concurrency)
            .field("upload", &self.upload)
            .field("upload_endpoint", &self.upload_endpoint)
            .field("upload_expiry", &self.upload_expiry)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("qa", &self.qa.as_ref().map(|_| "<dyn DocumentQa>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// The retry/deadline policy shared by inference and upload calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_ms: self.retry_backoff_ms,
            timeout_secs: self.api_timeout_secs,
        }
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.config.folder = folder.into();
        self
    }

    pub fn output(mut self, output: impl Into<PathBuf>) -> Self {
        self.config.output = output.into();
        self
    }

    pub fn extensions(mut self, extensions: Vec<String>) -> Self {
        self.config.extensions = extensions;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn upload(mut self, v: bool) -> Self {
        self.config.upload = v;
        self
    }

    pub fn upload_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.upload_endpoint = endpoint.into();
        self
    }

    pub fn upload_expiry(mut self, expiry: impl Into<String>) -> Self {
        self.config.upload_expiry = expiry.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn qa(mut self, qa: Arc<dyn DocumentQa>) -> Self {
        self.config.qa = Some(qa);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(BatchError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.extensions.is_empty() {
            return Err(BatchError::InvalidConfig(
                "At least one file extension is required".into(),
            ));
        }
        if c.upload && c.upload_endpoint.is_empty() {
            return Err(BatchError::InvalidConfig(
                "Upload enabled but upload_endpoint is empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = BatchConfig::default();
        assert_eq!(c.concurrency, 2);
        assert_eq!(c.extensions, vec!["jpg", "jpeg", "png"]);
        assert!(!c.upload);
        assert_eq!(c.max_retries, 3);
    }

    #[test]
    fn concurrency_is_clamped_to_one() {
        let c = BatchConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn empty_extensions_rejected() {
        let err = BatchConfig::builder()
            .extensions(vec![])
            .build()
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfig(_)));
    }

    #[test]
    fn upload_requires_endpoint() {
        let err = BatchConfig::builder()
            .upload(true)
            .upload_endpoint("")
            .build()
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfig(_)));
    }

    #[test]
    fn retry_policy_mirrors_config() {
        let c = BatchConfig::builder()
            .max_retries(5)
            .retry_backoff_ms(100)
            .api_timeout_secs(7)
            .build()
            .unwrap();
        let p = c.retry_policy();
        assert_eq!(p.max_retries, 5);
        assert_eq!(p.backoff_ms, 100);
        assert_eq!(p.timeout_secs, 7);
    }
}
