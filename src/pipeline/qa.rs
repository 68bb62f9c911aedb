//! Inference adapter: ask the vision model one question per field.
//!
//! The model behind [`DocumentQa`] is an external, capacity-limited
//! capability — this module is the only place that talks to it. The trait is
//! the test seam: production code drives [`VisionQa`] (an edgequake-llm
//! provider), tests drive [`StaticQa`] with canned answers and never touch
//! the network.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`backoff_ms * 2^attempt`) avoids
//! thundering-herd: with 500 ms base and 3 retries the wait sequence is
//! 500 ms → 1 s → 2 s. Every call also carries a hard timeout so a hung
//! request cannot stall its worker slot forever.

use crate::error::BatchError;
use crate::prompts::QA_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Error from a single question/answer attempt.
#[derive(Debug, Clone, Error)]
pub enum QaError {
    /// The provider returned an error (API failure, bad key, refusal).
    #[error("provider error: {0}")]
    Provider(String),

    /// The call exceeded the per-call deadline.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// The document-question-answering capability boundary.
///
/// One free-text question in, one free-text answer out. Implementations must
/// be `Send + Sync`; the batch pool calls them from concurrent tasks.
#[async_trait]
pub trait DocumentQa: Send + Sync {
    async fn ask(&self, image: &ImageData, question: &str) -> Result<String, QaError>;
}

// ── Production backend ───────────────────────────────────────────────────

/// [`DocumentQa`] over an edgequake-llm vision provider.
///
/// Each question becomes one chat completion: the receipt-reading system
/// prompt, then a single user turn carrying the question text and the image.
pub struct VisionQa {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl VisionQa {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            temperature,
            max_tokens,
        }
    }
}

#[async_trait]
impl DocumentQa for VisionQa {
    async fn ask(&self, image: &ImageData, question: &str) -> Result<String, QaError> {
        let messages = vec![
            ChatMessage::system(QA_SYSTEM_PROMPT),
            ChatMessage::user_with_images(question, vec![image.clone()]),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| QaError::Provider(e.to_string()))?;
        Ok(response.content.trim().to_string())
    }
}

// ── Stub backend (always available, used for tests) ──────────────────────

/// Answers from a fixed question→answer table — useful for exercising the
/// batch pipeline without a model or an API key.
///
/// Matching is by substring so callers can key on the distinctive part of a
/// question. Unmatched questions error like a provider failure would.
#[derive(Default, Clone)]
pub struct StaticQa {
    answers: Vec<(String, String)>,
}

impl StaticQa {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an answer for any question containing `question_part`.
    pub fn answer(mut self, question_part: impl Into<String>, answer: impl Into<String>) -> Self {
        self.answers.push((question_part.into(), answer.into()));
        self
    }
}

#[async_trait]
impl DocumentQa for StaticQa {
    async fn ask(&self, _image: &ImageData, question: &str) -> Result<String, QaError> {
        self.answers
            .iter()
            .find(|(part, _)| question.contains(part.as_str()))
            .map(|(_, answer)| answer.clone())
            .ok_or_else(|| QaError::Provider(format!("no scripted answer for '{question}'")))
    }
}

// ── Retry / timeout wrapper ──────────────────────────────────────────────

/// Retry and deadline policy shared by inference and upload calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
}

impl RetryPolicy {
    /// Backoff before retry `attempt` (1-based): doubles each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms * 2u64.pow(attempt.saturating_sub(1)))
    }
}

/// Ask one question with per-call timeout and exponential-backoff retries.
pub async fn ask_with_retry(
    qa: &dyn DocumentQa,
    image: &ImageData,
    question: &str,
    policy: &RetryPolicy,
) -> Result<String, QaError> {
    let mut last_err = QaError::Provider("no attempts made".into());

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff(attempt);
            warn!(
                "'{}': retry {}/{} after {:?}",
                question, attempt, policy.max_retries, backoff
            );
            sleep(backoff).await;
        }

        match timeout(Duration::from_secs(policy.timeout_secs), qa.ask(image, question)).await {
            Ok(Ok(answer)) => return Ok(answer),
            Ok(Err(e)) => {
                warn!("'{}': attempt {} failed — {}", question, attempt + 1, e);
                last_err = e;
            }
            Err(_) => {
                warn!(
                    "'{}': attempt {} timed out after {}s",
                    question,
                    attempt + 1,
                    policy.timeout_secs
                );
                last_err = QaError::Timeout {
                    secs: policy.timeout_secs,
                };
            }
        }
    }

    Err(last_err)
}

// ── Per-image field extraction ───────────────────────────────────────────

/// Raw (un-normalized) answers for the three receipt fields.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAnswers {
    pub total: String,
    pub date: String,
    pub issuer: String,
}

/// Ask the three field questions for one image, sequentially.
///
/// All three must succeed — a partially-filled record is not a supported
/// state, so the first question to exhaust its retries fails the image
/// (`Err` carries which question, for the log line). The sequential order
/// keeps the worker-pool size as the only admission control on the shared
/// accelerator.
pub async fn extract_fields(
    qa: &dyn DocumentQa,
    image: &ImageData,
    policy: &RetryPolicy,
) -> Result<FieldAnswers, (String, QaError)> {
    use crate::prompts::{DATE_QUESTION, ISSUER_QUESTION, TOTAL_QUESTION};

    let mut answers = Vec::with_capacity(3);
    for question in [TOTAL_QUESTION, DATE_QUESTION, ISSUER_QUESTION] {
        let answer = ask_with_retry(qa, image, question, policy)
            .await
            .map_err(|e| (question.to_string(), e))?;
        answers.push(answer);
    }

    let mut it = answers.into_iter();
    Ok(FieldAnswers {
        total: it.next().unwrap_or_default(),
        date: it.next().unwrap_or_default(),
        issuer: it.next().unwrap_or_default(),
    })
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Instantiate a named provider with the given model.
pub(crate) fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, BatchError> {
    edgequake_llm::ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        BatchError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn img() -> ImageData {
        ImageData::new("aGVsbG8=".to_string(), "image/png")
    }

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries: retries,
            backoff_ms: 0,
            timeout_secs: 5,
        }
    }

    /// Fails the first `fail_first` calls, then answers.
    struct FlakyQa {
        fail_first: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentQa for FlakyQa {
        async fn ask(&self, _image: &ImageData, _question: &str) -> Result<String, QaError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(QaError::Provider("HTTP 503".into()))
            } else {
                Ok("42.00".into())
            }
        }
    }

    #[tokio::test]
    async fn static_qa_matches_by_substring() {
        let qa = StaticQa::new()
            .answer("total purchase", "$12.50")
            .answer("receipt date", "June 14");
        assert_eq!(
            qa.ask(&img(), "What is the total purchase?").await.unwrap(),
            "$12.50"
        );
        assert!(qa.ask(&img(), "Who issued the receipt?").await.is_err());
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let qa = FlakyQa {
            fail_first: 2,
            calls: AtomicUsize::new(0),
        };
        let answer = ask_with_retry(&qa, &img(), "q", &policy(3)).await.unwrap();
        assert_eq!(answer, "42.00");
        assert_eq!(qa.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_exhausted_returns_last_error() {
        let qa = FlakyQa {
            fail_first: 10,
            calls: AtomicUsize::new(0),
        };
        let err = ask_with_retry(&qa, &img(), "q", &policy(2)).await.unwrap_err();
        assert!(matches!(err, QaError::Provider(_)));
        // 1 initial + 2 retries
        assert_eq!(qa.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn hung_call_hits_the_deadline() {
        struct NeverQa;

        #[async_trait]
        impl DocumentQa for NeverQa {
            async fn ask(&self, _image: &ImageData, _question: &str) -> Result<String, QaError> {
                std::future::pending().await
            }
        }

        let p = RetryPolicy {
            max_retries: 0,
            backoff_ms: 0,
            timeout_secs: 0,
        };
        let err = ask_with_retry(&NeverQa, &img(), "q", &p).await.unwrap_err();
        assert!(matches!(err, QaError::Timeout { .. }));
    }

    #[tokio::test]
    async fn extract_fields_collects_all_three() {
        let qa = StaticQa::new()
            .answer("total purchase", "$5.25")
            .answer("receipt date", "2024-01-15")
            .answer("issued", "STARBUCKS");
        let fields = extract_fields(&qa, &img(), &policy(0)).await.unwrap();
        assert_eq!(
            fields,
            FieldAnswers {
                total: "$5.25".into(),
                date: "2024-01-15".into(),
                issuer: "STARBUCKS".into(),
            }
        );
    }

    #[tokio::test]
    async fn extract_fields_fails_whole_record_on_one_missing_answer() {
        // No issuer answer → the record must not be produced at all.
        let qa = StaticQa::new()
            .answer("total purchase", "$5.25")
            .answer("receipt date", "2024-01-15");
        let (question, _err) = extract_fields(&qa, &img(), &policy(0)).await.unwrap_err();
        assert!(question.contains("issued"), "got: {question}");
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 3,
            backoff_ms: 500,
            timeout_secs: 60,
        };
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1000));
        assert_eq!(p.backoff(3), Duration::from_millis(2000));
    }
}
