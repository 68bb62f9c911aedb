//! The field questions sent to the vision model.
//!
//! Centralising every question here serves two purposes:
//!
//! 1. **Single source of truth** — tightening a question's phrasing (the
//!    single biggest lever on answer quality) requires editing exactly one
//!    place.
//!
//! 2. **Testability** — unit tests and stub capabilities can match on these
//!    exact strings without spinning up a real model.

/// System prompt framing every field question.
///
/// Receipts invite commentary ("The total appears to be..."); the answer-only
/// instruction keeps responses short enough for the normalizer to scrub.
pub const QA_SYSTEM_PROMPT: &str = r#"You are reading a photo of a retail receipt.
Answer the question using only what is printed on the receipt.
Reply with the value alone — no sentences, no explanations, no punctuation
beyond what appears on the receipt. If the value is not visible, reply N/A."#;

/// Question for the purchase total.
pub const TOTAL_QUESTION: &str = "What is the total purchase?";

/// Question for the receipt date.
pub const DATE_QUESTION: &str = "What is the receipt date?";

/// Question for the issuing merchant.
pub const ISSUER_QUESTION: &str = "Who issued the receipt?";
