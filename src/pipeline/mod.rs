//! Pipeline stages for one image's trip from file to ledger row.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and lets us swap
//! implementations (e.g. a different upload host) without touching other
//! stages.
//!
//! ## Data Flow
//!
//! ```text
//! discover ──▶ fingerprint ──▶ publish ──▶ qa ──▶ normalize
//! (folder)     (pixel hash)    (upload)   (ask×3)  (typed values)
//! ```
//!
//! 1. [`discover`]    — enumerate image files in the input folder
//! 2. [`fingerprint`] — SHA-256 over decoded pixels for content dedup
//! 3. [`encode`]      — base64-wrap file bytes for the model; JPEG re-encode
//!    for upload
//! 4. [`publish`]     — best-effort upload to the short-lived remote host
//! 5. [`qa`]          — drive the three field questions with retry/backoff;
//!    the only stage with model I/O
//! 6. [`normalize`]   — free-text answers → decimal amount and ISO date,
//!    with verbatim passthrough on anything unparsable

pub mod discover;
pub mod encode;
pub mod fingerprint;
pub mod normalize;
pub mod publish;
pub mod qa;
