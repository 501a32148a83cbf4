//! Error types for the edgequake-incise library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`InciseError`]: **Fatal**: a precondition for the whole run is broken
//!   (zero body budget, windows out of order, an unresolvable duplicate,
//!   checkpoint directory not writable). Returned as `Err(InciseError)` from
//!   the top-level `convert*` functions and from [`crate::pipeline::merge`].
//!
//! * [`WindowError`]: **Non-fatal**: a single window failed (transient API
//!   error, unparseable reply) but every other window is fine. Stored inside
//!   [`crate::output::WindowResult`] so callers can inspect partial success.
//!
//! Losses that only affect one unit's fidelity (clipping an oversized unit,
//! aborting one duplicate chain) are not errors at all: they are logged and
//! recorded as [`crate::pipeline::merge::MergeIssue`] values.

use crate::pipeline::group::PageRange;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-incise library.
#[derive(Debug, Error)]
pub enum InciseError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or budget validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The tokenizer could not be constructed.
    #[error("Tokenizer unavailable: {0}")]
    Tokenizer(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// The unit corpus (or another XML input) could not be understood.
    #[error("Malformed input in {context}: {detail}")]
    MalformedInput { context: String, detail: String },

    // ── Sequencing / merge errors ─────────────────────────────────────────
    /// Windows were handed over out of ordinal order.
    #[error("Window {next} does not follow window {previous}")]
    WindowSequence { previous: PageRange, next: PageRange },

    /// More than one duplicate variant survived containment voting.
    ///
    /// The merger never guesses between equally complete variants; callers
    /// must disambiguate (for instance with another model call) and retry.
    #[error("Ambiguous duplicate for {what} at index {index}: {candidates} maximal variants")]
    AmbiguousDuplicate {
        what: String,
        index: usize,
        candidates: usize,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A stored window reply could not be read back.
    #[error("Failed to read checkpoint '{path}': {source}")]
    CheckpointRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A window reply could not be persisted.
    #[error("Failed to write checkpoint '{path}': {source}")]
    CheckpointWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the merged output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every window failed; there is nothing to merge.
    #[error("All {total} windows failed.\nFirst error: {first_error}")]
    AllWindowsFailed { total: usize, first_error: String },

    // ── Control flow ──────────────────────────────────────────────────────
    /// The caller raised the abort flag between two windows.
    #[error("Run aborted after {completed} windows")]
    Aborted { completed: usize },
}

impl InciseError {
    pub(crate) fn malformed(context: impl Into<String>, detail: impl ToString) -> Self {
        InciseError::MalformedInput {
            context: context.into(),
            detail: detail.to_string(),
        }
    }
}

/// A non-fatal error for a single window.
///
/// Stored alongside [`crate::output::WindowResult`] when a window fails.
/// The run continues unless ALL windows fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum WindowError {
    /// LLM call failed after retries.
    #[error("Window {range}: LLM call failed after {retries} retries: {detail}")]
    LlmFailed {
        range: PageRange,
        retries: u32,
        detail: String,
    },

    /// LLM call timed out on the final attempt.
    #[error("Window {range}: LLM call timed out after {secs}s")]
    Timeout { range: PageRange, secs: u64 },

    /// The reply was not a well-formed fragment list.
    #[error("Window {range}: malformed response: {detail}")]
    MalformedResponse { range: PageRange, detail: String },
}

impl WindowError {
    /// The window this error belongs to.
    pub fn range(&self) -> PageRange {
        match self {
            WindowError::LlmFailed { range, .. }
            | WindowError::Timeout { range, .. }
            | WindowError::MalformedResponse { range, .. } => *range,
        }
    }
}
