//! Typed error kinds for the correction pipeline (spec: error handling design).
//!
//! Pure computational functions (alignment, Viterbi, binning) never return
//! these for valid inputs; they surface only at the boundaries named below.

use thiserror::Error;

/// Failure kinds the core can report. Never used to short-circuit a whole
/// pipeline run — callers decide whether a given kind is fatal.
#[derive(Debug, Error)]
pub enum CorrectOcrError {
    /// A dictionary entry, rule, or corpus line was malformed (whitespace in
    /// a dictionary word, an empty rule side, non-UTF8 input already
    /// decoded upstream). The offending entry is skipped, not the whole load.
    #[error("malformed input: {reason}")]
    MalformedInput { reason: String },

    /// A row of Pi/A/B failed to sum to 1 within tolerance after a model
    /// build or reload. Fatal at model load.
    #[error("model inconsistency: {reason}")]
    ModelInconsistency { reason: String },

    /// Decoding could not complete for a token (e.g. the alignment/Viterbi
    /// DP table would exceed the configured cell budget). The token is
    /// marked undecoded; the caller continues with the rest of the batch.
    #[error("decode failed for token {token:?}: {reason}")]
    DecodeFailed { token: String, reason: String },

    /// The underlying persistence layer (redb) failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] anyhow::Error),
}
