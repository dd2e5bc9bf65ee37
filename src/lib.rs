//! correctocr-core
//!
//! Character-level noise modeling and heuristic decision-making for
//! correcting OCR output: Needleman-Wunsch alignment of gold/noisy text
//! pairs, Laplace/Lidstone-smoothed HMM parameter estimation, k-best
//! Viterbi decoding with multi-character substitution expansion, and a
//! nine-bin heuristic policy for turning decoder output into either an
//! automatic correction or a request for human annotation.
//!
//! This crate provides the correction core only: tokenization, document
//! I/O, and any annotator UI are expected to sit on top of it.
//!
//! Public API:
//! - `Aligner` - Needleman-Wunsch alignment and misread tallying
//! - `Hmm` / `ModelBuilder` - the noise model and its estimator
//! - `Decoder` - k-best Viterbi decoding with a content-addressed cache
//! - `SubstitutionRules` - multi-character substitution expansion
//! - `Dictionary` - word-set membership (in-memory or FST-backed)
//! - `Token` / `KBestEntry` - the unit of correction and its candidates
//! - `Bin` / `BinPolicy` / `decide` - the heuristic decision table
//! - `CorrectionTracker` / `AnnotationSession` - persistence and memoization
//! - `Config` - tunable knobs with TOML load/save

pub mod alphabet;
pub use alphabet::Alphabet;

pub mod alignment;
pub use alignment::{AlignScores, Aligner, AlignedPair, MisreadCount};

pub mod hmm;
pub use hmm::{Hmm, ModelBuilder};

pub mod substitution;
pub use substitution::SubstitutionRules;

pub mod decoder;
pub use decoder::{Decoder, DecodeCache, LruDecodeCache, NullDecodeCache};

pub mod dictionary;
pub use dictionary::Dictionary;

pub mod token;
pub use token::{KBestEntry, Token, TokenKind};

pub mod binner;
pub use binner::{decide, Action, Bin, BinDecision, BinPolicy, DecisionKind};

pub mod corrector;
pub use corrector::{AnnotationMemo, AnnotationSession, CorrectionTracker};

pub mod error;
pub use error::CorrectOcrError;

pub mod config;
pub use config::Config;
