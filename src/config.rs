//! Configuration surface: the knobs the core exposes (spec §6), with TOML
//! load/save mirroring the teacher's `Config::load_toml`/`save_toml`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::binner::Action;

// `toml` requires map keys to be strings, so the bin id is stored as `u8`
// (1..=9) rather than the `Bin` enum directly; `Bin::default_policy_u8` and
// `BinPolicy::from_config` do the conversion.

/// All externally-tunable knobs for the four subsystems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of candidates the decoder returns per token.
    pub k: usize,
    /// Lidstone smoothing constant for emission estimation.
    pub lambda: f64,
    /// Whether dictionary membership tests are case-sensitive.
    pub case_sensitive: bool,
    /// Per-bin action map (bins 1..=9, keyed by the numeric bin id).
    pub bin_policy: HashMap<u8, Action>,
    /// Minimum run length of identical characters to qualify as an
    /// alignment anchor when chunking large documents.
    pub anchor_length: usize,
    /// Maximum |G|*|N| cells before the aligner switches to anchor chunking.
    pub cell_budget: usize,
    /// Needleman-Wunsch match score.
    pub match_score: i32,
    /// Needleman-Wunsch mismatch score.
    pub mismatch_score: i32,
    /// Needleman-Wunsch gap score (applied to either side).
    pub gap_score: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            k: 4,
            lambda: 1e-6,
            case_sensitive: true,
            bin_policy: crate::binner::Bin::default_policy_u8(),
            anchor_length: 5,
            cell_budget: 4_000_000,
            match_score: 2,
            mismatch_score: -1,
            gap_score: -1,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
