//! Compact integer coding for the character alphabet Σ ∪ E (spec §9,
//! "Dynamic character keys"). The teacher indexes n-grams and lexicon keys by
//! string; here the HMM states are indexed by a dense `usize` assigned once
//! from the observed alphabet, with a side table for serialization.

use ahash::AHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Σ ∪ E, compactly indexed. Index 0..len() covers every known character;
/// there is no reserved "unknown" slot in the table itself — callers that
/// see a character outside the alphabet fall back to a uniform emission
/// (spec §4.3.1) rather than consulting this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    chars: Vec<char>,
    index: AHashMap<char, usize>,
}

impl Alphabet {
    /// Build an alphabet from a base character set and an extension set,
    /// deduplicated and sorted for deterministic indexing (required for the
    /// cache fingerprint in `hmm.rs` to be stable across runs).
    pub fn new<I, J>(base: I, extension: J) -> Self
    where
        I: IntoIterator<Item = char>,
        J: IntoIterator<Item = char>,
    {
        let mut set: std::collections::BTreeSet<char> = base.into_iter().collect();
        set.extend(extension);
        Self::from_sorted(set.into_iter().collect())
    }

    fn from_sorted(chars: Vec<char>) -> Self {
        let index = chars.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        Self { chars, index }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn index(&self, c: char) -> Option<usize> {
        self.index.get(&c).copied()
    }

    pub fn char_at(&self, idx: usize) -> char {
        self.chars[idx]
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn contains(&self, c: char) -> bool {
        self.index.contains_key(&c)
    }
}

impl Serialize for Alphabet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.chars.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Alphabet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let chars = Vec::<char>::deserialize(deserializer)?;
        Ok(Self::from_sorted(chars))
    }
}
