//! Dictionary D: a finite word set with case-sensitive membership tests
//! (spec §3, §6). Grounded on `lib.rs`'s `Lexicon` dual in-memory/FST
//! design (`map` for dynamic entries, `fst::Map` + bincode payloads for
//! large static corpora), narrowed from phrase lookup to plain membership.

use ahash::AHashSet;
use fst::Set;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::CorrectOcrError;

/// A finite word set. Either a small in-memory `AHashSet` (test/small
/// corpora) or an `fst::Set`-backed large-dictionary mode, mirroring the
/// teacher's `Lexicon`. Membership honors `case_sensitive` uniformly.
#[derive(Debug, Clone)]
pub struct Dictionary {
    words: AHashSet<String>,
    fst_set: Option<Set<Vec<u8>>>,
    case_sensitive: bool,
}

impl Dictionary {
    /// Build an in-memory dictionary from a word list (spec §6: "set of
    /// strings; one word per line"). Entries containing whitespace are
    /// malformed (spec §7) and are skipped, not fatal to the load.
    pub fn from_word_list<I, S>(words: I, case_sensitive: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = AHashSet::default();
        for raw in words {
            let raw = raw.as_ref();
            if raw.is_empty() || raw.chars().any(char::is_whitespace) {
                tracing::warn!(entry = raw, "skipping malformed dictionary entry");
                continue;
            }
            let key = if case_sensitive { raw.to_string() } else { raw.to_lowercase() };
            set.insert(key);
        }
        Self {
            words: set,
            fst_set: None,
            case_sensitive,
        }
    }

    /// Load an FST-backed large dictionary. The FST itself is built from
    /// pre-sorted, already-normalized keys by an external build step; this
    /// constructor only attaches the artifact for lookup.
    pub fn from_fst_bytes(bytes: Vec<u8>, case_sensitive: bool) -> Result<Self, CorrectOcrError> {
        let set = Set::new(bytes).map_err(|e| CorrectOcrError::MalformedInput {
            reason: format!("invalid fst dictionary: {e}"),
        })?;
        Ok(Self {
            words: AHashSet::default(),
            fst_set: Some(set),
            case_sensitive,
        })
    }

    pub fn load_fst_file<P: AsRef<Path>>(path: P, case_sensitive: bool) -> Result<Self, CorrectOcrError> {
        let mut file = File::open(path).map_err(|e| CorrectOcrError::Persistence(e.into()))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| CorrectOcrError::Persistence(e.into()))?;
        Self::from_fst_bytes(buf, case_sensitive)
    }

    /// Membership test, honoring the dictionary's case-sensitivity flag.
    pub fn contains(&self, word: &str) -> bool {
        let key = if self.case_sensitive { word.to_string() } else { word.to_lowercase() };
        if self.words.contains(&key) {
            return true;
        }
        match &self.fst_set {
            Some(set) => set.contains(&key),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        let fst_len = self.fst_set.as_ref().map(|s| s.len()).unwrap_or(0);
        self.words.len() + fst_len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All in-memory words in sorted order (used when building a new FST
    /// artifact from a dynamically-grown dictionary; FST-backed entries are
    /// not iterated since the teacher's `fst::Set` does not retain them
    /// separately from its own stream).
    pub fn iter_in_memory(&self) -> impl Iterator<Item = &str> {
        let mut words: Vec<&str> = self.words.iter().map(String::as_str).collect();
        words.sort_unstable();
        words.into_iter()
    }
}

/// Build a sorted FST set from an iterator of already-normalized keys,
/// matching `fst::Set::from_iter`'s requirement that input be sorted.
pub fn build_fst_set<I, S>(keys: I) -> Result<Set<Vec<u8>>, CorrectOcrError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut sorted: Vec<Vec<u8>> = keys.into_iter().map(|s| s.as_ref().to_vec()).collect();
    sorted.sort_unstable();
    sorted.dedup();
    Set::from_iter(sorted).map_err(|e| CorrectOcrError::MalformedInput {
        reason: format!("failed to build fst set: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_sensitive_membership() {
        let dict = Dictionary::from_word_list(["The", "quick"], true);
        assert!(dict.contains("The"));
        assert!(!dict.contains("the"));
    }

    #[test]
    fn case_insensitive_membership() {
        let dict = Dictionary::from_word_list(["The", "quick"], false);
        assert!(dict.contains("the"));
        assert!(dict.contains("THE"));
    }

    #[test]
    fn malformed_entries_with_whitespace_are_skipped() {
        let dict = Dictionary::from_word_list(["ok", "has space", ""], true);
        assert_eq!(dict.len(), 1);
        assert!(dict.contains("ok"));
        assert!(!dict.contains("has space"));
    }

    #[test]
    fn fst_backed_dictionary_membership() {
        let set = build_fst_set(["apple", "banana", "cherry"]).unwrap();
        let bytes = set.as_fst().as_bytes().to_vec();
        let dict = Dictionary::from_fst_bytes(bytes, true).unwrap();
        assert!(dict.contains("banana"));
        assert!(!dict.contains("durian"));
    }
}
