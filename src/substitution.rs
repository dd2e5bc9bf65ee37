//! Multi-character substitution rules M: gold substring <-> noisy surface
//! forms (spec §3, §4.3.2). Grounded on `fuzzy.rs`'s `FuzzyMap` — a
//! string-keyed rule table built from pairs, queried bidirectionally — but
//! generalized from single-syllable phonetic pairs to arbitrary-length
//! substring rewrites, and dropping the penalty-weighted expansion (the
//! decoder scores expansions under the HMM directly, not via a fixed
//! penalty).

use ahash::AHashMap;

/// A gold substring -> list of noisy surface forms it may appear as, plus
/// the reverse index for the noisy -> gold direction used during decode.
#[derive(Debug, Clone, Default)]
pub struct SubstitutionRules {
    gold_to_noisy: AHashMap<String, Vec<String>>,
    noisy_to_gold: AHashMap<String, Vec<String>>,
}

impl SubstitutionRules {
    /// Build from explicit (gold, noisy) pairs, e.g. `("rn", "m")` for the
    /// rule `rn -> [m]`. Duplicate pairs are deduplicated.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut rules = Self::default();
        for (gold, noisy) in pairs {
            if gold.is_empty() || noisy.is_empty() {
                continue;
            }
            let fwd = rules.gold_to_noisy.entry(gold.clone()).or_default();
            if !fwd.contains(&noisy) {
                fwd.push(noisy.clone());
            }
            let bwd = rules.noisy_to_gold.entry(noisy).or_default();
            if !bwd.contains(&gold) {
                bwd.push(gold);
            }
        }
        rules
    }

    /// Build from a `gold -> [noisy, ...]` map, the shape spec §3 describes
    /// directly (`m -> [im, rn]`).
    pub fn from_map(map: AHashMap<String, Vec<String>>) -> Self {
        let pairs = map
            .into_iter()
            .flat_map(|(gold, noisies)| noisies.into_iter().map(move |n| (gold.clone(), n)));
        Self::from_pairs(pairs)
    }

    pub fn is_empty(&self) -> bool {
        self.gold_to_noisy.is_empty()
    }

    /// For each rule whose noisy substring occurs in `w`, generate `w'` by
    /// replacing exactly one occurrence with the paired gold substring.
    /// Applies both directions of the mapping (spec §4.3.2: "both
    /// directions of the mapping are used"), at most once per occurrence,
    /// no cascading. Returns deduplicated hypotheses, excluding `w` itself.
    pub fn expand(&self, w: &str) -> Vec<String> {
        let mut out = Vec::new();
        for (noisy_sub, golds) in &self.noisy_to_gold {
            for occurrence in find_occurrences(w, noisy_sub) {
                for gold_sub in golds {
                    let rewritten = rewrite_at(w, occurrence, noisy_sub.len(), gold_sub);
                    if rewritten != w && !out.contains(&rewritten) {
                        out.push(rewritten);
                    }
                }
            }
        }
        for (gold_sub, noisies) in &self.gold_to_noisy {
            for occurrence in find_occurrences(w, gold_sub) {
                for noisy_sub in noisies {
                    let rewritten = rewrite_at(w, occurrence, gold_sub.len(), noisy_sub);
                    if rewritten != w && !out.contains(&rewritten) {
                        out.push(rewritten);
                    }
                }
            }
        }
        out
    }

    /// Canonical string form for cache fingerprinting (spec §9): rules
    /// sorted by (gold, noisy) so the fingerprint doesn't depend on
    /// insertion order.
    pub fn canonical_form(&self) -> String {
        let mut pairs: Vec<(&str, &str)> = self
            .gold_to_noisy
            .iter()
            .flat_map(|(g, ns)| ns.iter().map(move |n| (g.as_str(), n.as_str())))
            .collect();
        pairs.sort_unstable();
        pairs
            .into_iter()
            .map(|(g, n)| format!("{g}\0{n}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = ahash::AHasher::default();
        self.canonical_form().hash(&mut hasher);
        hasher.finish()
    }
}

/// Byte-index occurrences of `needle` in `haystack` (non-overlapping isn't
/// required here — each is rewritten independently into its own hypothesis).
fn find_occurrences(haystack: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    haystack.match_indices(needle).map(|(i, _)| i).collect()
}

fn rewrite_at(w: &str, byte_start: usize, old_len: usize, replacement: &str) -> String {
    let mut out = String::with_capacity(w.len() + replacement.len());
    out.push_str(&w[..byte_start]);
    out.push_str(replacement);
    out.push_str(&w[byte_start + old_len..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_noisy_to_gold_rewrite() {
        let rules = SubstitutionRules::from_pairs([("rn".to_string(), "m".to_string())]);
        let hyps = rules.expand("modem");
        assert!(hyps.contains(&"moderm".to_string()) || hyps.iter().any(|h| h.contains("rn")));
    }

    #[test]
    fn scenario_5_modern_hypothesis_generated() {
        let rules = SubstitutionRules::from_pairs([("rn".to_string(), "m".to_string())]);
        let hyps = rules.expand("modem");
        assert!(hyps.contains(&"modern".to_string()));
    }

    #[test]
    fn bidirectional_expansion_both_directions() {
        let rules = SubstitutionRules::from_pairs([("m".to_string(), "rn".to_string())]);
        let hyps_noisy = rules.expand("modern");
        assert!(hyps_noisy.contains(&"modem".to_string()));
    }

    #[test]
    fn no_occurrence_yields_no_hypotheses() {
        let rules = SubstitutionRules::from_pairs([("rn".to_string(), "m".to_string())]);
        assert!(rules.expand("hello").is_empty());
    }

    #[test]
    fn from_map_builds_many_to_one_and_one_to_many() {
        let mut map = AHashMap::new();
        map.insert("m".to_string(), vec!["im".to_string(), "rn".to_string()]);
        let rules = SubstitutionRules::from_map(map);
        assert!(rules.expand("rn").contains(&"m".to_string()));
        assert!(rules.expand("im").contains(&"m".to_string()));
    }

    #[test]
    fn fingerprint_is_stable_regardless_of_insertion_order() {
        let a = SubstitutionRules::from_pairs([
            ("rn".to_string(), "m".to_string()),
            ("li".to_string(), "h".to_string()),
        ]);
        let b = SubstitutionRules::from_pairs([
            ("li".to_string(), "h".to_string()),
            ("rn".to_string(), "m".to_string()),
        ]);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
