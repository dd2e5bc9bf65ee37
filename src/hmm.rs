//! Hidden Markov Model over the gold-character alphabet: Π (initial), A
//! (transition), B (noisy emission). States are indexed by `Alphabet`
//! rather than keyed by character directly, per the "Dynamic character
//! keys" design note — Π/A/B are dense arrays, not string-keyed maps.
//!
//! Estimation (`ModelBuilder`) is grounded on `ngram.rs`'s
//! `counts_to_unigram_logprob`/`counts_to_bigram_logprob` add-k smoothing
//! shape, generalized from string n-grams to the fixed Σ-indexed arrays
//! this alphabet produces, and extended with Lidstone-smoothed emissions.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::alignment::MisreadCount;
use crate::alphabet::Alphabet;
use crate::error::CorrectOcrError;

/// Tolerance for the post-build row-sum invariant checks (spec: ±1e-9).
const INVARIANT_EPS: f64 = 1e-9;

/// Π/A/B over `Σ ∪ E`, plus the alphabet's own side table so the model is
/// fully self-describing on reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hmm {
    alphabet: Alphabet,
    /// Π(c): initial log-probability per state index.
    pi: Vec<f64>,
    /// A(c1, c2): transition log-probability, row-major by state index.
    a: Vec<Vec<f64>>,
    /// B(g, n): emission log-probability, row-major by state index.
    b: Vec<Vec<f64>>,
}

impl Hmm {
    /// Construct an `Hmm` directly from pre-computed log-probability
    /// arrays. Only used by tests that need an exact, hand-specified
    /// model (e.g. the identity-HMM scenario in spec §8) rather than one
    /// estimated by `ModelBuilder`.
    #[cfg(test)]
    pub(crate) fn from_parts(alphabet: Alphabet, pi: Vec<f64>, a: Vec<Vec<f64>>, b: Vec<Vec<f64>>) -> Self {
        Self { alphabet, pi, a, b }
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn num_states(&self) -> usize {
        self.alphabet.len()
    }

    pub fn initial_logprob(&self, state: usize) -> f64 {
        self.pi[state]
    }

    pub fn transition_logprob(&self, from: usize, to: usize) -> f64 {
        self.a[from][to]
    }

    /// Emission log-probability of `state` producing `c`. Unknown `c` (not
    /// in the alphabet) returns a uniform fallback of `ln(1/|Σ|)`, per
    /// spec §4.3.1 — callers are responsible for logging the unknown
    /// character once per session; this method is pure.
    pub fn emission_logprob(&self, state: usize, c: char) -> f64 {
        match self.alphabet.index(c) {
            Some(idx) => self.b[state][idx],
            None => -(self.num_states() as f64).ln(),
        }
    }

    /// Check that Π sums to 1 and every row of A and B sums to 1, within
    /// `INVARIANT_EPS`. Fatal at model load if violated (spec §7).
    pub fn check_invariants(&self) -> Result<(), CorrectOcrError> {
        let pi_sum: f64 = self.pi.iter().map(|p| p.exp()).sum();
        if (pi_sum - 1.0).abs() > INVARIANT_EPS {
            return Err(CorrectOcrError::ModelInconsistency {
                reason: format!("Pi sums to {pi_sum}, expected 1"),
            });
        }
        for (i, row) in self.a.iter().enumerate() {
            let sum: f64 = row.iter().map(|p| p.exp()).sum();
            if (sum - 1.0).abs() > INVARIANT_EPS {
                return Err(CorrectOcrError::ModelInconsistency {
                    reason: format!("A row {i} sums to {sum}, expected 1"),
                });
            }
        }
        for (i, row) in self.b.iter().enumerate() {
            let sum: f64 = row.iter().map(|p| p.exp()).sum();
            if (sum - 1.0).abs() > INVARIANT_EPS {
                return Err(CorrectOcrError::ModelInconsistency {
                    reason: format!("B row {i} sums to {sum}, expected 1"),
                });
            }
        }
        Ok(())
    }

    /// Save the model to the given path using bincode.
    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)?;
        Ok(())
    }

    /// Load the model from a bincode file, checking invariants on the way in.
    pub fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self, CorrectOcrError> {
        let file = File::open(path).map_err(|e| CorrectOcrError::Persistence(e.into()))?;
        let reader = BufReader::new(file);
        let model: Self =
            bincode::deserialize_from(reader).map_err(|e| CorrectOcrError::Persistence(e.into()))?;
        model.check_invariants()?;
        Ok(model)
    }

    /// Canonical fingerprint for cache-key purposes (spec §9, "Cache key
    /// fingerprinting"): hash Π, A, B in the alphabet's own canonical
    /// (sorted) character order, so the fingerprint is stable regardless
    /// of construction order.
    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = ahash::AHasher::default();
        self.alphabet.chars().hash(&mut hasher);
        for p in &self.pi {
            p.to_bits().hash(&mut hasher);
        }
        for row in &self.a {
            for p in row {
                p.to_bits().hash(&mut hasher);
            }
        }
        for row in &self.b {
            for p in row {
                p.to_bits().hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}

/// `logsumexp` over a slice of log-probabilities. Only needed if forward
/// (marginal) probabilities are wanted; Viterbi proper uses plain max
/// (spec §9, "Log-space arithmetic").
pub fn logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Builds an `Hmm` from training data: gold token corpus (for Π, A) plus
/// accumulated misread counts (for B).
pub struct ModelBuilder {
    pub lambda: f64,
}

impl ModelBuilder {
    pub fn new(lambda: f64) -> Self {
        Self { lambda }
    }

    /// Estimate Π, A, B and assemble the `Hmm`.
    ///
    /// `gold_tokens`: corpus of gold strings, used for Π (initial-char
    /// frequency) and A (bigram frequency).
    /// `misreads`: accumulated `(gold, noisy)` tally from the aligner; only
    /// entries with `Some(gold)` contribute emission mass (a deletion row,
    /// i.e. `gold = None`, has no state to attach to and is dropped).
    /// `extension`: extra characters (spec §3 "extension set E") seeded
    /// with uniform prior in all three distributions.
    pub fn build<I, J>(&self, gold_tokens: &[String], misreads: &MisreadCount, extension: I) -> Hmm
    where
        I: IntoIterator<Item = char>,
    {
        let base = misreads.keys().filter_map(|&(g, n)| g.or(n));
        let alphabet = Alphabet::new(base, extension);
        let n_states = alphabet.len();

        let pi = self.estimate_pi(&alphabet, gold_tokens);
        let a = self.estimate_a(&alphabet, gold_tokens);
        let b = self.estimate_b(&alphabet, misreads);

        let hmm = Hmm { alphabet, pi, a, b };
        debug_assert!(hmm.check_invariants().is_ok());
        tracing::info!(states = n_states, "hmm model built");
        hmm
    }

    fn estimate_pi(&self, alphabet: &Alphabet, gold_tokens: &[String]) -> Vec<f64> {
        let n = alphabet.len();
        let mut counts = vec![0u64; n];
        let mut total = 0u64;
        for tok in gold_tokens {
            if let Some(first) = tok.chars().next() {
                if let Some(idx) = alphabet.index(first) {
                    counts[idx] += 1;
                }
                total += 1;
            }
        }
        counts
            .iter()
            .map(|&c| ((1 + c) as f64 / (n as f64 + total as f64)).ln())
            .collect()
    }

    fn estimate_a(&self, alphabet: &Alphabet, gold_tokens: &[String]) -> Vec<Vec<f64>> {
        let n = alphabet.len();
        let mut bigram_counts = vec![vec![0u64; n]; n];
        let mut row_totals = vec![0u64; n];
        for tok in gold_tokens {
            let chars: Vec<char> = tok.chars().collect();
            for pair in chars.windows(2) {
                if let (Some(i), Some(j)) = (alphabet.index(pair[0]), alphabet.index(pair[1])) {
                    bigram_counts[i][j] += 1;
                    row_totals[i] += 1;
                }
            }
        }
        bigram_counts
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let denom = n as f64 + row_totals[i] as f64;
                row.into_iter()
                    .map(|c| ((1 + c) as f64 / denom).ln())
                    .collect()
            })
            .collect()
    }

    fn estimate_b(&self, alphabet: &Alphabet, misreads: &MisreadCount) -> Vec<Vec<f64>> {
        let n = alphabet.len();
        let mut counts = vec![vec![0f64; n]; n];
        for (&(g, noisy), &count) in misreads {
            let (Some(g), Some(noisy)) = (g, noisy) else {
                continue;
            };
            if let (Some(gi), Some(ni)) = (alphabet.index(g), alphabet.index(noisy)) {
                counts[gi][ni] += count as f64;
            }
        }
        counts
            .into_iter()
            .map(|row| {
                let seeded: Vec<f64> = row.into_iter().map(|c| c + self.lambda).collect();
                let total: f64 = seeded.iter().sum();
                if total <= 0.0 {
                    let uniform = 1.0 / n as f64;
                    return vec![uniform.ln(); n];
                }
                seeded.into_iter().map(|c| (c / total).ln()).collect()
            })
            .collect()
    }
}

/// Build an `AHashMap`-backed character frequency helper, used by callers
/// constructing an extension set from an auxiliary corpus scan.
pub fn observed_alphabet(tokens: &[String]) -> AHashMap<char, u64> {
    let mut counts = AHashMap::new();
    for tok in tokens {
        for c in tok.chars() {
            *counts.entry(c).or_insert(0u64) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::Aligner;

    fn build_from_pairs(gold: &[&str], noisy: &[&str]) -> (Hmm, MisreadCount) {
        let aligner = Aligner::default();
        let mut counts = MisreadCount::default();
        for (g, n) in gold.iter().zip(noisy.iter()) {
            let (_, tally) = aligner.align_and_tally(g, n);
            for (k, v) in tally {
                *counts.entry(k).or_insert(0) += v;
            }
        }
        let gold_tokens: Vec<String> = gold.iter().map(|s| s.to_string()).collect();
        let hmm = ModelBuilder::new(1e-6).build(&gold_tokens, &counts, []);
        (hmm, counts)
    }

    #[test]
    fn invariants_hold_after_build() {
        let (hmm, _) = build_from_pairs(&["ab", "ab", "ac"], &["ab", "ab", "ad"]);
        hmm.check_invariants().unwrap();
    }

    #[test]
    fn misread_counts_match_scenario_3() {
        let (_, counts) = build_from_pairs(&["ab", "ab", "ac"], &["ab", "ab", "ad"]);
        assert_eq!(counts[&(Some('a'), Some('a'))], 3);
        assert_eq!(counts[&(Some('b'), Some('b'))], 1);
        assert_eq!(counts[&(Some('b'), Some('d'))], 1);
        assert_eq!(counts[&(Some('c'), Some('c'))], 1);
    }

    #[test]
    fn b_prefers_observed_over_unseen_misread() {
        let (hmm, _) = build_from_pairs(&["ab", "ab", "ac"], &["ab", "ab", "ad"]);
        let b_idx = hmm.alphabet().index('b').unwrap();
        let b_to_b = hmm.emission_logprob(b_idx, 'b');
        let b_to_d = hmm.emission_logprob(b_idx, 'd');
        assert!(b_to_d.is_finite() && b_to_d < 0.0);
        assert!(b_to_b > b_to_d);
    }

    #[test]
    fn bincode_roundtrip_reproduces_decisions() {
        let (hmm, _) = build_from_pairs(&["ab", "ab", "ac"], &["ab", "ab", "ad"]);
        let bytes = bincode::serialize(&hmm).unwrap();
        let back: Hmm = bincode::deserialize(&bytes).unwrap();
        back.check_invariants().unwrap();
        assert_eq!(back.fingerprint(), hmm.fingerprint());
        let idx = hmm.alphabet().index('a').unwrap();
        assert_eq!(back.initial_logprob(idx), hmm.initial_logprob(idx));
    }

    #[test]
    fn unknown_symbol_gets_uniform_emission() {
        let (hmm, _) = build_from_pairs(&["ab"], &["ab"]);
        let idx = hmm.alphabet().index('a').unwrap();
        let expected = -(hmm.num_states() as f64).ln();
        assert_eq!(hmm.emission_logprob(idx, 'z'), expected);
    }

    #[test]
    fn logsumexp_matches_naive_sum() {
        let values = [0.0f64.ln(), (0.5f64).ln(), (0.25f64).ln()];
        let expected = (1.0f64 + 0.5 + 0.25).ln();
        assert!((logsumexp(&values) - expected).abs() < 1e-9);
    }

    #[test]
    fn logsumexp_all_neg_inf_is_neg_inf() {
        assert_eq!(logsumexp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }
}
