//! Needleman-Wunsch global alignment between gold and noisy strings, with
//! anchor chunking for scalability (spec §4.1). Grounded on the score-matrix
//! + traceback-path shape common to NW implementations in the reference
//! pack (e.g. `needleman-wunsch-typst`, `helix-core::alignment`), adapted to
//! this spec's fixed integer scoring and `diagonal > up > left` tie-break.

use ahash::AHashMap;
use std::collections::HashMap;

/// One position of an alignment: `(gold, noisy)`, where `None` is the gap
/// symbol ε. Never `(None, None)`.
pub type AlignedPair = (Option<char>, Option<char>);

/// Tally of (gold_char_or_gap, noisy_char_or_gap) -> observed count,
/// accumulated across one or more alignments.
pub type MisreadCount = AHashMap<(Option<char>, Option<char>), u64>;

/// Match/mismatch/gap scores plus the anchor-chunking knobs (spec §4.1).
#[derive(Debug, Clone, Copy)]
pub struct AlignScores {
    pub match_score: i32,
    pub mismatch_score: i32,
    pub gap_score: i32,
    pub anchor_length: usize,
    pub cell_budget: usize,
}

impl Default for AlignScores {
    fn default() -> Self {
        Self {
            match_score: 2,
            mismatch_score: -1,
            gap_score: -1,
            anchor_length: 5,
            cell_budget: 4_000_000,
        }
    }
}

/// Aligns gold/noisy string pairs and tallies misread counts. Never fails:
/// both-empty yields an empty alignment, one-empty yields an all-gap
/// alignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aligner {
    pub scores: AlignScores,
}

impl Aligner {
    pub fn new(scores: AlignScores) -> Self {
        Self { scores }
    }

    /// Align gold `g` against noisy `n`, chunking on exact-match anchors
    /// when the full DP table would exceed `cell_budget`.
    pub fn align(&self, g: &str, n: &str) -> Vec<AlignedPair> {
        let g: Vec<char> = g.chars().collect();
        let n: Vec<char> = n.chars().collect();
        self.align_chars(&g, &n)
    }

    fn align_chars(&self, g: &[char], n: &[char]) -> Vec<AlignedPair> {
        if g.is_empty() && n.is_empty() {
            return Vec::new();
        }
        if g.is_empty() {
            return n.iter().map(|&c| (None, Some(c))).collect();
        }
        if n.is_empty() {
            return g.iter().map(|&c| (Some(c), None)).collect();
        }

        let cells = g.len().saturating_mul(n.len());
        if cells <= self.scores.cell_budget {
            return self.needleman_wunsch(g, n);
        }

        self.align_chunked(g, n)
    }

    /// Plain global alignment via Needleman-Wunsch.
    ///
    /// The tie-break contract (diagonal > up > left) picks among *optimal
    /// continuations* read left-to-right, not among predecessors read from
    /// the end backwards — those differ whenever a tie's indel can land at
    /// either end of the alignment. So traceback walks forward from (0,0),
    /// using a suffix-score table to test which of the forward moves stays
    /// on an optimal path, preferring diagonal first.
    fn needleman_wunsch(&self, g: &[char], n: &[char]) -> Vec<AlignedPair> {
        let suf = self.suffix_scores(g, n);
        let (len_g, len_n) = (g.len(), n.len());
        let mut pairs = Vec::with_capacity(len_g + len_n);
        let (mut i, mut j) = (0usize, 0usize);

        while i < len_g || j < len_n {
            let (rg, rn) = (len_g - i, len_n - j);

            if rg > 0 && rn > 0 {
                let cost = if g[i] == n[j] {
                    self.scores.match_score
                } else {
                    self.scores.mismatch_score
                } as i64;
                if suf[rg][rn] == cost + suf[rg - 1][rn - 1] {
                    pairs.push((Some(g[i]), Some(n[j])));
                    i += 1;
                    j += 1;
                    continue;
                }
            }
            if rg > 0 {
                let cost = self.scores.gap_score as i64;
                if suf[rg][rn] == cost + suf[rg - 1][rn] {
                    pairs.push((Some(g[i]), None));
                    i += 1;
                    continue;
                }
            }
            // Only the insertion-in-noisy branch can remain optimal here.
            pairs.push((None, Some(n[j])));
            j += 1;
        }
        pairs
    }

    /// `suf[p][q]` = best alignment score of the last `p` gold chars against
    /// the last `q` noisy chars. NW scores are invariant under simultaneous
    /// reversal of both sequences, so this is plain NW on the reversed
    /// strings; no traceback is needed here, only the score values.
    fn suffix_scores(&self, g: &[char], n: &[char]) -> Vec<Vec<i64>> {
        let rg: Vec<char> = g.iter().rev().copied().collect();
        let rn: Vec<char> = n.iter().rev().copied().collect();
        let (rows, cols) = (rg.len() + 1, rn.len() + 1);
        let mut score = vec![vec![0i64; cols]; rows];

        for i in 1..rows {
            score[i][0] = score[i - 1][0] + self.scores.gap_score as i64;
        }
        for j in 1..cols {
            score[0][j] = score[0][j - 1] + self.scores.gap_score as i64;
        }
        for i in 1..rows {
            for j in 1..cols {
                let sub = if rg[i - 1] == rn[j - 1] {
                    self.scores.match_score
                } else {
                    self.scores.mismatch_score
                } as i64;
                let diag = score[i - 1][j - 1] + sub;
                let up = score[i - 1][j] + self.scores.gap_score as i64;
                let left = score[i][j - 1] + self.scores.gap_score as i64;
                score[i][j] = diag.max(up).max(left);
            }
        }
        score
    }

    /// Split on exact-match anchors (runs of identical characters present
    /// verbatim in both strings) so each gap between anchors is aligned
    /// independently with a bounded DP table.
    fn align_chunked(&self, g: &[char], n: &[char]) -> Vec<AlignedPair> {
        let anchors = find_anchors(g, n, self.scores.anchor_length);

        let mut pairs = Vec::new();
        let (mut gi, mut ni) = (0usize, 0usize);
        for (g_start, n_start, len) in anchors {
            if g_start > gi || n_start > ni {
                pairs.extend(self.align_chars(&g[gi..g_start], &n[ni..n_start]));
            }
            for off in 0..len {
                pairs.push((Some(g[g_start + off]), Some(n[n_start + off])));
            }
            gi = g_start + len;
            ni = n_start + len;
        }
        if gi < g.len() || ni < n.len() {
            pairs.extend(self.align_chars(&g[gi..], &n[ni..]));
        }
        pairs
    }

    /// Accumulate misread counts from a single alignment into `counts`.
    pub fn tally(counts: &mut MisreadCount, pairs: &[AlignedPair]) {
        for &pair in pairs {
            *counts.entry(pair).or_insert(0) += 1;
        }
    }

    /// Align and tally in one call (the Aligner's primary entry point
    /// during training, per spec §2 dataflow).
    pub fn align_and_tally(&self, g: &str, n: &str) -> (Vec<AlignedPair>, MisreadCount) {
        let pairs = self.align(g, n);
        let mut counts = MisreadCount::default();
        Self::tally(&mut counts, &pairs);
        (pairs, counts)
    }
}

/// Find deterministic, non-overlapping exact-match anchors of length >= `k`
/// shared between `g` and `n`, in increasing order. Anchors are chosen
/// greedily left-to-right: for each `k`-gram position scanned over `n`, the
/// leftmost available match in `g` (at or after the end of the previous
/// anchor) is taken and extended as far as it matches.
fn find_anchors(g: &[char], n: &[char], k: usize) -> Vec<(usize, usize, usize)> {
    if k == 0 || g.len() < k || n.len() < k {
        return Vec::new();
    }

    let mut positions: HashMap<String, Vec<usize>> = HashMap::new();
    for i in 0..=(g.len() - k) {
        let key: String = g[i..i + k].iter().collect();
        positions.entry(key).or_default().push(i);
    }

    let mut anchors = Vec::new();
    let mut last_g_end = 0usize;
    let mut ni = 0usize;
    while ni + k <= n.len() {
        let key: String = n[ni..ni + k].iter().collect();
        let gi = positions
            .get(&key)
            .and_then(|cands| cands.iter().copied().find(|&p| p >= last_g_end));

        match gi {
            Some(gi) => {
                let mut len = k;
                while gi + len < g.len() && ni + len < n.len() && g[gi + len] == n[ni + len] {
                    len += 1;
                }
                anchors.push((gi, ni, len));
                last_g_end = gi + len;
                ni += len;
            }
            None => ni += 1,
        }
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aligner() -> Aligner {
        Aligner::default()
    }

    #[test]
    fn identical_strings_align_diagonally() {
        let (pairs, counts) = aligner().align_and_tally("hello", "hello");
        assert_eq!(pairs.len(), 5);
        for &(g, n) in &pairs {
            assert_eq!(g, n);
        }
        assert_eq!(counts[&(Some('h'), Some('h'))], 1);
        assert_eq!(counts[&(Some('e'), Some('e'))], 1);
        assert_eq!(counts[&(Some('l'), Some('l'))], 2);
        assert_eq!(counts[&(Some('o'), Some('o'))], 1);
    }

    #[test]
    fn rn_to_m_prefers_substitution_over_gap() {
        let (pairs, counts) = aligner().align_and_tally("rn", "m");
        assert_eq!(pairs, vec![(Some('r'), Some('m')), (Some('n'), None)]);
        assert_eq!(counts[&(Some('r'), Some('m'))], 1);
        assert_eq!(counts[&(Some('n'), None)], 1);
    }

    #[test]
    fn both_empty_is_empty() {
        let (pairs, counts) = aligner().align_and_tally("", "");
        assert!(pairs.is_empty());
        assert!(counts.is_empty());
    }

    #[test]
    fn one_empty_is_all_gaps() {
        let (pairs, _) = aligner().align_and_tally("abc", "");
        assert_eq!(pairs, vec![(Some('a'), None), (Some('b'), None), (Some('c'), None)]);
        let (pairs, _) = aligner().align_and_tally("", "xyz");
        assert_eq!(pairs, vec![(None, Some('x')), (None, Some('y')), (None, Some('z'))]);
    }

    #[test]
    fn alignment_round_trip_invariant() {
        let (pairs, _) = aligner().align_and_tally("government", "govemment");
        let g: String = pairs.iter().filter_map(|p| p.0).collect();
        let n: String = pairs.iter().filter_map(|p| p.1).collect();
        assert_eq!(g, "government");
        assert_eq!(n, "govemment");
    }

    #[test]
    fn anchor_chunking_matches_plain_alignment_on_small_budget() {
        let g = "the quick brown fox jumps over the lazy dog";
        let n = "the quick brown fox jumps over the lazy dog";
        let plain = Aligner::new(AlignScores {
            cell_budget: usize::MAX,
            ..Default::default()
        })
        .align(g, n);
        let chunked = Aligner::new(AlignScores {
            cell_budget: 1,
            anchor_length: 3,
            ..Default::default()
        })
        .align(g, n);
        let plain_g: String = plain.iter().filter_map(|p| p.0).collect();
        let plain_n: String = plain.iter().filter_map(|p| p.1).collect();
        let chunked_g: String = chunked.iter().filter_map(|p| p.0).collect();
        let chunked_n: String = chunked.iter().filter_map(|p| p.1).collect();
        assert_eq!(plain_g, chunked_g);
        assert_eq!(plain_n, chunked_n);
    }
}
