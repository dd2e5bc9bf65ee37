//! Token lifecycle type and the k-best entry it carries (spec §3, §6).
//! Grounded on `candidate.rs`'s `Candidate { text, score }` pair shape,
//! narrowed here to `(String, f64)` log-probabilities with no pagination
//! state (the decoder always produces exactly `k` entries, sorted).

use serde::{Deserialize, Serialize};

/// A single (candidate_string, log_prob) entry. Per token the decoder
/// emits exactly `k` of these, sorted descending by `log_prob`, ties
/// broken lexicographically by `candidate` (spec §3, §4.3.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KBestEntry {
    pub candidate: String,
    pub log_prob: f64,
}

impl KBestEntry {
    pub fn new(candidate: impl Into<String>, log_prob: f64) -> Self {
        Self {
            candidate: candidate.into(),
            log_prob,
        }
    }

    /// Sort order for k-best lists: descending log_prob, ties broken by
    /// ascending lexicographic order of `candidate` (spec §3, §4.3.1).
    pub fn cmp_rank(a: &KBestEntry, b: &KBestEntry) -> std::cmp::Ordering {
        b.log_prob
            .partial_cmp(&a.log_prob)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.candidate.cmp(&b.candidate))
    }
}

/// Whether a tokenizer-emitted record should be decoded or passed through
/// untouched (spec §6: "token_type distinguishes word tokens ... from
/// whitespace/punctuation").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Word,
    PassThrough,
}

/// The unit of correction. Created by the (external) tokenizer, populated
/// by the Decoder, classified by the Binner, finalized by the Corrector or
/// an annotator (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub doc_id: String,
    /// Positional index within the document; the tokenizer assigns this
    /// and the pipeline must preserve it (spec §5 ordering guarantee).
    pub index: usize,
    pub original: String,
    pub kind: TokenKind,
    pub k_best: Vec<KBestEntry>,
    pub gold: Option<String>,
    pub hyphenated: bool,
    pub discarded: bool,
}

impl Token {
    pub fn new(doc_id: impl Into<String>, index: usize, original: impl Into<String>, kind: TokenKind) -> Self {
        Self {
            doc_id: doc_id.into(),
            index,
            original: original.into(),
            kind,
            k_best: Vec::new(),
            gold: None,
            hyphenated: false,
            discarded: false,
        }
    }

    /// Render this token's k-best list as one row of the stable CSV layout
    /// (spec §6): `OriginalToken,k1Candidate,k1Probability,k2Candidate,...`.
    /// Missing trailing entries (fewer than `k` candidates) render as empty
    /// fields, matching the padding-with-(`""`, −∞) contract of spec §9(c).
    pub fn to_csv_row(&self, k: usize) -> String {
        let mut fields = vec![csv_escape(&self.original)];
        for i in 0..k {
            match self.k_best.get(i) {
                Some(entry) => {
                    fields.push(csv_escape(&entry.candidate));
                    fields.push(entry.log_prob.to_string());
                }
                None => {
                    fields.push(String::new());
                    fields.push(String::new());
                }
            }
        }
        fields.join(",")
    }

    /// Parse one CSV row produced by `to_csv_row` back into an original
    /// string and its k-best list. Malformed rows (odd candidate/prob
    /// pairing, unparsable probability) are reported via
    /// `CorrectOcrError::MalformedInput`, per spec §7.
    pub fn from_csv_row(row: &str) -> Result<(String, Vec<KBestEntry>), crate::error::CorrectOcrError> {
        let fields: Vec<&str> = row.split(',').collect();
        if fields.is_empty() {
            return Err(crate::error::CorrectOcrError::MalformedInput {
                reason: "empty csv row".to_string(),
            });
        }
        let original = csv_unescape(fields[0]);
        let mut k_best = Vec::new();
        let mut i = 1;
        while i + 1 < fields.len() + 1 && i < fields.len() {
            let candidate = fields[i];
            let prob = fields.get(i + 1).copied().unwrap_or("");
            if !candidate.is_empty() {
                let log_prob = prob.parse::<f64>().map_err(|_| crate::error::CorrectOcrError::MalformedInput {
                    reason: format!("unparsable probability field {prob:?} in row {row:?}"),
                })?;
                k_best.push(KBestEntry::new(csv_unescape(candidate), log_prob));
            }
            i += 2;
        }
        Ok((original, k_best))
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_unescape(s: &str) -> String {
    if let Some(inner) = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        inner.replace("\"\"", "\"")
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_order_descending_logprob_then_lexicographic() {
        let mut entries = vec![
            KBestEntry::new("b", -1.0),
            KBestEntry::new("a", -1.0),
            KBestEntry::new("c", -0.5),
        ];
        entries.sort_by(KBestEntry::cmp_rank);
        assert_eq!(entries[0].candidate, "c");
        assert_eq!(entries[1].candidate, "a");
        assert_eq!(entries[2].candidate, "b");
    }

    #[test]
    fn csv_round_trip_preserves_k_best() {
        let mut tok = Token::new("doc1", 0, "the", TokenKind::Word);
        tok.k_best = vec![KBestEntry::new("the", -0.1), KBestEntry::new("thc", -2.0)];
        let row = tok.to_csv_row(4);
        let (original, k_best) = Token::from_csv_row(&row).unwrap();
        assert_eq!(original, "the");
        assert_eq!(k_best.len(), 2);
        assert_eq!(k_best[0].candidate, "the");
    }

    #[test]
    fn csv_row_pads_missing_candidates_with_empty_fields() {
        let mut tok = Token::new("doc1", 0, "x", TokenKind::Word);
        tok.k_best = vec![KBestEntry::new("x", -0.1)];
        let row = tok.to_csv_row(3);
        assert_eq!(row, "x,x,-0.1,,,,");
    }

    #[test]
    fn csv_escapes_commas_in_original() {
        let tok = Token::new("doc1", 0, "a,b", TokenKind::Word);
        let row = tok.to_csv_row(0);
        assert_eq!(row, "\"a,b\"");
        let (original, _) = Token::from_csv_row(&row).unwrap();
        assert_eq!(original, "a,b");
    }
}
