//! Heuristic binning and per-bin correction policy (spec §4.4). No direct
//! teacher analogue exists (the teacher has no decision-table concept);
//! built directly from the nine-bin truth table, styled after `fuzzy.rs`'s
//! `FuzzyMap::from_rules`/rule-table parsing for the TSV round trip.

use std::collections::HashMap;

use crate::dictionary::Dictionary;
use crate::token::KBestEntry;

/// One of the nine equivalence classes over (original, top-k, dictionary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bin {
    B1,
    B2,
    B3,
    B4,
    B5,
    B6,
    B7,
    B8,
    B9,
}

impl Bin {
    pub fn id(self) -> u8 {
        match self {
            Bin::B1 => 1,
            Bin::B2 => 2,
            Bin::B3 => 3,
            Bin::B4 => 4,
            Bin::B5 => 5,
            Bin::B6 => 6,
            Bin::B7 => 7,
            Bin::B8 => 8,
            Bin::B9 => 9,
        }
    }

    pub fn from_id(id: u8) -> Option<Bin> {
        match id {
            1 => Some(Bin::B1),
            2 => Some(Bin::B2),
            3 => Some(Bin::B3),
            4 => Some(Bin::B4),
            5 => Some(Bin::B5),
            6 => Some(Bin::B6),
            7 => Some(Bin::B7),
            8 => Some(Bin::B8),
            9 => Some(Bin::B9),
            _ => None,
        }
    }

    pub const ALL: [Bin; 9] = [
        Bin::B1,
        Bin::B2,
        Bin::B3,
        Bin::B4,
        Bin::B5,
        Bin::B6,
        Bin::B7,
        Bin::B8,
        Bin::B9,
    ];

    /// Evaluate the four predicates and assign the bin per the exact table
    /// in spec §4.4. Total over every reachable boolean tuple: P1 implies
    /// P2 <=> P3 (since P1 means c1 = o), so (T,T,F,_) and (T,F,T,_) never
    /// arise and are not represented below.
    pub fn classify(p1: bool, p2: bool, p3: bool, p4: bool) -> Bin {
        match (p1, p2, p3, p4) {
            (true, true, true, _) => Bin::B1,
            (true, false, false, false) => Bin::B2,
            (true, false, false, true) => Bin::B3,
            (false, false, true, _) => Bin::B4,
            (false, false, false, false) => Bin::B5,
            (false, false, false, true) => Bin::B6,
            (false, true, true, _) => Bin::B7,
            (false, true, false, false) => Bin::B8,
            (false, true, false, true) => Bin::B9,
            // P1 => (P2 <=> P3); any other P1=true combination is
            // unreachable for a consistent caller, but default to the
            // dictionary-supported bin rather than panicking.
            (true, _, _, _) => Bin::B4,
        }
    }

    /// Default per-bin action map (bin id -> action), used by `Config`'s
    /// `Default` impl. A conservative starting policy: accept only when
    /// the top candidate is dictionary-backed or unchanged, defer
    /// otherwise.
    pub fn default_policy_u8() -> HashMap<u8, Action> {
        let mut map = HashMap::new();
        map.insert(Bin::B1.id(), Action::Original);
        map.insert(Bin::B2.id(), Action::Original);
        map.insert(Bin::B3.id(), Action::DictionaryPick);
        map.insert(Bin::B4.id(), Action::TopCandidate);
        map.insert(Bin::B5.id(), Action::Annotator);
        map.insert(Bin::B6.id(), Action::DictionaryPick);
        map.insert(Bin::B7.id(), Action::Original);
        map.insert(Bin::B8.id(), Action::Annotator);
        map.insert(Bin::B9.id(), Action::DictionaryPick);
        map
    }
}

/// Per-bin policy action (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Action {
    /// `o` — select the original token.
    Original,
    /// `k` — select the top candidate c1.
    TopCandidate,
    /// `d` — select the first in-dictionary candidate; falls back to `a`.
    DictionaryPick,
    /// `a` — defer to an annotator.
    Annotator,
}

impl Action {
    fn to_code(self) -> char {
        match self {
            Action::Original => 'o',
            Action::TopCandidate => 'k',
            Action::DictionaryPick => 'd',
            Action::Annotator => 'a',
        }
    }

    fn from_code(c: char) -> Option<Action> {
        match c {
            'o' => Some(Action::Original),
            'k' => Some(Action::TopCandidate),
            'd' => Some(Action::DictionaryPick),
            'a' => Some(Action::Annotator),
            _ => None,
        }
    }
}

/// The configured bin -> action mapping, with tab-separated-file round
/// trip (spec §6: "per-bin settings file (tab-separated bin_id -> action)").
#[derive(Debug, Clone)]
pub struct BinPolicy {
    actions: HashMap<Bin, Action>,
}

impl BinPolicy {
    pub fn from_map(map: &HashMap<u8, Action>) -> Self {
        let actions = map
            .iter()
            .filter_map(|(&id, &action)| Bin::from_id(id).map(|bin| (bin, action)))
            .collect();
        Self { actions }
    }

    pub fn action_for(&self, bin: Bin) -> Action {
        self.actions.get(&bin).copied().unwrap_or(Action::Annotator)
    }

    pub fn to_tsv(&self) -> String {
        let mut lines: Vec<String> = Bin::ALL
            .iter()
            .filter_map(|&bin| self.actions.get(&bin).map(|a| format!("{}\t{}", bin.id(), a.to_code())))
            .collect();
        lines.sort();
        lines.join("\n")
    }

    pub fn from_tsv(content: &str) -> Self {
        let mut actions = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, '\t');
            let (Some(id_str), Some(code_str)) = (parts.next(), parts.next()) else {
                tracing::warn!(line, "skipping malformed bin policy line");
                continue;
            };
            let Ok(id) = id_str.trim().parse::<u8>() else {
                tracing::warn!(line, "skipping bin policy line with unparsable bin id");
                continue;
            };
            let Some(bin) = Bin::from_id(id) else {
                tracing::warn!(id, "skipping bin policy line with unknown bin id");
                continue;
            };
            let Some(code) = code_str.trim().chars().next().and_then(Action::from_code) else {
                tracing::warn!(line, "skipping bin policy line with unknown action code");
                continue;
            };
            actions.insert(bin, code);
        }
        Self { actions }
    }
}

/// What the binner/corrector decided for one token.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionKind {
    AcceptedOriginal,
    AcceptedCandidate(usize),
    DictionaryPick,
    AnnotatorInput,
}

/// Output per token (spec §4.4, §6): either a resolved string or a
/// needs-annotation marker carrying (o, K, bin).
#[derive(Debug, Clone)]
pub struct BinDecision {
    pub bin: Bin,
    pub kind: DecisionKind,
    pub resolved: Option<String>,
}

/// Evaluate the four predicates for (original, k_best, dictionary) and
/// assign a bin (spec §4.4).
pub fn classify(original: &str, k_best: &[KBestEntry], dictionary: &Dictionary) -> Bin {
    let top = k_best.first();
    let p1 = top.map(|c| c.candidate == original).unwrap_or(false);
    let p2 = dictionary.contains(original);
    let p3 = top.map(|c| dictionary.contains(&c.candidate)).unwrap_or(false);
    let p4 = k_best.iter().skip(1).any(|c| dictionary.contains(&c.candidate));
    Bin::classify(p1, p2, p3, p4)
}

/// Apply the configured action for a token's bin, producing a `BinDecision`
/// (spec §4.4). The `d` action falls back to `a` when no candidate is
/// in-dictionary, a documented contract rather than an error (spec §7).
pub fn decide(
    original: &str,
    k_best: &[KBestEntry],
    dictionary: &Dictionary,
    policy: &BinPolicy,
) -> BinDecision {
    let bin = classify(original, k_best, dictionary);
    let action = policy.action_for(bin);
    tracing::debug!(?bin, ?action, original, "token binned");

    match action {
        Action::Original => BinDecision {
            bin,
            kind: DecisionKind::AcceptedOriginal,
            resolved: Some(original.to_string()),
        },
        Action::TopCandidate => match k_best.first() {
            Some(top) => BinDecision {
                bin,
                kind: DecisionKind::AcceptedCandidate(0),
                resolved: Some(top.candidate.clone()),
            },
            None => BinDecision {
                bin,
                kind: DecisionKind::AnnotatorInput,
                resolved: None,
            },
        },
        Action::DictionaryPick => {
            match k_best.iter().position(|c| dictionary.contains(&c.candidate)) {
                Some(idx) => BinDecision {
                    bin,
                    kind: DecisionKind::DictionaryPick,
                    resolved: Some(k_best[idx].candidate.clone()),
                },
                None => BinDecision {
                    bin,
                    kind: DecisionKind::AnnotatorInput,
                    resolved: None,
                },
            }
        }
        Action::Annotator => BinDecision {
            bin,
            kind: DecisionKind::AnnotatorInput,
            resolved: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, f64)]) -> Vec<KBestEntry> {
        pairs.iter().map(|&(c, p)| KBestEntry::new(c, p)).collect()
    }

    #[test]
    fn scenario_6_bin_1_accept_original() {
        let dict = Dictionary::from_word_list(["the", "thc"], true);
        let k_best = entries(&[("the", -0.1), ("thc", -2.0)]);
        let policy = BinPolicy::from_map(&Bin::default_policy_u8());
        let decision = decide("the", &k_best, &dict, &policy);
        assert_eq!(decision.bin, Bin::B1);
        assert_eq!(decision.resolved, Some("the".to_string()));
    }

    #[test]
    fn scenario_7_bin_3_dictionary_pick() {
        let dict = Dictionary::from_word_list(["Wagon"], true);
        let k_best = entries(&[("Wagor", -0.1), ("Vagor", -1.0), ("Wagon", -1.5)]);
        let mut raw_policy = Bin::default_policy_u8();
        raw_policy.insert(Bin::B3.id(), Action::DictionaryPick);
        let policy = BinPolicy::from_map(&raw_policy);
        let decision = decide("Wagor", &k_best, &dict, &policy);
        assert_eq!(decision.bin, Bin::B3);
        assert_eq!(decision.resolved, Some("Wagon".to_string()));
    }

    #[test]
    fn totality_every_tuple_yields_exactly_one_bin() {
        for p1 in [true, false] {
            for p2 in [true, false] {
                for p3 in [true, false] {
                    for p4 in [true, false] {
                        if p1 && p2 != p3 {
                            continue;
                        }
                        let _ = Bin::classify(p1, p2, p3, p4);
                    }
                }
            }
        }
    }

    #[test]
    fn bin_7_reachable_for_original_and_top_candidate_both_in_dictionary() {
        assert_eq!(Bin::classify(false, true, true, false), Bin::B7);
        assert_eq!(Bin::classify(false, true, true, true), Bin::B7);
    }

    #[test]
    fn consistency_p1_implies_p2_iff_p3() {
        assert_eq!(Bin::classify(true, true, true, false), Bin::B1);
    }

    #[test]
    fn dictionary_fallback_to_annotator_when_no_match() {
        let dict = Dictionary::from_word_list(["zzz"], true);
        let k_best = entries(&[("abc", -0.1)]);
        let mut raw = Bin::default_policy_u8();
        raw.insert(Bin::B5.id(), Action::DictionaryPick);
        let policy = BinPolicy::from_map(&raw);
        let decision = decide("abc", &k_best, &dict, &policy);
        assert_eq!(decision.kind, DecisionKind::AnnotatorInput);
        assert_eq!(decision.resolved, None);
    }

    #[test]
    fn tsv_round_trip() {
        let policy = BinPolicy::from_map(&Bin::default_policy_u8());
        let tsv = policy.to_tsv();
        let reloaded = BinPolicy::from_tsv(&tsv);
        for bin in Bin::ALL {
            assert_eq!(reloaded.action_for(bin), policy.action_for(bin));
        }
    }

    #[test]
    fn malformed_tsv_lines_are_skipped_not_fatal() {
        let policy = BinPolicy::from_tsv("1\to\nnot-a-number\tk\n2\tq\n3\td\n");
        assert_eq!(policy.action_for(Bin::B1), Action::Original);
        assert_eq!(policy.action_for(Bin::B3), Action::DictionaryPick);
        assert_eq!(policy.action_for(Bin::B2), Action::Annotator);
    }
}
