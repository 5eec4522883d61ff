//! Similarity-and-polarity predicates for contradiction detection.
//!
//! Detection is domain specific, so the detector only depends on the
//! [`ContradictionPredicate`] trait. [`LexicalPredicate`] is the default:
//! token overlap for similarity and a small negation lexicon for polarity.

use crate::domain::text;

/// Negation patterns that indicate opposing assertions, as
/// `(positive, negative)` word sequences.
const NEGATION_PAIRS: &[(&str, &str)] = &[
    ("always", "never"),
    ("must", "must not"),
    ("should", "should not"),
    ("enable", "disable"),
    ("enabled", "disabled"),
    ("allow", "deny"),
    ("allowed", "denied"),
    ("include", "exclude"),
    ("use", "avoid"),
    ("prefer", "avoid"),
    ("recommended", "discouraged"),
    ("required", "forbidden"),
    ("do", "don't"),
    ("can", "cannot"),
    ("safe", "unsafe"),
    ("secure", "insecure"),
    ("correct", "incorrect"),
    ("valid", "invalid"),
    ("true", "false"),
];

/// Words that negate the assertion they appear in.
const NEGATORS: &[&str] = &[
    "not", "no", "never", "don't", "doesn't", "didn't", "isn't", "aren't", "wasn't",
    "weren't", "won't", "can't", "cannot", "shouldn't", "mustn't", "nor",
];

/// Outcome of comparing two contents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairAssessment {
    /// Content similarity in `[0, 1]`.
    pub similarity: f64,
    /// Whether the two contents assert opposite things.
    pub opposing: bool,
}

impl PairAssessment {
    /// A contradiction is a similar pair with opposing polarity. The
    /// threshold is inclusive.
    pub fn contradicts(&self, threshold: f64) -> bool {
        self.opposing && self.similarity >= threshold
    }
}

/// Decides whether two memory contents are similar and opposed.
///
/// Implementations must be symmetric in their arguments; the detector
/// always passes contents in normalized pair order regardless.
pub trait ContradictionPredicate: Send + Sync + std::fmt::Debug {
    fn assess(&self, a: &str, b: &str) -> PairAssessment;
}

/// Token-overlap similarity plus lexicon-based polarity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalPredicate;

/// Space-padded word sequence, so phrases match on word boundaries.
fn padded(content: &str) -> String {
    format!(" {} ", text::words(content).join(" "))
}

fn has_phrase(padded: &str, phrase: &str) -> bool {
    padded.contains(&format!(" {phrase} "))
}

fn strip_phrase(padded: &str, phrase: &str) -> String {
    let needle = format!(" {phrase} ");
    let mut out = padded.to_string();
    while out.contains(&needle) {
        out = out.replace(&needle, " ");
    }
    out
}

/// `(asserts positive, asserts negative)` for one lexicon pair.
fn polarity(padded: &str, positive: &str, negative: &str) -> (bool, bool) {
    let neg = has_phrase(padded, negative);
    // "must not" also contains "must"; only count the positive term when
    // it survives removal of the negative phrase.
    let pos = if negative.starts_with(positive) || negative.ends_with(positive) {
        has_phrase(&strip_phrase(padded, negative), positive)
    } else {
        has_phrase(padded, positive)
    };
    (pos, neg)
}

fn has_negator(padded: &str) -> bool {
    NEGATORS.iter().any(|n| has_phrase(padded, n))
}

impl LexicalPredicate {
    fn opposing(a: &str, b: &str) -> bool {
        let (pa, pb) = (padded(a), padded(b));
        let lexicon = NEGATION_PAIRS.iter().any(|(positive, negative)| {
            let (a_pos, a_neg) = polarity(&pa, positive, negative);
            let (b_pos, b_neg) = polarity(&pb, positive, negative);
            (a_pos && !a_neg && b_neg && !b_pos) || (a_neg && !a_pos && b_pos && !b_neg)
        });
        lexicon || has_negator(&pa) != has_negator(&pb)
    }
}

impl ContradictionPredicate for LexicalPredicate {
    fn assess(&self, a: &str, b: &str) -> PairAssessment {
        PairAssessment {
            similarity: text::jaccard(&text::tokens(a), &text::tokens(b)),
            opposing: Self::opposing(a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assess(a: &str, b: &str) -> PairAssessment {
        LexicalPredicate.assess(a, b)
    }

    #[test]
    fn test_lexicon_pairs_oppose() {
        let r = assess("Always deploy on Friday", "Never deploy on Friday");
        assert!(r.opposing);
        assert!((r.similarity - 0.5).abs() < 1e-12);
        assert!(r.contradicts(0.5));
        assert!(!r.contradicts(0.6));
    }

    #[test]
    fn test_multiword_negative_phrase() {
        assert!(assess("You must rotate keys weekly", "You must not rotate keys weekly").opposing);
        assert!(!assess("You must not rotate keys", "You must not rotate keys").opposing);
    }

    #[test]
    fn test_negator_on_one_side() {
        let r = assess(
            "The staging database is reachable from CI",
            "The staging database is not reachable from CI",
        );
        assert!(r.opposing);
        assert!(r.similarity > 0.5);
    }

    #[test]
    fn test_same_polarity_is_not_opposing() {
        let r = assess("Deploys happen on Tuesday", "Deploys happen on Tuesday mornings");
        assert!(!r.opposing);
        assert!(!r.contradicts(0.0));
    }

    #[test]
    fn test_assessment_is_symmetric() {
        let a = "Enable TLS for internal traffic";
        let b = "Disable TLS for internal traffic";
        assert_eq!(assess(a, b), assess(b, a));
    }

    #[test]
    fn test_words_match_on_boundaries() {
        // "use" inside "because" must not count as the positive term.
        assert!(!assess("Avoid tabs because spaces", "Tabs because spaces").opposing);
    }
}
