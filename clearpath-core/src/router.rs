//! Complexity router: greeting detection plus a deterministic 7-signal
//! weighted scorer.
//!
//! Pure functions over the query text, no I/O. Identical input always
//! yields identical output, so routed tiers are reproducible and
//! auditable. Signals live in a declarative table of `{name, weight,
//! predicate}` entries so the lists can be tuned without touching the
//! scoring loop.

use crate::types::Tier;
use serde::{Deserialize, Serialize};

/// Canned reply for greeting/farewell queries; no downstream calls happen.
pub const GREETING_RESPONSE: &str = "Hello! I'm ClearPath's support assistant. \
    I can help you with questions about ClearPath's features, pricing, \
    integrations, policies, and more. What would you like to know?";

const GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "thanks",
    "thank you",
    "good morning",
    "good afternoon",
    "good evening",
    "howdy",
    "greetings",
    "sup",
    "yo",
    "bye",
    "goodbye",
];

const ANALYTICAL_KEYWORDS: &[&str] = &[
    "how",
    "why",
    "explain",
    "compare",
    "difference",
    "troubleshoot",
    "debug",
    "analyze",
    "evaluate",
    "versus",
    "vs",
    "between",
];

const ERROR_KEYWORDS: &[&str] = &[
    "error",
    "cannot",
    "can't",
    "failed",
    "broken",
    "not working",
    "bug",
    "issue",
    "not loading",
    "won't load",
    "doesn't work",
    "isn't working",
    "isn't loading",
    "doesn't load",
    "can't load",
    "won't start",
    "crash",
    "crashing",
];

const NEGATION_WORDS: &[&str] = &[
    "not",
    "no",
    "doesn't",
    "don't",
    "won't",
    "without",
    "except",
    "never",
    "isn't",
    "can't",
    "couldn't",
    "shouldn't",
    "wouldn't",
    "hasn't",
    "haven't",
    "weren't",
    "wasn't",
];

const SENSITIVE_TOPICS: &[&str] = &[
    "price",
    "pricing",
    "cost",
    "billing",
    "payment",
    "security",
    "data",
    "privacy",
    "compliance",
    "legal",
];

/// Score at or above which a query routes to the complex tier.
///
/// Chosen jointly with the signal weights so that no single signal group
/// (maximum weight 2) can cross the threshold alone.
const COMPLEX_THRESHOLD: u32 = 4;

/// The routing decision for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityScore {
    pub tier: Tier,
    pub total: u32,
    /// Signal name -> contributed weight, in table order.
    pub signals: Vec<(String, u32)>,
}

/// Lowercased, pre-split view of the query shared by all predicates.
struct QueryFeatures<'a> {
    raw: &'a str,
    lower: String,
    words: Vec<String>,
}

impl<'a> QueryFeatures<'a> {
    fn new(query: &'a str) -> Self {
        let lower = query.to_lowercase();
        // Trim punctuation so "pricing?" matches the keyword "pricing";
        // keep apostrophes for contractions like "can't".
        let words = lower
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !(c.is_alphanumeric() || c == '\''))
                    .to_string()
            })
            .filter(|w| !w.is_empty())
            .collect();
        Self {
            raw: query,
            lower,
            words,
        }
    }

    fn has_word(&self, word: &str) -> bool {
        self.words.iter().any(|w| w == word)
    }
}

struct Signal {
    name: &'static str,
    weight: u32,
    predicate: fn(&QueryFeatures) -> bool,
}

/// The seven signal groups. Length buckets are split into two mutually
/// exclusive rows so only the higher bucket ever contributes.
const SIGNALS: &[Signal] = &[
    Signal {
        name: "long_query",
        weight: 2,
        predicate: |f| f.words.len() > 25,
    },
    Signal {
        name: "medium_query",
        weight: 1,
        predicate: |f| f.words.len() > 15 && f.words.len() <= 25,
    },
    Signal {
        name: "analytical_keywords",
        weight: 2,
        predicate: |f| ANALYTICAL_KEYWORDS.iter().any(|kw| f.has_word(kw)),
    },
    Signal {
        name: "error_keywords",
        weight: 1,
        predicate: |f| ERROR_KEYWORDS.iter().any(|kw| f.lower.contains(kw)),
    },
    Signal {
        name: "negation",
        weight: 1,
        predicate: |f| NEGATION_WORDS.iter().any(|kw| f.has_word(kw)),
    },
    Signal {
        name: "multi_entity",
        weight: 2,
        predicate: has_multiple_entities,
    },
    Signal {
        name: "compound",
        weight: 1,
        predicate: |f| {
            f.raw.matches('?').count() > 1 || f.raw.matches(',').count() > 2 || f.raw.contains(';')
        },
    },
    Signal {
        name: "sensitive_topic",
        weight: 1,
        predicate: |f| SENSITIVE_TOPICS.iter().any(|kw| f.has_word(kw)),
    },
];

/// Two or more capitalized tokens after the first word, each longer than
/// one character, count as distinct named entities.
fn has_multiple_entities(features: &QueryFeatures) -> bool {
    let entities = features
        .raw
        .split_whitespace()
        .skip(1)
        .filter(|w| {
            let mut chars = w.chars();
            matches!(chars.next(), Some(c) if c.is_uppercase()) && chars.next().is_some()
        })
        .count();
    entities >= 2
}

/// Check whether a query is a plain greeting or farewell that can be
/// answered with [`GREETING_RESPONSE`] without any downstream calls.
pub fn is_greeting(query: &str) -> bool {
    let cleaned = query
        .trim()
        .trim_end_matches(['!', '.', ',', '?'])
        .to_lowercase();
    GREETINGS.contains(&cleaned.as_str())
}

/// Score a query against the signal table and pick a tier.
///
/// Total over all fired signals; total >= 4 routes to the complex tier.
pub fn classify(query: &str) -> ComplexityScore {
    let features = QueryFeatures::new(query);

    let mut total = 0;
    let mut signals = Vec::new();
    for signal in SIGNALS {
        if (signal.predicate)(&features) {
            total += signal.weight;
            signals.push((signal.name.to_string(), signal.weight));
        }
    }

    let tier = if total >= COMPLEX_THRESHOLD {
        Tier::Complex
    } else {
        Tier::Simple
    };

    ComplexityScore {
        tier,
        total,
        signals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal_names(score: &ComplexityScore) -> Vec<&str> {
        score.signals.iter().map(|(n, _)| n.as_str()).collect()
    }

    #[test]
    fn test_greeting_detection() {
        assert!(is_greeting("Hello"));
        assert!(is_greeting("hey!"));
        assert!(is_greeting("  Thank you.  "));
        assert!(is_greeting("GOOD MORNING"));
        assert!(!is_greeting("Hello, what is ClearPath?"));
        assert!(!is_greeting("What is ClearPath?"));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let query = "Why doesn't the Slack integration work after upgrading to Enterprise?";
        let first = classify(query);
        for _ in 0..10 {
            let again = classify(query);
            assert_eq!(first.tier, again.tier);
            assert_eq!(first.total, again.total);
            assert_eq!(first.signals, again.signals);
        }
    }

    #[test]
    fn test_simple_query() {
        let score = classify("What is ClearPath?");
        assert_eq!(score.tier, Tier::Simple);
        assert_eq!(score.total, 0);
        assert!(score.signals.is_empty());
    }

    #[test]
    fn test_pricing_query_scores_one() {
        // End-to-end scenario anchor: only the sensitive-topic signal fires.
        let score = classify("What's the Pro plan pricing?");
        assert_eq!(score.total, 1);
        assert_eq!(score.tier, Tier::Simple);
        assert_eq!(signal_names(&score), vec!["sensitive_topic"]);
    }

    #[test]
    fn test_analytical_plus_entities_is_complex() {
        let score = classify("Compare Pro and Enterprise plans");
        // analytical (+2) + multi_entity Pro/Enterprise (+2) = 4
        assert_eq!(score.total, 4);
        assert_eq!(score.tier, Tier::Complex);
    }

    #[test]
    fn test_two_minimum_weight_groups_stay_simple() {
        // error (+1) + sensitive_topic (+1) + negation via "not" would push it,
        // so pick words that only hit two one-weight groups.
        let score = classify("billing page shows an error");
        assert_eq!(score.total, 2);
        assert_eq!(score.tier, Tier::Simple);
    }

    #[test]
    fn test_threshold_boundary_three_stays_simple() {
        // medium_query (+1) + error (+1) + sensitive (+1) = 3 -> simple.
        let score = classify(
            "my billing page keeps showing me a strange error whenever i open the invoices tab on my account today",
        );
        assert_eq!(score.total, 3, "signals: {:?}", score.signals);
        assert_eq!(score.tier, Tier::Simple);
    }

    #[test]
    fn test_threshold_boundary_four_is_complex() {
        // Same query plus a negation token crosses to 4.
        let score = classify(
            "my billing page keeps showing me a strange error whenever i open the invoices tab but not the reports tab",
        );
        assert_eq!(score.total, 4, "signals: {:?}", score.signals);
        assert_eq!(score.tier, Tier::Complex);
    }

    #[test]
    fn test_single_max_weight_group_cannot_cross_threshold() {
        // Entities alone contribute 2 and must stay below the threshold.
        let score = classify("the Acme Dashboard Widget");
        assert!(score.total < 4);
        assert_eq!(score.tier, Tier::Simple);
    }

    #[test]
    fn test_length_buckets_are_exclusive() {
        let medium: String = (0..20).map(|i| format!("w{i} ")).collect();
        let score = classify(&medium);
        assert_eq!(signal_names(&score), vec!["medium_query"]);
        assert_eq!(score.total, 1);

        let long: String = (0..30).map(|i| format!("w{i} ")).collect();
        let score = classify(&long);
        assert_eq!(signal_names(&score), vec!["long_query"]);
        assert_eq!(score.total, 2);
    }

    #[test]
    fn test_compound_structure() {
        let score = classify("does it sync; does it archive");
        assert!(signal_names(&score).contains(&"compound"));

        let score = classify("Can I export? And can I import?");
        assert!(signal_names(&score).contains(&"compound"));
    }

    #[test]
    fn test_error_keywords_match_phrases() {
        let score = classify("my timeline view isn't loading after upgrading");
        assert!(signal_names(&score).contains(&"error_keywords"));
    }

    #[test]
    fn test_entity_detection_skips_first_word() {
        // Only the leading capital; no entity signal.
        let score = classify("Where is the export button");
        assert!(!signal_names(&score).contains(&"multi_entity"));

        let score = classify("does ClearPath integrate with Slack and Jira");
        assert!(signal_names(&score).contains(&"multi_entity"));
    }
}
