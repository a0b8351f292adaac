//! Post-generation answer evaluation.
//!
//! Flags unreliable outputs after the model responds: answers produced
//! without any retrieved context, refusals, and answers drawn from
//! segments that disagree with each other. Flags annotate the response
//! metadata; they never block delivery.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

use crate::types::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorFlag {
    /// The model answered substantively despite zero retrieved segments.
    NoContext,
    /// The answer is a refusal or an admission of missing information.
    Refusal,
    /// The retrieved segments (or the answer itself) report disagreeing
    /// facts.
    ConflictingSources,
}

impl EvaluatorFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoContext => "no_context",
            Self::Refusal => "refusal",
            Self::ConflictingSources => "conflicting_sources",
        }
    }
}

impl fmt::Display for EvaluatorFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static REFUSAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)i don'?t have (that |enough )?information",
        r"(?i)not mentioned in the (provided |available )?documents",
        r"(?i)i('m| am) (not sure|unable|sorry)",
        r"(?i)cannot (find|answer|help with)",
        r"(?i)no information (about|on|regarding)",
        r"(?i)not covered in the (context|documentation)",
        r"(?i)beyond (my|the) (scope|available)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("refusal pattern is valid"))
    .collect()
});

static PRICE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\d+(?:\.\d{2})?").expect("price pattern is valid"));

const CONFLICT_SELF_REPORT_PHRASES: &[&str] = &[
    "conflicting",
    "inconsistent",
    "differs between",
    "varies across",
    "discrepancy",
    "contradicts",
    "different values",
    "conflicting information",
];

/// Price strings known to disagree across the corpus; two or more of these
/// appearing together is a conflict regardless of which documents carry
/// them.
const KNOWN_PRICE_VARIANTS: &[&str] = &["$49", "$45", "$52", "$99"];

/// Run every flag check against a finished answer. Conflict detection only
/// runs when at least two segments informed the answer.
pub fn evaluate(answer: &str, segments: &[&Segment]) -> Vec<EvaluatorFlag> {
    let mut flags = Vec::new();
    let is_refusal = is_refusal(answer);

    if segments.is_empty() && !is_refusal {
        flags.push(EvaluatorFlag::NoContext);
    }
    if is_refusal {
        flags.push(EvaluatorFlag::Refusal);
    }
    if segments.len() >= 2 && has_conflicting_sources(answer, segments) {
        flags.push(EvaluatorFlag::ConflictingSources);
    }

    flags
}

fn is_refusal(answer: &str) -> bool {
    REFUSAL_PATTERNS.iter().any(|p| p.is_match(answer))
}

/// The three conflict detectors, OR'd in order. Each is independent so a
/// single detector firing is sufficient.
fn has_conflicting_sources(answer: &str, segments: &[&Segment]) -> bool {
    answer_self_reports_conflict(answer)
        || known_variants_collide(segments)
        || documents_disagree_on_prices(segments)
}

fn answer_self_reports_conflict(answer: &str) -> bool {
    let answer_lower = answer.to_lowercase();
    CONFLICT_SELF_REPORT_PHRASES.iter().any(|phrase| answer_lower.contains(phrase))
}

fn prices_by_document<'a>(segments: &[&'a Segment]) -> HashMap<&'a str, HashSet<String>> {
    let mut by_doc: HashMap<&str, HashSet<String>> = HashMap::new();
    for segment in segments {
        let prices: HashSet<String> = PRICE_PATTERN
            .find_iter(&segment.text)
            .map(|m| m.as_str().to_string())
            .collect();
        if !prices.is_empty() {
            by_doc.entry(segment.document.as_str()).or_default().extend(prices);
        }
    }
    by_doc
}

/// Two or more known-divergent price variants across at least two distinct
/// documents.
fn known_variants_collide(segments: &[&Segment]) -> bool {
    let by_doc = prices_by_document(segments);
    if by_doc.len() < 2 {
        return false;
    }
    let hits = by_doc
        .values()
        .flatten()
        .filter(|p| KNOWN_PRICE_VARIANTS.contains(&p.as_str()))
        .collect::<HashSet<_>>();
    hits.len() >= 2
}

/// Two documents both cite prices with no overlap at all.
fn documents_disagree_on_prices(segments: &[&Segment]) -> bool {
    let by_doc = prices_by_document(segments);
    let sets: Vec<&HashSet<String>> = by_doc.values().collect();
    for i in 0..sets.len() {
        for j in (i + 1)..sets.len() {
            if sets[i].is_disjoint(sets[j]) {
                return true;
            }
        }
    }
    false
}
