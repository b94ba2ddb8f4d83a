// Risk Scorer
// final = round(min(100, base * combinatorial * contextual))
// - combinatorial: co-occurring category sets anywhere in the text
// - contextual: medical trigger vocabulary anywhere in the text

use std::collections::HashSet;

use crate::models::{Candidate, Category, MaskingMode, ScoredCandidate};

/// Category sets that raise the risk of every candidate when all members occur
/// in the same text.
pub const COMBINATION_MULTIPLIERS: &[(&[Category], f64)] = &[
    (&[Category::PersonName, Category::Facility, Category::Date], 1.8),
    (&[Category::PersonName, Category::Condition, Category::Facility], 2.0),
    (&[Category::PersonName, Category::Phone], 2.0),
    (&[Category::Facility, Category::Date, Category::Condition], 1.3),
];

/// Medical trigger substrings. Matched case-sensitively against the full text.
pub const CONTEXT_MULTIPLIERS: &[(&str, f64)] = &[
    ("진단", 1.2),
    ("수술", 1.2),
    ("입원", 1.2),
    ("치료", 1.2),
    ("암", 1.3),
    ("종양", 1.3),
    ("질환", 1.3),
    ("응급", 1.5),
    ("중환자", 1.5),
];

/// Max multiplier among combinations fully contained in `present`, else 1.0.
pub fn combination_multiplier(present: &HashSet<Category>) -> f64 {
    COMBINATION_MULTIPLIERS
        .iter()
        .filter(|(set, _)| set.iter().all(|c| present.contains(c)))
        .map(|(_, m)| *m)
        .fold(1.0, f64::max)
}

/// Max multiplier among triggers contained in `text`, else 1.0.
pub fn contextual_multiplier(text: &str) -> f64 {
    CONTEXT_MULTIPLIERS
        .iter()
        .filter(|(kw, _)| text.contains(kw))
        .map(|(_, m)| *m)
        .fold(1.0, f64::max)
}

/// Clamped, rounded final risk. Monotone in both multipliers.
pub fn final_risk(base_risk: u8, combinatorial: f64, contextual: f64) -> u8 {
    let raw = f64::from(base_risk) * combinatorial * contextual;
    raw.clamp(0.0, 100.0).round() as u8
}

pub fn score(candidates: &[Candidate], full_text: &str, mode: MaskingMode) -> Vec<ScoredCandidate> {
    let present: HashSet<Category> = candidates.iter().map(|c| c.category).collect();
    let comb = combination_multiplier(&present);
    let ctx = if mode.uses_contextual_analysis() {
        contextual_multiplier(full_text)
    } else {
        1.0
    };

    candidates
        .iter()
        .map(|c| ScoredCandidate {
            candidate: c.clone(),
            combinatorial_multiplier: comb,
            contextual_multiplier: ctx,
            final_risk: final_risk(c.base_risk, comb, ctx),
        })
        .collect()
}
