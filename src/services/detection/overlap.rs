// Overlap Resolver
// Threshold filter, then greedy highest-risk-first selection of non-overlapping spans.

use std::cmp::Ordering;

use crate::models::ScoredCandidate;

/// Selection priority: higher risk, then earlier start, then longer span, then
/// rule order of the category.
fn priority(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.final_risk
        .cmp(&a.final_risk)
        .then_with(|| a.start().cmp(&b.start()))
        .then_with(|| (b.end() - b.start()).cmp(&(a.end() - a.start())))
        .then_with(|| a.category().cmp(&b.category()))
}

/// Drop candidates below `threshold` and keep a pairwise non-overlapping subset.
/// Output is ordered by start offset.
pub fn resolve(scored: Vec<ScoredCandidate>, threshold: u8) -> Vec<ScoredCandidate> {
    let mut eligible: Vec<ScoredCandidate> = scored
        .into_iter()
        .filter(|s| s.final_risk >= threshold)
        .collect();
    eligible.sort_by(priority);

    let mut accepted: Vec<ScoredCandidate> = Vec::with_capacity(eligible.len());
    for cand in eligible {
        if cand.start() >= cand.end() {
            continue;
        }
        if accepted.iter().any(|a| a.overlaps(&cand)) {
            continue;
        }
        accepted.push(cand);
    }

    accepted.sort_by_key(|s| s.start());
    accepted
}
