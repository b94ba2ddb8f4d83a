// Masker
// Substitutes resolved spans with category placeholders, right to left so that
// pending offsets stay valid when placeholder and token lengths differ.

use super::patterns::placeholder_for;
use crate::models::{EntityRecord, ScoredCandidate};

/// Returns the masked text and one log entry per substitution, in ascending
/// offset order. `resolved` must be pairwise non-overlapping.
pub fn mask(text: &str, resolved: &[ScoredCandidate]) -> (String, Vec<EntityRecord>) {
    let mut ordered: Vec<&ScoredCandidate> = resolved
        .iter()
        .filter(|s| s.end() <= text.len() && text.is_char_boundary(s.start()) && text.is_char_boundary(s.end()))
        .collect();
    ordered.sort_by(|a, b| b.start().cmp(&a.start()));

    let mut masked = text.to_string();
    let mut log = Vec::with_capacity(ordered.len());

    for cand in ordered {
        let placeholder = placeholder_for(cand.category());
        masked.replace_range(cand.start()..cand.end(), placeholder);
        log.push(EntityRecord {
            token: text[cand.start()..cand.end()].to_string(),
            category: cand.category(),
            risk: cand.final_risk,
            placeholder: placeholder.to_string(),
            start_offset: cand.start(),
            end_offset: cand.end(),
        });
    }

    log.reverse();
    (masked, log)
}
