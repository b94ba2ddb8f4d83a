// Detection Module
// Rule-based sensitive entity pipeline organized into specialized submodules:
// - patterns: static, validated rule table (category -> matcher, risk, placeholder)
// - entity_detector: applies every rule and yields raw candidates
// - risk_scorer: combinatorial and contextual risk amplification
// - overlap: threshold filter and non-overlapping span selection
// - masker: right-to-left placeholder substitution
// - local_pipeline: glues the stages into a MaskedResult

pub mod patterns;
pub mod entity_detector;
pub mod risk_scorer;
pub mod overlap;
pub mod masker;
pub mod local_pipeline;

// Re-export commonly used functions
pub use patterns::{placeholder_for, rule_for, rule_table, validate_rules, PatternRule, RuleTableError};
pub use entity_detector::detect;
pub use risk_scorer::{combination_multiplier, contextual_multiplier, final_risk, score};
pub use overlap::resolve;
pub use masker::mask;
pub use local_pipeline::{average_risk, run_local_pipeline};
