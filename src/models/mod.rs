// Privacy Guard Data Models
// Shared between the local pipeline, the remote client and the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============ Categories ============

/// Sensitive entity category. Fixed at build time; each detectable category owns
/// exactly one pattern rule.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    PersonName,
    Phone,
    NationalId,
    Facility,
    Condition,
    Date,
    Age,
    Address,
    /// Only produced when normalizing a remote label we do not recognize.
    Other,
}

impl Category {
    /// Categories the local detector has rules for, in rule application order.
    pub const DETECTABLE: [Category; 8] = [
        Category::PersonName,
        Category::Phone,
        Category::NationalId,
        Category::Facility,
        Category::Condition,
        Category::Date,
        Category::Age,
        Category::Address,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::PersonName => "person_name",
            Category::Phone => "phone",
            Category::NationalId => "national_id",
            Category::Facility => "facility",
            Category::Condition => "condition",
            Category::Date => "date",
            Category::Age => "age",
            Category::Address => "address",
            Category::Other => "other",
        }
    }

    /// Map a remote entity label onto a category.
    ///
    /// The remote service reports BIO-tagged NER labels (`B-PER`, `I-ORG`),
    /// bare tags (`CONTACT`) or the lowercase type names used by older clients
    /// (`person`, `hospital`, `id_number`).
    pub fn from_remote_label(label: &str) -> Self {
        let trimmed = label.trim();
        let tag = trimmed
            .strip_prefix("B-")
            .or_else(|| trimmed.strip_prefix("I-"))
            .unwrap_or(trimmed);

        match tag.to_ascii_lowercase().as_str() {
            "per" | "person" | "person_name" | "name" => Category::PersonName,
            "contact" | "phone" => Category::Phone,
            "id_number" | "national_id" | "rrn" => Category::NationalId,
            "org" | "hospital" | "facility" => Category::Facility,
            "disease" | "condition" => Category::Condition,
            "date" => Category::Date,
            "age" => Category::Age,
            "loc" | "location" | "address" => Category::Address,
            _ => Category::Other,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

// ============ Masking Mode & Options ============

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskingMode {
    /// Contextual amplification by medical trigger vocabulary is applied.
    #[default]
    Medical,
    /// Pattern risk and combinations only.
    General,
}

impl MaskingMode {
    /// Lenient parse: unknown labels fall back to `Medical`.
    pub fn from_label(val: &str) -> Self {
        Self::parse(val).unwrap_or_default()
    }

    /// Strict parse, `None` for unknown labels.
    pub fn parse(val: &str) -> Option<Self> {
        match val.trim().to_lowercase().as_str() {
            "medical" => Some(Self::Medical),
            "general" => Some(Self::General),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medical => "medical",
            Self::General => "general",
        }
    }

    pub fn uses_contextual_analysis(&self) -> bool {
        matches!(self, Self::Medical)
    }
}

/// Per-call overrides. Unset fields fall back to the current settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskingOptions {
    #[serde(default)]
    pub threshold: Option<i64>,
    #[serde(default)]
    pub mode: Option<String>,
    /// Skip the remote detector entirely.
    #[serde(default)]
    pub force_local: bool,
}

/// Options after merging with settings and clamping.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct EffectiveOptions {
    pub threshold: u8,
    pub mode: MaskingMode,
}

// ============ Pipeline Intermediates ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub text: String,
    pub category: Category,
    /// Byte offset into the processed text.
    pub start: usize,
    pub end: usize,
    pub base_risk: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub combinatorial_multiplier: f64,
    pub contextual_multiplier: f64,
    pub final_risk: u8,
}

impl ScoredCandidate {
    pub fn start(&self) -> usize {
        self.candidate.start
    }

    pub fn end(&self) -> usize {
        self.candidate.end
    }

    pub fn category(&self) -> Category {
        self.candidate.category
    }

    /// Half-open range intersection.
    pub fn overlaps(&self, other: &ScoredCandidate) -> bool {
        self.start() < other.end() && other.start() < self.end()
    }
}

// ============ Masked Result ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub token: String,
    pub category: Category,
    pub risk: u8,
    pub placeholder: String,
    /// Byte offsets into `MaskedResult::original_text`.
    pub start_offset: usize,
    pub end_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskStats {
    pub total_entities: usize,
    pub masked_entities: usize,
    pub average_risk: f64,
    pub processing_time_ms: u64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Remote,
    Local,
    /// Blank input, nothing processed.
    Empty,
    /// Remote failed and local fallback is disabled.
    Error,
    /// Masking is switched off in settings; the text was not processed.
    Disabled,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
            Self::Empty => "empty",
            Self::Error => "error",
            Self::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskedResult {
    pub success: bool,
    pub original_text: String,
    pub masked_text: String,
    pub entities: Vec<EntityRecord>,
    pub stats: MaskStats,
    pub source: ResultSource,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_info: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MaskedResult {
    pub fn empty(text: &str) -> Self {
        Self {
            success: true,
            original_text: text.to_string(),
            masked_text: text.to_string(),
            entities: vec![],
            stats: MaskStats::default(),
            source: ResultSource::Empty,
            timestamp: Utc::now(),
            model_info: None,
            error: None,
        }
    }

    /// Pass-through when masking is switched off. Flagged as unsuccessful so
    /// the unmasked text is never mistaken for a masked one.
    pub fn disabled(text: &str) -> Self {
        Self {
            source: ResultSource::Disabled,
            ..Self::error(text, "masking is disabled in settings")
        }
    }

    /// A failed mask. `masked_text` is left equal to the input, so callers must
    /// check `success` before forwarding it anywhere.
    pub fn error(text: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            original_text: text.to_string(),
            masked_text: text.to_string(),
            entities: vec![],
            stats: MaskStats::default(),
            source: ResultSource::Error,
            timestamp: Utc::now(),
            model_info: None,
            error: Some(message.into()),
        }
    }
}

// ============ Quick Analysis ============

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickAnalysis {
    pub has_risk: bool,
    pub risk_level: f64,
    pub entity_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QuickAnalysis {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_result(result: &MaskedResult) -> Self {
        if !result.success {
            return Self {
                error: result.error.clone(),
                ..Self::default()
            };
        }
        Self {
            has_risk: result.stats.total_entities > 0,
            risk_level: result.stats.average_risk,
            entity_count: result.stats.total_entities,
            error: None,
        }
    }
}

// ============ Connectivity & Status ============

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectivityState {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub connected: bool,
    pub state: ConnectivityState,
    pub connection_attempts: u32,
    pub cache_size: usize,
    pub settings: crate::services::MaskingSettings,
    pub endpoint: String,
    pub last_checked: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_label_mapping() {
        assert_eq!(Category::from_remote_label("B-PER"), Category::PersonName);
        assert_eq!(Category::from_remote_label("I-ORG"), Category::Facility);
        assert_eq!(Category::from_remote_label("CONTACT"), Category::Phone);
        assert_eq!(Category::from_remote_label("id_number"), Category::NationalId);
        assert_eq!(Category::from_remote_label("B-DISEASE"), Category::Condition);
        assert_eq!(Category::from_remote_label("CVL"), Category::Other);
    }

    #[test]
    fn test_mode_parsing_falls_back_to_medical() {
        assert_eq!(MaskingMode::from_label(" General "), MaskingMode::General);
        assert_eq!(MaskingMode::from_label("legal"), MaskingMode::Medical);
        assert_eq!(MaskingMode::parse("legal"), None);
    }

    #[test]
    fn test_error_result_is_flagged() {
        let result = MaskedResult::error("김철수", "timeout");
        assert!(!result.success);
        assert_eq!(result.source, ResultSource::Error);
        assert_eq!(result.error.as_deref(), Some("timeout"));

        let quick = QuickAnalysis::from_result(&result);
        assert!(!quick.has_risk);
        assert_eq!(quick.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_result_serialization_uses_camel_case() {
        let result = MaskedResult::empty("hello");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["maskedText"], "hello");
        assert_eq!(json["source"], "empty");
        assert_eq!(json["stats"]["totalEntities"], 0);
        assert!(json.get("error").is_none());
    }
}
