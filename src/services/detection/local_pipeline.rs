// Local Pipeline
// detect -> score -> resolve(threshold) -> mask, assembled into a MaskedResult.
// CPU-bound and synchronous; used whenever the remote detector is unavailable.

use chrono::Utc;
use std::time::Instant;
use tracing::debug;

use super::entity_detector::{category_histogram, detect};
use super::masker::mask;
use super::overlap::resolve;
use super::patterns::rule_table;
use super::risk_scorer::score;
use crate::models::{EffectiveOptions, EntityRecord, MaskStats, MaskedResult, ResultSource};

pub const LOCAL_MODEL_VERSION: &str = "2.0.0";

pub fn average_risk(entities: &[EntityRecord]) -> f64 {
    if entities.is_empty() {
        return 0.0;
    }
    entities.iter().map(|e| f64::from(e.risk)).sum::<f64>() / entities.len() as f64
}

/// Run the full rule-based pipeline on `text`.
pub fn run_local_pipeline(text: &str, options: &EffectiveOptions) -> MaskedResult {
    let started = Instant::now();

    let candidates = detect(text);
    let total_entities = candidates.len();
    debug!(
        "[PIPELINE] candidates={} by_category={:?}",
        total_entities,
        category_histogram(&candidates)
    );

    let scored = score(&candidates, text, options.mode);
    let resolved = resolve(scored, options.threshold);
    let (masked_text, entities) = mask(text, &resolved);

    let stats = MaskStats {
        total_entities,
        masked_entities: entities.len(),
        average_risk: average_risk(&entities),
        processing_time_ms: started.elapsed().as_millis() as u64,
    };

    debug!(
        "[PIPELINE] masked={}/{} threshold={} mode={}",
        stats.masked_entities,
        stats.total_entities,
        options.threshold,
        options.mode.as_str()
    );

    MaskedResult {
        success: true,
        original_text: text.to_string(),
        masked_text,
        entities,
        stats,
        source: ResultSource::Local,
        timestamp: Utc::now(),
        model_info: Some(serde_json::json!({
            "type": "local_pattern",
            "version": LOCAL_MODEL_VERSION,
            "patternsUsed": rule_table().len(),
            "threshold": options.threshold,
            "mode": options.mode.as_str(),
        })),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, MaskingMode};

    fn opts(threshold: u8) -> EffectiveOptions {
        EffectiveOptions {
            threshold,
            mode: MaskingMode::Medical,
        }
    }

    #[test]
    fn test_name_phone_scenario() {
        let result = run_local_pipeline("김철수 010-1234-5678", &opts(50));
        assert!(result.success);
        assert_eq!(result.source, ResultSource::Local);
        assert_eq!(result.masked_text, "[PERSON] [CONTACT]");
        assert_eq!(result.stats.total_entities, 2);
        assert_eq!(result.stats.masked_entities, 2);
        assert_eq!(result.entities[0].category, Category::PersonName);
        assert_eq!(result.entities[1].category, Category::Phone);
        assert!(result.entities.iter().all(|e| e.risk == 100));
        assert_eq!(result.stats.average_risk, 100.0);
    }

    #[test]
    fn test_no_matches() {
        let result = run_local_pipeline("hello world", &opts(50));
        assert_eq!(result.stats.total_entities, 0);
        assert_eq!(result.masked_text, result.original_text);
        assert!(result.entities.is_empty());
    }

    #[test]
    fn test_overlap_keeps_higher_risk_span() {
        let text = "서울대병원로 12";
        let result = run_local_pipeline(text, &opts(0));
        assert_eq!(result.stats.total_entities, 2);
        assert_eq!(result.stats.masked_entities, 1);
        assert_eq!(result.entities[0].category, Category::Facility);
        assert_eq!(result.masked_text, "[HOSPITAL]로 12");
        assert!(!result.entities.iter().any(|e| e.category == Category::Address));
    }

    #[test]
    fn test_threshold_leaves_low_risk_entities() {
        let result = run_local_pipeline("나이는 45세 입니다", &opts(50));
        assert_eq!(result.stats.total_entities, 1);
        assert_eq!(result.stats.masked_entities, 0);
        assert_eq!(result.masked_text, "나이는 45세 입니다");
    }

    #[test]
    fn test_entity_offsets_refer_to_original() {
        let text = "박영희(010-1234-5678)는 삼성서울병원에서 수술을 받았다.";
        let result = run_local_pipeline(text, &opts(50));
        assert!(result.stats.masked_entities <= result.stats.total_entities);
        for e in &result.entities {
            assert!(e.end_offset <= text.len());
            assert_eq!(&text[e.start_offset..e.end_offset], e.token);
        }
        assert_eq!(
            result.masked_text,
            "[PERSON]([CONTACT])는 [HOSPITAL]에서 수술을 받았다."
        );
    }

    #[test]
    fn test_masking_masked_text_finds_nothing_new() {
        let samples = [
            "김철수 010-1234-5678",
            "김철수씨가 2023년 10월에 서울대병원에서 간암 진단을 받았습니다.",
            "박영희(010-1234-5678)는 삼성서울병원에서 수술을 받았다.",
            "주민번호 900101-1234567 환자 이순신님, 서울 강남구 역삼로 123",
        ];
        for text in samples {
            let first = run_local_pipeline(text, &opts(50));
            let second = run_local_pipeline(&first.masked_text, &opts(50));
            assert_eq!(second.stats.masked_entities, 0, "re-masked: {}", first.masked_text);
            assert_eq!(second.masked_text, first.masked_text);
        }
    }

    #[test]
    fn test_pipeline_is_deterministic() {
        let text = "김철수씨가 2023년 10월에 서울대병원에서 간암 진단을 받았습니다.";
        let a = run_local_pipeline(text, &opts(50));
        let b = run_local_pipeline(text, &opts(50));
        assert_eq!(a.masked_text, b.masked_text);
        assert_eq!(a.entities, b.entities);
        assert_eq!(a.stats.total_entities, b.stats.total_entities);
        assert_eq!(a.stats.average_risk, b.stats.average_risk);
        assert_eq!(a.model_info, b.model_info);
    }
}
