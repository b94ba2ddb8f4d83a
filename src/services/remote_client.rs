// Remote Detector Client
// Implements the masking API call and the reachability probe against the
// remote detection service, and normalizes its schema into MaskedResult.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::models::{Category, EffectiveOptions, EntityRecord, MaskStats, MaskedResult, ResultSource};
use crate::services::detection::placeholder_for;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Remote processing failed: {0}")]
    Unsuccessful(String),
    #[error("JSON parse error: {0}")]
    JsonError(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

// ============ Wire Schema ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteMaskRequest {
    pub text: String,
    pub threshold: u8,
    pub mode: String,
    pub use_contextual_analysis: bool,
    pub request_id: String,
}

impl RemoteMaskRequest {
    pub fn new(text: &str, options: &EffectiveOptions) -> Self {
        Self {
            text: text.to_string(),
            threshold: options.threshold,
            mode: options.mode.as_str().to_string(),
            use_contextual_analysis: options.mode.uses_contextual_analysis(),
            request_id: generate_request_id(),
        }
    }
}

pub fn generate_request_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("req_{}_{}", Utc::now().timestamp_millis(), &id[..8])
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemoteStats {
    #[serde(default)]
    pub total_entities: usize,
    #[serde(default)]
    pub masked_entities: usize,
    #[serde(default)]
    pub avg_risk: f64,
    /// Seconds.
    #[serde(default)]
    pub processing_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteLogEntry {
    pub token: String,
    pub entity: String,
    #[serde(default)]
    pub risk_weight: f64,
    #[serde(default)]
    pub masked_as: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemoteMaskResponse {
    pub success: bool,
    #[serde(default)]
    pub original_text: Option<String>,
    #[serde(default)]
    pub masked_text: Option<String>,
    #[serde(default)]
    pub stats: RemoteStats,
    #[serde(default)]
    pub masking_log: Vec<RemoteLogEntry>,
    #[serde(default)]
    pub model_info: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

// ============ Detector Trait ============

/// The remote detection service as seen by the orchestrator.
///
/// Implementations must not enforce their own retries; the caller wraps every
/// call in a timeout and falls back on failure.
#[async_trait]
pub trait RemoteDetector: Send + Sync {
    fn endpoint(&self) -> &str;

    /// Lightweight reachability check.
    async fn health_check(&self) -> Result<(), RemoteError>;

    async fn mask(&self, request: &RemoteMaskRequest) -> Result<RemoteMaskResponse, RemoteError>;
}

pub struct HttpRemoteDetector {
    client: Client,
    endpoint: String,
}

impl HttpRemoteDetector {
    pub fn new(endpoint: &str) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    pub fn with_proxy(endpoint: &str, proxy_url: &str) -> Result<Self, RemoteError> {
        let proxy = reqwest::Proxy::all(proxy_url)?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .proxy(proxy)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RemoteDetector for HttpRemoteDetector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn health_check(&self) -> Result<(), RemoteError> {
        let response = self
            .client
            .get(format!("{}/health", self.endpoint))
            .header("Accept", "application/json")
            .header("Cache-Control", "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(())
    }

    async fn mask(&self, request: &RemoteMaskRequest) -> Result<RemoteMaskResponse, RemoteError> {
        let start = Instant::now();

        let response = self
            .client
            .post(format!("{}/api/mask", self.endpoint))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("X-Request-ID", &request.request_id)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::ApiError {
                status: status.as_u16(),
                message: if body.is_empty() {
                    status.canonical_reason().unwrap_or("").to_string()
                } else {
                    body
                },
            });
        }

        let data: RemoteMaskResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::JsonError(e.to_string()))?;

        tracing::debug!(
            "[REMOTE] request_id={} latency_ms={}",
            request.request_id,
            start.elapsed().as_millis()
        );

        if !data.success {
            return Err(RemoteError::Unsuccessful(
                data.error.unwrap_or_else(|| "remote processing failed".to_string()),
            ));
        }
        Ok(data)
    }
}

// ============ Normalization ============

/// Assign offsets to remote log tokens by locating each token in `text`,
/// skipping occurrences already claimed by an earlier entry.
fn locate_entities(text: &str, log: &[RemoteLogEntry]) -> Vec<EntityRecord> {
    let mut entities: Vec<EntityRecord> = Vec::with_capacity(log.len());

    for entry in log {
        if entry.token.is_empty() {
            continue;
        }
        let category = Category::from_remote_label(&entry.entity);
        let placeholder = entry
            .masked_as
            .clone()
            .unwrap_or_else(|| placeholder_for(category).to_string());

        let mut from = 0;
        let mut located = None;
        while let Some(pos) = text[from..].find(&entry.token) {
            let start = from + pos;
            let end = start + entry.token.len();
            if !entities.iter().any(|e| start < e.end_offset && e.start_offset < end) {
                located = Some((start, end));
                break;
            }
            from = end;
        }

        match located {
            Some((start, end)) => entities.push(EntityRecord {
                token: entry.token.clone(),
                category,
                risk: entry.risk_weight.clamp(0.0, 100.0).round() as u8,
                placeholder,
                start_offset: start,
                end_offset: end,
            }),
            None => tracing::warn!(
                "[REMOTE] log token of type {} not found in original text, dropped",
                entry.entity
            ),
        }
    }

    entities.sort_by_key(|e| e.start_offset);
    entities
}

impl RemoteMaskResponse {
    /// Convert to the common result schema. `sent_text` is the text we submitted,
    /// used when the service omits `original_text`. A body without
    /// `masked_text` is malformed and never treated as a successful mask.
    pub fn into_masked_result(self, sent_text: &str) -> Result<MaskedResult, RemoteError> {
        let masked_text = self
            .masked_text
            .ok_or_else(|| RemoteError::JsonError("response is missing masked_text".to_string()))?;
        let original_text = self
            .original_text
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| sent_text.to_string());
        let entities = locate_entities(&original_text, &self.masking_log);

        let masked_entities = self.stats.masked_entities.max(entities.len());
        let total_entities = self.stats.total_entities.max(masked_entities);

        Ok(MaskedResult {
            success: true,
            original_text,
            masked_text,
            entities,
            stats: MaskStats {
                total_entities,
                masked_entities,
                average_risk: self.stats.avg_risk,
                processing_time_ms: (self.stats.processing_time.max(0.0) * 1000.0).round() as u64,
            },
            source: ResultSource::Remote,
            timestamp: Utc::now(),
            model_info: self.model_info,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MaskingMode;

    fn sample_response() -> RemoteMaskResponse {
        serde_json::from_value(serde_json::json!({
            "success": true,
            "original_text": "박영희(010-1234-5678)는 삼성서울병원에서 수술을 받았다.",
            "masked_text": "[PERSON]([CONTACT])는 [HOSPITAL]에서 수술을 받았다.",
            "stats": {"total_entities": 3, "masked_entities": 3, "avg_risk": 100.0, "processing_time": 0.125},
            "masking_log": [
                {"token": "010-1234-5678", "entity": "B-CONTACT", "risk_weight": 100, "masked_as": "[CONTACT]"},
                {"token": "박영희", "entity": "B-PER", "risk_weight": 100, "masked_as": "[PERSON]"},
                {"token": "삼성서울병원", "entity": "B-ORG", "risk_weight": 100, "masked_as": "[HOSPITAL]"}
            ],
            "model_info": {"name": "KoELECTRA + LoRA", "pipeline_stages": 4}
        }))
        .unwrap()
    }

    #[test]
    fn test_request_carries_options() {
        let req = RemoteMaskRequest::new(
            "text",
            &EffectiveOptions {
                threshold: 70,
                mode: MaskingMode::General,
            },
        );
        assert_eq!(req.threshold, 70);
        assert_eq!(req.mode, "general");
        assert!(!req.use_contextual_analysis);
        assert!(req.request_id.starts_with("req_"));
    }

    #[test]
    fn test_normalize_remote_response() {
        let result = sample_response().into_masked_result("ignored").unwrap();
        assert!(result.success);
        assert_eq!(result.source, ResultSource::Remote);
        assert_eq!(result.stats.total_entities, 3);
        assert_eq!(result.stats.processing_time_ms, 125);
        assert_eq!(result.entities.len(), 3);

        let cats: Vec<Category> = result.entities.iter().map(|e| e.category).collect();
        assert_eq!(cats, vec![Category::PersonName, Category::Phone, Category::Facility]);
        for e in &result.entities {
            assert_eq!(&result.original_text[e.start_offset..e.end_offset], e.token);
        }
    }

    #[test]
    fn test_repeated_tokens_get_distinct_offsets() {
        let log = vec![
            RemoteLogEntry {
                token: "김철수".to_string(),
                entity: "PER".to_string(),
                risk_weight: 90.0,
                masked_as: None,
            },
            RemoteLogEntry {
                token: "김철수".to_string(),
                entity: "PER".to_string(),
                risk_weight: 90.0,
                masked_as: None,
            },
        ];
        let entities = locate_entities("김철수와 김철수", &log);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].start_offset, 0);
        assert!(entities[1].start_offset > entities[0].end_offset);
        assert_eq!(entities[0].placeholder, "[PERSON]");
    }

    #[test]
    fn test_optional_fields_default() {
        let resp: RemoteMaskResponse =
            serde_json::from_str(r#"{"success": true, "masked_text": "plain text"}"#).unwrap();
        let result = resp.into_masked_result("plain text").unwrap();
        assert_eq!(result.original_text, "plain text");
        assert_eq!(result.masked_text, "plain text");
        assert_eq!(result.stats.total_entities, 0);
    }

    #[test]
    fn test_missing_masked_text_is_malformed() {
        let resp: RemoteMaskResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        match resp.into_masked_result("김철수 010-1234-5678") {
            Err(RemoteError::JsonError(msg)) => assert!(msg.contains("masked_text")),
            other => panic!("expected JsonError, got {:?}", other),
        }
    }

    #[test]
    fn test_unlocatable_token_is_dropped() {
        let log = vec![RemoteLogEntry {
            token: "없는토큰".to_string(),
            entity: "PER".to_string(),
            risk_weight: 90.0,
            masked_as: None,
        }];
        assert!(locate_entities("hello", &log).is_empty());
    }
}
