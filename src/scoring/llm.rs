//! Language-model access for qualitative lead assessment.

use crate::config::LlmConfig;
use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum LlmError {
    /// Missing key or unusable settings
    Config(String),
    /// Connection failure or timeout
    Network(String),
    /// Non-2xx response or empty completion
    Api(String),
    /// Completion was not the JSON we asked for
    Parse(String),
    /// Circuit breaker is open
    Rejected,
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Config(msg) => write!(f, "Configuration error: {}", msg),
            LlmError::Network(msg) => write!(f, "Network error: {}", msg),
            LlmError::Api(msg) => write!(f, "API error: {}", msg),
            LlmError::Parse(msg) => write!(f, "Parse error: {}", msg),
            LlmError::Rejected => write!(f, "Language model temporarily unavailable (circuit open)"),
        }
    }
}

impl std::error::Error for LlmError {}

/// A chat-completion style model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Returns the raw text of one completion.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Clone)]
pub struct OpenAiClient {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, LlmError> {
        let Some(ref api_key) = config.api_key else {
            return Ok(None);
        };
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Some(Self {
            http_client,
            api_key: api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }))
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let start = std::time::Instant::now();

        let request = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.3,
            "response_format": {"type": "json_object"}
        });

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "LLM request failed");
                LlmError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let error_text: String = error_text.chars().take(200).collect();
            tracing::warn!(status = %status, error = %error_text, "LLM API error");
            return Err(LlmError::Api(format!("{}: {}", status, error_text)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| LlmError::Api("No completion returned".into()))?;

        tracing::debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis() as u64,
            "LLM completion"
        );

        Ok(content)
    }
}

/// Qualitative assessment of one lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmAssessment {
    /// In `[0.0, 1.0]`.
    pub score: f64,
    pub reasoning: Option<String>,
    pub suggested_approach: Option<String>,
}

pub const ASSESSMENT_SYSTEM_PROMPT: &str = "You are a lead qualification expert specializing in property management professionals. Focus on identifying decision-makers who would benefit from comprehensive property insurance solutions. Always answer with a single JSON object.";

/// Strips a Markdown code fence and any prose around the outermost object.
fn json_object_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Parses `{"score": 0-100 | 0-1, "reasoning": ..., "suggested_approach": ...}`.
pub fn parse_assessment(text: &str) -> Result<LlmAssessment, LlmError> {
    let slice = json_object_slice(text)
        .ok_or_else(|| LlmError::Parse("No JSON object in completion".into()))?;
    let value: Value =
        serde_json::from_str(slice).map_err(|e| LlmError::Parse(format!("Invalid JSON: {}", e)))?;

    let raw_score = match value.get("score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
    .filter(|s| s.is_finite() && *s >= 0.0)
    .ok_or_else(|| LlmError::Parse("Missing or invalid score".into()))?;

    // Models answer on 0-100 more often than not.
    let score = if raw_score > 1.0 { raw_score / 100.0 } else { raw_score };
    if score > 1.0 {
        return Err(LlmError::Parse(format!("Score out of range: {}", raw_score)));
    }

    let text_field = |keys: &[&str]| {
        keys.iter()
            .filter_map(|k| value.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    };

    Ok(LlmAssessment {
        score,
        reasoning: text_field(&["reasoning", "rationale", "notes"]),
        suggested_approach: text_field(&["suggested_approach", "approach"]),
    })
}

/// Successful assessments keyed by a SHA-256 digest of model + prompt.
#[derive(Clone)]
pub struct AssessmentCache {
    inner: Cache<String, LlmAssessment>,
}

impl AssessmentCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
        }
    }

    pub fn key(model: &str, prompt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(prompt.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub async fn get(&self, key: &str) -> Option<LlmAssessment> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: String, assessment: LlmAssessment) {
        self.inner.insert(key, assessment).await;
    }
}

impl Default for AssessmentCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), 10_000)
    }
}
