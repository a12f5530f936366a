//! Lead scoring.
//!
//! A score is four deterministic rule components ([`rules`]) plus one
//! language-model component ([`llm`]), combined by a fixed weight table.
//! When the model is unavailable the model component takes
//! [`NEUTRAL_AI_SCORE`] and the score is marked degraded; scoring itself
//! never fails.

pub mod llm;
pub mod rules;

pub use llm::{AssessmentCache, LanguageModel, LlmAssessment, LlmError, OpenAiClient};
pub use rules::RuleScores;

use crate::circuit_breaker::{create_llm_circuit_breaker, LlmCircuitBreaker};
use crate::models::{Lead, Score};
use chrono::{DateTime, Utc};
use failsafe::futures::CircuitBreaker;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Model component used whenever the model could not be consulted.
pub const NEUTRAL_AI_SCORE: f64 = 0.5;

const ANALYSIS_SYSTEM_PROMPT: &str = "You are an expert in lead qualification and sales prospecting for property management. Answer with a single JSON object.";

/// Fixed weights of the five sub-scores. They sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub role_relevance: f64,
    pub portfolio_fit: f64,
    pub decision_authority: f64,
    pub location_value: f64,
    pub ai_assessment: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            role_relevance: 0.30,
            portfolio_fit: 0.20,
            decision_authority: 0.20,
            location_value: 0.15,
            ai_assessment: 0.15,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.role_relevance
            + self.portfolio_fit
            + self.decision_authority
            + self.location_value
            + self.ai_assessment
    }

    /// Weighted total. Pure; clamped to `[0, 1]`.
    pub fn combine(&self, rules: &RuleScores, ai_assessment: f64) -> f64 {
        let total = rules.role_relevance * self.role_relevance
            + rules.portfolio_fit * self.portfolio_fit
            + rules.decision_authority * self.decision_authority
            + rules.location_value * self.location_value
            + ai_assessment.clamp(0.0, 1.0) * self.ai_assessment;
        total.clamp(0.0, 1.0)
    }
}

/// Summary of a whole result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadSetAnalysis {
    pub analysis: String,
    pub degraded: bool,
    pub timestamp: DateTime<Utc>,
}

impl LeadSetAnalysis {
    fn unavailable() -> Self {
        Self {
            analysis: "Lead analysis unavailable".to_string(),
            degraded: true,
            timestamp: Utc::now(),
        }
    }
}

pub struct ScoringEngine {
    weights: ScoreWeights,
    model: Option<Arc<dyn LanguageModel>>,
    breaker: LlmCircuitBreaker,
    cache: AssessmentCache,
    llm_timeout: Duration,
    concurrency: usize,
}

impl ScoringEngine {
    pub fn new(model: Option<Arc<dyn LanguageModel>>, concurrency: usize) -> Self {
        Self {
            weights: ScoreWeights::default(),
            model,
            breaker: create_llm_circuit_breaker(),
            cache: AssessmentCache::default(),
            llm_timeout: Duration::from_secs(20),
            concurrency: concurrency.max(1),
        }
    }

    /// Rule-only engine; every score is marked degraded.
    pub fn rule_only(concurrency: usize) -> Self {
        Self::new(None, concurrency)
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Scores one lead. Always returns a valid score.
    pub async fn score(&self, lead: &Lead) -> Score {
        let rules = rules::evaluate(lead);
        let confidence = rules::confidence(lead);
        let recommendations = rules::recommendations(lead, &rules, confidence);

        let (ai_assessment, degraded, notes, suggested_approach) = match self.assess(lead).await {
            Ok(assessment) => (
                assessment.score,
                false,
                assessment.reasoning,
                assessment.suggested_approach,
            ),
            Err(e) => {
                tracing::debug!(lead = %lead.name, error = %e, "Degraded scoring");
                (
                    NEUTRAL_AI_SCORE,
                    true,
                    Some(format!("Degraded scoring (rule-based only): {}", e)),
                    None,
                )
            }
        };

        Score {
            role_relevance: rules.role_relevance,
            portfolio_fit: rules.portfolio_fit,
            decision_authority: rules.decision_authority,
            location_value: rules.location_value,
            ai_assessment,
            total: self.weights.combine(&rules, ai_assessment),
            confidence,
            degraded,
            notes,
            suggested_approach,
            recommendations,
        }
    }

    /// Scores every lead with at most `concurrency` in flight. Output order
    /// matches input order; existing scores are overwritten.
    pub async fn score_all(&self, leads: Vec<Lead>) -> Vec<Lead> {
        stream::iter(leads)
            .map(|mut lead| async move {
                lead.score = Some(self.score(&lead).await);
                lead
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn assess(&self, lead: &Lead) -> Result<LlmAssessment, LlmError> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| LlmError::Config("language model not configured".into()))?;

        let prompt = assessment_prompt(lead);
        let key = AssessmentCache::key(model.model_name(), &prompt);
        if let Some(cached) = self.cache.get(&key).await {
            tracing::debug!(lead = %lead.name, "Assessment cache hit");
            return Ok(cached);
        }

        let assessment = self
            .guarded(async {
                let text = model.complete(llm::ASSESSMENT_SYSTEM_PROMPT, &prompt).await?;
                llm::parse_assessment(&text)
            })
            .await?;

        self.cache.insert(key, assessment.clone()).await;
        Ok(assessment)
    }

    /// Runs `call` under the per-call timeout and the circuit breaker.
    async fn guarded<T, F>(&self, call: F) -> Result<T, LlmError>
    where
        F: std::future::Future<Output = Result<T, LlmError>>,
    {
        let timeout = self.llm_timeout;
        let timed = async move {
            match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(LlmError::Network(format!("timed out after {:?}", timeout))),
            }
        };

        match self.breaker.call(timed).await {
            Ok(value) => Ok(value),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => Err(LlmError::Rejected),
        }
    }

    /// One summary of the whole result set. Falls back to a fixed message.
    pub async fn analyze(&self, leads: &[Lead]) -> LeadSetAnalysis {
        let Some(model) = self.model.as_ref() else {
            return LeadSetAnalysis::unavailable();
        };
        if leads.is_empty() {
            return LeadSetAnalysis {
                analysis: "No leads to analyze".to_string(),
                degraded: false,
                timestamp: Utc::now(),
            };
        }

        let prompt = analysis_prompt(leads);
        let result = self
            .guarded(async { model.complete(ANALYSIS_SYSTEM_PROMPT, &prompt).await })
            .await;

        match result {
            Ok(analysis) => LeadSetAnalysis {
                analysis,
                degraded: false,
                timestamp: Utc::now(),
            },
            Err(e) => {
                tracing::warn!(error = %e, leads = leads.len(), "Lead set analysis failed");
                LeadSetAnalysis::unavailable()
            }
        }
    }
}

fn field(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("Unknown")
}

pub fn assessment_prompt(lead: &Lead) -> String {
    let properties = lead
        .properties_managed
        .map(|p| p.to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    format!(
        "Analyze this property management professional:\n\
         Name: {}\n\
         Title: {}\n\
         Company: {}\n\
         Location: {}\n\
         Properties managed: {}\n\
         Source: {}\n\n\
         Assess their role in property management decision-making, likely portfolio size and type, \
         the value of their market and their interest in comprehensive insurance solutions.\n\
         Respond with JSON: {{\"score\": <0-100>, \"reasoning\": <string>, \"suggested_approach\": <string>}}",
        lead.name,
        field(&lead.title),
        field(&lead.company),
        field(&lead.location),
        properties,
        lead.source,
    )
}

fn analysis_prompt(leads: &[Lead]) -> String {
    let summary: Vec<_> = leads
        .iter()
        .map(|l| {
            serde_json::json!({
                "name": l.name,
                "title": l.title,
                "company": l.company,
                "location": l.location,
                "score": l.total_score(),
            })
        })
        .collect();
    format!(
        "Analyze these property management leads and provide insights:\n{}\n\n\
         Provide:\n\
         1. Overall quality assessment\n\
         2. Key patterns and trends\n\
         3. Recommendations for prioritization\n\
         4. Suggested engagement approaches\n\
         Respond with JSON: {{\"quality\": ..., \"patterns\": ..., \"prioritization\": ..., \"approaches\": ...}}",
        serde_json::to_string_pretty(&summary).unwrap_or_default()
    )
}
