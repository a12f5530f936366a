/// Scoring tests against a mocked chat-completions API
use async_trait::async_trait;
use leadgen::models::Lead;
use leadgen::scoring::llm::LlmError;
use leadgen::scoring::{rules, LanguageModel, OpenAiClient, ScoringEngine, NEUTRAL_AI_SCORE};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}
        ]
    })
}

fn property_manager(name: &str) -> Lead {
    let mut lead = Lead::new(name, "linkedin");
    lead.title = Some("Senior Property Manager".into());
    lead.company = Some("Hill Country Realty".into());
    lead.location = Some("Austin, TX".into());
    lead
}

fn engine_for(server: &MockServer, concurrency: usize) -> ScoringEngine {
    let client = OpenAiClient::new("test-key", server.uri(), "gpt-4o-mini");
    ScoringEngine::new(Some(Arc::new(client) as Arc<dyn LanguageModel>), concurrency)
        .with_llm_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_model_assessment_merges_into_score() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"score": 90, "reasoning": "Runs a large Austin portfolio", "suggested_approach": "Email a case study"}"#,
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let engine = engine_for(&mock_server, 2);
    let score = engine.score(&property_manager("Jane Doe")).await;

    assert!(!score.degraded);
    assert!((score.ai_assessment - 0.9).abs() < 1e-9);
    // 0.30 + 0.20 + 0.16 + 0.12 + 0.135
    assert!((score.total - 0.915).abs() < 1e-9);
    assert_eq!(score.notes.as_deref(), Some("Runs a large Austin portfolio"));
    assert_eq!(score.suggested_approach.as_deref(), Some("Email a case study"));
}

#[tokio::test]
async fn test_repeated_lead_uses_cached_assessment() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion(r#"{"score": 0.6, "reasoning": "ok"}"#)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let engine = engine_for(&mock_server, 1);
    let lead = property_manager("Jane Doe");
    let first = engine.score(&lead).await;
    let second = engine.score(&lead).await;

    assert_eq!(first, second);
    assert!((first.ai_assessment - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn test_api_error_degrades_to_rules() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&mock_server)
        .await;

    let engine = engine_for(&mock_server, 1);
    let score = engine.score(&property_manager("Jane Doe")).await;

    assert!(score.degraded);
    assert_eq!(score.ai_assessment, NEUTRAL_AI_SCORE);
    assert!((score.total - 0.855).abs() < 1e-9);
    assert!(score
        .notes
        .as_deref()
        .unwrap()
        .starts_with("Degraded scoring (rule-based only)"));
}

#[tokio::test]
async fn test_unparseable_completion_degrades() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion("I think this lead is great!")),
        )
        .mount(&mock_server)
        .await;

    let engine = engine_for(&mock_server, 1);
    let score = engine.score(&property_manager("Jane Doe")).await;
    assert!(score.degraded);
    assert_eq!(score.ai_assessment, NEUTRAL_AI_SCORE);
}

#[tokio::test]
async fn test_breaker_stops_calling_failing_model() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(5)
        .mount(&mock_server)
        .await;

    let engine = engine_for(&mock_server, 1);
    let leads: Vec<Lead> = (0..8)
        .map(|i| property_manager(&format!("Manager Number{}", i)))
        .collect();

    let scored = engine.score_all(leads).await;

    assert_eq!(scored.len(), 8);
    assert!(scored
        .iter()
        .all(|l| l.score.as_ref().is_some_and(|s| s.degraded)));
    let last_notes = scored[7].score.as_ref().unwrap().notes.clone().unwrap();
    assert!(last_notes.contains("circuit open"));
}

#[tokio::test]
async fn test_slow_model_times_out_into_degraded_score() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(r#"{"score": 90}"#))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let client = OpenAiClient::new("test-key", mock_server.uri(), "gpt-4o-mini");
    let engine = ScoringEngine::new(Some(Arc::new(client) as Arc<dyn LanguageModel>), 1)
        .with_llm_timeout(Duration::from_millis(100));

    let score = engine.score(&property_manager("Jane Doe")).await;
    assert!(score.degraded);
    assert!(score.notes.as_deref().unwrap().contains("timed out"));
}

/// Records how many completions run at once.
#[derive(Default)]
struct TrackingModel {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl LanguageModel for TrackingModel {
    fn model_name(&self) -> &str {
        "tracking"
    }

    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, LlmError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(r#"{"score": 70, "reasoning": "Steady portfolio"}"#.to_string())
    }
}

#[tokio::test]
async fn test_score_all_respects_concurrency_limit() {
    let model = Arc::new(TrackingModel::default());
    let engine = ScoringEngine::new(Some(model.clone() as Arc<dyn LanguageModel>), 3)
        .with_llm_timeout(Duration::from_secs(5));
    let leads: Vec<Lead> = (0..20)
        .map(|i| property_manager(&format!("Manager Number{}", i)))
        .collect();

    let scored = engine.score_all(leads).await;

    assert_eq!(scored.len(), 20);
    assert_eq!(model.calls.load(Ordering::SeqCst), 20);
    let peak = model.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak in-flight calls was {}", peak);
    assert!(peak > 1);
    assert_eq!(model.in_flight.load(Ordering::SeqCst), 0);
    for (i, lead) in scored.iter().enumerate() {
        assert_eq!(lead.name, format!("Manager Number{}", i));
        let score = lead.score.as_ref().unwrap();
        assert!(!score.degraded);
        assert!((score.ai_assessment - 0.7).abs() < 1e-9);
    }
}

#[test]
fn test_rule_scores_for_typical_titles() {
    let mut director = Lead::new("Maria Lopez", "web");
    director.title = Some("Director of Property Management".into());
    director.company = Some("Austin Property Group".into());
    director.location = Some("Austin, TX".into());

    let scores = rules::evaluate(&director);
    assert_eq!(scores.role_relevance, 1.0);
    assert_eq!(scores.portfolio_fit, 1.0);
    assert_eq!(scores.decision_authority, 1.0);
    assert_eq!(scores.location_value, 0.8);

    let mut engineer = Lead::new("Carl Jones", "linkedin");
    engineer.title = Some("Software Engineer".into());
    let scores = rules::evaluate(&engineer);
    assert_eq!(scores.role_relevance, 0.2);
    assert_eq!(scores.portfolio_fit, 0.4);
    assert_eq!(scores.decision_authority, 0.4);
    assert_eq!(scores.location_value, 0.3);
}

#[tokio::test]
async fn test_rule_only_engine_never_calls_out() {
    let engine = ScoringEngine::rule_only(4);
    assert!(!engine.has_model());

    let score = engine.score(&property_manager("Jane Doe")).await;
    assert!(score.degraded);
    assert!((score.total - 0.855).abs() < 1e-9);
    assert!(!score.recommendations.is_empty());
}
