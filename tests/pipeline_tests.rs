/// End-to-end pipeline tests with stub sources and a stub language model
use async_trait::async_trait;
use leadgen::adapters::SourceAdapter;
use leadgen::errors::LeadGenError;
use leadgen::models::{ExportFormat, RawRecord, SearchCriteria};
use leadgen::normalizer::dedup_key;
use leadgen::pipeline::{Orchestrator, RunState, SourceOutcome};
use leadgen::scoring::{LanguageModel, LlmError, ScoringEngine};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

enum Behavior {
    Records(Vec<RawRecord>),
    Unauthorized,
    Slow(Duration),
}

struct StubAdapter {
    name: &'static str,
    behavior: Behavior,
}

impl StubAdapter {
    fn records(name: &'static str, records: Vec<Value>) -> Arc<dyn SourceAdapter> {
        let records = records
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        Arc::new(Self {
            name,
            behavior: Behavior::Records(records),
        })
    }

    fn unauthorized(name: &'static str) -> Arc<dyn SourceAdapter> {
        Arc::new(Self {
            name,
            behavior: Behavior::Unauthorized,
        })
    }

    fn slow(name: &'static str, delay: Duration) -> Arc<dyn SourceAdapter> {
        Arc::new(Self {
            name,
            behavior: Behavior::Slow(delay),
        })
    }
}

#[async_trait]
impl SourceAdapter for StubAdapter {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(
        &self,
        _criteria: &SearchCriteria,
        limit: usize,
    ) -> Result<Vec<RawRecord>, LeadGenError> {
        match &self.behavior {
            Behavior::Records(records) => Ok(records.iter().take(limit).cloned().collect()),
            Behavior::Unauthorized => Err(LeadGenError::Auth {
                source: self.name.to_string(),
                message: "token expired".to_string(),
            }),
            Behavior::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(Vec::new())
            }
        }
    }
}

struct FixedModel {
    reply: String,
    calls: AtomicUsize,
}

impl FixedModel {
    fn new(reply: Value) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LanguageModel for FixedModel {
    fn model_name(&self) -> &str {
        "fixed"
    }

    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

struct DownModel;

#[async_trait]
impl LanguageModel for DownModel {
    fn model_name(&self) -> &str {
        "down"
    }

    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::Network("connection refused".into()))
    }
}

fn austin_sources() -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        StubAdapter::records(
            "linkedin",
            vec![
                json!({"fullName": "Jane Doe", "headline": "Senior Property Manager",
                       "companyName": "Hill Country Realty", "location": "Austin, TX",
                       "email": "jane@hillcountryrealty.com"}),
                json!({"fullName": "Bob Smith", "headline": "Leasing Manager",
                       "companyName": "Lone Star Properties", "location": "Round Rock, TX"}),
                json!({"fullName": "Carl Jones", "headline": "Software Engineer",
                       "companyName": "Acme Tech", "location": "Austin, TX"}),
            ],
        ),
        StubAdapter::records(
            "web",
            vec![
                json!({"name": "jane  doe", "title": "Property Manager",
                       "company": "hill country realty", "location": "Austin, TX"}),
                json!({"name": "Maria Lopez", "title": "Director of Property Management",
                       "company": "Austin Property Group", "location": "Austin, TX",
                       "phone": "(512) 472-1234"}),
                json!({"name": "Tom Green", "title": "Receptionist",
                       "company": "Small Office", "location": "Round Rock, TX"}),
            ],
        ),
        StubAdapter::records(
            "listing",
            vec![
                json!({"host_name": "Sam Rivera", "host_location": "Austin, TX",
                       "listings_count": 14, "superhost": true}),
                json!({"host_name": "Bob Smith", "company": "Lone Star Properties",
                       "host_location": "Round Rock, TX", "listings_count": 40}),
            ],
        ),
    ]
}

fn criteria(max_results: usize, min_score: f64) -> SearchCriteria {
    SearchCriteria::new(
        vec!["property manager".to_string()],
        Some("Austin, TX".to_string()),
        None,
        max_results,
        min_score,
    )
    .unwrap()
}

fn assessment() -> Value {
    json!({"score": 80, "reasoning": "Manages a local portfolio", "suggested_approach": "Phone call"})
}

#[tokio::test]
async fn test_austin_run_end_to_end() {
    let model = FixedModel::new(assessment());
    let engine = Arc::new(ScoringEngine::new(Some(model.clone() as Arc<dyn LanguageModel>), 4));
    let orchestrator = Orchestrator::new(austin_sources(), engine);

    let output = orchestrator.generate(&criteria(5, 0.6)).await.unwrap();
    let leads = &output.leads;

    let names: Vec<&str> = leads.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["Maria Lopez", "Jane Doe", "Bob Smith", "Sam Rivera"]);

    // First-seen duplicate wins
    assert_eq!(leads[1].source, "linkedin");
    assert_eq!(leads[2].source, "linkedin");

    for pair in leads.windows(2) {
        assert!(pair[0].total_score() >= pair[1].total_score());
    }
    for lead in leads {
        let score = lead.score.as_ref().unwrap();
        assert!(score.total >= 0.6);
        assert!(!score.degraded);
        assert_eq!(score.suggested_approach.as_deref(), Some("Phone call"));
    }
    let keys: HashSet<_> = leads.iter().map(dedup_key).collect();
    assert_eq!(keys.len(), leads.len());

    assert_eq!(leads[0].phone.as_deref(), Some("+15124721234"));
    assert_eq!(leads[3].properties_managed, Some(14));
    assert_eq!(leads[3].metadata["superhost"], json!(true));

    let report = &output.report;
    assert_eq!(report.run_id, output.run_id);
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.raw_records, 8);
    assert_eq!(report.dropped, 0);
    assert_eq!(report.duplicates_removed, 2);
    assert_eq!(report.degraded_scores, 0);
    assert_eq!(report.below_threshold, 2);
    assert_eq!(report.returned, 4);
    assert!(report.sources.iter().all(|s| s.outcome == SourceOutcome::Ok));

    // One assessment per unique lead
    assert_eq!(model.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_max_results_truncates_highest_first() {
    let engine = Arc::new(ScoringEngine::new(Some(FixedModel::new(assessment()) as Arc<dyn LanguageModel>), 2));
    let orchestrator = Orchestrator::new(austin_sources(), engine);

    let leads = orchestrator.generate_leads(&criteria(2, 0.0)).await.unwrap();
    let names: Vec<&str> = leads.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["Maria Lopez", "Jane Doe"]);
}

#[tokio::test]
async fn test_model_outage_degrades_but_completes() {
    let engine = Arc::new(ScoringEngine::new(Some(Arc::new(DownModel) as Arc<dyn LanguageModel>), 4));
    let orchestrator = Orchestrator::new(austin_sources(), engine);

    let output = orchestrator.generate(&criteria(10, 0.0)).await.unwrap();

    assert_eq!(output.leads.len(), 6);
    assert_eq!(output.report.degraded_scores, 6);
    for lead in &output.leads {
        let score = lead.score.as_ref().unwrap();
        assert!(score.degraded);
        assert_eq!(score.ai_assessment, 0.5);
        assert!(score.notes.as_deref().unwrap().starts_with("Degraded scoring"));
    }
    assert_eq!(output.leads[0].name, "Maria Lopez");
    assert!((output.leads[0].total_score() - 0.895).abs() < 1e-9);
}

#[tokio::test]
async fn test_unauthorized_source_is_excluded() {
    let engine = Arc::new(ScoringEngine::rule_only(4));
    let sources = vec![
        StubAdapter::unauthorized("linkedin"),
        StubAdapter::records(
            "web",
            vec![json!({"name": "Maria Lopez", "title": "Property Manager"})],
        ),
    ];
    let orchestrator = Orchestrator::new(sources, engine);

    let output = orchestrator.generate(&criteria(10, 0.0)).await.unwrap();

    assert_eq!(output.leads.len(), 1);
    assert_eq!(output.report.sources[0].outcome, SourceOutcome::AuthFailed);
    assert!(output.report.sources[0].error.is_some());
    assert_eq!(output.report.sources[0].records, 0);
    assert_eq!(output.report.sources[1].outcome, SourceOutcome::Ok);
    assert_eq!(output.report.raw_records, 1);
    assert!(output.leads.iter().all(|l| l.source == "web"));
}

#[tokio::test]
async fn test_all_sources_unauthorized_fails_run() {
    let engine = Arc::new(ScoringEngine::rule_only(4));
    let sources = vec![
        StubAdapter::unauthorized("linkedin"),
        StubAdapter::unauthorized("web"),
    ];
    let orchestrator = Orchestrator::new(sources, engine);

    match orchestrator.generate(&criteria(10, 0.0)).await {
        Err(LeadGenError::AllSourcesUnauthorized(sources)) => {
            assert_eq!(sources, vec!["linkedin".to_string(), "web".to_string()]);
        }
        other => panic!("expected AllSourcesUnauthorized, got {:?}", other.map(|o| o.leads)),
    }
}

#[tokio::test]
async fn test_empty_sources_yield_empty_result() {
    let engine = Arc::new(ScoringEngine::rule_only(4));
    let sources = vec![StubAdapter::records("web", vec![]), StubAdapter::records("listing", vec![])];
    let orchestrator = Orchestrator::new(sources, engine);

    let output = orchestrator.generate(&criteria(10, 0.0)).await.unwrap();
    assert!(output.leads.is_empty());
    assert_eq!(output.report.state, RunState::Done);
    assert!(output
        .report
        .sources
        .iter()
        .all(|s| s.outcome == SourceOutcome::Empty));
}

#[tokio::test]
async fn test_unnamed_records_are_dropped() {
    let engine = Arc::new(ScoringEngine::rule_only(4));
    let sources = vec![StubAdapter::records(
        "web",
        vec![
            json!({"title": "Property Manager", "company": "No Name LLC"}),
            json!({"name": "   ", "title": "Leasing Manager"}),
            json!({"name": "Ana Ruiz", "title": "Leasing Manager"}),
        ],
    )];
    let orchestrator = Orchestrator::new(sources, engine);

    let output = orchestrator.generate(&criteria(10, 0.0)).await.unwrap();
    assert_eq!(output.leads.len(), 1);
    assert_eq!(output.report.dropped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_exceeding_budget_times_out() {
    let engine = Arc::new(ScoringEngine::rule_only(4));
    let sources = vec![StubAdapter::slow("web", Duration::from_secs(60))];
    let orchestrator =
        Orchestrator::new(sources, engine).with_generate_timeout(Duration::from_secs(5));

    match orchestrator.generate(&criteria(10, 0.0)).await {
        Err(LeadGenError::TimedOut(budget)) => assert_eq!(budget, Duration::from_secs(5)),
        other => panic!("expected TimedOut, got {:?}", other.map(|o| o.leads)),
    }
}

#[tokio::test]
async fn test_export_of_run_output() {
    let engine = Arc::new(ScoringEngine::new(Some(FixedModel::new(assessment()) as Arc<dyn LanguageModel>), 4));
    let orchestrator = Orchestrator::new(austin_sources(), engine);
    let leads = orchestrator.generate_leads(&criteria(5, 0.6)).await.unwrap();

    let csv_bytes = orchestrator.export(&leads, ExportFormat::Csv).unwrap();
    let mut reader = csv::Reader::from_reader(csv_bytes.as_slice());
    let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert!(header.contains(&"score_total".to_string()));
    assert!(header.contains(&"metadata_superhost".to_string()));
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), leads.len());
    assert!(rows.iter().all(|r| r.len() == header.len()));

    let json_bytes = orchestrator.export(&leads, ExportFormat::Json).unwrap();
    let parsed: Value = serde_json::from_slice(&json_bytes).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), leads.len());
    assert_eq!(parsed[0]["name"], json!("Maria Lopez"));

    assert!(orchestrator.export(&[], ExportFormat::Csv).unwrap().is_empty());
}

#[tokio::test]
async fn test_analyze_result_set() {
    let model = FixedModel::new(json!({
        "score": 70,
        "reasoning": "Local operator",
        "summary": "Strong Austin pipeline"
    }));
    let engine = Arc::new(ScoringEngine::new(Some(model as Arc<dyn LanguageModel>), 4));
    let orchestrator = Orchestrator::new(austin_sources(), engine);
    let leads = orchestrator.generate_leads(&criteria(5, 0.0)).await.unwrap();

    let analysis = orchestrator.analyze(&leads).await;
    assert!(!analysis.degraded);
    assert!(analysis.analysis.contains("Strong Austin pipeline"));
}

#[tokio::test]
async fn test_analyze_without_model_falls_back() {
    let orchestrator = Orchestrator::new(austin_sources(), Arc::new(ScoringEngine::rule_only(4)));
    let leads = orchestrator.generate_leads(&criteria(5, 0.0)).await.unwrap();

    let analysis = orchestrator.analyze(&leads).await;
    assert!(analysis.degraded);
    assert_eq!(analysis.analysis, "Lead analysis unavailable");
}
