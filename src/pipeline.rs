//! Orchestration of one lead-generation run.
//!
//! `PENDING → FETCHING → NORMALIZING → DEDUPING → SCORING → FILTERING → DONE`,
//! with `FAILED` reachable when every source rejects its credentials or the
//! run exceeds its time budget.

use crate::adapters::SourceAdapter;
use crate::errors::LeadGenError;
use crate::export;
use crate::models::{ExportFormat, Lead, RawRecord, SearchCriteria};
use crate::normalizer::{dedup_key, normalize};
use crate::scoring::{LeadSetAnalysis, ScoringEngine};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Adapters are asked for more records than the caller wants, since
/// deduplication and the score threshold both shrink the set.
const FETCH_OVERSAMPLE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Pending,
    Fetching,
    Normalizing,
    Deduping,
    Scoring,
    Filtering,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOutcome {
    /// Returned at least one record.
    Ok,
    /// Returned nothing, including after exhausted retries.
    Empty,
    /// Rejected credentials; excluded for the rest of the run.
    AuthFailed,
    /// Broke the adapter contract by surfacing a non-auth error.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub records: usize,
    pub outcome: SourceOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Observability summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub state: RunState,
    pub sources: Vec<SourceReport>,
    pub raw_records: usize,
    /// Records the normalizer rejected.
    pub dropped: usize,
    pub duplicates_removed: usize,
    pub degraded_scores: usize,
    pub below_threshold: usize,
    pub returned: usize,
    pub elapsed_ms: u64,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            state: RunState::Pending,
            sources: Vec::new(),
            raw_records: 0,
            dropped: 0,
            duplicates_removed: 0,
            degraded_scores: 0,
            below_threshold: 0,
            returned: 0,
            elapsed_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    pub leads: Vec<Lead>,
    pub report: RunReport,
}

pub struct Orchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    engine: Arc<ScoringEngine>,
    generate_timeout: Duration,
}

impl Orchestrator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, engine: Arc<ScoringEngine>) -> Self {
        Self {
            adapters,
            engine,
            generate_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_generate_timeout(mut self, timeout: Duration) -> Self {
        self.generate_timeout = timeout;
        self
    }

    pub fn sources(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    /// Runs the whole pipeline for `criteria` within the time budget.
    ///
    /// Dropping the returned future cancels every in-flight fetch and
    /// scoring call, releasing their network contexts.
    pub async fn generate(&self, criteria: &SearchCriteria) -> Result<PipelineOutput, LeadGenError> {
        let run_id = Uuid::new_v4();
        match tokio::time::timeout(self.generate_timeout, self.run(run_id, criteria)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    run_id = %run_id,
                    state = ?RunState::Failed,
                    budget_ms = self.generate_timeout.as_millis() as u64,
                    "Run exceeded its time budget"
                );
                Err(LeadGenError::TimedOut(self.generate_timeout))
            }
        }
    }

    /// Leads only.
    pub async fn generate_leads(&self, criteria: &SearchCriteria) -> Result<Vec<Lead>, LeadGenError> {
        self.generate(criteria).await.map(|output| output.leads)
    }

    pub fn export(&self, leads: &[Lead], format: ExportFormat) -> Result<Vec<u8>, LeadGenError> {
        export::export(leads, format)
    }

    pub async fn analyze(&self, leads: &[Lead]) -> LeadSetAnalysis {
        self.engine.analyze(leads).await
    }

    async fn run(&self, run_id: Uuid, criteria: &SearchCriteria) -> Result<PipelineOutput, LeadGenError> {
        let started = Instant::now();
        let mut report = RunReport::new(run_id);
        tracing::info!(
            run_id = %run_id,
            keywords = ?criteria.keywords(),
            location = ?criteria.location(),
            max_results = criteria.max_results(),
            min_score = criteria.min_score(),
            "Lead generation run started"
        );

        // Fetch
        advance(&mut report, RunState::Fetching);
        let fetched = self.fetch_all(criteria, &mut report).await;
        if !report.sources.is_empty()
            && report
                .sources
                .iter()
                .all(|s| s.outcome == SourceOutcome::AuthFailed)
        {
            advance(&mut report, RunState::Failed);
            let sources = report.sources.iter().map(|s| s.source.clone()).collect();
            return Err(LeadGenError::AllSourcesUnauthorized(sources));
        }

        // Normalize
        advance(&mut report, RunState::Normalizing);
        let mut normalized = Vec::new();
        for (source, record) in &fetched {
            match normalize(record, source) {
                Some(lead) => normalized.push(lead),
                None => report.dropped += 1,
            }
        }
        if report.dropped > 0 {
            tracing::debug!(run_id = %run_id, dropped = report.dropped, "Unnormalizable records dropped");
        }

        // Dedupe
        advance(&mut report, RunState::Deduping);
        let normalized_count = normalized.len();
        let unique = dedupe(normalized);
        report.duplicates_removed = normalized_count - unique.len();

        // Score
        advance(&mut report, RunState::Scoring);
        let scored = self.engine.score_all(unique).await;
        report.degraded_scores = scored
            .iter()
            .filter(|l| l.score.as_ref().is_some_and(|s| s.degraded))
            .count();

        // Filter, rank, truncate
        advance(&mut report, RunState::Filtering);
        report.below_threshold = scored
            .iter()
            .filter(|l| l.total_score() < criteria.min_score())
            .count();
        let leads = rank(scored, criteria.min_score(), criteria.max_results());
        report.returned = leads.len();

        advance(&mut report, RunState::Done);
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %run_id,
            returned = report.returned,
            raw = report.raw_records,
            duplicates = report.duplicates_removed,
            degraded = report.degraded_scores,
            elapsed_ms = report.elapsed_ms,
            "Lead generation run complete"
        );

        Ok(PipelineOutput {
            run_id,
            leads,
            report,
        })
    }

    /// Fans out to every adapter concurrently. Records come back in adapter
    /// order, then within-adapter order.
    async fn fetch_all(
        &self,
        criteria: &SearchCriteria,
        report: &mut RunReport,
    ) -> Vec<(String, RawRecord)> {
        let limit = criteria.max_results() * FETCH_OVERSAMPLE;
        let results = join_all(self.adapters.iter().map(|adapter| async move {
            (adapter.name().to_string(), adapter.fetch(criteria, limit).await)
        }))
        .await;

        let mut fetched = Vec::new();
        for (source, result) in results {
            let (records, outcome, error) = match result {
                Ok(records) if records.is_empty() => (records, SourceOutcome::Empty, None),
                Ok(records) => (records, SourceOutcome::Ok, None),
                Err(e) if e.is_auth() => {
                    tracing::warn!(run_id = %report.run_id, source = %source, error = %e, "Source excluded after auth failure");
                    (Vec::new(), SourceOutcome::AuthFailed, Some(e.to_string()))
                }
                Err(e) => {
                    tracing::warn!(run_id = %report.run_id, source = %source, error = %e, "Source failed");
                    (Vec::new(), SourceOutcome::Failed, Some(e.to_string()))
                }
            };

            report.sources.push(SourceReport {
                source: source.clone(),
                records: records.len(),
                outcome,
                error,
            });
            fetched.extend(records.into_iter().map(|r| (source.clone(), r)));
        }

        report.raw_records = fetched.len();
        fetched
    }
}

fn advance(report: &mut RunReport, next: RunState) {
    tracing::debug!(run_id = %report.run_id, from = ?report.state, to = ?next, "Run state transition");
    report.state = next;
}

/// Keeps the first lead seen for each `(name, company)` key.
pub fn dedupe(leads: Vec<Lead>) -> Vec<Lead> {
    let mut seen = HashSet::new();
    leads
        .into_iter()
        .filter(|lead| seen.insert(dedup_key(lead)))
        .collect()
}

/// Threshold filter, stable descending sort by total, then truncation.
pub fn rank(leads: Vec<Lead>, min_score: f64, max_results: usize) -> Vec<Lead> {
    let mut kept: Vec<Lead> = leads
        .into_iter()
        .filter(|l| l.score.is_some() && l.total_score() >= min_score)
        .collect();
    kept.sort_by(|a, b| b.total_score().total_cmp(&a.total_score()));
    kept.truncate(max_results);
    kept
}
