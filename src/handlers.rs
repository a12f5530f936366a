use crate::adapters::ContextTracker;
use crate::config::PipelineConfig;
use crate::errors::{LeadGenError, ResultExt};
use crate::models::{ExportFormat, Lead, SearchCriteria};
use crate::pipeline::{Orchestrator, RunReport};
use crate::rate_limiter::{RateLimiter, RemainingQuota};
use crate::scoring::LeadSetAnalysis;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Pipeline entry point.
    pub orchestrator: Arc<Orchestrator>,
    /// Defaults for omitted request fields.
    pub pipeline: PipelineConfig,
    /// Outbound limiter shared by every adapter.
    pub limiter: Arc<RateLimiter>,
    /// Open fetch contexts, reported by `/health`.
    pub contexts: ContextTracker,
    /// Whether a language model is configured.
    pub llm_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct GenerateLeadsRequest {
    pub keywords: Vec<String>,
    pub location: Option<String>,
    pub industry: Option<String>,
    pub max_results: Option<usize>,
    pub min_score: Option<f64>,
    #[serde(default)]
    pub include_analysis: bool,
}

#[derive(Debug, Serialize)]
pub struct GenerateLeadsResponse {
    pub run_id: Uuid,
    pub count: usize,
    pub leads: Vec<Lead>,
    pub report: RunReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<LeadSetAnalysis>,
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub leads: Vec<Lead>,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "leadgen",
            "version": env!("CARGO_PKG_VERSION"),
            "sources": state.orchestrator.sources(),
            "llm_enabled": state.llm_enabled,
            "open_fetch_contexts": state.contexts.open_contexts(),
        })),
    )
}

/// POST /api/v1/leads/generate
///
/// Validates the criteria, runs the pipeline and optionally attaches a
/// summary analysis of the result set.
pub async fn generate_leads(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateLeadsRequest>,
) -> Result<Json<GenerateLeadsResponse>, LeadGenError> {
    tracing::info!(
        keywords = ?request.keywords,
        location = ?request.location,
        include_analysis = request.include_analysis,
        "POST /leads/generate"
    );

    let criteria = SearchCriteria::new(
        request.keywords,
        request.location,
        request.industry,
        request
            .max_results
            .unwrap_or(state.pipeline.default_max_results),
        request.min_score.unwrap_or(state.pipeline.default_min_score),
    )?;

    let output = state.orchestrator.generate(&criteria).await?;

    let analysis = if request.include_analysis {
        Some(state.orchestrator.analyze(&output.leads).await)
    } else {
        None
    };

    Ok(Json(GenerateLeadsResponse {
        run_id: output.run_id,
        count: output.leads.len(),
        leads: output.leads,
        report: output.report,
        analysis,
    }))
}

/// POST /api/v1/leads/export?format=csv|json
pub async fn export_leads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExportParams>,
    Json(request): Json<ExportRequest>,
) -> Result<Response, LeadGenError> {
    let format = match params.format {
        Some(ref f) => f.parse::<ExportFormat>()?,
        None => ExportFormat::default(),
    };
    tracing::info!(leads = request.leads.len(), format = %format, "POST /leads/export");

    let bytes = state
        .orchestrator
        .export(&request.leads, format)
        .with_context(|| format!("Exporting {} leads as {}", request.leads.len(), format))?;

    let filename = format!(
        "leads_{}.{}",
        chrono::Utc::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// GET /api/v1/rate-limit/:identity
pub async fn rate_limit_status(
    State(state): State<Arc<AppState>>,
    Path(identity): Path<String>,
) -> Json<RemainingQuota> {
    Json(state.limiter.remaining(&identity))
}
