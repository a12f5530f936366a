use axum::{
    routing::{get, post},
    Router,
};
use leadgen::adapters::{build_adapters, ContextFactory};
use leadgen::config::Config;
use leadgen::fetch_policy::FetchPolicy;
use leadgen::handlers::{self, AppState};
use leadgen::pipeline::Orchestrator;
use leadgen::rate_limiter::RateLimiter;
use leadgen::scoring::{LanguageModel, OpenAiClient, ScoringEngine};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// Wires the limiter, fetch policy, adapters, scoring engine and orchestrator
/// from configuration, then serves the HTTP API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leadgen=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // One limiter for every outbound request, keyed per source and host
    let limiter = Arc::new(RateLimiter::new(
        config.pipeline.max_requests_per_minute,
        config.pipeline.max_requests_per_hour,
    ));
    let policy = FetchPolicy::new(limiter.clone())
        .with_max_attempts(config.pipeline.max_attempts)
        .with_backoff(config.pipeline.backoff_base, config.pipeline.backoff_max)
        .with_request_timeout(config.pipeline.request_timeout);
    let contexts = ContextFactory::new(config.pipeline.request_timeout)
        .with_proxies(config.sources.proxies.clone());
    let context_tracker = contexts.tracker();

    let adapters = build_adapters(&config.sources, &policy, &contexts);

    let model: Option<Arc<dyn LanguageModel>> = match OpenAiClient::from_config(&config.llm)? {
        Some(client) => {
            tracing::info!("✓ Language model client initialized: {}", config.llm.model);
            Some(Arc::new(client))
        }
        None => None,
    };
    let llm_enabled = model.is_some();
    let engine = Arc::new(
        ScoringEngine::new(model, config.pipeline.scoring_concurrency)
            .with_llm_timeout(config.llm.timeout),
    );
    tracing::info!(
        "Scoring engine initialized (concurrency {}, assessment cache 1h/10k)",
        config.pipeline.scoring_concurrency
    );

    let orchestrator = Arc::new(
        Orchestrator::new(adapters, engine).with_generate_timeout(config.pipeline.generate_timeout),
    );

    // Build application state
    let app_state = Arc::new(AppState {
        orchestrator,
        pipeline: config.pipeline.clone(),
        limiter,
        contexts: context_tracker,
        llm_enabled,
    });

    // Configure inbound rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        .route("/api/v1/leads/generate", post(handlers::generate_leads))
        .route("/api/v1/leads/export", post(handlers::export_leads))
        .route(
            "/api/v1/rate-limit/:identity",
            get(handlers::rate_limit_status),
        )
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
