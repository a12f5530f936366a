//! Pluggable lead sources.
//!
//! Every source implements [`SourceAdapter`]. The orchestrator only ever sees
//! the trait, so new sources plug in without touching the pipeline.
//!
//! # Failure contract
//!
//! - A failing page or profile is logged and skipped.
//! - A source that fails entirely returns `Ok(vec![])`.
//! - Credential failures are the exception: they come back as
//!   [`LeadGenError::Auth`] so the orchestrator can exclude the source for
//!   the rest of the run.

pub mod context;
pub mod html;
pub mod listing_site;
pub mod professional_network;
pub mod web_search;

pub use context::{ContextFactory, ContextTracker, FetchContext};
pub use listing_site::ListingSiteAdapter;
pub use professional_network::ProfessionalNetworkAdapter;
pub use web_search::WebSearchAdapter;

use crate::config::SourcesConfig;
use crate::errors::LeadGenError;
use crate::fetch_policy::FetchPolicy;
use crate::models::{RawRecord, SearchCriteria};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// One external lead source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable source identifier, copied into `Lead::source`.
    fn name(&self) -> &str;

    /// Returns up to `limit` raw records matching `criteria`.
    async fn fetch(
        &self,
        criteria: &SearchCriteria,
        limit: usize,
    ) -> Result<Vec<RawRecord>, LeadGenError>;
}

/// Builds every adapter whose settings are present.
pub fn build_adapters(
    sources: &SourcesConfig,
    policy: &FetchPolicy,
    contexts: &ContextFactory,
) -> Vec<Arc<dyn SourceAdapter>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    if let Some(ref network) = sources.professional_network {
        adapters.push(Arc::new(ProfessionalNetworkAdapter::new(
            network.clone(),
            policy.clone(),
            contexts.clone(),
        )));
    }
    if let Some(ref search) = sources.web_search {
        adapters.push(Arc::new(WebSearchAdapter::new(
            search.clone(),
            policy.clone(),
            contexts.clone(),
        )));
    }
    if let Some(ref listing) = sources.listing_site {
        adapters.push(Arc::new(ListingSiteAdapter::new(
            listing.clone(),
            policy.clone(),
            contexts.clone(),
        )));
    }

    tracing::info!(
        sources = ?adapters.iter().map(|a| a.name().to_string()).collect::<Vec<_>>(),
        "Lead sources configured"
    );
    adapters
}

/// Applies the failure contract to an adapter's internal result.
pub(crate) fn settle(
    source: &str,
    result: Result<Vec<RawRecord>, LeadGenError>,
) -> Result<Vec<RawRecord>, LeadGenError> {
    match result {
        Ok(records) => {
            tracing::info!(source, count = records.len(), "Source fetch complete");
            Ok(records)
        }
        Err(e) if e.is_auth() => {
            tracing::error!(source, error = %e, "Source rejected credentials");
            Err(e)
        }
        Err(e) => {
            tracing::warn!(source, error = %e, "Source fetch failed, contributing no records");
            Ok(Vec::new())
        }
    }
}

/// Rate-limit identity for requests to `url`'s host from `source`.
pub(crate) fn host_identity(source: &str, url: &Url) -> String {
    format!("{}@{}", source, url.host_str().unwrap_or("unknown"))
}

async fn send_get(
    ctx: &FetchContext,
    source: &str,
    url: &Url,
    bearer: Option<&str>,
) -> Result<reqwest::Response, LeadGenError> {
    let mut request = ctx.client().get(url.clone());
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let body: String = body.chars().take(200).collect();
        return Err(LeadGenError::from_status(source, status, &body));
    }
    Ok(response)
}

/// GET `url` as text under `policy`.
pub(crate) async fn fetch_text(
    ctx: &FetchContext,
    policy: &FetchPolicy,
    source: &str,
    identity: &str,
    url: &Url,
    bearer: Option<&str>,
) -> Result<String, LeadGenError> {
    // Query strings may carry API keys; log the path only.
    let label = format!("{} GET {}", source, url.path());
    policy
        .execute(identity, &label, move || async move {
            let response = send_get(ctx, source, url, bearer).await?;
            response.text().await.map_err(LeadGenError::from)
        })
        .await
}

/// GET `url` as JSON under `policy`.
pub(crate) async fn fetch_json(
    ctx: &FetchContext,
    policy: &FetchPolicy,
    source: &str,
    identity: &str,
    url: &Url,
    bearer: Option<&str>,
) -> Result<Value, LeadGenError> {
    let body = fetch_text(ctx, policy, source, identity, url, bearer).await?;
    serde_json::from_str(&body).map_err(|e| {
        LeadGenError::Upstream(format!("Failed to parse {} response: {}", source, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_swallows_non_auth_failures() {
        let settled = settle("web", Err(LeadGenError::TransientFetch("503".into())));
        assert!(settled.unwrap().is_empty());

        let settled = settle("web", Err(LeadGenError::Upstream("404".into())));
        assert!(settled.unwrap().is_empty());
    }

    #[test]
    fn test_settle_propagates_auth() {
        let settled = settle(
            "linkedin",
            Err(LeadGenError::Auth {
                source: "linkedin".into(),
                message: "401".into(),
            }),
        );
        assert!(settled.unwrap_err().is_auth());
    }

    #[test]
    fn test_host_identity() {
        let url = Url::parse("https://api.example.com/v1/search?q=x").unwrap();
        assert_eq!(host_identity("web", &url), "web@api.example.com");
    }
}
