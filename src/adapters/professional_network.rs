use super::{fetch_json, host_identity, settle, ContextFactory, SourceAdapter};
use crate::config::ProfessionalNetworkSettings;
use crate::errors::LeadGenError;
use crate::fetch_policy::FetchPolicy;
use crate::models::{RawRecord, SearchCriteria};
use async_trait::async_trait;
use serde_json::Value;
use url::Url;

pub const SOURCE_NAME: &str = "linkedin";

/// Paginated people search against a professional-network API.
///
/// Expects `GET {base_url}/people/search` to answer with
/// `{"results": [...], "paging": {"page": n, "total_pages": m}}` and to
/// reject bad credentials with 401/403.
pub struct ProfessionalNetworkAdapter {
    settings: ProfessionalNetworkSettings,
    policy: FetchPolicy,
    contexts: ContextFactory,
}

impl ProfessionalNetworkAdapter {
    pub fn new(
        settings: ProfessionalNetworkSettings,
        policy: FetchPolicy,
        contexts: ContextFactory,
    ) -> Self {
        Self {
            settings,
            policy,
            contexts,
        }
    }

    fn search_url(&self, criteria: &SearchCriteria, page: u32) -> Result<Url, LeadGenError> {
        let mut params: Vec<(&str, String)> = vec![
            ("keywords", criteria.keywords().join(" OR ")),
            ("function", "property management".to_string()),
            ("page", page.to_string()),
            ("count", self.settings.page_size.to_string()),
        ];
        if let Some(location) = criteria.location() {
            params.push(("location", location.to_string()));
        }
        if let Some(industry) = criteria.industry() {
            params.push(("industry", industry.to_string()));
        }

        Url::parse_with_params(
            &format!(
                "{}/people/search",
                self.settings.base_url.trim_end_matches('/')
            ),
            &params,
        )
        .map_err(|e| LeadGenError::Internal(format!("Failed to build search URL: {}", e)))
    }

    async fn try_fetch(
        &self,
        criteria: &SearchCriteria,
        limit: usize,
    ) -> Result<Vec<RawRecord>, LeadGenError> {
        let token = self
            .settings
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| LeadGenError::Auth {
                source: SOURCE_NAME.to_string(),
                message: "No access token configured".to_string(),
            })?;

        let ctx = self.contexts.open(SOURCE_NAME)?;
        let mut records = Vec::new();
        let mut total_pages = self.settings.max_pages.max(1);
        let mut page = 1;

        while page <= total_pages && records.len() < limit {
            let url = self.search_url(criteria, page)?;
            let identity = host_identity(SOURCE_NAME, &url);

            let body = match fetch_json(
                &ctx,
                &self.policy,
                SOURCE_NAME,
                &identity,
                &url,
                Some(token),
            )
            .await
            {
                Ok(body) => body,
                // Without the first page we know nothing about the result set.
                Err(e) if e.is_auth() || page == 1 => return Err(e),
                Err(e) => {
                    tracing::warn!(source = SOURCE_NAME, page, error = %e, "Skipping result page");
                    page += 1;
                    continue;
                }
            };

            if let Some(reported) = body
                .pointer("/paging/total_pages")
                .and_then(Value::as_u64)
            {
                total_pages = total_pages.min(reported as u32);
            }

            let results = body
                .get("results")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if results.is_empty() {
                break;
            }

            tracing::debug!(source = SOURCE_NAME, page, total_pages, count = results.len(), "Fetched result page");

            for result in results {
                match result {
                    Value::Object(mut profile) => {
                        absolutize_profile_url(&mut profile, &self.settings.base_url);
                        records.push(profile);
                    }
                    other => {
                        tracing::warn!(source = SOURCE_NAME, page, value = %other, "Skipping malformed profile");
                    }
                }
                if records.len() >= limit {
                    break;
                }
            }
            page += 1;
        }

        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for ProfessionalNetworkAdapter {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(
        &self,
        criteria: &SearchCriteria,
        limit: usize,
    ) -> Result<Vec<RawRecord>, LeadGenError> {
        settle(SOURCE_NAME, self.try_fetch(criteria, limit).await)
    }
}

/// Relative profile links ("/in/jane") are resolved against the API origin.
fn absolutize_profile_url(profile: &mut RawRecord, base_url: &str) {
    let relative = profile
        .get("profileUrl")
        .or_else(|| profile.get("profile_url"))
        .and_then(Value::as_str)
        .filter(|u| u.starts_with('/'))
        .map(str::to_string);

    if let Some(path) = relative {
        if let Ok(absolute) = Url::parse(base_url).and_then(|base| base.join(&path)) {
            profile.insert("profileUrl".to_string(), Value::String(absolute.to_string()));
            profile.remove("profile_url");
        }
    }
}
