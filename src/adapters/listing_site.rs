use super::{fetch_text, host_identity, html, settle, ContextFactory, SourceAdapter};
use crate::config::ListingSiteSettings;
use crate::errors::LeadGenError;
use crate::fetch_policy::FetchPolicy;
use crate::models::{RawRecord, SearchCriteria};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::json;
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

pub const SOURCE_NAME: &str = "listing";

static LISTING_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d[\d,]*)\s+(?:listings?|homes?|properties)\b").unwrap());

static REVIEW_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d[\d,]*)\s+reviews?\b").unwrap());

static JOINED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)joined in\s+(\d{4})").unwrap());

/// Host found on a search results page, before its profile is fetched.
#[derive(Debug, Clone, PartialEq)]
struct HostLink {
    profile_url: Url,
    sample_listing: Option<String>,
}

/// Short-term-rental hosts from a listing marketplace.
///
/// Walks `{base_url}/s/{location}/homes?page=N`, collects host profile links
/// from the listing cards and scrapes each profile. Hosts with many listings
/// are usually professional operators.
pub struct ListingSiteAdapter {
    settings: ListingSiteSettings,
    policy: FetchPolicy,
    contexts: ContextFactory,
}

impl ListingSiteAdapter {
    pub fn new(
        settings: ListingSiteSettings,
        policy: FetchPolicy,
        contexts: ContextFactory,
    ) -> Self {
        Self {
            settings,
            policy,
            contexts,
        }
    }

    fn base(&self) -> Result<Url, LeadGenError> {
        Url::parse(&self.settings.base_url)
            .map_err(|e| LeadGenError::Internal(format!("Invalid listing base URL: {}", e)))
    }

    fn search_url(&self, criteria: &SearchCriteria, page: u32) -> Result<Url, LeadGenError> {
        let slug = criteria
            .location()
            .map(location_slug)
            .unwrap_or_else(|| "United-States".to_string());
        let mut url = self
            .base()?
            .join(&format!("/s/{}/homes", slug))
            .map_err(|e| LeadGenError::Internal(format!("Invalid listing search path: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("query", &criteria.keywords().join(" "))
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    async fn try_fetch(
        &self,
        criteria: &SearchCriteria,
        limit: usize,
    ) -> Result<Vec<RawRecord>, LeadGenError> {
        let base = self.base()?;
        let ctx = self.contexts.open(SOURCE_NAME)?;

        let mut hosts: Vec<HostLink> = Vec::new();
        let mut seen = HashSet::new();

        for page in 1..=self.settings.max_pages.max(1) {
            if hosts.len() >= limit {
                break;
            }
            let url = self.search_url(criteria, page)?;
            let identity = host_identity(SOURCE_NAME, &url);
            let body = match fetch_text(&ctx, &self.policy, SOURCE_NAME, &identity, &url, None).await
            {
                Ok(body) => body,
                Err(e) if e.is_auth() || page == 1 => return Err(e),
                Err(e) => {
                    tracing::warn!(source = SOURCE_NAME, page, error = %e, "Skipping search page");
                    continue;
                }
            };

            let found = extract_host_links(&body, &base);
            if found.is_empty() {
                break;
            }
            for host in found {
                if seen.insert(host.profile_url.to_string()) {
                    hosts.push(host);
                }
            }
        }

        tracing::debug!(source = SOURCE_NAME, hosts = hosts.len(), "Host profiles discovered");

        let mut records = Vec::new();
        for host in hosts.into_iter().take(limit) {
            let identity = host_identity(SOURCE_NAME, &host.profile_url);
            match fetch_text(
                &ctx,
                &self.policy,
                SOURCE_NAME,
                &identity,
                &host.profile_url,
                None,
            )
            .await
            {
                Ok(body) => {
                    if let Some(record) = parse_host_profile(&body, &host) {
                        records.push(record);
                    }
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    tracing::warn!(source = SOURCE_NAME, url = %host.profile_url, error = %e, "Skipping host profile");
                }
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for ListingSiteAdapter {
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

/// "Austin, TX" becomes "Austin--TX".
fn location_slug(location: &str) -> String {
    location
        .split(',')
        .map(|part| part.split_whitespace().collect::<Vec<_>>().join("-"))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("--")
}

fn parse_count(text: &str, re: &Regex) -> Option<u32> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
}

fn extract_host_links(body: &str, base: &Url) -> Vec<HostLink> {
    let document = Html::parse_document(body);
    let (Ok(card_sel), Ok(host_sel), Ok(name_sel)) = (
        Selector::parse("[itemprop=\"itemListElement\"]"),
        Selector::parse("a[href*=\"/users/show/\"]"),
        Selector::parse("meta[itemprop=\"name\"]"),
    ) else {
        return Vec::new();
    };

    document
        .select(&card_sel)
        .filter_map(|card| {
            let href = card
                .select(&host_sel)
                .next()
                .and_then(|a| a.value().attr("href"))?;
            let mut profile_url = base.join(href).ok()?;
            profile_url.set_query(None);
            profile_url.set_fragment(None);
            let sample_listing = card
                .select(&name_sel)
                .next()
                .and_then(|m| m.value().attr("content"))
                .map(html::clean_text)
                .filter(|t| !t.is_empty());
            Some(HostLink {
                profile_url,
                sample_listing,
            })
        })
        .collect()
}

fn parse_host_profile(body: &str, host: &HostLink) -> Option<RawRecord> {
    let document = Html::parse_document(body);

    let name = html::first_text(&document, "h1")
        .map(|h| {
            h.trim_start_matches("Hi, I'm")
                .trim_start_matches("Hi, I’m")
                .trim_start_matches("About")
                .trim()
                .to_string()
        })
        .filter(|n| !n.is_empty());
    let Some(name) = name else {
        tracing::debug!(source = SOURCE_NAME, url = %host.profile_url, "Host profile without a name");
        return None;
    };

    let text = html::body_text(&document);
    let location = html::first_text(&document, "[data-testid=\"host-location\"]")
        .map(|l| l.trim_start_matches("Lives in").trim().to_string())
        .or_else(|| html::find_city_state(&text));
    let (email, phone) = html::contact_info(&document);

    let mut record = RawRecord::new();
    record.insert("host_name".into(), json!(name));
    record.insert("host_location".into(), json!(location));
    record.insert("listings_count".into(), json!(parse_count(&text, &LISTING_COUNT_RE)));
    record.insert("reviews_count".into(), json!(parse_count(&text, &REVIEW_COUNT_RE)));
    record.insert("superhost".into(), json!(text.contains("Superhost")));
    record.insert(
        "member_since".into(),
        json!(JOINED_RE
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())),
    );
    record.insert("sample_listing".into(), json!(host.sample_listing));
    record.insert("profile_url".into(), json!(host.profile_url.as_str()));
    record.insert("email".into(), json!(email));
    record.insert("phone".into(), json!(phone));
    Some(record)
}
