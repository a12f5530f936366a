use super::{fetch_json, fetch_text, host_identity, html, settle, ContextFactory, SourceAdapter};
use crate::config::WebSearchSettings;
use crate::errors::LeadGenError;
use crate::fetch_policy::FetchPolicy;
use crate::models::{RawRecord, SearchCriteria};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

pub const SOURCE_NAME: &str = "web";

/// Sites covered by dedicated adapters or that block scraping outright.
const EXCLUDED_DOMAINS: &[&str] = &[
    "linkedin.com",
    "airbnb.com",
    "facebook.com",
    "twitter.com",
    "x.com",
    "instagram.com",
];

/// "Jane Doe, Senior Property Manager" and similar.
static NAME_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b([A-Z][a-z]+(?: [A-Z]\.)?(?: [A-Z][a-zA-Z'-]+){1,2})\s*(?:,|-|–|\||:)\s*((?:[A-Z][a-z]+ ){0,3}(?:Manager|Director|Owner|President|Principal|Broker|Supervisor|Administrator))\b",
    )
    .unwrap()
});

/// Portfolio size phrasings, tried in order; the first that matches wins.
static PORTFOLIO_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(\d[\d,]*)\+?\s*(?:properties|units|doors)\b",
        r"(?i)portfolio of (\d[\d,]*)",
        r"(?i)managing (\d[\d,]*)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

/// "15 years of experience", "over 20+ years".
static EXPERIENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2})\+?\s*(?:years?|yrs)\b").unwrap());

const PROPERTY_TYPES: &[&str] = &[
    "residential",
    "commercial",
    "industrial",
    "retail",
    "multi-family",
    "single-family",
    "office",
    "mixed-use",
];

/// Words that open a sentence rather than a name.
const LEADING_NOISE: &[&str] = &["Meet", "Contact", "About", "Call", "Email", "Our", "The"];

/// Search-engine driven discovery of property-management company pages.
///
/// Runs one query per keyword against a JSON search API
/// (`{"items": [{"link": ..., "title": ...}]}`), then scrapes each result
/// page for named managers and contact details.
pub struct WebSearchAdapter {
    settings: WebSearchSettings,
    policy: FetchPolicy,
    contexts: ContextFactory,
}

impl WebSearchAdapter {
    pub fn new(settings: WebSearchSettings, policy: FetchPolicy, contexts: ContextFactory) -> Self {
        Self {
            settings,
            policy,
            contexts,
        }
    }

    fn query_url(&self, query: &str) -> Result<Url, LeadGenError> {
        let mut params = vec![
            ("q", query.to_string()),
            ("num", self.settings.results_per_query.to_string()),
        ];
        if let Some(ref key) = self.settings.api_key {
            params.push(("key", key.clone()));
        }
        Url::parse_with_params(&self.settings.search_url, &params)
            .map_err(|e| LeadGenError::Internal(format!("Invalid search URL: {}", e)))
    }

    async fn try_fetch(
        &self,
        criteria: &SearchCriteria,
        limit: usize,
    ) -> Result<Vec<RawRecord>, LeadGenError> {
        let ctx = self.contexts.open(SOURCE_NAME)?;

        let mut pages: Vec<Url> = Vec::new();
        let mut seen_pages = HashSet::new();
        let queries = build_queries(criteria, self.settings.max_queries);

        let mut last_error = None;
        let mut answered = 0usize;

        for query in &queries {
            let url = self.query_url(query)?;
            let identity = host_identity(SOURCE_NAME, &url);
            let body = match fetch_json(&ctx, &self.policy, SOURCE_NAME, &identity, &url, None).await
            {
                Ok(body) => body,
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    tracing::warn!(source = SOURCE_NAME, query = %query, error = %e, "Search query failed");
                    last_error = Some(e);
                    continue;
                }
            };
            answered += 1;

            for link in result_links(&body) {
                if seen_pages.insert(link.to_string()) {
                    pages.push(link);
                }
            }
        }

        // Every query failed: surface the last error so the source reports empty.
        if answered == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        tracing::debug!(source = SOURCE_NAME, pages = pages.len(), "Search results collected");

        let mut records = Vec::new();
        let mut seen_names = HashSet::new();

        for page_url in pages {
            if records.len() >= limit {
                break;
            }
            let identity = host_identity(SOURCE_NAME, &page_url);
            let body = match fetch_text(&ctx, &self.policy, SOURCE_NAME, &identity, &page_url, None)
                .await
            {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(source = SOURCE_NAME, url = %page_url, error = %e, "Skipping page");
                    continue;
                }
            };

            for record in extract_page_records(&body, &page_url) {
                let key = record
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_lowercase)
                    .unwrap_or_default();
                if seen_names.insert(key) {
                    records.push(record);
                }
                if records.len() >= limit {
                    break;
                }
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for WebSearchAdapter {
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

fn build_queries(criteria: &SearchCriteria, max_queries: usize) -> Vec<String> {
    criteria
        .keywords()
        .iter()
        .take(max_queries.max(1))
        .map(|keyword| {
            let mut query = format!("\"{}\" property management company", keyword);
            if let Some(industry) = criteria.industry() {
                query.push(' ');
                query.push_str(industry);
            }
            if let Some(location) = criteria.location() {
                query.push(' ');
                query.push_str(location);
            }
            query
        })
        .collect()
}

fn is_excluded(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return true;
    };
    let host = host.to_lowercase();
    EXCLUDED_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

fn result_links(body: &Value) -> Vec<Url> {
    body.get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("link").and_then(Value::as_str))
                .filter_map(|link| Url::parse(link).ok())
                .filter(|url| matches!(url.scheme(), "http" | "https"))
                .filter(|url| !is_excluded(url))
                .collect()
        })
        .unwrap_or_default()
}

fn strip_leading_noise(name: &str) -> Option<String> {
    let mut words: Vec<&str> = name.split_whitespace().collect();
    while words
        .first()
        .is_some_and(|w| LEADING_NOISE.contains(w))
    {
        words.remove(0);
    }
    // A lone first name is not enough to reach anyone.
    if words.len() < 2 {
        return None;
    }
    Some(words.join(" "))
}

fn page_company(document: &Html) -> Option<String> {
    html::first_attr(document, "meta[property=\"og:site_name\"]", "content").or_else(|| {
        html::first_text(document, "title").and_then(|title| {
            title
                .split(['|', '-', '–'])
                .next()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        })
    })
}

/// Named managers found on one scraped page.
fn extract_page_records(body: &str, page_url: &Url) -> Vec<RawRecord> {
    let document = Html::parse_document(body);
    let company = page_company(&document);
    let (email, phone) = html::contact_info(&document);
    let text = html::body_text(&document);
    let location = html::find_city_state(&text);
    let website = page_url.origin().ascii_serialization();
    let profile = PortfolioProfile::from_text(&text);

    let Ok(selector) = Selector::parse("h1, h2, h3, h4, p, li, td, span, strong") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for element in document.select(&selector) {
        let text = html::element_text(&element);
        for caps in NAME_TITLE_RE.captures_iter(&text) {
            let Some(name) = caps.get(1).and_then(|m| strip_leading_noise(m.as_str())) else {
                continue;
            };
            if !seen.insert(name.clone()) {
                continue;
            }
            let title = caps.get(2).map(|m| m.as_str().trim().to_string());

            let mut record = RawRecord::new();
            record.insert("name".into(), json!(name));
            record.insert("title".into(), json!(title));
            record.insert("company".into(), json!(company));
            record.insert("location".into(), json!(location));
            record.insert("email".into(), json!(email));
            record.insert("phone".into(), json!(phone));
            record.insert("website".into(), json!(website));
            record.insert("source_url".into(), json!(page_url.as_str()));
            profile.apply(&mut record);
            records.push(record);
        }
    }

    records
}

/// Company-level portfolio hints read from a page's text.
#[derive(Debug, Default, PartialEq)]
struct PortfolioProfile {
    size: Option<u32>,
    property_types: Vec<&'static str>,
    experience_years: Option<u32>,
}

impl PortfolioProfile {
    fn from_text(text: &str) -> Self {
        let size = PORTFOLIO_RES.iter().find_map(|re| {
            re.captures_iter(text)
                .filter_map(|caps| caps.get(1)?.as_str().replace(',', "").parse::<u32>().ok())
                .filter(|n| *n > 0)
                .max()
        });

        let lower = text.to_lowercase();
        let property_types = PROPERTY_TYPES
            .iter()
            .copied()
            .filter(|kind| lower.contains(kind))
            .collect();

        let experience_years = EXPERIENCE_RE
            .captures_iter(text)
            .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
            .max();

        Self {
            size,
            property_types,
            experience_years,
        }
    }

    fn apply(&self, record: &mut RawRecord) {
        if let Some(size) = self.size {
            record.insert("properties_managed".into(), json!(size));
        }
        if !self.property_types.is_empty() {
            record.insert("property_types".into(), json!(self.property_types.join(", ")));
        }
        if let Some(years) = self.experience_years {
            record.insert("experience_years".into(), json!(years));
        }
    }
}
