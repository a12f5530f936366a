use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// Core pipeline tunables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_requests_per_minute: u32,
    pub max_requests_per_hour: u32,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub request_timeout: Duration,
    /// Upper bound on in-flight scoring calls.
    pub scoring_concurrency: usize,
    pub default_min_score: f64,
    pub default_max_results: usize,
    /// Budget for a whole `generate` call.
    pub generate_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 30,
            max_requests_per_hour: 1000,
            max_attempts: 5,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            scoring_concurrency: 5,
            default_min_score: 0.7,
            default_max_results: 25,
            generate_timeout: Duration::from_secs(120),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_requests_per_minute == 0 || self.max_requests_per_hour == 0 {
            anyhow::bail!("Rate limits must be greater than zero");
        }
        if self.max_requests_per_minute > self.max_requests_per_hour {
            anyhow::bail!("MAX_REQUESTS_PER_MINUTE cannot exceed MAX_REQUESTS_PER_HOUR");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("MAX_RETRY_ATTEMPTS must be at least 1");
        }
        if self.backoff_base > self.backoff_max {
            anyhow::bail!("BACKOFF_BASE_MS cannot exceed BACKOFF_MAX_MS");
        }
        if self.scoring_concurrency == 0 {
            anyhow::bail!("SCORING_CONCURRENCY must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.default_min_score) {
            anyhow::bail!("MIN_SCORE_THRESHOLD must be between 0.0 and 1.0");
        }
        if !(1..=100).contains(&self.default_max_results) {
            anyhow::bail!("MAX_LEADS_PER_REQUEST must be between 1 and 100");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfessionalNetworkSettings {
    pub base_url: String,
    /// Bearer token. A missing token surfaces as an auth failure at fetch time.
    pub token: Option<String>,
    pub page_size: u32,
    pub max_pages: u32,
}

impl ProfessionalNetworkSettings {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token,
            page_size: 25,
            max_pages: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebSearchSettings {
    /// Full search endpoint, e.g. `https://www.googleapis.com/customsearch/v1`.
    pub search_url: String,
    pub api_key: Option<String>,
    pub results_per_query: usize,
    pub max_queries: usize,
}

impl WebSearchSettings {
    pub fn new(search_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            search_url: search_url.into(),
            api_key,
            results_per_query: 10,
            max_queries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingSiteSettings {
    pub base_url: String,
    pub max_pages: u32,
}

impl ListingSiteSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            max_pages: 3,
        }
    }
}

/// Lead sources. An adapter is enabled when its settings are present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcesConfig {
    pub professional_network: Option<ProfessionalNetworkSettings>,
    pub web_search: Option<WebSearchSettings>,
    pub listing_site: Option<ListingSiteSettings>,
    pub proxies: Vec<String>,
}

impl SourcesConfig {
    pub fn is_empty(&self) -> bool {
        self.professional_network.is_none()
            && self.web_search.is_none()
            && self.listing_site.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    /// Without a key every score is rule-only and marked degraded.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub pipeline: PipelineConfig,
    pub sources: SourcesConfig,
    pub llm: LlmConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            max_requests_per_minute: parse_var(
                "MAX_REQUESTS_PER_MINUTE",
                defaults.max_requests_per_minute,
            )?,
            max_requests_per_hour: parse_var("MAX_REQUESTS_PER_HOUR", defaults.max_requests_per_hour)?,
            max_attempts: parse_var("MAX_RETRY_ATTEMPTS", defaults.max_attempts)?,
            backoff_base: Duration::from_millis(parse_var(
                "BACKOFF_BASE_MS",
                defaults.backoff_base.as_millis() as u64,
            )?),
            backoff_max: Duration::from_millis(parse_var(
                "BACKOFF_MAX_MS",
                defaults.backoff_max.as_millis() as u64,
            )?),
            request_timeout: Duration::from_secs(parse_var(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            scoring_concurrency: parse_var("SCORING_CONCURRENCY", defaults.scoring_concurrency)?,
            default_min_score: parse_var("MIN_SCORE_THRESHOLD", defaults.default_min_score)?,
            default_max_results: parse_var("MAX_LEADS_PER_REQUEST", defaults.default_max_results)?,
            generate_timeout: Duration::from_secs(parse_var(
                "GENERATE_TIMEOUT_SECS",
                defaults.generate_timeout.as_secs(),
            )?),
        };
        pipeline.validate()?;

        let professional_network = match optional_var("PRO_NETWORK_BASE_URL") {
            Some(url) => Some(ProfessionalNetworkSettings::new(
                http_url("PRO_NETWORK_BASE_URL", url)?,
                optional_var("PRO_NETWORK_TOKEN"),
            )),
            None => None,
        };
        let web_search = match optional_var("SEARCH_API_URL") {
            Some(url) => Some(WebSearchSettings::new(
                http_url("SEARCH_API_URL", url)?,
                optional_var("SEARCH_API_KEY"),
            )),
            None => None,
        };
        let listing_site = match optional_var("LISTING_BASE_URL") {
            Some(url) => Some(ListingSiteSettings::new(http_url("LISTING_BASE_URL", url)?)),
            None => None,
        };
        let proxies = optional_var("PROXY_LIST")
            .map(|list| parse_proxy_list(&list))
            .unwrap_or_default();

        let sources = SourcesConfig {
            professional_network,
            web_search,
            listing_site,
            proxies,
        };

        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            api_key: optional_var("OPENAI_API_KEY"),
            base_url: match optional_var("OPENAI_BASE_URL") {
                Some(url) => http_url("OPENAI_BASE_URL", url)?,
                None => llm_defaults.base_url,
            },
            model: optional_var("OPENAI_MODEL").unwrap_or(llm_defaults.model),
            timeout: Duration::from_secs(parse_var(
                "LLM_TIMEOUT_SECS",
                llm_defaults.timeout.as_secs(),
            )?),
        };

        let config = Self {
            port: parse_var("PORT", 3000u16)
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            pipeline,
            sources,
            llm,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        if config.sources.is_empty() {
            tracing::warn!("No lead sources configured, every run will return no leads");
        }
        if let Some(ref network) = config.sources.professional_network {
            tracing::debug!(
                "Professional network: {} (token {})",
                network.base_url,
                if network.token.is_some() { "set" } else { "missing" }
            );
        }
        if let Some(ref search) = config.sources.web_search {
            tracing::debug!("Search API: {}", search.search_url);
        }
        if let Some(ref listing) = config.sources.listing_site {
            tracing::debug!("Listing site: {}", listing.base_url);
        }
        tracing::debug!("Proxies configured: {}", config.sources.proxies.len());
        if config.llm.api_key.is_none() {
            tracing::warn!("OPENAI_API_KEY not set, scoring will be rule-based only");
        } else {
            tracing::debug!("LLM: {} via {}", config.llm.model, config.llm.base_url);
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match optional_var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", name, raw)),
        None => Ok(default),
    }
}

fn http_url(name: &str, url: String) -> anyhow::Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    url::Url::parse(&url).map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    Ok(url.trim_end_matches('/').to_string())
}

fn parse_proxy_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
