//! Isolated per-fetch network sessions.
//!
//! Every adapter `fetch` opens its own [`FetchContext`]: a fresh
//! `reqwest::Client` with its own cookie jar, connection pool and (optionally)
//! proxy. The context is released when it is dropped, which covers normal
//! return, early `?` return, panics and cancellation of the owning future.

use crate::errors::LeadGenError;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Counts open contexts so leaks are observable.
#[derive(Debug, Clone, Default)]
pub struct ContextTracker {
    open: Arc<AtomicUsize>,
    opened_total: Arc<AtomicUsize>,
}

impl ContextTracker {
    /// Contexts currently alive.
    pub fn open_contexts(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Contexts ever opened.
    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }
}

/// Builds [`FetchContext`]s with shared settings.
#[derive(Debug, Clone)]
pub struct ContextFactory {
    request_timeout: Duration,
    proxies: Arc<Vec<String>>,
    next_proxy: Arc<AtomicUsize>,
    tracker: ContextTracker,
}

impl ContextFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            proxies: Arc::new(Vec::new()),
            next_proxy: Arc::new(AtomicUsize::new(0)),
            tracker: ContextTracker::default(),
        }
    }

    /// Proxies are handed out round-robin, one per context.
    pub fn with_proxies(mut self, proxies: Vec<String>) -> Self {
        self.proxies = Arc::new(proxies);
        self
    }

    pub fn tracker(&self) -> ContextTracker {
        self.tracker.clone()
    }

    /// Opens a fresh isolated session for one `fetch` of `source`.
    pub fn open(&self, source: &str) -> Result<FetchContext, LeadGenError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let mut builder = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .timeout(self.request_timeout);

        let proxy = self.pick_proxy();
        if let Some(ref proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url.as_str()).map_err(|e| {
                LeadGenError::Internal(format!("Invalid proxy '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| {
            LeadGenError::Internal(format!("Failed to create {} client: {}", source, e))
        })?;

        let id = Uuid::new_v4();
        self.tracker.open.fetch_add(1, Ordering::SeqCst);
        self.tracker.opened_total.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(source, context_id = %id, proxied = proxy.is_some(), "Fetch context opened");

        Ok(FetchContext {
            id,
            source: source.to_string(),
            client,
            tracker: self.tracker.clone(),
        })
    }

    fn pick_proxy(&self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        let idx = self.next_proxy.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
        Some(self.proxies[idx].clone())
    }
}

/// One isolated network session, released on drop.
#[derive(Debug)]
pub struct FetchContext {
    id: Uuid,
    source: String,
    client: reqwest::Client,
    tracker: ContextTracker,
}

impl FetchContext {
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for FetchContext {
    fn drop(&mut self) {
        self.tracker.open.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(source = %self.source, context_id = %self.id, "Fetch context released");
    }
}
