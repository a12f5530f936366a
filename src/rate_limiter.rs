//! Per-identity rolling-window rate limiting for outbound source calls.
//!
//! Each identity (usually one external API key or one scraped host) keeps a
//! queue of request timestamps. A call is permitted when fewer than
//! `max_per_minute` timestamps fall inside the last 60 seconds and fewer than
//! `max_per_hour` inside the last 3600 seconds.
//!
//! The limiter is constructed explicitly and shared through an `Arc`; there is
//! no process-wide registry.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

const MINUTE: i64 = 60;
const HOUR: i64 = 3600;

/// Time source, injectable so tests can simulate the passage of time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: std::time::Duration) {
        let by = Duration::from_std(by).unwrap_or(Duration::zero());
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitDecision {
    Allow,
    DenyMinuteLimit,
    DenyHourlyLimit,
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allow)
    }
}

/// Remaining calls for one identity in each window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemainingQuota {
    pub minute: u32,
    pub hour: u32,
}

#[derive(Debug, Default)]
struct IdentityWindow {
    requests: VecDeque<DateTime<Utc>>,
}

impl IdentityWindow {
    fn count_since(&self, cutoff: DateTime<Utc>) -> u32 {
        // Timestamps are appended in clock order, so scan from the back.
        self.requests.iter().rev().take_while(|t| **t > cutoff).count() as u32
    }

    fn evict_before(&mut self, cutoff: DateTime<Utc>) {
        while matches!(self.requests.front(), Some(t) if *t <= cutoff) {
            self.requests.pop_front();
        }
    }
}

/// Rolling 1-minute / 1-hour request limiter keyed by identity.
pub struct RateLimiter {
    max_per_minute: u32,
    max_per_hour: u32,
    clock: Arc<dyn Clock>,
    identities: Mutex<HashMap<String, Arc<Mutex<IdentityWindow>>>>,
    compaction_interval: Duration,
    last_compaction: Mutex<DateTime<Utc>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_per_minute", &self.max_per_minute)
            .field("max_per_hour", &self.max_per_hour)
            .finish()
    }
}

impl RateLimiter {
    /// Creates a limiter backed by the wall clock.
    pub fn new(max_per_minute: u32, max_per_hour: u32) -> Self {
        Self::with_clock(max_per_minute, max_per_hour, Arc::new(SystemClock))
    }

    /// Creates a limiter with an injected clock.
    pub fn with_clock(max_per_minute: u32, max_per_hour: u32, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            max_per_minute,
            max_per_hour,
            clock,
            identities: Mutex::new(HashMap::new()),
            compaction_interval: Duration::seconds(HOUR),
            last_compaction: Mutex::new(now),
        }
    }

    /// Returns whether a call under `identity` is currently permitted.
    ///
    /// Does not record the call; pair with [`RateLimiter::record`] or use
    /// [`RateLimiter::acquire`].
    pub fn check(&self, identity: &str) -> bool {
        self.decide(identity).is_allowed()
    }

    /// Full decision for `identity`, naming the window that denied it.
    pub fn decide(&self, identity: &str) -> RateLimitDecision {
        self.maybe_compact();
        let now = self.clock.now();
        let window = self.window(identity);
        let window = lock(&window);
        self.evaluate(&window, now)
    }

    /// Registers a consumed call for `identity`.
    pub fn record(&self, identity: &str) {
        let now = self.clock.now();
        let window = self.window(identity);
        lock(&window).requests.push_back(now);
    }

    /// Checks and records under a single lock, so two concurrent callers
    /// sharing an identity cannot both take the last slot.
    pub fn acquire(&self, identity: &str) -> RateLimitDecision {
        self.maybe_compact();
        let now = self.clock.now();
        let window = self.window(identity);
        let mut window = lock(&window);
        let decision = self.evaluate(&window, now);
        if decision.is_allowed() {
            window.requests.push_back(now);
        } else {
            tracing::debug!(identity, ?decision, "Rate limit reached");
        }
        decision
    }

    /// Remaining calls in each window for `identity`.
    pub fn remaining(&self, identity: &str) -> RemainingQuota {
        self.maybe_compact();
        let now = self.clock.now();
        let window = self.window(identity);
        let window = lock(&window);
        let minute = window.count_since(now - Duration::seconds(MINUTE));
        let hour = window.count_since(now - Duration::seconds(HOUR));
        RemainingQuota {
            minute: self.max_per_minute.saturating_sub(minute),
            hour: self.max_per_hour.saturating_sub(hour),
        }
    }

    /// Time until the oldest timestamp blocking `identity` leaves its window.
    /// Zero when a call is already permitted.
    pub fn retry_after(&self, identity: &str) -> std::time::Duration {
        let now = self.clock.now();
        let window = self.window(identity);
        let window = lock(&window);

        let wait_for = |limit: u32, span: i64| -> Duration {
            let cutoff = now - Duration::seconds(span);
            let inside: Vec<&DateTime<Utc>> =
                window.requests.iter().filter(|t| **t > cutoff).collect();
            if (inside.len() as u32) < limit || limit == 0 {
                return Duration::zero();
            }
            // The call becomes legal once enough of the oldest entries expire.
            let idx = inside.len() - limit as usize;
            (*inside[idx] + Duration::seconds(span)) - now
        };

        let wait = wait_for(self.max_per_minute, MINUTE).max(wait_for(self.max_per_hour, HOUR));
        wait.to_std().unwrap_or_default()
    }

    /// Number of identities currently tracked.
    pub fn tracked_identities(&self) -> usize {
        lock(&self.identities).len()
    }

    fn evaluate(&self, window: &IdentityWindow, now: DateTime<Utc>) -> RateLimitDecision {
        if window.count_since(now - Duration::seconds(MINUTE)) >= self.max_per_minute {
            return RateLimitDecision::DenyMinuteLimit;
        }
        if window.count_since(now - Duration::seconds(HOUR)) >= self.max_per_hour {
            return RateLimitDecision::DenyHourlyLimit;
        }
        RateLimitDecision::Allow
    }

    fn window(&self, identity: &str) -> Arc<Mutex<IdentityWindow>> {
        let mut identities = lock(&self.identities);
        identities
            .entry(identity.to_string())
            .or_default()
            .clone()
    }

    /// Drops timestamps older than the hour window. Runs at most once per
    /// `compaction_interval`.
    fn maybe_compact(&self) {
        let now = self.clock.now();
        {
            let mut last = lock(&self.last_compaction);
            if now - *last < self.compaction_interval {
                return;
            }
            *last = now;
        }

        let cutoff = now - Duration::seconds(HOUR);
        let mut identities = lock(&self.identities);
        let before = identities.len();
        identities.retain(|_, window| {
            // A clone outside the map means a caller is about to record into it.
            let in_use = Arc::strong_count(window) > 1;
            let mut window = lock(window);
            window.evict_before(cutoff);
            in_use || !window.requests.is_empty()
        });
        tracing::debug!(
            removed = before - identities.len(),
            remaining = identities.len(),
            "Rate limiter compaction"
        );
    }
}

/// Poisoning only happens if a holder panicked; the window data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
