//! Request-quota accounting driven by GitHub's `x-ratelimit-*` headers.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::{AppError, Result};

/// Extra slack after the advertised reset before re-admitting callers.
const RESET_GRACE: Duration = Duration::from_secs(1);

/// GitHub meters these buckets independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaResource {
    Core,
    Search,
    Graphql,
}

impl QuotaResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaResource::Core => "core",
            QuotaResource::Search => "search",
            QuotaResource::Graphql => "graphql",
        }
    }
}

/// Quota figures for one resource, as reported by `/rate_limit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub resource: QuotaResource,
    pub limit: i64,
    pub remaining: i64,
    /// Unix epoch seconds at which the window resets.
    pub reset_epoch: u64,
}

#[derive(Debug, Default)]
struct QuotaState {
    remaining: Option<i64>,
    limit: Option<i64>,
    /// Identifies the current window; GitHub reports it as the reset epoch.
    window: Option<u64>,
    reset_at: Option<Instant>,
}

impl QuotaState {
    fn apply(&mut self, limit: Option<i64>, remaining: i64, reset_epoch: u64) {
        let same_window = self.window == Some(reset_epoch);
        // Responses for the same window can arrive out of order; never let a
        // stale, higher count hand back tokens already reserved locally.
        self.remaining = match (same_window, self.remaining) {
            (true, Some(local)) => Some(local.min(remaining)),
            _ => Some(remaining),
        };
        if limit.is_some() {
            self.limit = limit;
        }
        self.window = Some(reset_epoch);
        self.reset_at = Some(Instant::now() + seconds_until(reset_epoch));
    }
}

/// Gates outbound calls for one quota resource.
///
/// `reserve` decrements the local count under a lock, so concurrent callers
/// cannot all slip past a remaining count of zero. Overshoot is limited to
/// requests already in flight when the server's figure arrives.
#[derive(Debug)]
pub struct QuotaGovernor {
    resource: QuotaResource,
    max_wait: Duration,
    state: Mutex<QuotaState>,
}

impl QuotaGovernor {
    pub fn new(resource: QuotaResource, max_wait: Duration) -> Self {
        Self {
            resource,
            max_wait,
            state: Mutex::new(QuotaState::default()),
        }
    }

    /// Remaining count as currently tracked, `None` before any observation.
    pub fn remaining(&self) -> Option<i64> {
        self.lock().remaining
    }

    fn lock(&self) -> MutexGuard<'_, QuotaState> {
        // The state is plain data; a panic mid-update cannot leave it torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait until `cost` requests may be issued, then account for them.
    pub async fn reserve(&self, cost: u32) -> Result<()> {
        loop {
            let wait = {
                let mut state = self.lock();
                let now = Instant::now();
                let exhausted = matches!(state.remaining, Some(r) if r <= 0);
                let wait = match state.reset_at {
                    Some(reset_at) if exhausted && reset_at > now => {
                        Some(reset_at - now + RESET_GRACE)
                    }
                    _ => None,
                };

                if wait.is_none() {
                    if exhausted {
                        // Window rolled over; re-admit with the last known limit.
                        state.remaining = state.limit;
                        state.window = None;
                        state.reset_at = None;
                    }
                    if let Some(remaining) = state.remaining.as_mut() {
                        *remaining -= i64::from(cost);
                    }
                }
                wait
            };

            let Some(wait) = wait else {
                return Ok(());
            };

            if wait > self.max_wait {
                return Err(AppError::RateLimitCeiling {
                    wait,
                    ceiling: self.max_wait,
                });
            }

            tracing::warn!(
                resource = self.resource.as_str(),
                wait_secs = wait.as_secs(),
                "Quota exhausted, waiting for reset"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Update state from the rate-limit headers of a response.
    pub fn observe(&self, headers: &HeaderMap) {
        let remaining = header_i64(headers, "x-ratelimit-remaining");
        let reset = header_i64(headers, "x-ratelimit-reset").and_then(|v| u64::try_from(v).ok());
        let limit = header_i64(headers, "x-ratelimit-limit");

        if let (Some(remaining), Some(reset)) = (remaining, reset) {
            self.lock().apply(limit, remaining, reset);
            tracing::trace!(
                resource = self.resource.as_str(),
                remaining,
                "Observed rate-limit headers"
            );
        }
    }

    /// Seed state from the rate-limit status endpoint.
    pub fn prime(&self, snapshot: &QuotaSnapshot) {
        self.lock()
            .apply(Some(snapshot.limit), snapshot.remaining, snapshot.reset_epoch);
        tracing::debug!(
            resource = self.resource.as_str(),
            remaining = snapshot.remaining,
            limit = snapshot.limit,
            "Quota primed"
        );
    }
}

/// One governor per GitHub quota resource.
#[derive(Debug)]
pub struct QuotaGovernors {
    core: QuotaGovernor,
    search: QuotaGovernor,
    graphql: QuotaGovernor,
}

impl QuotaGovernors {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            core: QuotaGovernor::new(QuotaResource::Core, max_wait),
            search: QuotaGovernor::new(QuotaResource::Search, max_wait),
            graphql: QuotaGovernor::new(QuotaResource::Graphql, max_wait),
        }
    }

    pub fn get(&self, resource: QuotaResource) -> &QuotaGovernor {
        match resource {
            QuotaResource::Core => &self.core,
            QuotaResource::Search => &self.search,
            QuotaResource::Graphql => &self.graphql,
        }
    }

    pub fn prime(&self, snapshot: &QuotaSnapshot) {
        self.get(snapshot.resource).prime(snapshot);
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

fn seconds_until(reset_epoch: u64) -> Duration {
    let now = chrono::Utc::now().timestamp();
    let now = u64::try_from(now).unwrap_or(0);
    Duration::from_secs(reset_epoch.saturating_sub(now))
}
