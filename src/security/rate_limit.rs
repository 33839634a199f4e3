//! Fixed-window rate limiting per (client, path).
//!
//! Each key owns one window: a count and the instant the window closes.
//! A window is only ever incremented while open; once `now >= reset_ms`
//! the next request replaces it with a fresh one.
//!
//! # Design Decisions
//! - Windows live in a `DashMap`; the entry lock is held across the expiry
//!   check, the reset and the increment, so two racing requests on a
//!   freshly expired window cannot both claim the first slot
//! - The sweeper only removes closed windows and never touches counts
//! - Anonymous clients share the single `unknown` bucket
//! - Single-process only: a multi-node deployment needs a shared atomic
//!   counter store instead of this map

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::HeaderMap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::observability::metrics;
use crate::security::clock::Clock;

/// Identity used when neither a proxy header nor a peer address is known.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Limits applied to every window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            window_ms: config.window_ms,
            max_requests: config.max_requests,
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::from(&RateLimitConfig::default())
    }
}

/// One client's current counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub reset_ms: u64,
}

impl RateWindow {
    fn open(now: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            reset_ms: now.saturating_add(window_ms),
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        now >= self.reset_ms
    }
}

/// Quota snapshot reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_ms: u64,
}

/// Result of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed(RateLimitStatus),
    Limited {
        status: RateLimitStatus,
        retry_after_secs: u64,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed(_))
    }
}

/// In-memory fixed-window limiter.
pub struct FixedWindowLimiter {
    windows: DashMap<String, RateWindow>,
    policy: ArcSwap<RateLimitPolicy>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    pub fn new(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            policy: ArcSwap::from_pointee(policy),
            clock,
        }
    }

    /// Current limits.
    pub fn policy(&self) -> RateLimitPolicy {
        **self.policy.load()
    }

    /// Swap limits in place. Open windows keep their reset time and are
    /// judged against the new maximum from the next request on.
    pub fn reconfigure(&self, policy: RateLimitPolicy) {
        let previous = self.policy.swap(Arc::new(policy));
        if *previous != policy {
            tracing::info!(
                window_ms = policy.window_ms,
                max_requests = policy.max_requests,
                "Rate limit policy updated"
            );
        }
    }

    /// Count one request from `identifier` against `path`.
    pub fn check(&self, identifier: &str, path: &str) -> RateDecision {
        let policy = self.policy();
        let now = self.clock.now_ms();
        let key = format!("{identifier}:{path}");

        let window = match self.windows.entry(key) {
            Entry::Vacant(vacant) => *vacant.insert(RateWindow::open(now, policy.window_ms)),
            Entry::Occupied(mut occupied) => {
                let window = occupied.get_mut();
                if window.is_expired(now) {
                    *window = RateWindow::open(now, policy.window_ms);
                } else if window.count >= policy.max_requests {
                    let retry_after_secs = (window.reset_ms - now).div_ceil(1000).max(1);
                    return RateDecision::Limited {
                        status: RateLimitStatus {
                            limit: policy.max_requests,
                            remaining: 0,
                            reset_ms: window.reset_ms,
                        },
                        retry_after_secs,
                    };
                } else {
                    window.count += 1;
                }
                *window
            }
        };

        RateDecision::Allowed(RateLimitStatus {
            limit: policy.max_requests,
            remaining: policy.max_requests.saturating_sub(window.count),
            reset_ms: window.reset_ms,
        })
    }

    /// Drop every window whose reset time has passed. Returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_expired(now));
        let removed = before.saturating_sub(self.windows.len());

        if removed > 0 {
            tracing::debug!(removed, remaining = self.windows.len(), "Swept expired rate windows");
        }
        metrics::record_sweep(removed, self.windows.len());
        removed
    }

    /// Number of tracked windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Snapshot of one window, if tracked.
    pub fn window(&self, identifier: &str, path: &str) -> Option<RateWindow> {
        self.windows
            .get(&format!("{identifier}:{path}"))
            .map(|w| *w.value())
    }
}

/// Resolve the client identity: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the peer address, otherwise [`UNKNOWN_CLIENT`].
pub fn client_identifier(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map(String::from)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
