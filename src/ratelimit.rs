//! # Connection and Message Rate Limiting
//!
//! Two independent sliding-window counters keyed by user id: one bounding new
//! WebSocket connections (per 60 s), one bounding inbound messages on an
//! established connection (per 1 s). Enforcement is production-only; in other
//! deployment modes every check allows.
//!
//! Availability wins over strict enforcement: if the counter state cannot be
//! read (poisoned lock), checks fail open with a warning instead of blocking
//! traffic.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// A keyed sliding-window counter.
struct WindowCounter {
    limit: u32,
    window: Duration,
    entries: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl WindowCounter {
    fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record an event for `key` and report whether it fits in the window.
    fn check(&self, key: &str) -> bool {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => {
                // Fail open: the counter state is unusable.
                warn!(key = %key, "Rate limit state unavailable, allowing");
                return true;
            }
        };

        let now = Instant::now();
        let window = entries.entry(key.to_string()).or_default();

        while let Some(&first) = window.front() {
            if now.duration_since(first) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.limit as usize {
            return false;
        }

        window.push_back(now);
        true
    }

    fn forget(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

/// Windowed limits on connection attempts and inbound messages.
pub struct RateLimiter {
    enforce: bool,
    connections: WindowCounter,
    messages: WindowCounter,
}

impl RateLimiter {
    /// Build a limiter. `enforce` is false outside production deployments,
    /// which turns every check into an allow.
    pub fn new(connections_per_minute: u32, messages_per_second: u32, enforce: bool) -> Self {
        Self {
            enforce,
            connections: WindowCounter::new(connections_per_minute, Duration::from_secs(60)),
            messages: WindowCounter::new(messages_per_second, Duration::from_secs(1)),
        }
    }

    /// May this user open another connection right now?
    pub fn check_connection(&self, user_id: &str) -> bool {
        if !self.enforce {
            return true;
        }
        let allowed = self.connections.check(user_id);
        if !allowed {
            warn!(user_id = %user_id, "Connection rate exceeded");
        }
        allowed
    }

    /// May this user send another message right now?
    pub fn check_message(&self, user_id: &str) -> bool {
        if !self.enforce {
            return true;
        }
        self.messages.check(user_id)
    }

    /// Drop per-user message state on disconnect.
    pub fn forget(&self, user_id: &str) {
        self.messages.forget(user_id);
    }
}
