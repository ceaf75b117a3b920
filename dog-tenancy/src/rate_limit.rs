use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::UserId;

/// Configuration for per-user action rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum hits allowed inside one window
    pub limit: u32,
    /// Window length
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    hits: u32,
}

#[derive(Debug, Default)]
struct Windows {
    entries: HashMap<(UserId, String), Window>,
    swept_at: Option<Instant>,
}

impl Windows {
    /// Drop every window that has fully elapsed
    fn sweep(&mut self, now: Instant, length: Duration) {
        self.entries
            .retain(|_, w| now.saturating_duration_since(w.started) < length);
        self.swept_at = Some(now);
    }
}

/// Fixed-window rate limiter keyed by (user, action).
///
/// Owned by whoever constructs it; there is no process-global instance.
/// Expired windows are swept at most once per window length while checking.
/// Call [`RateLimiter::reset`] on teardown or between tests.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(Windows::default()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Record a hit; returns `false` once the window's limit is exceeded
    pub fn check(&self, user_id: &UserId, action: &str) -> bool {
        self.check_at(user_id, action, Instant::now())
    }

    pub fn check_at(&self, user_id: &UserId, action: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock();
        let due = windows
            .swept_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.config.window);
        if due {
            windows.sweep(now, self.config.window);
        }

        let window = windows
            .entries
            .entry((user_id.clone(), action.to_string()))
            .or_insert(Window { started: now, hits: 0 });

        if now.saturating_duration_since(window.started) >= self.config.window {
            window.started = now;
            window.hits = 0;
        }

        if window.hits >= self.config.limit {
            debug!("rate limit exceeded for {} on {}", user_id, action);
            return false;
        }
        window.hits += 1;
        true
    }

    /// Drop windows that have fully elapsed
    pub fn prune(&self) {
        self.windows.lock().sweep(Instant::now(), self.config.window);
    }

    /// Number of (user, action) windows currently tracked
    pub fn tracked(&self) -> usize {
        self.windows.lock().entries.len()
    }

    pub fn reset(&self) {
        *self.windows.lock() = Windows::default();
    }
}
