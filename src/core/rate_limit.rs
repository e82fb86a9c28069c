//! Client-side request throttling.
//!
//! A sliding-window limiter keyed by model id: each model gets a bucket of
//! recent dispatch timestamps, capped at the model's requests-per-minute
//! budget from the catalog. A throttled check starts the countdown, a
//! one-per-second ticker observable by the UI; the check that was throttled
//! records no timestamp, so waiting out the countdown always frees a slot.
//!
//! State lives in memory only and resets with the application instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::models;

/// Sliding window over which requests are counted.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Dispatch may proceed; the request was counted.
    Allowed,

    /// Budget exhausted. Nothing was counted; the countdown is running.
    Throttled { wait_secs: u64 },

    /// The model id is not in the catalog. Fails closed: no dispatch, no
    /// countdown, surfaced as a configuration error.
    UnknownModel,
}

/// One-per-second countdown shared with the UI.
///
/// At most one ticker runs at a time; starting a new countdown aborts the
/// previous ticker so overlapping timers cannot race the displayed value.
pub struct ThrottleCountdown {
    seconds: Arc<watch::Sender<u64>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl ThrottleCountdown {
    fn new() -> Self {
        let (seconds, _) = watch::channel(0);
        Self {
            seconds: Arc::new(seconds),
            ticker: Mutex::new(None),
        }
    }

    /// Begin (or restart) the countdown at `secs`.
    ///
    /// Must be called within a tokio runtime; the ticker is a spawned task.
    pub fn start(&self, secs: u64) {
        self.abort_ticker();
        self.seconds.send_replace(secs);
        if secs == 0 {
            return;
        }

        let seconds = Arc::clone(&self.seconds);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let next = seconds.borrow().saturating_sub(1);
                seconds.send_replace(next);
                if next == 0 {
                    break;
                }
            }
        });
        let mut ticker = self.lock_ticker();
        *ticker = Some(handle);
    }

    /// Stop ticking and zero the display.
    pub fn clear(&self) {
        self.abort_ticker();
        self.seconds.send_replace(0);
    }

    pub fn seconds_remaining(&self) -> u64 {
        *self.seconds.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.seconds_remaining() > 0
    }

    /// Watch the countdown tick; the receiver sees every second change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.seconds.subscribe()
    }

    fn abort_ticker(&self) {
        if let Some(handle) = self.lock_ticker().take() {
            handle.abort();
        }
    }

    fn lock_ticker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ticker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ThrottleCountdown {
    fn drop(&mut self) {
        self.abort_ticker();
    }
}

/// Per-model sliding-window limiter plus the shared countdown.
pub struct RateLimiter {
    window: Duration,
    buckets: Mutex<HashMap<String, Vec<Instant>>>,
    countdown: ThrottleCountdown,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_window(RATE_LIMIT_WINDOW)
    }

    /// Limiter with a custom window. The production window is fixed at
    /// [`RATE_LIMIT_WINDOW`]; shorter windows keep expiry tests fast.
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            buckets: Mutex::new(HashMap::new()),
            countdown: ThrottleCountdown::new(),
        }
    }

    pub fn countdown(&self) -> &ThrottleCountdown {
        &self.countdown
    }

    /// Admit or refuse one request for `model_id`.
    ///
    /// Expired timestamps are pruned first. When the remaining count has
    /// reached the model's budget the wait until the oldest entry leaves
    /// the window is computed, the countdown starts, and nothing is
    /// recorded; the caller must not dispatch.
    pub fn check_and_reserve(&self, model_id: &str) -> ThrottleDecision {
        let Some(model) = models::find_model(model_id) else {
            tracing::warn!(model = model_id, "unknown model id; refusing dispatch");
            return ThrottleDecision::UnknownModel;
        };

        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let timestamps = buckets.entry(model_id.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= model.rpm {
            let oldest = timestamps[0];
            let wait = self.window.saturating_sub(now.duration_since(oldest));
            let wait_secs = wait_seconds(wait);
            tracing::debug!(model = model_id, wait_secs, "request throttled");
            self.countdown.start(wait_secs);
            return ThrottleDecision::Throttled { wait_secs };
        }

        timestamps.push(now);
        ThrottleDecision::Allowed
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole seconds until a slot frees, rounded up, never less than 1.
fn wait_seconds(wait: Duration) -> u64 {
    ((wait.as_millis() as u64).div_ceil(1000)).max(1)
}
