//! Per-sender reply cooldown.
//!
//! Remembers when each sender was last served and rejects new requests
//! that arrive within the window. Checked before the global throttle, so a
//! sender who is cooling down never occupies a throttle slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Entries beyond this count trigger an inline sweep.
const SWEEP_THRESHOLD: usize = 10_000;

pub struct CooldownTracker {
    window: Duration,
    last_served: Mutex<HashMap<String, Instant>>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_served: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Time left before `sender` may be served again, if any.
    pub fn remaining(&self, sender: &str) -> Option<Duration> {
        let now = Instant::now();
        let last_served = self.last_served.lock().unwrap_or_else(|e| e.into_inner());
        let served_at = *last_served.get(sender)?;
        self.window
            .checked_sub(now.duration_since(served_at))
            .filter(|left| !left.is_zero())
    }

    pub fn is_cooling_down(&self, sender: &str) -> bool {
        self.remaining(sender).is_some()
    }

    /// Record a completed reply to `sender`, now.
    pub fn mark_served(&self, sender: &str) {
        let now = Instant::now();
        let mut last_served = self.last_served.lock().unwrap_or_else(|e| e.into_inner());

        if last_served.len() > SWEEP_THRESHOLD {
            let window = self.window;
            last_served.retain(|_, at| now.duration_since(*at) < window);
        }

        last_served.insert(sender.to_string(), now);
    }

    /// Drop entries whose window has passed. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut last_served = self.last_served.lock().unwrap_or_else(|e| e.into_inner());
        let before = last_served.len();
        last_served.retain(|_, at| now.duration_since(*at) < self.window);
        before - last_served.len()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        let period = interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = tracker.sweep();
                if removed > 0 {
                    debug!(removed, "Expired cooldown entries dropped");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.last_served.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
