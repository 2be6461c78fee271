//! Global admission control for upstream calls.
//!
//! Three limits apply to every call, whichever conversation it serves:
//! - at most `max_concurrent` calls in flight
//! - at least `min_spacing` between two call starts
//! - an optional token reservoir, topped up by a fixed amount per interval,
//!   which allows a burst and then throttles to the refill rate
//!
//! Waiters are admitted in arrival order.

use std::time::Duration;

use replyd_config::ThrottleConfig;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::debug;

/// Returned when the throttle has been closed for shutdown.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("request throttle is closed")]
pub struct ThrottleClosed;

/// Proof of admission. The in-flight slot is released on drop.
pub struct ThrottlePermit<'a> {
    _slot: SemaphorePermit<'a>,
}

pub struct RequestThrottle {
    slots: Semaphore,
    max_concurrent: usize,
    min_spacing: Duration,
    schedule: Mutex<Schedule>,
}

struct Schedule {
    last_start: Option<Instant>,
    reservoir: Option<Reservoir>,
}

struct Reservoir {
    capacity: u32,
    refill_amount: u32,
    interval: Duration,
    tokens: u32,
    next_refill: Instant,
}

impl RequestThrottle {
    /// A throttle without a reservoir.
    pub fn new(max_concurrent: usize, min_spacing: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            slots: Semaphore::new(max_concurrent),
            max_concurrent,
            min_spacing,
            schedule: Mutex::new(Schedule {
                last_start: None,
                reservoir: None,
            }),
        }
    }

    /// Start with `capacity` tokens and add `refill_amount` (up to
    /// `capacity`) every `interval`.
    pub fn with_reservoir(mut self, capacity: u32, refill_amount: u32, interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        self.schedule.get_mut().reservoir = Some(Reservoir {
            capacity,
            refill_amount,
            interval,
            tokens: capacity,
            next_refill: Instant::now() + interval,
        });
        self
    }

    /// A reservoir of 0 disables the reservoir.
    pub fn from_config(config: &ThrottleConfig) -> Self {
        let throttle = Self::new(config.max_concurrent, config.min_spacing());
        if config.reservoir == 0 {
            throttle
        } else {
            throttle.with_reservoir(config.reservoir, config.refill_amount, config.refill_interval())
        }
    }

    /// Wait for admission.
    pub async fn acquire(&self) -> Result<ThrottlePermit<'_>, ThrottleClosed> {
        let slot = self.slots.acquire().await.map_err(|_| ThrottleClosed)?;

        // Holding the schedule lock while sleeping keeps later callers queued
        // behind this one.
        let mut schedule = self.schedule.lock().await;
        loop {
            let now = Instant::now();
            let ready_at = schedule.ready_at(now, self.min_spacing);
            if ready_at <= now {
                schedule.start(now);
                break;
            }
            debug!(wait_ms = (ready_at - now).as_millis() as u64, "Throttle delaying upstream call");
            tokio::time::sleep_until(ready_at).await;
        }

        Ok(ThrottlePermit { _slot: slot })
    }

    /// Calls currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    /// Tokens left in the reservoir, or `None` if there is no reservoir.
    pub async fn available_tokens(&self) -> Option<u32> {
        let mut schedule = self.schedule.lock().await;
        let now = Instant::now();
        schedule.reservoir.as_mut().map(|r| {
            r.refill(now);
            r.tokens
        })
    }

    /// Refuse all current and future waiters.
    pub fn close(&self) {
        self.slots.close();
    }
}

impl Schedule {
    fn ready_at(&mut self, now: Instant, min_spacing: Duration) -> Instant {
        let mut ready = now;
        if let Some(last) = self.last_start {
            ready = ready.max(last + min_spacing);
        }
        if let Some(reservoir) = self.reservoir.as_mut() {
            reservoir.refill(now);
            if reservoir.tokens == 0 {
                ready = ready.max(reservoir.next_refill);
            }
        }
        ready
    }

    fn start(&mut self, now: Instant) {
        self.last_start = Some(now);
        if let Some(reservoir) = self.reservoir.as_mut() {
            reservoir.tokens = reservoir.tokens.saturating_sub(1);
        }
    }
}

impl Reservoir {
    fn refill(&mut self, now: Instant) {
        if now < self.next_refill {
            return;
        }
        let behind = now.duration_since(self.next_refill);
        let periods = 1 + behind.as_nanos() / self.interval.as_nanos();
        let periods = u32::try_from(periods).unwrap_or(u32::MAX);

        let added = u64::from(self.refill_amount) * u64::from(periods);
        self.tokens = (u64::from(self.tokens) + added).min(u64::from(self.capacity)) as u32;
        self.next_refill += self.interval.saturating_mul(periods);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn enforces_min_spacing_between_starts() {
        let throttle = RequestThrottle::new(4, Duration::from_secs(1));
        let start = Instant::now();

        drop(throttle.acquire().await.unwrap());
        assert_eq!(start.elapsed(), Duration::ZERO);

        drop(throttle.acquire().await.unwrap());
        assert_eq!(start.elapsed(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let before = Instant::now();
        drop(throttle.acquire().await.unwrap());
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn bounds_concurrency() {
        let throttle = Arc::new(RequestThrottle::new(1, Duration::ZERO));
        let first = throttle.acquire().await.unwrap();
        assert_eq!(throttle.in_flight(), 1);

        let waiter = {
            let throttle = Arc::clone(&throttle);
            tokio::spawn(async move {
                let _permit = throttle.acquire().await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
        assert_eq!(throttle.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reservoir_bursts_then_waits_for_refill() {
        let throttle =
            RequestThrottle::new(1, Duration::ZERO).with_reservoir(2, 2, Duration::from_secs(60));
        let start = Instant::now();

        drop(throttle.acquire().await.unwrap());
        drop(throttle.acquire().await.unwrap());
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(throttle.available_tokens().await, Some(0));

        drop(throttle.acquire().await.unwrap());
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert_eq!(throttle.available_tokens().await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let throttle =
            RequestThrottle::new(1, Duration::ZERO).with_reservoir(3, 2, Duration::from_secs(10));
        drop(throttle.acquire().await.unwrap());

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(throttle.available_tokens().await, Some(3));
    }

    #[tokio::test]
    async fn closed_throttle_refuses() {
        let throttle = RequestThrottle::new(1, Duration::ZERO);
        throttle.close();
        assert!(throttle.acquire().await.is_err());
    }

    #[test]
    fn zero_reservoir_means_unlimited() {
        let mut config = replyd_config::AppConfig::default();
        config.throttle = ThrottleConfig {
            reservoir: 0,
            ..ThrottleConfig::default()
        };
        assert!(config.validate().is_ok());

        let mut throttle = RequestThrottle::from_config(&config.throttle);
        assert!(throttle.schedule.get_mut().reservoir.is_none());
    }
}
