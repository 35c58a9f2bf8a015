//! Per-client run limits.
//!
//! Two limits apply to every client (identified by IP):
//!
//! * at most `max_runs` runs started within a rolling `window` (default 5 per
//!   24 h), tracked as a sliding window of start times;
//! * at most `max_concurrent` runs in flight at once (default 2), tracked by
//!   [`RunPermit`]s that give their slot back when dropped.
//!
//! The limiter is a plain value owned by the orchestrator. Tests drive it
//! with explicit instants through [`RateLimiter::acquire_at`] and clear it
//! with [`RateLimiter::reset`].

use crate::config::LectureConfig;
use crate::error::LectureError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Default)]
struct ClientUsage {
    starts: VecDeque<Instant>,
    active: usize,
}

type Usage = Arc<Mutex<HashMap<String, ClientUsage>>>;

/// Current usage for one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub runs_in_window: usize,
    pub active_runs: usize,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    usage: Usage,
    max_runs: usize,
    window: Duration,
    max_concurrent: usize,
}

/// A held concurrent-run slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct RunPermit {
    usage: Usage,
    client: String,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        let mut usage = lock(&self.usage);
        if let Some(entry) = usage.get_mut(&self.client) {
            entry.active = entry.active.saturating_sub(1);
        }
    }
}

fn lock(usage: &Usage) -> MutexGuard<'_, HashMap<String, ClientUsage>> {
    usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn prune(starts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = starts.front() {
        if now.saturating_duration_since(front) >= window {
            starts.pop_front();
        } else {
            break;
        }
    }
}

impl RateLimiter {
    pub fn new(max_runs: usize, window: Duration, max_concurrent: usize) -> Self {
        Self {
            usage: Arc::new(Mutex::new(HashMap::new())),
            max_runs,
            window,
            max_concurrent,
        }
    }

    pub fn from_config(config: &LectureConfig) -> Self {
        Self::new(
            config.rate_limit_max_runs,
            config.rate_limit_window,
            config.max_concurrent_runs_per_client,
        )
    }

    /// Record a run start for `client` and take a concurrent slot.
    pub fn acquire(&self, client: &str) -> Result<RunPermit, LectureError> {
        self.acquire_at(client, Instant::now())
    }

    pub fn acquire_at(&self, client: &str, now: Instant) -> Result<RunPermit, LectureError> {
        let mut usage = lock(&self.usage);
        // Clients with nothing in the window and nothing running are forgotten.
        usage.retain(|_, entry| {
            prune(&mut entry.starts, now, self.window);
            entry.active > 0 || !entry.starts.is_empty()
        });
        let entry = usage.entry(client.to_string()).or_default();

        if entry.active >= self.max_concurrent {
            return Err(LectureError::RateLimited {
                client: client.to_string(),
                detail: format!("{} run(s) already in progress", entry.active),
                retry_after_secs: None,
            });
        }
        if entry.starts.len() >= self.max_runs {
            let retry_after = entry
                .starts
                .front()
                .map(|&oldest| (oldest + self.window).saturating_duration_since(now).as_secs().max(1));
            return Err(LectureError::RateLimited {
                client: client.to_string(),
                detail: format!(
                    "{} runs in the last {} h",
                    entry.starts.len(),
                    self.window.as_secs() / 3600
                ),
                retry_after_secs: retry_after,
            });
        }

        entry.starts.push_back(now);
        entry.active += 1;
        debug!(
            "Client {}: run {}/{} in window, {} active",
            client,
            entry.starts.len(),
            self.max_runs,
            entry.active
        );
        Ok(RunPermit {
            usage: Arc::clone(&self.usage),
            client: client.to_string(),
        })
    }

    pub fn stats(&self, client: &str) -> ClientStats {
        self.stats_at(client, Instant::now())
    }

    pub fn stats_at(&self, client: &str, now: Instant) -> ClientStats {
        let usage = lock(&self.usage);
        usage
            .get(client)
            .map(|entry| ClientStats {
                runs_in_window: entry
                    .starts
                    .iter()
                    .filter(|&&t| now.saturating_duration_since(t) < self.window)
                    .count(),
                active_runs: entry.active,
            })
            .unwrap_or_default()
    }

    /// Number of clients currently holding usage entries.
    pub fn tracked_clients(&self) -> usize {
        lock(&self.usage).len()
    }

    /// Forget all recorded runs. Held permits stay valid but free no slots.
    pub fn reset(&self) {
        lock(&self.usage).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    #[test]
    fn window_limit_blocks_then_expires() {
        let limiter = RateLimiter::new(2, DAY, 10);
        let t0 = Instant::now();
        let _a = limiter.acquire_at("ip", t0).unwrap();
        let _b = limiter.acquire_at("ip", t0 + Duration::from_secs(60)).unwrap();

        let err = limiter
            .acquire_at("ip", t0 + Duration::from_secs(120))
            .unwrap_err();
        match err {
            LectureError::RateLimited {
                retry_after_secs, ..
            } => assert_eq!(retry_after_secs, Some(DAY.as_secs() - 120)),
            other => panic!("unexpected {other:?}"),
        }

        assert!(limiter.acquire_at("ip", t0 + DAY).is_ok());
    }

    #[test]
    fn clients_are_independent() {
        let limiter = RateLimiter::new(1, DAY, 1);
        let t0 = Instant::now();
        let _a = limiter.acquire_at("a", t0).unwrap();
        assert!(limiter.acquire_at("b", t0).is_ok());
        assert!(limiter.acquire_at("a", t0).is_err());
    }

    #[test]
    fn concurrent_slots_are_released_on_drop() {
        let limiter = RateLimiter::new(10, DAY, 1);
        let t0 = Instant::now();
        let permit = limiter.acquire_at("ip", t0).unwrap();
        assert!(limiter.acquire_at("ip", t0).is_err());
        assert_eq!(limiter.stats_at("ip", t0).active_runs, 1);
        drop(permit);
        assert_eq!(limiter.stats_at("ip", t0).active_runs, 0);
        assert!(limiter.acquire_at("ip", t0).is_ok());
    }

    #[test]
    fn rejected_attempts_are_not_recorded() {
        let limiter = RateLimiter::new(1, DAY, 5);
        let t0 = Instant::now();
        let _a = limiter.acquire_at("ip", t0).unwrap();
        for _ in 0..3 {
            assert!(limiter.acquire_at("ip", t0).is_err());
        }
        assert_eq!(limiter.stats_at("ip", t0).runs_in_window, 1);
    }

    #[test]
    fn idle_clients_are_forgotten_after_the_window() {
        let limiter = RateLimiter::new(5, DAY, 2);
        let t0 = Instant::now();
        for i in 0..50 {
            drop(limiter.acquire_at(&format!("10.0.0.{i}"), t0).unwrap());
        }
        let busy = limiter.acquire_at("busy", t0).unwrap();
        assert_eq!(limiter.tracked_clients(), 51);

        let _later = limiter.acquire_at("late", t0 + DAY).unwrap();
        assert_eq!(limiter.tracked_clients(), 2);
        assert_eq!(limiter.stats_at("busy", t0 + DAY).active_runs, 1);

        drop(busy);
        let _again = limiter.acquire_at("late", t0 + DAY + DAY).unwrap();
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn reset_clears_history() {
        let limiter = RateLimiter::new(1, DAY, 1);
        let t0 = Instant::now();
        let permit = limiter.acquire_at("ip", t0).unwrap();
        limiter.reset();
        assert_eq!(limiter.stats_at("ip", t0), ClientStats::default());
        drop(permit);
        assert!(limiter.acquire_at("ip", t0).is_ok());
    }
}
