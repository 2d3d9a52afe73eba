//! Process-wide admission control for exchange requests.
//!
//! Sliding one-second window: every request records its admission instant,
//! and a request that would exceed the ceiling sleeps exactly until the
//! oldest admission leaves the window.

use spreadbot_telemetry::Metrics;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Default request ceiling per second.
pub const DEFAULT_REQUESTS_PER_SECOND: usize = 8;

const WINDOW: Duration = Duration::from_secs(1);

/// Rolling-window rate limiter shared by every exchange client.
#[derive(Debug)]
pub struct AdmissionController {
    capacity: usize,
    admitted: Mutex<VecDeque<Instant>>,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_SECOND)
    }
}

impl AdmissionController {
    /// Create a controller admitting at most `capacity` requests per second.
    ///
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            admitted: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for a free slot and claim it.
    ///
    /// The lock covers only the evict/admit/sleep decision; callers make
    /// their network call after this returns.
    pub async fn acquire(&self) {
        let started = Instant::now();
        let mut admitted = self.admitted.lock().await;
        loop {
            let now = Instant::now();
            while let Some(oldest) = admitted.front() {
                if now.duration_since(*oldest) >= WINDOW {
                    admitted.pop_front();
                } else {
                    break;
                }
            }

            if admitted.len() < self.capacity {
                admitted.push_back(now);
                break;
            }

            let Some(oldest) = admitted.front().copied() else {
                continue;
            };
            let wait = WINDOW.saturating_sub(now.duration_since(oldest));
            trace!(wait_ms = wait.as_millis() as u64, "Admission window full");
            tokio::time::sleep(wait).await;
        }
        drop(admitted);
        Metrics::admission_wait(started.elapsed().as_secs_f64() * 1000.0);
    }

    /// Requests admitted within the current window.
    pub async fn in_window(&self) -> usize {
        let admitted = self.admitted.lock().await;
        let now = Instant::now();
        admitted
            .iter()
            .filter(|t| now.duration_since(**t) < WINDOW)
            .count()
    }
}
