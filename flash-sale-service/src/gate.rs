use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub permits_per_second: f64,
    pub burst: u32,
    pub wait_budget: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            permits_per_second: 10.0,
            burst: 10,
            wait_budget: Duration::from_secs(2),
        }
    }
}

struct Bucket {
    // Negative while callers are queued on permits that are not due yet.
    tokens: f64,
    last_refill: Instant,
}

/// Process-wide token bucket in front of every purchase. Construct one and
/// share it; it needs no outside locking.
pub struct AdmissionGate {
    refill_rate: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl AdmissionGate {
    pub fn new(config: &AdmissionConfig) -> Self {
        let capacity = f64::from(config.burst.max(1));
        Self {
            refill_rate: if config.permits_per_second.is_finite() && config.permits_per_second > 0.0 {
                config.permits_per_second
            } else {
                f64::MIN_POSITIVE
            },
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes a permit, waiting up to `wait_budget` for one to be due.
    /// Returns `false` straight away when the budget is too short; nothing is
    /// consumed in that case.
    pub async fn try_admit(&self, wait_budget: Duration) -> bool {
        match self.reserve(wait_budget) {
            Some(wait) if wait.is_zero() => true,
            Some(wait) => {
                debug!(wait_ms = wait.as_millis() as u64, "waiting for admission permit");
                time::sleep(wait).await;
                true
            }
            None => false,
        }
    }

    pub fn try_admit_now(&self) -> bool {
        self.reserve(Duration::ZERO).is_some()
    }

    /// Reserves the next permit and returns how long until it is due, or
    /// `None` when that is past `wait_budget`.
    fn reserve(&self, wait_budget: Duration) -> Option<Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = f64::min(self.capacity, bucket.tokens + elapsed * self.refill_rate);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Some(Duration::ZERO);
        }

        // A wait too long for a Duration is past any budget.
        let wait = Duration::try_from_secs_f64((1.0 - bucket.tokens) / self.refill_rate).ok()?;
        if wait > wait_budget {
            return None;
        }
        bucket.tokens -= 1.0;
        Some(wait)
    }
}
