//! Circuit breaker guarding outbound notification calls, and a retry policy
//! with exponential backoff for transient delivery failures.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub half_open_failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            half_open_failure_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Thread-safe circuit breaker, one per `(tenant_id, channel_id)` pair so a
/// single dead webhook endpoint doesn't serialize behind other channels'
/// delivery attempts.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    half_open_failure_count: AtomicU32,
    last_state_change: RwLock<Instant>,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: CircuitConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            half_open_failure_count: AtomicU32::new(0),
            last_state_change: RwLock::new(Instant::now()),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    pub async fn allow(&self) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().await;

        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let last_change = *self.last_state_change.read().await;
                if last_change.elapsed() >= self.config.reset_timeout {
                    *state = CircuitState::HalfOpen;
                    *self.last_state_change.write().await = Instant::now();
                    self.success_count.store(0, Ordering::Relaxed);
                    self.half_open_failure_count.store(0, Ordering::Relaxed);
                    tracing::info!(circuit = %self.name, "circuit transitioned to half-open");
                    true
                } else {
                    self.total_rejections.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::HalfOpen => {
                let count = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count >= self.config.success_threshold {
                    *state = CircuitState::Closed;
                    self.failure_count.store(0, Ordering::Relaxed);
                    self.success_count.store(0, Ordering::Relaxed);
                    *self.last_state_change.write().await = Instant::now();
                    tracing::info!(circuit = %self.name, "circuit closed");
                }
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count >= self.config.failure_threshold {
                    *state = CircuitState::Open;
                    *self.last_state_change.write().await = Instant::now();
                    tracing::warn!(circuit = %self.name, failures = count, "circuit tripped open");
                }
            }
            CircuitState::HalfOpen => {
                let failures = self.half_open_failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.half_open_failure_threshold {
                    *state = CircuitState::Open;
                    self.success_count.store(0, Ordering::Relaxed);
                    self.half_open_failure_count.store(0, Ordering::Relaxed);
                    *self.last_state_change.write().await = Instant::now();
                    tracing::warn!(circuit = %self.name, "circuit re-opened from half-open");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    pub fn stats(&self) -> CircuitStats {
        CircuitStats {
            name: self.name.clone(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitStats {
    pub name: String,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

/// Retry schedule for webhook delivery (spec §4.10): `[1s, 5s, 30s]`, up to
/// 3 retries, with small jitter to avoid synchronized retry storms.
pub struct RetryPolicy {
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays: vec![Duration::from_secs(1), Duration::from_secs(5), Duration::from_secs(30)],
        }
    }
}

impl RetryPolicy {
    /// Runs `f` until it succeeds or the schedule is exhausted, returning the
    /// last error. `f` is invoked once before the first delay.
    pub async fn execute<F, Fut, T, E>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Debug,
    {
        let mut attempt = 0;
        loop {
            match f(attempt).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempt as usize >= self.delays.len() {
                        tracing::error!(attempt, error = ?e, "retry schedule exhausted");
                        return Err(e);
                    }
                    let base = self.delays[attempt as usize];
                    let jitter = base.as_millis() as f64 * 0.1;
                    let jittered = base.as_millis() as f64 + (rand::random::<f64>() * 2.0 - 1.0) * jitter;
                    tracing::warn!(attempt, delay_ms = jittered as u64, error = ?e, "retrying notification delivery");
                    tokio::time::sleep(Duration::from_millis(jittered.max(0.0) as u64)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn circuit_trips_and_recovers() {
        let config = CircuitConfig {
            failure_threshold: 2,
            success_threshold: 1,
            half_open_failure_threshold: 1,
            reset_timeout: Duration::from_millis(50),
        };
        let cb = CircuitBreaker::new("test", config);

        assert_eq!(cb.state().await, CircuitState::Closed);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allow().await);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cb.allow().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn retry_policy_stops_after_schedule_exhausted() {
        let policy = RetryPolicy {
            delays: vec![Duration::from_millis(1), Duration::from_millis(1)],
        };
        let mut attempts = 0;
        let result: Result<i32, &str> = policy
            .execute(|_| {
                attempts += 1;
                async move { Err("always fails") }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn retry_policy_succeeds_within_schedule() {
        let policy = RetryPolicy::default();
        let mut attempts = 0;
        let result: Result<i32, &str> = policy
            .execute(|_| {
                attempts += 1;
                async move { if attempts < 2 { Err("transient") } else { Ok(7) } }
            })
            .await;
        assert_eq!(result, Ok(7));
    }
}
