//! Multi-dimensional rate limiter for executor calls.
//!
//! Each named limiter enforces five simultaneous ceilings:
//! requests/minute, requests/hour, tokens/minute, cost/hour, cost/day.
//! Admission blocks until every ceiling has headroom; throttled
//! callers back off exponentially on *consecutive* throttles with up
//! to 25% uniform jitter, so the limiter recovers quickly once load
//! subsides. All counters live behind one critical section per
//! limiter; named limiters are independent and share no locks.

use rand::Rng;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{BackoffConfig, RateLimitConfig};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86_400);

/// Minimum backoff between admission retries.
const MIN_BACKOFF: Duration = Duration::from_millis(100);

/// Exponent cap for the consecutive-throttle backoff.
const BACKOFF_EXPONENT_CAP: u32 = 10;

/// Rolling usage windows and counters, guarded by the limiter's mutex.
#[derive(Debug, Default)]
struct LimiterState {
    /// Admission timestamps, pruned to the last hour
    request_times: VecDeque<Instant>,
    /// (timestamp, tokens) events, pruned to the last minute
    token_events: VecDeque<(Instant, u64)>,
    /// (timestamp, cost) events, pruned to the last day
    cost_events: VecDeque<(Instant, f64)>,
    consecutive_throttles: u32,
    total_requests: u64,
    total_tokens: u64,
    total_cost: f64,
    throttle_count: u64,
}

impl LimiterState {
    fn prune(&mut self, now: Instant) {
        while let Some(t) = self.request_times.front() {
            if now.duration_since(*t) > HOUR {
                self.request_times.pop_front();
            } else {
                break;
            }
        }
        while let Some((t, _)) = self.token_events.front() {
            if now.duration_since(*t) > MINUTE {
                self.token_events.pop_front();
            } else {
                break;
            }
        }
        while let Some((t, _)) = self.cost_events.front() {
            if now.duration_since(*t) > DAY {
                self.cost_events.pop_front();
            } else {
                break;
            }
        }
    }

    fn requests_in(&self, window: Duration, now: Instant) -> usize {
        self.request_times
            .iter()
            .filter(|t| now.duration_since(**t) <= window)
            .count()
    }

    fn tokens_last_minute(&self, now: Instant) -> u64 {
        self.token_events
            .iter()
            .filter(|(t, _)| now.duration_since(*t) <= MINUTE)
            .map(|(_, tokens)| tokens)
            .sum()
    }

    fn cost_in(&self, window: Duration, now: Instant) -> f64 {
        self.cost_events
            .iter()
            .filter(|(t, _)| now.duration_since(*t) <= window)
            .map(|(_, cost)| cost)
            .sum()
    }
}

/// Point-in-time statistics for a limiter.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RateLimiterStats {
    pub name: String,
    pub requests_last_minute: usize,
    pub requests_last_hour: usize,
    pub tokens_last_minute: u64,
    pub cost_last_hour: f64,
    pub cost_last_day: f64,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub throttle_count: u64,
}

/// A named, independently configured rate limiter.
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    backoff: BackoffConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: RateLimitConfig, backoff: BackoffConfig) -> Self {
        Self {
            name: name.into(),
            config,
            backoff,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Un-jittered backoff for the given consecutive-throttle count:
    /// `min(max, base * 1.5^min(n, 10))`.
    pub fn backoff_delay(&self, consecutive_throttles: u32) -> Duration {
        let exponent = consecutive_throttles.min(BACKOFF_EXPONENT_CAP);
        let secs = (self.backoff.base_secs * 1.5f64.powi(exponent as i32)).min(self.backoff.max_secs);
        Duration::from_secs_f64(secs).max(MIN_BACKOFF)
    }

    /// Apply up to +/-25% uniform jitter, clamped to the minimum.
    fn jittered(delay: Duration) -> Duration {
        let factor = 1.0 + rand::thread_rng().gen_range(-0.25..0.25);
        Duration::from_secs_f64(delay.as_secs_f64() * factor).max(MIN_BACKOFF)
    }

    /// Whether all five ceilings have headroom for this request.
    fn has_headroom(
        &self,
        state: &LimiterState,
        now: Instant,
        estimated_tokens: u64,
        estimated_cost: f64,
    ) -> bool {
        state.requests_in(MINUTE, now) < self.config.requests_per_minute as usize
            && state.requests_in(HOUR, now) < self.config.requests_per_hour as usize
            && state.tokens_last_minute(now) + estimated_tokens <= self.config.tokens_per_minute
            && state.cost_in(HOUR, now) + estimated_cost <= self.config.cost_per_hour
            && state.cost_in(DAY, now) + estimated_cost <= self.config.cost_per_day
    }

    /// Block until every ceiling has headroom, then record the
    /// admission timestamp inside the critical section. With a
    /// timeout, gives up once the deadline passes.
    pub async fn acquire(
        &self,
        estimated_tokens: u64,
        estimated_cost: f64,
        timeout: Option<Duration>,
    ) -> EngineResult<()> {
        let started = Instant::now();

        loop {
            let delay = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.prune(now);

                if self.has_headroom(&state, now, estimated_tokens, estimated_cost) {
                    // Record the admission before releasing the lock so a
                    // concurrent acquirer cannot double-spend the headroom.
                    state.request_times.push_back(now);
                    state.total_requests += 1;
                    state.consecutive_throttles = 0;
                    return Ok(());
                }

                state.consecutive_throttles += 1;
                state.throttle_count += 1;
                let delay = Self::jittered(self.backoff_delay(state.consecutive_throttles - 1));
                debug!(
                    limiter = %self.name,
                    consecutive = state.consecutive_throttles,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limiter throttled, backing off"
                );
                delay
            };

            if let Some(timeout) = timeout {
                if started.elapsed() + delay > timeout {
                    warn!(limiter = %self.name, "Rate limiter acquisition timed out");
                    return Err(EngineError::RateLimitTimeout {
                        limiter: self.name.clone(),
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }

            sleep(delay).await;
        }
    }

    /// Record actual usage after the call completes.
    pub async fn record_usage(&self, tokens: u64, cost: f64) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.token_events.push_back((now, tokens));
        state.cost_events.push_back((now, cost));
        state.total_tokens += tokens;
        state.total_cost += cost;
        state.prune(now);
    }

    /// Current statistics.
    pub async fn stats(&self) -> RateLimiterStats {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.prune(now);
        RateLimiterStats {
            name: self.name.clone(),
            requests_last_minute: state.requests_in(MINUTE, now),
            requests_last_hour: state.requests_in(HOUR, now),
            tokens_last_minute: state.tokens_last_minute(now),
            cost_last_hour: state.cost_in(HOUR, now),
            cost_last_day: state.cost_in(DAY, now),
            total_requests: state.total_requests,
            total_tokens: state.total_tokens,
            total_cost: state.total_cost,
            throttle_count: state.throttle_count,
        }
    }
}

/// Explicit registry of named limiters, owned by the run context.
/// Tests construct a fresh registry per test; there are no process
/// globals.
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: std::collections::HashMap<String, std::sync::Arc<RateLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from named configurations.
    pub fn from_configs(
        configs: &std::collections::BTreeMap<String, RateLimitConfig>,
        backoff: BackoffConfig,
    ) -> Self {
        let mut registry = Self::new();
        for (name, config) in configs {
            registry.register(RateLimiter::new(name.clone(), *config, backoff));
        }
        registry
    }

    pub fn register(&mut self, limiter: RateLimiter) {
        self.limiters
            .insert(limiter.name.clone(), std::sync::Arc::new(limiter));
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<RateLimiter>> {
        self.limiters.get(name).cloned()
    }
}
