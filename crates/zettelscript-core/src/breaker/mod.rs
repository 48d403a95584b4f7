//! Per-subsystem circuit breaker (C8): CLOSED/OPEN/HALF_OPEN with injected
//! time, so a tripped breaker fails fast instead of letting callers hammer a
//! degraded embedding provider or filesystem.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerState {
    state: State,
    failure_count: u32,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self { state: State::Closed, failure_count: 0, opened_at: None }
    }
}

/// One breaker per named subsystem, all sharing `config`.
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self { config, breakers: Mutex::new(HashMap::new()) }
    }

    /// Ask before a fallible call. `HALF_OPEN` permits exactly the calling
    /// probe; `OPEN` within cooldown permits nothing.
    pub fn should_attempt(&self, subsystem: &str) -> bool {
        self.should_attempt_at(subsystem, Instant::now())
    }

    fn should_attempt_at(&self, subsystem: &str, now: Instant) -> bool {
        let mut breakers = self.breakers.lock().expect("breaker registry lock poisoned");
        let entry = breakers.entry(subsystem.to_string()).or_insert_with(BreakerState::new);

        match entry.state {
            State::Closed => true,
            State::HalfOpen => true,
            State::Open => {
                let cooldown = Duration::from_millis(self.config.cooldown_ms);
                let elapsed = entry.opened_at.map(|t| now.duration_since(t) >= cooldown).unwrap_or(false);
                if elapsed {
                    tracing::info!(subsystem, "circuit breaker cooldown elapsed, probing");
                    entry.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, subsystem: &str) {
        let mut breakers = self.breakers.lock().expect("breaker registry lock poisoned");
        let entry = breakers.entry(subsystem.to_string()).or_insert_with(BreakerState::new);
        if entry.state != State::Closed {
            tracing::info!(subsystem, "circuit breaker closing after successful probe");
        }
        entry.state = State::Closed;
        entry.failure_count = 0;
        entry.opened_at = None;
    }

    pub fn record_failure(&self, subsystem: &str) {
        self.record_failure_at(subsystem, Instant::now());
    }

    fn record_failure_at(&self, subsystem: &str, now: Instant) {
        let mut breakers = self.breakers.lock().expect("breaker registry lock poisoned");
        let entry = breakers.entry(subsystem.to_string()).or_insert_with(BreakerState::new);

        match entry.state {
            State::HalfOpen => {
                tracing::warn!(subsystem, "circuit breaker probe failed, reopening");
                entry.state = State::Open;
                entry.opened_at = Some(now);
            }
            State::Closed => {
                entry.failure_count += 1;
                if entry.failure_count >= self.config.max_failures {
                    tracing::warn!(subsystem, failures = entry.failure_count, "circuit breaker tripped open");
                    entry.state = State::Open;
                    entry.opened_at = Some(now);
                }
            }
            State::Open => {
                entry.opened_at = Some(now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig { max_failures: 3, cooldown_ms: 1_000 }
    }

    #[test]
    fn closed_stays_closed_below_max_failures() {
        let registry = CircuitBreakerRegistry::new(config());
        registry.record_failure("embed");
        registry.record_failure("embed");
        assert!(registry.should_attempt("embed"));
    }

    #[test]
    fn trips_open_at_max_failures() {
        let registry = CircuitBreakerRegistry::new(config());
        let now = Instant::now();
        registry.record_failure_at("embed", now);
        registry.record_failure_at("embed", now);
        registry.record_failure_at("embed", now);
        assert!(!registry.should_attempt_at("embed", now));
    }

    #[test]
    fn half_open_after_cooldown_elapses() {
        let registry = CircuitBreakerRegistry::new(config());
        let t0 = Instant::now();
        registry.record_failure_at("embed", t0);
        registry.record_failure_at("embed", t0);
        registry.record_failure_at("embed", t0);
        let after_cooldown = t0 + Duration::from_millis(1_001);
        assert!(registry.should_attempt_at("embed", after_cooldown));
    }

    #[test]
    fn half_open_success_closes_and_resets_count() {
        let registry = CircuitBreakerRegistry::new(config());
        let t0 = Instant::now();
        registry.record_failure_at("embed", t0);
        registry.record_failure_at("embed", t0);
        registry.record_failure_at("embed", t0);
        let after_cooldown = t0 + Duration::from_millis(1_001);
        assert!(registry.should_attempt_at("embed", after_cooldown));
        registry.record_success("embed");
        assert!(registry.should_attempt_at("embed", after_cooldown));
        registry.record_failure_at("embed", after_cooldown);
        assert!(registry.should_attempt_at("embed", after_cooldown));
    }

    #[test]
    fn half_open_failure_reopens_and_restarts_cooldown() {
        let registry = CircuitBreakerRegistry::new(config());
        let t0 = Instant::now();
        registry.record_failure_at("embed", t0);
        registry.record_failure_at("embed", t0);
        registry.record_failure_at("embed", t0);
        let after_cooldown = t0 + Duration::from_millis(1_001);
        assert!(registry.should_attempt_at("embed", after_cooldown));
        registry.record_failure_at("embed", after_cooldown);
        assert!(!registry.should_attempt_at("embed", after_cooldown));
        let after_second_cooldown = after_cooldown + Duration::from_millis(1_001);
        assert!(registry.should_attempt_at("embed", after_second_cooldown));
    }

    #[test]
    fn independent_subsystems_do_not_share_state() {
        let registry = CircuitBreakerRegistry::new(config());
        let now = Instant::now();
        registry.record_failure_at("embed", now);
        registry.record_failure_at("embed", now);
        registry.record_failure_at("embed", now);
        assert!(!registry.should_attempt_at("embed", now));
        assert!(registry.should_attempt_at("filesystem", now));
    }
}
