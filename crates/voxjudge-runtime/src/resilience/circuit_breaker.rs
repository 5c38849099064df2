//! Circuit breaker to prevent cascade failures.
//!
//! When a slot's provider fails repeatedly, the circuit opens and the slot
//! immediately degrades to UNCERTAIN without making a call.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Circuit breaker configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures before opening circuit
    pub failure_threshold: u32,

    /// Time before attempting recovery
    #[serde(with = "crate::config::humantime_duration")]
    pub recovery_timeout: Duration,

    /// Successes needed to close circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// State of one slot's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls go through; consecutive failures so far
    Closed { failures: u32 },

    /// Calls are skipped until the recovery timeout passes
    Open { opened_at: Instant },

    /// Trial calls go through; consecutive successes so far
    HalfOpen { successes: u32 },
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed { failures: 0 }
    }
}

/// Circuit breaker keyed by pipeline slot name.
///
/// Slots are the fixed `evaluator_a`, `evaluator_b` and `curator` names,
/// so keys are `&'static str` and a missing entry means closed.
pub struct CircuitBreaker {
    circuits: RwLock<HashMap<&'static str, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Whether a call for `slot` should be skipped.
    ///
    /// An open circuit whose recovery timeout has passed moves to half-open
    /// and lets the call through.
    pub fn is_open(&self, slot: &str) -> bool {
        let mut circuits = self.circuits.write();
        let Some(state) = circuits.get_mut(slot) else {
            return false;
        };

        match *state {
            CircuitState::Open { opened_at }
                if opened_at.elapsed() < self.config.recovery_timeout =>
            {
                true
            }
            CircuitState::Open { .. } => {
                *state = CircuitState::HalfOpen { successes: 0 };
                tracing::info!(slot, "Circuit half-open, letting a trial call through");
                false
            }
            _ => false,
        }
    }

    pub fn record_success(&self, slot: &'static str) {
        let mut circuits = self.circuits.write();
        let state = circuits.entry(slot).or_default();

        *state = match *state {
            CircuitState::HalfOpen { successes }
                if successes + 1 >= self.config.success_threshold =>
            {
                tracing::info!(slot, "Circuit closed after successful recovery");
                CircuitState::default()
            }
            CircuitState::HalfOpen { successes } => CircuitState::HalfOpen {
                successes: successes + 1,
            },
            CircuitState::Closed { .. } => CircuitState::default(),
            open @ CircuitState::Open { .. } => open,
        };
    }

    pub fn record_failure(&self, slot: &'static str) {
        let mut circuits = self.circuits.write();
        let state = circuits.entry(slot).or_default();

        *state = match *state {
            CircuitState::Closed { failures } if failures + 1 >= self.config.failure_threshold => {
                tracing::warn!(
                    slot,
                    failures = failures + 1,
                    "Circuit opened after repeated failures"
                );
                CircuitState::Open {
                    opened_at: Instant::now(),
                }
            }
            CircuitState::Closed { failures } => CircuitState::Closed {
                failures: failures + 1,
            },
            CircuitState::HalfOpen { .. } => {
                tracing::warn!(slot, "Circuit reopened after failed trial call");
                CircuitState::Open {
                    opened_at: Instant::now(),
                }
            }
            open @ CircuitState::Open { .. } => open,
        };
    }

    /// Current state of a slot's circuit.
    pub fn state(&self, slot: &str) -> CircuitState {
        self.circuits.read().get(slot).copied().unwrap_or_default()
    }

    /// Close every circuit.
    pub fn reset(&self) {
        self.circuits.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
