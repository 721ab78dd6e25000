//! Breaker around calls to the remote materials collection.
//!
//! Consecutive transient failures (see [`ServiceError::is_transient`]) open
//! the circuit. While it is open every call fails fast with
//! [`ServiceError::CircuitBreakerOpen`], which sends the stock store straight
//! to its local fallback. Once `reset_after` has passed, calls are let
//! through on trial; enough trial successes close the circuit again.
//!
//! Non-transient errors such as `NotFound` mean the remote answered, so they
//! count as successes.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::errors::ServiceError;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before trial calls are allowed.
    pub reset_after: Duration,
    /// Trial successes needed to close the circuit.
    pub trial_successes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_after: Duration::from_secs(30),
            trial_successes: 1,
        }
    }
}

/// Externally visible state of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: u32 },
    Open { until: Instant },
    Trial { successes: u32 },
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    phase: Arc<Mutex<Phase>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_after: Duration) -> Self {
        Self::with_config(CircuitBreakerConfig {
            failure_threshold,
            reset_after,
            ..Default::default()
        })
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            phase: Arc::new(Mutex::new(Phase::Closed { failures: 0 })),
        }
    }

    pub fn state(&self) -> CircuitState {
        match *self.lock() {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::Trial { .. } => CircuitState::HalfOpen,
        }
    }

    /// Runs a remote operation unless the circuit is open, recording its
    /// outcome. The operation's own error is returned unchanged.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.admit()?;
        let outcome = op().await;
        self.record(matches!(&outcome, Err(e) if e.is_transient()));
        outcome
    }

    fn admit(&self) -> Result<(), ServiceError> {
        let mut phase = self.lock();
        match *phase {
            Phase::Open { until } if Instant::now() < until => {
                Err(ServiceError::CircuitBreakerOpen)
            }
            Phase::Open { .. } => {
                debug!("Reset window elapsed; allowing trial call to remote store");
                *phase = Phase::Trial { successes: 0 };
                Ok(())
            }
            Phase::Closed { .. } | Phase::Trial { .. } => Ok(()),
        }
    }

    fn record(&self, failed: bool) {
        let mut phase = self.lock();
        *phase = match (*phase, failed) {
            (Phase::Closed { .. }, false) => Phase::Closed { failures: 0 },
            (Phase::Closed { failures }, true) => {
                let failures = failures.saturating_add(1);
                if failures >= self.config.failure_threshold {
                    warn!(failures, "Remote store failing; opening circuit");
                    self.opened()
                } else {
                    Phase::Closed { failures }
                }
            }
            (Phase::Trial { successes }, false) => {
                let successes = successes.saturating_add(1);
                if successes >= self.config.trial_successes {
                    info!("Remote store recovered; closing circuit");
                    Phase::Closed { failures: 0 }
                } else {
                    Phase::Trial { successes }
                }
            }
            (Phase::Trial { .. }, true) => {
                warn!("Trial call to remote store failed; reopening circuit");
                self.opened()
            }
            // Admitted before another caller opened the circuit.
            (open @ Phase::Open { .. }, _) => open,
        };
    }

    fn opened(&self) -> Phase {
        Phase::Open {
            until: Instant::now() + self.config.reset_after,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        match self.phase.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
