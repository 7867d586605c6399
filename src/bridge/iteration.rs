//! The Iteration Manager: iteration count and timeout enforcement
//! embedded in the Agent Loop. A standalone, construction-validated
//! manager tracking overall and per-iteration timeouts alongside the
//! iteration counter.

use std::time::{Duration, Instant};

use crate::bridge::error::{BridgeError, ErrorKind};
use crate::bridge::turn::TerminationReason;

const HARD_MAX_ITERATIONS: u32 = 1000;
const HARD_MAX_OVERALL_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct IterationManagerConfig {
    pub max_iterations: u32,
    pub overall_timeout_ms: Option<u64>,
    pub iteration_timeout_ms: Option<u64>,
}

impl Default for IterationManagerConfig {
    fn default() -> Self {
        IterationManagerConfig {
            max_iterations: 10,
            overall_timeout_ms: None,
            iteration_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutCheck {
    pub has_timeout: bool,
    pub overall_timeout: bool,
    pub iteration_timeout: bool,
    pub remaining_overall_ms: Option<i64>,
    pub remaining_iteration_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub iteration_number: u32,
    pub duration: Duration,
    pub can_continue: bool,
    pub termination_reason: Option<TerminationReason>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    pub total_iterations: u32,
    pub average_iteration_duration: Duration,
    pub min_iteration_duration: Option<Duration>,
    pub max_iteration_duration: Option<Duration>,
    pub current_iteration: u32,
    pub is_terminated: bool,
    pub termination_reason: Option<TerminationReason>,
}

pub struct IterationManager {
    config: IterationManagerConfig,
    start_time: Instant,
    current_iteration: u32,
    iteration_active: bool,
    current_iteration_start: Option<Instant>,
    durations: Vec<Duration>,
    terminated: bool,
    termination_reason: Option<TerminationReason>,
}

impl IterationManager {
    pub fn new(config: IterationManagerConfig) -> Result<Self, BridgeError> {
        if config.max_iterations == 0 {
            return Err(BridgeError::new(ErrorKind::InvalidConfig, "maxIterations must be positive"));
        }
        if config.max_iterations > HARD_MAX_ITERATIONS {
            return Err(BridgeError::new(
                ErrorKind::InvalidConfig,
                format!("maxIterations exceeds hard cap of {}", HARD_MAX_ITERATIONS),
            ));
        }
        if let Some(overall) = config.overall_timeout_ms {
            if overall == 0 {
                return Err(BridgeError::new(ErrorKind::InvalidConfig, "overallTimeoutMs must be positive"));
            }
            if overall > HARD_MAX_OVERALL_TIMEOUT_MS {
                return Err(BridgeError::new(ErrorKind::InvalidConfig, "overallTimeoutMs exceeds 24h hard cap"));
            }
        }
        if let (Some(iteration), Some(overall)) = (config.iteration_timeout_ms, config.overall_timeout_ms) {
            if iteration == 0 {
                return Err(BridgeError::new(ErrorKind::InvalidConfig, "iterationTimeoutMs must be positive"));
            }
            if iteration >= overall {
                return Err(BridgeError::new(
                    ErrorKind::InvalidConfig,
                    "iterationTimeoutMs must be less than overallTimeoutMs",
                ));
            }
        }

        Ok(IterationManager {
            config,
            start_time: Instant::now(),
            current_iteration: 0,
            iteration_active: false,
            current_iteration_start: None,
            durations: Vec::new(),
            terminated: false,
            termination_reason: None,
        })
    }

    pub fn start_iteration(&mut self) -> Result<u32, BridgeError> {
        if self.terminated {
            return Err(BridgeError::new(ErrorKind::MultiTurnExecution, "iteration manager already terminated"));
        }
        if self.iteration_active {
            return Err(BridgeError::new(ErrorKind::MultiTurnExecution, "an iteration is already active"));
        }
        if self.current_iteration >= self.config.max_iterations {
            self.terminated = true;
            self.termination_reason = Some(TerminationReason::MaxIterations);
            return Err(
                BridgeError::new(ErrorKind::MultiTurnExecution, "max iterations exceeded")
                    .with_context("currentIteration", self.current_iteration.to_string())
                    .with_context("maxIterations", self.config.max_iterations.to_string())
                    .with_recovery_action(crate::bridge::error::RecoveryAction::Abort),
            );
        }
        self.current_iteration += 1;
        self.iteration_active = true;
        self.current_iteration_start = Some(Instant::now());
        Ok(self.current_iteration)
    }

    pub fn complete_iteration(&mut self) -> IterationOutcome {
        let start = self.current_iteration_start.take().unwrap_or_else(Instant::now);
        let duration = start.elapsed();
        self.durations.push(duration);
        self.iteration_active = false;

        let timeouts = self.check_timeouts();
        let reason = self.determine_termination_reason(&timeouts);
        let can_continue = reason.is_none();
        if let Some(r) = reason {
            self.terminated = true;
            self.termination_reason = Some(r);
        }

        IterationOutcome {
            iteration_number: self.current_iteration,
            duration,
            can_continue,
            termination_reason: reason,
        }
    }

    pub fn check_timeouts(&self) -> TimeoutCheck {
        let elapsed = self.start_time.elapsed().as_millis() as i64;
        let overall_timeout = self
            .config
            .overall_timeout_ms
            .map(|limit| elapsed >= limit as i64)
            .unwrap_or(false);
        let remaining_overall_ms = self.config.overall_timeout_ms.map(|limit| limit as i64 - elapsed);

        let (iteration_timeout, remaining_iteration_ms) = match (self.config.iteration_timeout_ms, self.current_iteration_start) {
            (Some(limit), Some(start)) => {
                let iter_elapsed = start.elapsed().as_millis() as i64;
                (iter_elapsed >= limit as i64, Some(limit as i64 - iter_elapsed))
            }
            _ => (false, None),
        };

        TimeoutCheck {
            has_timeout: overall_timeout || iteration_timeout,
            overall_timeout,
            iteration_timeout,
            remaining_overall_ms,
            remaining_iteration_ms,
        }
    }

    /// Precedence: explicit reason > timeout > max_iterations > natural_completion.
    fn determine_termination_reason(&self, timeouts: &TimeoutCheck) -> Option<TerminationReason> {
        if let Some(reason) = self.termination_reason {
            return Some(reason);
        }
        if timeouts.has_timeout {
            return Some(TerminationReason::Timeout);
        }
        if self.current_iteration >= self.config.max_iterations {
            return Some(TerminationReason::MaxIterations);
        }
        None
    }

    pub fn cancel(&mut self) {
        self.terminated = true;
        self.termination_reason = Some(TerminationReason::Cancelled);
    }

    pub fn get_execution_metrics(&self) -> ExecutionMetrics {
        let total = self.durations.len() as u32;
        let average = if total == 0 {
            Duration::ZERO
        } else {
            self.durations.iter().sum::<Duration>() / total
        };
        ExecutionMetrics {
            total_iterations: total,
            average_iteration_duration: average,
            min_iteration_duration: self.durations.iter().min().copied(),
            max_iteration_duration: self.durations.iter().max().copied(),
            current_iteration: self.current_iteration,
            is_terminated: self.terminated,
            termination_reason: self.termination_reason,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_rejects_iteration_timeout_gte_overall() {
        let config = IterationManagerConfig {
            max_iterations: 5,
            overall_timeout_ms: Some(1000),
            iteration_timeout_ms: Some(1000),
        };
        assert!(IterationManager::new(config).is_err());
    }

    #[test]
    fn construction_rejects_max_iterations_above_hard_cap() {
        let config = IterationManagerConfig {
            max_iterations: 1001,
            ..Default::default()
        };
        assert!(IterationManager::new(config).is_err());
    }

    #[test]
    fn start_iteration_fails_past_max_iterations() {
        let mut mgr = IterationManager::new(IterationManagerConfig {
            max_iterations: 2,
            ..Default::default()
        })
        .unwrap();
        mgr.start_iteration().unwrap();
        mgr.complete_iteration();
        mgr.start_iteration().unwrap();
        mgr.complete_iteration();
        assert!(mgr.start_iteration().is_err());
        assert!(mgr.is_terminated());
    }

    #[test]
    fn complete_iteration_reports_max_iterations_reason_on_last() {
        let mut mgr = IterationManager::new(IterationManagerConfig {
            max_iterations: 1,
            ..Default::default()
        })
        .unwrap();
        mgr.start_iteration().unwrap();
        let outcome = mgr.complete_iteration();
        assert!(!outcome.can_continue);
        assert_eq!(outcome.termination_reason, Some(TerminationReason::MaxIterations));
    }

    #[test]
    fn cancel_marks_terminated_with_cancelled_reason() {
        let mut mgr = IterationManager::new(IterationManagerConfig::default()).unwrap();
        mgr.cancel();
        assert!(mgr.is_terminated());
        assert_eq!(mgr.get_execution_metrics().termination_reason, Some(TerminationReason::Cancelled));
    }
}
