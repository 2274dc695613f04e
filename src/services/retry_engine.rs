//! Retry engine for single step execution.
//!
//! Wraps one tool invocation with a deadline, failure classification,
//! backoff, and circuit breaker consultation. Every path ends in a
//! [`RetryOutcome`] so callers must handle interruption, replanning and
//! exhaustion explicitly.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::models::{Context, InterruptReason, Interruption, RetryConfig, Step};
use crate::domain::ports::{ToolError, ToolOutput, ToolRegistry};
use crate::services::circuit_breaker::CircuitBreakerService;
use crate::services::param_resolver;

/// How to react to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    Immediate,
    Exponential,
    Linear,
    CircuitBreak,
    /// Stop retrying and ask the planner for another way.
    Alternative,
    /// Stop retrying and hand the step to a human.
    HumanEscalate,
}

/// Result of running one step through the retry loop.
#[derive(Debug, Clone)]
pub enum RetryOutcome {
    Success { output: ToolOutput, attempts: u32 },
    NeedsReplan { error: String, attempts: u32 },
    Exhausted { error: String, attempts: u32 },
    Interrupted { interruption: Interruption, attempts: u32 },
}

impl RetryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. }
            | Self::NeedsReplan { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Interrupted { attempts, .. } => *attempts,
        }
    }
}

/// Backoff and deadline settings.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub immediate_delay: Duration,
    /// Fractional jitter applied to exponential delays.
    pub jitter: f64,
    pub step_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            immediate_delay: Duration::from_millis(500),
            jitter: 0.25,
            step_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            immediate_delay: Duration::from_millis(config.immediate_delay_ms),
            jitter: config.jitter,
            step_timeout: Duration::from_secs(config.step_timeout_secs),
        }
    }
}

const NETWORK: &[&str] = &["timeout", "connection", "network", "502", "503", "504"];
const RATE_LIMIT: &[&str] = &["rate limit", "429", "too many requests"];
const AUTH: &[&str] = &["auth", "unauthorized", "401", "403", "forbidden"];
const MISSING: &[&str] = &["not found", "404", "unavailable", "no longer available"];
const BUSINESS: &[&str] = &["insufficient funds", "invalid", "rejected", "declined"];
const TEMPORARY: &[&str] = &["temporarily", "unavailable", "maintenance", "busy"];

/// Exponential growth stops here; later attempts reuse the same delay.
const MAX_BACKOFF_EXPONENT: u32 = 32;

/// Pick a strategy for a failure message. Case-insensitive substring match,
/// first rule wins.
#[allow(clippy::if_same_then_else)]
pub fn classify_failure(message: &str, attempt: u32) -> RetryStrategy {
    let msg = message.to_lowercase();
    let matches = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

    if matches(NETWORK) || matches(RATE_LIMIT) {
        RetryStrategy::Exponential
    } else if matches(AUTH) {
        if attempt < 2 {
            RetryStrategy::Immediate
        } else {
            RetryStrategy::HumanEscalate
        }
    } else if matches(MISSING) {
        RetryStrategy::Alternative
    } else if matches(BUSINESS) {
        RetryStrategy::HumanEscalate
    } else if matches(TEMPORARY) {
        RetryStrategy::Exponential
    } else {
        RetryStrategy::Exponential
    }
}

/// Executes steps with retries. Cheap to clone; the breaker is shared.
#[derive(Debug, Clone)]
pub struct RetryEngine {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreakerService>,
}

impl RetryEngine {
    pub fn new(policy: RetryPolicy, breaker: Arc<CircuitBreakerService>) -> Self {
        Self { policy, breaker }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &Arc<CircuitBreakerService> {
        &self.breaker
    }

    /// Delay before the next attempt.
    pub fn calculate_delay(&self, strategy: RetryStrategy, attempt: u32) -> Duration {
        match strategy {
            RetryStrategy::Immediate => self.policy.immediate_delay,
            RetryStrategy::Exponential => {
                let exponent = attempt.min(MAX_BACKOFF_EXPONENT) as i32;
                let base = self.policy.base_delay.as_secs_f64() * 2f64.powi(exponent);
                let jitter = base * self.policy.jitter * rand::random::<f64>().mul_add(2.0, -1.0);
                Duration::try_from_secs_f64((base + jitter).max(0.0)).unwrap_or(Duration::MAX)
            }
            RetryStrategy::Linear => self.policy.base_delay.saturating_mul(attempt),
            RetryStrategy::CircuitBreak => self.breaker.config().recovery_timeout,
            RetryStrategy::Alternative | RetryStrategy::HumanEscalate => Duration::ZERO,
        }
    }

    /// Run `step` through up to `max_retries + 1` attempts.
    ///
    /// `step.retry_count` is updated to the index of the last attempt.
    pub async fn execute_with_retry(
        &self,
        step: &mut Step,
        tools: &ToolRegistry,
        context: &Context,
    ) -> RetryOutcome {
        let key = step.action_type.clone();
        let params = param_resolver::resolve_parameters(&step.parameters, context);
        let mut last_error = String::new();

        for attempt in 0..=step.max_retries {
            step.retry_count = attempt;
            let attempts = attempt + 1;

            if self.breaker.is_open(&key).await {
                let wait = self.breaker.config().recovery_timeout;
                warn!(step_id = %step.id, action_type = %key, wait_secs = wait.as_secs(), "circuit open, waiting before probe");
                tokio::time::sleep(wait).await;
                self.breaker.begin_probe(&key).await;
            }

            let error = match self.invoke(tools, &key, &params).await {
                Ok(output) => {
                    self.breaker.record_success(&key).await;
                    debug!(step_id = %step.id, action_type = %key, attempts, "step succeeded");
                    return RetryOutcome::Success { output, attempts };
                }
                Err(ToolError::Interrupted(interruption)) => {
                    info!(step_id = %step.id, reason = %interruption.reason, "step requires human input");
                    return RetryOutcome::Interrupted { interruption, attempts };
                }
                Err(ToolError::Failed(error)) => error,
            };

            self.breaker.record_failure(&key).await;
            let strategy = classify_failure(&error, attempt);
            warn!(
                step_id = %step.id,
                action_type = %key,
                attempt = attempts,
                error = %error,
                strategy = ?strategy,
                "step attempt failed"
            );

            match strategy {
                RetryStrategy::HumanEscalate => {
                    return RetryOutcome::Interrupted {
                        interruption: Interruption::new(
                            InterruptReason::StepFailed,
                            json!({
                                "message": format!("Step failed after {attempts} attempts: {error}"),
                                "step": step.id,
                                "error": error,
                                "context": Value::Object(context.clone()),
                            }),
                        ),
                        attempts,
                    };
                }
                RetryStrategy::Alternative => {
                    return RetryOutcome::NeedsReplan { error, attempts };
                }
                _ => {}
            }

            if attempt < step.max_retries {
                let delay = self.calculate_delay(strategy, attempt);
                debug!(step_id = %step.id, delay_ms = delay.as_millis() as u64, "backing off before retry");
                tokio::time::sleep(delay).await;
            }
            last_error = error;
        }

        RetryOutcome::Exhausted {
            error: last_error,
            attempts: step.max_retries + 1,
        }
    }

    async fn invoke(
        &self,
        tools: &ToolRegistry,
        action_type: &str,
        params: &serde_json::Map<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        let tool = tools
            .get(action_type)
            .ok_or_else(|| ToolError::Failed(format!("Tool '{action_type}' not found")))?;

        let output = tokio::time::timeout(self.policy.step_timeout, tool.execute(params))
            .await
            .map_err(|_| {
                ToolError::Failed(format!(
                    "step execution timeout after {}s",
                    self.policy.step_timeout.as_secs()
                ))
            })??;

        if output.success {
            Ok(output)
        } else {
            Err(ToolError::Failed(
                output
                    .error
                    .unwrap_or_else(|| "tool reported failure".to_string()),
            ))
        }
    }
}
