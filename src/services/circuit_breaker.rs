//! Circuit breaker for per-action failure gating.
//!
//! One circuit per action type. Failures open the circuit once they reach the
//! threshold; an open circuit rejects calls until the recovery window has
//! passed, then lets a probe through (half-open). Successes only decay the
//! failure counter by one, so a flapping action keeps its circuit close to
//! the threshold.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::models::CircuitBreakerSettings;

/// Configuration for circuit breakers.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit.
    pub failure_threshold: u32,
    /// Duration to keep circuit open before trying half-open.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            recovery_timeout: Duration::from_secs(settings.recovery_timeout_secs),
        }
    }
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are blocked.
    Open,
    /// Circuit is letting a probe through.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Individual circuit breaker state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub state: CircuitState,
    pub failure_count: u32,
    /// Monotonic time of the last failure, used for the recovery window.
    last_failure: Option<Instant>,
    /// Wall-clock time of the last failure, for reporting.
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            last_failure_at: None,
        }
    }

    /// Record a failure.
    pub fn record_failure(&mut self, config: &CircuitBreakerConfig) {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());
        self.last_failure_at = Some(Utc::now());
        if self.failure_count >= config.failure_threshold {
            self.state = CircuitState::Open;
        }
    }

    /// Record a success.
    pub fn record_success(&mut self) {
        self.failure_count = self.failure_count.saturating_sub(1);
        if self.state == CircuitState::HalfOpen {
            self.state = CircuitState::Closed;
        }
    }

    /// Whether calls are currently rejected. Flips to half-open once the
    /// recovery window has passed.
    pub fn is_open(&mut self, config: &CircuitBreakerConfig) -> bool {
        if self.state != CircuitState::Open {
            return false;
        }
        let expired = self
            .last_failure
            .is_some_and(|at| at.elapsed() > config.recovery_timeout);
        if expired {
            self.state = CircuitState::HalfOpen;
            false
        } else {
            true
        }
    }
}

/// Snapshot of one circuit for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub action_type: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Service managing circuit breakers keyed by action type.
#[derive(Debug, Clone)]
pub struct CircuitBreakerService {
    config: CircuitBreakerConfig,
    circuits: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
}

impl Default for CircuitBreakerService {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerService {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// False for keys never seen.
    pub async fn is_open(&self, key: &str) -> bool {
        let mut circuits = self.circuits.write().await;
        let Some(circuit) = circuits.get_mut(key) else {
            return false;
        };
        let open = circuit.is_open(&self.config);
        if !open && circuit.state == CircuitState::HalfOpen {
            tracing::info!(action_type = key, "circuit half-open, allowing probe");
        }
        open
    }

    pub async fn record_failure(&self, key: &str) {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(key.to_string()).or_default();
        let was_open = circuit.state == CircuitState::Open;
        circuit.record_failure(&self.config);
        if !was_open && circuit.state == CircuitState::Open {
            tracing::warn!(
                action_type = key,
                failures = circuit.failure_count,
                "circuit opened after repeated failures"
            );
        }
    }

    pub async fn record_success(&self, key: &str) {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(key.to_string()).or_default();
        let was_half_open = circuit.state == CircuitState::HalfOpen;
        circuit.record_success();
        if was_half_open {
            tracing::info!(action_type = key, "circuit closed after successful probe");
        }
    }

    /// Move an open circuit to half-open after its caller waited out the
    /// recovery window, so the next call is treated as the probe.
    pub async fn begin_probe(&self, key: &str) {
        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(key) {
            if circuit.state == CircuitState::Open {
                circuit.state = CircuitState::HalfOpen;
                tracing::info!(action_type = key, "circuit half-open, allowing probe");
            }
        }
    }

    pub async fn get_state(&self, key: &str) -> Option<CircuitState> {
        self.circuits.read().await.get(key).map(|c| c.state)
    }

    pub async fn failure_count(&self, key: &str) -> u32 {
        self.circuits
            .read()
            .await
            .get(key)
            .map_or(0, |c| c.failure_count)
    }

    /// All known circuits, sorted by action type.
    pub async fn stats(&self) -> Vec<CircuitStats> {
        let circuits = self.circuits.read().await;
        let mut stats: Vec<_> = circuits
            .iter()
            .map(|(key, c)| CircuitStats {
                action_type: key.clone(),
                state: c.state,
                failure_count: c.failure_count,
                last_failure_at: c.last_failure_at,
            })
            .collect();
        stats.sort_by(|a, b| a.action_type.cmp(&b.action_type));
        stats
    }

    pub async fn reset(&self, key: &str) {
        self.circuits.write().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CircuitBreakerService {
        CircuitBreakerService::new(CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        })
    }

    #[tokio::test]
    async fn test_unknown_key_is_closed() {
        let cb = service();
        assert!(!cb.is_open("search_flights").await);
        assert_eq!(cb.get_state("search_flights").await, None);
    }

    #[tokio::test]
    async fn test_opens_at_threshold() {
        let cb = service();
        cb.record_failure("pay").await;
        cb.record_failure("pay").await;
        assert!(!cb.is_open("pay").await);
        cb.record_failure("pay").await;
        assert!(cb.is_open("pay").await);
        assert_eq!(cb.get_state("pay").await, Some(CircuitState::Open));
    }

    #[tokio::test]
    async fn test_success_only_decays_counter() {
        let cb = service();
        cb.record_failure("pay").await;
        cb.record_failure("pay").await;
        cb.record_success("pay").await;
        assert_eq!(cb.failure_count("pay").await, 1);
        cb.record_success("pay").await;
        cb.record_success("pay").await;
        assert_eq!(cb.failure_count("pay").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_recovery_window() {
        let cb = service();
        for _ in 0..3 {
            cb.record_failure("pay").await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.is_open("pay").await);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!cb.is_open("pay").await);
        assert_eq!(cb.get_state("pay").await, Some(CircuitState::HalfOpen));

        cb.record_success("pay").await;
        assert_eq!(cb.get_state("pay").await, Some(CircuitState::Closed));
        // Sticky: still two failures on the books.
        assert_eq!(cb.failure_count("pay").await, 2);
    }

    #[tokio::test]
    async fn test_begin_probe_and_stats() {
        let cb = service();
        for _ in 0..3 {
            cb.record_failure("pay").await;
        }
        cb.begin_probe("pay").await;
        assert_eq!(cb.get_state("pay").await, Some(CircuitState::HalfOpen));

        cb.record_failure("search").await;
        let stats = cb.stats().await;
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].action_type, "pay");
        assert_eq!(stats[1].state, CircuitState::Closed);

        cb.reset("pay").await;
        assert_eq!(cb.get_state("pay").await, None);
    }
}
