//! Reputation Engine
//!
//! Pure scoring over discrete lifecycle events plus gate evaluation. Scores
//! live in [0,100]; [`clamp_score`] is the single clamp applied at every
//! mutation boundary so drift outside the range is impossible.

use crate::error::{KeygateError, Result};
use serde::{Deserialize, Serialize};

/// Discrete lifecycle events consumed by the scoring function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationEvent {
    /// A payment settled
    PaymentSuccess,
    /// A payment failed
    PaymentFailure,
    /// The agent hit its rate limit
    RateLimitHit,
    /// A request completed successfully
    RequestSuccess,
    /// A request errored
    RequestError,
    /// The agent was flagged for review
    Flagged,
    /// A flag was cleared
    Unflagged,
}

/// Signed weight per event type, all tunable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationWeights {
    /// Weight for `payment_success`
    pub payment_success: f64,
    /// Weight for `payment_failure`
    pub payment_failure: f64,
    /// Weight for `rate_limit_hit`
    pub rate_limit_hit: f64,
    /// Weight for `request_success`
    pub request_success: f64,
    /// Weight for `request_error`
    pub request_error: f64,
    /// Weight for `flagged`
    pub flagged: f64,
    /// Weight for `unflagged`
    pub unflagged: f64,
}

impl Default for ReputationWeights {
    fn default() -> Self {
        Self {
            payment_success: 2.0,
            payment_failure: -5.0,
            rate_limit_hit: -1.0,
            request_success: 0.1,
            request_error: -0.5,
            flagged: -10.0,
            unflagged: 5.0,
        }
    }
}

impl ReputationWeights {
    /// Weight assigned to an event type
    pub fn weight_for(&self, event: ReputationEvent) -> f64 {
        match event {
            ReputationEvent::PaymentSuccess => self.payment_success,
            ReputationEvent::PaymentFailure => self.payment_failure,
            ReputationEvent::RateLimitHit => self.rate_limit_hit,
            ReputationEvent::RequestSuccess => self.request_success,
            ReputationEvent::RequestError => self.request_error,
            ReputationEvent::Flagged => self.flagged,
            ReputationEvent::Unflagged => self.unflagged,
        }
    }

    fn all(&self) -> [f64; 7] {
        [
            self.payment_success,
            self.payment_failure,
            self.rate_limit_hit,
            self.request_success,
            self.request_error,
            self.flagged,
            self.unflagged,
        ]
    }
}

/// Action taken when a gate's minimum is not met
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    /// Deny the request
    Block,
    /// Allow the request but surface a warning
    Warn,
}

/// A configured reputation gate
///
/// Gates are evaluated, never stored as mutable state. A gate with a scope
/// list applies only to those scopes and takes precedence over a general
/// gate; among several applicable gates the strictest minimum wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gate {
    /// Minimum score required to pass
    pub min_reputation: f64,

    /// Scopes this gate restricts; `None` means it applies to every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,

    /// What happens below the minimum
    pub action: GateAction,
}

/// Outcome of a gate evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDecision {
    /// Whether the request may proceed
    pub allowed: bool,

    /// The action taken, if a gate's minimum was not met
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<GateAction>,

    /// The failing gate's minimum
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_score: Option<f64>,

    /// The score that was evaluated
    pub current_score: f64,
}

impl GateDecision {
    fn allow(score: f64) -> Self {
        Self {
            allowed: true,
            action: None,
            required_score: None,
            current_score: score,
        }
    }
}

/// Reputation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// Master switch; when disabled every call is a no-op / allow
    pub enabled: bool,

    /// Score newly registered agents start at
    pub initial_score: f64,

    /// At or below this score the agent should be flagged
    pub flag_threshold: f64,

    /// At or below this score the agent should be suspended
    pub suspend_threshold: f64,

    /// Per-event weights
    pub weights: ReputationWeights,

    /// Configured gates
    pub gates: Vec<Gate>,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_score: 50.0,
            flag_threshold: 20.0,
            suspend_threshold: 10.0,
            weights: ReputationWeights::default(),
            gates: Vec::new(),
        }
    }
}

impl ReputationConfig {
    /// Fail-fast validation of weights, thresholds and gates
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.initial_score) {
            return Err(KeygateError::Configuration(format!(
                "initial_score must be within [0,100], got {}",
                self.initial_score
            )));
        }
        for w in self.weights.all() {
            if !w.is_finite() {
                return Err(KeygateError::Configuration(
                    "reputation weights must be finite".into(),
                ));
            }
        }
        for gate in &self.gates {
            if !(0.0..=100.0).contains(&gate.min_reputation) {
                return Err(KeygateError::Configuration(format!(
                    "gate min_reputation must be within [0,100], got {}",
                    gate.min_reputation
                )));
            }
            if let Some(scopes) = &gate.scopes {
                if scopes.is_empty() {
                    return Err(KeygateError::Configuration(
                        "gate scope list must not be empty when present".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Clamp a score to [0,100]
pub fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

/// The scoring and gate-evaluation engine
#[derive(Debug, Clone)]
pub struct ReputationEngine {
    config: ReputationConfig,
}

impl ReputationEngine {
    /// Build an engine from validated configuration
    pub fn new(config: ReputationConfig) -> Self {
        Self { config }
    }

    /// Whether the engine is active
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Score newly registered agents start at
    pub fn initial_score(&self) -> f64 {
        clamp_score(self.config.initial_score)
    }

    /// Apply one event to a score, clamping the result
    ///
    /// Identity when the engine is disabled.
    pub fn calculate_score(&self, current: f64, event: ReputationEvent) -> f64 {
        if !self.config.enabled {
            return current;
        }
        clamp_score(current + self.config.weights.weight_for(event))
    }

    /// Apply an event sequence: sum all weights, then clamp once
    ///
    /// Intermediate sums are deliberately not clamped.
    pub fn calculate_bulk_score(&self, current: f64, events: &[ReputationEvent]) -> f64 {
        if !self.config.enabled {
            return current;
        }
        let delta: f64 = events
            .iter()
            .map(|e| self.config.weights.weight_for(*e))
            .sum();
        clamp_score(current + delta)
    }

    /// Evaluate the applicable gate for a score and optional requested scope
    ///
    /// A gate whose scope list contains the requested scope beats a general
    /// gate; among several matches the strictest minimum wins. No applicable
    /// gate (or a disabled engine) means access is allowed.
    pub fn check_gate(&self, score: f64, scope: Option<&str>) -> GateDecision {
        if !self.config.enabled {
            return GateDecision::allow(score);
        }

        let scoped = scope.and_then(|s| {
            self.config
                .gates
                .iter()
                .filter(|g| g.scopes.as_ref().is_some_and(|list| list.iter().any(|x| x == s)))
                .max_by(|a, b| a.min_reputation.total_cmp(&b.min_reputation))
        });
        let general = self
            .config
            .gates
            .iter()
            .filter(|g| g.scopes.is_none())
            .max_by(|a, b| a.min_reputation.total_cmp(&b.min_reputation));

        let Some(gate) = scoped.or(general) else {
            return GateDecision::allow(score);
        };

        if score >= gate.min_reputation {
            return GateDecision::allow(score);
        }

        GateDecision {
            allowed: gate.action == GateAction::Warn,
            action: Some(gate.action),
            required_score: Some(gate.min_reputation),
            current_score: score,
        }
    }

    /// Whether the score warrants flagging (`score <= flag_threshold`)
    pub fn should_flag(&self, score: f64) -> bool {
        self.config.enabled && score <= self.config.flag_threshold
    }

    /// Whether the score warrants suspension (`score <= suspend_threshold`)
    pub fn should_suspend(&self, score: f64) -> bool {
        self.config.enabled && score <= self.config.suspend_threshold
    }
}
