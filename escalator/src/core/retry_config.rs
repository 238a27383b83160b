//! Retry thresholds, stage derivation, and backoff delays.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Escalation stage of an attempt.
///
/// Human review is a terminal exit of the orchestrator, not a stage value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Basic,
    ToolAssisted,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Basic => "basic",
            Stage::ToolAssisted => "tool_assisted",
        }
    }
}

/// Invalid [`RetryConfig`]; raised before the first attempt and never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("max_attempts must be >= 1")]
    ZeroAttempts,
    #[error(
        "thresholds must satisfy 1 <= tool_use_threshold ({tool_use}) <= human_review_threshold ({human_review}) <= max_attempts ({max_attempts})"
    )]
    ThresholdOrder {
        tool_use: u32,
        human_review: u32,
        max_attempts: u32,
    },
    #[error("{field} must be a finite number >= 0 (got {value})")]
    NegativeDelay { field: &'static str, value: f64 },
    #[error("backoff_multiplier must be a finite number > 0 (got {0})")]
    Multiplier(f64),
    #[error("call_timeout_secs must be a finite number > 0 (got {0})")]
    Timeout(f64),
}

/// Immutable per-call retry policy.
///
/// Invariant: `1 <= tool_use_threshold <= human_review_threshold <= max_attempts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// 1-based attempt at which tool descriptors start being attached.
    pub tool_use_threshold: u32,
    /// 1-based attempt after whose failure the run exits for human review.
    pub human_review_threshold: u32,
    /// Delay before the second attempt, in seconds.
    pub base_delay_secs: f64,
    pub backoff_multiplier: f64,
    /// Upper bound on the computed (pre-jitter) delay, in seconds.
    pub max_delay_secs: f64,
    /// Scale each delay by a uniform factor in `[0.5, 1.5)`.
    pub jitter: bool,
    /// Per-attempt timeout for the LLM call. `None` waits indefinitely.
    pub call_timeout_secs: Option<f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            tool_use_threshold: 2,
            human_review_threshold: 4,
            base_delay_secs: 1.0,
            backoff_multiplier: 2.0,
            max_delay_secs: 30.0,
            jitter: true,
            call_timeout_secs: Some(120.0),
        }
    }
}

impl RetryConfig {
    /// Config with the given thresholds, no delay, and no jitter.
    pub fn immediate(
        max_attempts: u32,
        tool_use_threshold: u32,
        human_review_threshold: u32,
    ) -> Self {
        Self {
            max_attempts,
            tool_use_threshold,
            human_review_threshold,
            base_delay_secs: 0.0,
            jitter: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if !(1 <= self.tool_use_threshold
            && self.tool_use_threshold <= self.human_review_threshold
            && self.human_review_threshold <= self.max_attempts)
        {
            return Err(ConfigError::ThresholdOrder {
                tool_use: self.tool_use_threshold,
                human_review: self.human_review_threshold,
                max_attempts: self.max_attempts,
            });
        }
        for (field, value) in [
            ("base_delay_secs", self.base_delay_secs),
            ("max_delay_secs", self.max_delay_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::NegativeDelay { field, value });
            }
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 0.0 {
            return Err(ConfigError::Multiplier(self.backoff_multiplier));
        }
        if let Some(timeout) = self.call_timeout_secs
            && (!timeout.is_finite() || timeout <= 0.0)
        {
            return Err(ConfigError::Timeout(timeout));
        }
        Ok(())
    }

    /// Stage for a 1-based attempt number.
    pub fn stage_for(&self, attempt: u32) -> Stage {
        if attempt < self.tool_use_threshold {
            Stage::Basic
        } else {
            Stage::ToolAssisted
        }
    }

    /// True when a failure on `attempt` must exit for human review.
    ///
    /// A single-attempt config has no escalation path: its only failure is
    /// reported as exhaustion.
    pub fn escalates_at(&self, attempt: u32) -> bool {
        self.max_attempts > 1 && attempt == self.human_review_threshold
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs_f64)
    }

    /// Delay to wait after a failed `attempt` (1-based) before the next one.
    ///
    /// `jitter_factor` scales the capped delay; pass `1.0` when jitter is off.
    pub fn delay_after(&self, attempt: u32, jitter_factor: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let raw = self.base_delay_secs * self.backoff_multiplier.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_delay_secs)
        } else {
            self.max_delay_secs
        };
        let scaled = (capped * jitter_factor).max(0.0);
        Duration::try_from_secs_f64(scaled).unwrap_or(Duration::ZERO)
    }
}
