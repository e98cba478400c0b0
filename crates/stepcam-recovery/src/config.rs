use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Consecutive failed attempts before giving up. Unbounded when unset.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_type", rename = "type")]
    pub backoff_type: BackoffType,
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl BackoffConfig {
    pub fn fixed(wait: Duration) -> Self {
        let ms = wait.as_millis() as u64;
        Self {
            backoff_type: BackoffType::Fixed,
            initial_ms: ms,
            max_ms: ms,
            multiplier: 1.0,
        }
    }

    /// Wait before retrying after the `attempt`-th consecutive failure.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_ms as f64;
        let attempt = attempt.max(1);

        let wait_ms = match self.backoff_type {
            BackoffType::Fixed => base,
            BackoffType::Linear => base * attempt as f64,
            BackoffType::Exponential => base * self.multiplier.powi(attempt as i32 - 1),
        };

        Duration::from_millis(wait_ms.min(self.max_ms as f64) as u64)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            backoff_type: default_backoff_type(),
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
            multiplier: default_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

fn default_backoff_type() -> BackoffType {
    BackoffType::Fixed
}

fn default_initial_ms() -> u64 {
    15_000
}

fn default_max_ms() -> u64 {
    300_000
}

fn default_multiplier() -> f64 {
    2.0
}
