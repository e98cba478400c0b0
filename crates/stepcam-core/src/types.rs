use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Rounds a raw controller reading to one fractional digit, halves away
/// from zero. Negative zero comes out as `0.0`.
pub fn quantize(value: f64) -> f64 {
    (value * 10.0).round() / 10.0 + 0.0
}

/// Lookup key for a step value: the value formatted with exactly one
/// fractional digit (`1.0`, `12.0`, `6.5`).
///
/// This is the only place step values are turned into keys. The strategy
/// parser and every machine lookup go through [`StepKey::from_value`], which
/// rounds with [`quantize`] before formatting, so a key never depends on
/// whether the value was quantized earlier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepKey(String);

impl StepKey {
    pub fn from_value(value: f64) -> Self {
        Self(format!("{:.1}", quantize(value)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the key.
    pub fn value(&self) -> f64 {
        self.0.parse().unwrap_or(f64::NAN)
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for StepKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Capture policy attached to a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Code 1 with a zero delay: capture as soon as the step is entered.
    Immediate,
    /// Code 1 with a positive delay: one capture after the delay.
    Delayed,
    /// Code 2: nothing while the step is occupied, one capture of the step
    /// when it is left.
    ExtendedDwell,
    /// Code 3: capture on entry, then again every `delay` until left.
    Continuous,
}

impl StrategyKind {
    /// Strategy code as written in the strategy table definition.
    pub fn code(self) -> u8 {
        match self {
            StrategyKind::Immediate | StrategyKind::Delayed => 1,
            StrategyKind::ExtendedDwell => 2,
            StrategyKind::Continuous => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureReason {
    Step,
    ExitExtendedDwell,
    ProductChange,
}

impl fmt::Display for CaptureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureReason::Step => "step",
            CaptureReason::ExitExtendedDwell => "exit_extended_dwell",
            CaptureReason::ProductChange => "product_change",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub label: String,
    pub reason: CaptureReason,
}

impl CaptureRequest {
    pub const PRODUCT_LABEL: &'static str = "any_value";

    pub fn step(key: &StepKey) -> Self {
        Self {
            label: key.to_string(),
            reason: CaptureReason::Step,
        }
    }

    pub fn dwell_exit(left: &StepKey) -> Self {
        Self {
            label: left.to_string(),
            reason: CaptureReason::ExitExtendedDwell,
        }
    }

    pub fn product_change() -> Self {
        Self {
            label: Self::PRODUCT_LABEL.to_string(),
            reason: CaptureReason::ProductChange,
        }
    }
}

/// Identity of a controller variable, e.g. `ns=2;s=LINE.PLC1.STEP`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableId(String);

impl VariableId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VariableId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A value change delivered by a controller subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub variable: VariableId,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(variable: VariableId, value: f64) -> Self {
        Self {
            variable,
            value,
            timestamp: Utc::now(),
        }
    }
}
