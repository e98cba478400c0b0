use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::time::Duration;

use stepcam_core::{ConfigError, StepKey, StrategyKind};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StrategyEntry {
    #[serde(rename = "delay_secs", serialize_with = "serialize_secs")]
    pub delay: Duration,
    pub kind: StrategyKind,
}

fn serialize_secs<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(delay.as_secs_f64())
}

/// Capture policy per step, built once at startup from a definition like
/// `1;0;1,5;0;1,6;2;3,12;30;2` (`step;delay;strategy`, comma separated).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyTable {
    entries: HashMap<StepKey, StrategyEntry>,
}

impl StrategyTable {
    pub fn parse(definition: &str) -> Result<Self, ConfigError> {
        let mut entries = HashMap::new();

        for (position, raw) in definition.split(',').enumerate() {
            let entry = raw.trim();
            if entry.is_empty() {
                return Err(ConfigError::EmptyEntry { position });
            }

            let fields: Vec<&str> = entry.split(';').map(str::trim).collect();
            if fields.len() != 3 {
                return Err(ConfigError::FieldCount {
                    entry: entry.to_string(),
                    fields: fields.len(),
                });
            }

            let step = parse_number(entry, "step", fields[0])?;
            let delay_secs = parse_number(entry, "delay", fields[1])?;
            let delay = parse_delay(entry, delay_secs)?;
            let kind = parse_kind(entry, fields[2], delay)?;

            let key = StepKey::from_value(step);
            if entries.contains_key(&key) {
                return Err(ConfigError::DuplicateStep {
                    key: key.to_string(),
                });
            }
            entries.insert(key, StrategyEntry { delay, kind });
        }

        Ok(Self { entries })
    }

    pub fn get(&self, key: &StepKey) -> Option<&StrategyEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by step value.
    pub fn entries(&self) -> Vec<(&StepKey, &StrategyEntry)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.0.value().total_cmp(&b.0.value()));
        entries
    }
}

impl Serialize for StrategyTable {
    /// A map from step key to entry, in step order.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries())
    }
}

fn parse_number(entry: &str, field: &'static str, value: &str) -> Result<f64, ConfigError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ConfigError::InvalidNumber {
            entry: entry.to_string(),
            field,
            value: value.to_string(),
        })
}

/// Longest delay or interval a step may ask for: one week.
const MAX_DELAY_SECS: f64 = 7.0 * 24.0 * 3600.0;

fn parse_delay(entry: &str, secs: f64) -> Result<Duration, ConfigError> {
    if secs < 0.0 {
        return Err(ConfigError::InvalidDelay {
            entry: entry.to_string(),
            reason: "delay must not be negative".into(),
        });
    }
    if secs > MAX_DELAY_SECS {
        return Err(ConfigError::InvalidDelay {
            entry: entry.to_string(),
            reason: format!("delay must not exceed {} seconds", MAX_DELAY_SECS),
        });
    }
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidDelay {
        entry: entry.to_string(),
        reason: e.to_string(),
    })
}

fn parse_kind(entry: &str, code: &str, delay: Duration) -> Result<StrategyKind, ConfigError> {
    match code.parse::<u8>() {
        Ok(1) if delay.is_zero() => Ok(StrategyKind::Immediate),
        Ok(1) => Ok(StrategyKind::Delayed),
        Ok(2) => Ok(StrategyKind::ExtendedDwell),
        Ok(3) if delay.is_zero() => Err(ConfigError::InvalidDelay {
            entry: entry.to_string(),
            reason: "continuous capture needs a positive interval".into(),
        }),
        Ok(3) => Ok(StrategyKind::Continuous),
        _ => Err(ConfigError::UnknownStrategy {
            entry: entry.to_string(),
            code: code.to_string(),
        }),
    }
}
