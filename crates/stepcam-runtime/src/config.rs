use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use stepcam_capture::{CaptureLayout, CommandGrabber, FileCaptureSink};
use stepcam_core::{ConfigError, VariableId};
use stepcam_recovery::ReconnectConfig;
use stepcam_state::StrategyTable;

/// Environment variables read by [`AppConfig::apply_env`].
pub mod env_names {
    pub const CONTROLLER_URL: &str = "OPC_SERVER_URL";
    pub const STEP_VARIABLE: &str = "TAG_NAME";
    pub const PRODUCT_VARIABLE: &str = "PRODUCT_TAG_NAME";
    pub const EQUIPMENT: &str = "EQUIPMENT";
    pub const VALID_STEPS: &str = "VALID_STEPS";
    pub const NUMBER_OF_PICTURES: &str = "NUMBER_OF_PICTURES";
    pub const BASE_PATH: &str = "BASE_IMAGE_SAVE_PATH";
    pub const CAPTURE_PAUSE_MS: &str = "CAPTURE_PAUSE_MS";
    pub const CAPTURE_COMMAND: &str = "CAPTURE_COMMAND";
    pub const PROBE_INTERVAL_MS: &str = "PROBE_INTERVAL_MS";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_controller_url")]
    pub controller_url: String,

    #[serde(default = "default_step_variable")]
    pub step_variable: String,

    #[serde(default = "default_product_variable")]
    pub product_variable: String,

    #[serde(default = "default_equipment")]
    pub equipment: String,

    /// Strategy table definition, `step;delay;strategy` entries separated
    /// by commas.
    #[serde(default = "default_valid_steps")]
    pub valid_steps: String,

    #[serde(default = "default_number_of_pictures")]
    pub number_of_pictures: u32,

    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    #[serde(default = "default_capture_pause_ms")]
    pub capture_pause_ms: u64,

    #[serde(default = "default_capture_command")]
    pub capture_command: Vec<String>,

    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_controller_url() -> String {
    "tcp://10.15.160.149:49312".to_string()
}

fn default_step_variable() -> String {
    "ns=2;s=SODA_TEMPLATE.FILTRACAO.RASP_PASSO".to_string()
}

fn default_product_variable() -> String {
    "ns=2;s=BRASSAGEM.PLC1.WHIRLPOOL.SORBA.PROGNO".to_string()
}

fn default_equipment() -> String {
    "DECANTADOR".to_string()
}

fn default_valid_steps() -> String {
    "1;0;1,2;0;1,3;0;1,4;0;1,5;0;1,6;0;1,12;30;2".to_string()
}

fn default_number_of_pictures() -> u32 {
    10
}

fn default_base_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_capture_pause_ms() -> u64 {
    1000
}

fn default_capture_command() -> Vec<String> {
    ["import", "-window", "root", "png:-"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_probe_interval_ms() -> u64 {
    1000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            controller_url: default_controller_url(),
            step_variable: default_step_variable(),
            product_variable: default_product_variable(),
            equipment: default_equipment(),
            valid_steps: default_valid_steps(),
            number_of_pictures: default_number_of_pictures(),
            base_path: default_base_path(),
            capture_pause_ms: default_capture_pause_ms(),
            capture_command: default_capture_command(),
            probe_interval_ms: default_probe_interval_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the YAML file at `path` if given, then the process
    /// environment. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&content).map_err(|e| match e {
            ConfigError::File { reason, .. } => ConfigError::File {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::File {
            path: "<inline>".into(),
            reason: e.to_string(),
        })
    }

    /// Overrides fields from environment variables resolved by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(env_names::CONTROLLER_URL) {
            self.controller_url = v;
        }
        if let Some(v) = lookup(env_names::STEP_VARIABLE) {
            self.step_variable = v;
        }
        if let Some(v) = lookup(env_names::PRODUCT_VARIABLE) {
            self.product_variable = v;
        }
        if let Some(v) = lookup(env_names::EQUIPMENT) {
            self.equipment = v;
        }
        if let Some(v) = lookup(env_names::VALID_STEPS) {
            self.valid_steps = v;
        }
        if let Some(v) = lookup(env_names::NUMBER_OF_PICTURES) {
            self.number_of_pictures = parse_setting(env_names::NUMBER_OF_PICTURES, &v)?;
        }
        if let Some(v) = lookup(env_names::BASE_PATH) {
            self.base_path = PathBuf::from(v);
        }
        if let Some(v) = lookup(env_names::CAPTURE_PAUSE_MS) {
            self.capture_pause_ms = parse_setting(env_names::CAPTURE_PAUSE_MS, &v)?;
        }
        if let Some(v) = lookup(env_names::CAPTURE_COMMAND) {
            self.capture_command = v.split_whitespace().map(str::to_string).collect();
        }
        if let Some(v) = lookup(env_names::PROBE_INTERVAL_MS) {
            self.probe_interval_ms = parse_setting(env_names::PROBE_INTERVAL_MS, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.build_strategy_table()?;

        if self.number_of_pictures == 0 {
            return Err(invalid("number_of_pictures", "must be at least 1"));
        }
        if self.probe_interval_ms == 0 {
            return Err(invalid("probe_interval_ms", "must be positive"));
        }
        if self.capture_command.is_empty() {
            return Err(invalid("capture_command", "command is empty"));
        }
        if self.step_variable == self.product_variable {
            return Err(invalid(
                "product_variable",
                "must differ from the step variable",
            ));
        }
        Ok(())
    }

    pub fn build_strategy_table(&self) -> Result<StrategyTable, ConfigError> {
        StrategyTable::parse(&self.valid_steps)
    }

    /// File sink grabbing frames with `capture_command`.
    pub fn build_capture_sink(&self) -> Result<FileCaptureSink, ConfigError> {
        let grabber = CommandGrabber::from_command_line(&self.capture_command)?;
        Ok(FileCaptureSink::new(
            CaptureLayout::new(&self.base_path, &self.equipment),
            Arc::new(grabber),
            self.number_of_pictures,
            self.capture_pause(),
        ))
    }

    pub fn step_variable_id(&self) -> VariableId {
        VariableId::new(self.step_variable.clone())
    }

    pub fn product_variable_id(&self) -> VariableId {
        VariableId::new(self.product_variable.clone())
    }

    pub fn capture_pause(&self) -> Duration {
        Duration::from_millis(self.capture_pause_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

fn parse_setting<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(name, &format!("'{}' is not a valid number", value)))
}

fn invalid(name: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use stepcam_core::{StepKey, StrategyKind};
    use stepcam_recovery::BackoffType;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.equipment, "DECANTADOR");
        assert_eq!(config.number_of_pictures, 10);
        assert_eq!(config.base_path, PathBuf::from("./data"));
        assert_eq!(config.capture_pause(), Duration::from_secs(1));
        assert_eq!(config.reconnect.backoff.initial_ms, 15_000);
        assert!(config.validate().is_ok());

        let table = config.build_strategy_table().unwrap();
        assert_eq!(
            table.get(&StepKey::from_value(12.0)).unwrap().kind,
            StrategyKind::ExtendedDwell
        );
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("EQUIPMENT", "FILTER_2"),
                ("VALID_STEPS", "6;2;3"),
                ("NUMBER_OF_PICTURES", "3"),
                ("CAPTURE_COMMAND", "grim -"),
                ("BASE_IMAGE_SAVE_PATH", "/var/lib/stepcam"),
            ]))
            .unwrap();

        assert_eq!(config.equipment, "FILTER_2");
        assert_eq!(config.number_of_pictures, 3);
        assert_eq!(config.capture_command, vec!["grim", "-"]);
        assert_eq!(config.base_path, PathBuf::from("/var/lib/stepcam"));
        assert_eq!(config.build_strategy_table().unwrap().len(), 1);
    }

    #[test]
    fn test_non_numeric_picture_count() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("NUMBER_OF_PICTURES", "ten")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { .. }));
    }

    #[test]
    fn test_malformed_steps_fail_validation() {
        let config = AppConfig {
            valid_steps: "1;0".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FieldCount { .. })
        ));
    }

    #[test]
    fn test_invalid_settings() {
        let zero_pictures = AppConfig {
            number_of_pictures: 0,
            ..Default::default()
        };
        assert!(zero_pictures.validate().is_err());

        let same_variables = AppConfig {
            product_variable: default_step_variable(),
            ..Default::default()
        };
        assert!(same_variables.validate().is_err());
    }

    #[test]
    fn test_yaml_with_partial_fields() {
        let yaml = r#"
controller_url: tcp://plc.local:4840
valid_steps: "1;0;1,6;2;3"
reconnect:
  backoff:
    type: exponential
    initial_ms: 1000
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.controller_url, "tcp://plc.local:4840");
        assert_eq!(config.equipment, "DECANTADOR");
        assert_eq!(config.reconnect.backoff.backoff_type, BackoffType::Exponential);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stepcam.yaml");
        std::fs::write(&path, "equipment: CENTRIFUGE\nnumber_of_pictures: 2\n").unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.equipment, "CENTRIFUGE");
        assert_eq!(config.number_of_pictures, 2);

        let missing = AppConfig::from_file(&dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ConfigError::File { .. })));
    }

    #[test]
    fn test_capture_sink_layout() {
        let config = AppConfig {
            base_path: PathBuf::from("/srv/pictures"),
            equipment: "FILTER_2".into(),
            ..Default::default()
        };
        let sink = config.build_capture_sink().unwrap();
        assert_eq!(
            sink.layout().directory(&stepcam_core::CaptureRequest::product_change()),
            PathBuf::from("/srv/pictures/FILTER_2/CIP")
        );

        let no_command = AppConfig {
            capture_command: Vec::new(),
            ..Default::default()
        };
        assert!(no_command.build_capture_sink().is_err());
    }
}
