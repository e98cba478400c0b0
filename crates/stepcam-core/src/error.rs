use thiserror::Error;

/// Malformed startup configuration. Always fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Strategy entry '{entry}': expected 'step;delay;strategy', got {fields} field(s)")]
    FieldCount { entry: String, fields: usize },

    #[error("Strategy entry '{entry}': invalid {field} '{value}'")]
    InvalidNumber {
        entry: String,
        field: &'static str,
        value: String,
    },

    #[error("Strategy entry '{entry}': unknown strategy code '{code}'")]
    UnknownStrategy { entry: String, code: String },

    #[error("Strategy entry '{entry}': {reason}")]
    InvalidDelay { entry: String, reason: String },

    #[error("Duplicate strategy for step {key}")]
    DuplicateStep { key: String },

    #[error("Empty strategy entry at position {position}")]
    EmptyEntry { position: usize },

    #[error("Invalid value for {name}: {reason}")]
    InvalidSetting { name: String, reason: String },

    #[error("Failed to read config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// A single capture attempt failed. Logged by the sink, never propagated.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to prepare directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Frame grab failed: {0}")]
    Grab(String),
}

/// Loss of the controller session or a failed liveness probe.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Subscription failed: {0}")]
    Subscribe(String),

    #[error("Liveness probe failed: {0}")]
    Probe(String),

    #[error("Session closed by controller")]
    Closed,

    #[error("Invalid endpoint: {0}")]
    Endpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Link(#[from] LinkError),
}

pub type Result<T> = std::result::Result<T, Error>;
