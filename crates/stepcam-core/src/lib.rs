//! Core types and traits for the stepcam capture service

pub mod error;
pub mod log;
pub mod traits;
pub mod types;

pub use error::{CaptureError, ConfigError, Error, LinkError, Result};
pub use log::IMPORTANT_TARGET;
pub use traits::capture::{CaptureReport, CaptureSink};
pub use traits::session::{ControllerConnector, ControllerSession};
pub use types::{
    CaptureReason, CaptureRequest, Notification, StepKey, StrategyKind, VariableId, quantize,
};

#[doc(hidden)]
pub use tracing as __tracing;
