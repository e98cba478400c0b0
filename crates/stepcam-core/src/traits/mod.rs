//! Seams between the capture core and its collaborators

pub mod capture;
pub mod session;

pub use capture::{CaptureReport, CaptureSink};
pub use session::{ControllerConnector, ControllerSession};
