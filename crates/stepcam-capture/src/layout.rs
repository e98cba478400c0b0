use chrono::{DateTime, TimeZone};
use std::path::PathBuf;

use stepcam_core::{CaptureReason, CaptureRequest};

/// Directory used for product-change batches instead of a step label.
pub const PRODUCT_DIRECTORY: &str = "CIP";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureLayout {
    base: PathBuf,
    equipment: String,
}

impl CaptureLayout {
    pub fn new(base: impl Into<PathBuf>, equipment: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            equipment: equipment.into(),
        }
    }

    pub fn directory(&self, request: &CaptureRequest) -> PathBuf {
        let suffix = match request.reason {
            CaptureReason::ProductChange => PRODUCT_DIRECTORY,
            CaptureReason::Step | CaptureReason::ExitExtendedDwell => request.label.as_str(),
        };
        self.base.join(&self.equipment).join(suffix)
    }

    pub fn file_name<Tz>(&self, taken_at: &DateTime<Tz>, index: u32) -> String
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        format!("{}_{}.png", taken_at.format("%d.%m.%Y_%H.%M.%S"), index)
    }
}
