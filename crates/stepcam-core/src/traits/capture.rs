use async_trait::async_trait;

use crate::types::CaptureRequest;

/// Outcome of one capture batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub succeeded: u32,
    pub failed: u32,
}

impl CaptureReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Performs a batch of still captures for one triggering event.
///
/// Implementations must not fail past this boundary: a failed picture is
/// logged and counted, and the rest of the batch still runs.
#[async_trait]
pub trait CaptureSink: Send + Sync {
    async fn capture(&self, request: &CaptureRequest) -> CaptureReport;
}
