use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use stepcam_core::{CaptureReport, CaptureRequest, CaptureSink};

/// Sink that records every request and reports one saved picture.
#[derive(Default)]
pub struct RecordingSink {
    requests: Mutex<Vec<CaptureRequest>>,
    latency: Duration,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each batch takes `latency` to finish.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<CaptureRequest> {
        self.requests.lock().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.label.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl CaptureSink for RecordingSink {
    async fn capture(&self, request: &CaptureRequest) -> CaptureReport {
        self.requests.lock().push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        CaptureReport {
            succeeded: 1,
            failed: 0,
        }
    }
}

/// Lets spawned capture tasks and queued machine events run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
