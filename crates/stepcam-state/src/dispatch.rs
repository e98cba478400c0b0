use std::sync::Arc;

use tokio::task::JoinHandle;

use stepcam_core::{CaptureReport, CaptureRequest, CaptureSink, important};

/// Hands capture requests to the sink without blocking the caller.
///
/// Each request runs on its own task, so a long capture batch never delays
/// the next notification or a timer of the same machine.
#[derive(Clone)]
pub struct CaptureDispatcher {
    sink: Arc<dyn CaptureSink>,
}

impl CaptureDispatcher {
    pub fn new(sink: Arc<dyn CaptureSink>) -> Self {
        Self { sink }
    }

    pub fn dispatch(&self, request: CaptureRequest) -> JoinHandle<CaptureReport> {
        important!(
            "Capture requested for {} ({})",
            request.label,
            request.reason
        );
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let report = sink.capture(&request).await;
            if report.is_complete() {
                tracing::debug!(
                    "[Capture] {} finished: {} picture(s)",
                    request.label,
                    report.succeeded
                );
            } else {
                important!(
                    "Capture for {} finished with {} failure(s), {} saved",
                    request.label,
                    report.failed,
                    report.succeeded
                );
            }
            report
        })
    }
}

impl std::fmt::Debug for CaptureDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureDispatcher").finish_non_exhaustive()
    }
}
