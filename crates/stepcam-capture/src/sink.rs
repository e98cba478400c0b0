use async_trait::async_trait;
use chrono::Local;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stepcam_core::{CaptureError, CaptureReport, CaptureRequest, CaptureSink, important};

use crate::grabber::FrameGrabber;
use crate::layout::CaptureLayout;

/// Writes `pictures` frames per request, `pause` apart, as
/// `<dd.mm.YYYY_HH.MM.SS>_<index>.png` files.
pub struct FileCaptureSink {
    layout: CaptureLayout,
    grabber: Arc<dyn FrameGrabber>,
    pictures: u32,
    pause: Duration,
}

impl FileCaptureSink {
    pub fn new(
        layout: CaptureLayout,
        grabber: Arc<dyn FrameGrabber>,
        pictures: u32,
        pause: Duration,
    ) -> Self {
        Self {
            layout,
            grabber,
            pictures,
            pause,
        }
    }

    pub fn layout(&self) -> &CaptureLayout {
        &self.layout
    }

    async fn capture_one(&self, path: &Path) -> Result<(), CaptureError> {
        let frame = self.grabber.grab().await?;
        tokio::fs::write(path, frame)
            .await
            .map_err(|source| CaptureError::Write {
                path: path.display().to_string(),
                source,
            })
    }
}

#[async_trait]
impl CaptureSink for FileCaptureSink {
    async fn capture(&self, request: &CaptureRequest) -> CaptureReport {
        let directory = self.layout.directory(request);
        let mut report = CaptureReport::default();

        if let Err(source) = tokio::fs::create_dir_all(&directory).await {
            let error = CaptureError::Directory {
                path: directory.display().to_string(),
                source,
            };
            important!("Failed to save screenshot: {}", error);
            report.failed = self.pictures;
            return report;
        }

        for index in 0..self.pictures {
            if index > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            let path = directory.join(self.layout.file_name(&Local::now(), index));
            match self.capture_one(&path).await {
                Ok(()) => {
                    report.succeeded += 1;
                    important!("Screenshot successfully saved: {}", path.display());
                }
                Err(error) => {
                    report.failed += 1;
                    important!("Failed to save screenshot: {}", error);
                }
            }
        }

        report
    }
}
