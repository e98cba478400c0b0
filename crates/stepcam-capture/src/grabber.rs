use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use stepcam_core::{CaptureError, ConfigError};

/// Source of still frames, encoded as PNG.
#[async_trait]
pub trait FrameGrabber: Send + Sync {
    async fn grab(&self) -> Result<Vec<u8>, CaptureError>;
}

/// Grabs a frame by running an external screenshot tool that writes a PNG to
/// stdout, e.g. `import -window root png:-` or `grim -`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandGrabber {
    program: String,
    args: Vec<String>,
}

impl CommandGrabber {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_command_line(command: &[String]) -> Result<Self, ConfigError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ConfigError::InvalidSetting {
                name: "capture_command".into(),
                reason: "command is empty".into(),
            })?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }
}

#[async_trait]
impl FrameGrabber for CommandGrabber {
    async fn grab(&self) -> Result<Vec<u8>, CaptureError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CaptureError::Grab(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Grab(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(CaptureError::Grab(format!(
                "{} produced no image data",
                self.program
            )));
        }

        debug!("[Grabber] {} produced {} bytes", self.program, output.stdout.len());
        Ok(output.stdout)
    }
}
