//! Capture sink for stepcam: picture batches written under
//! `<base>/<equipment>/<step label or CIP>/`.

mod grabber;
mod layout;
mod sink;

pub use grabber::{CommandGrabber, FrameGrabber};
pub use layout::CaptureLayout;
pub use sink::FileCaptureSink;
