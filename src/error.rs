//! Error taxonomy for the capture and detection pipeline.
//!
//! Only [`CaptureError`] ever reaches the caller. Per-frame errors
//! ([`StaleFrameError`], [`DetectionError`]) are recovered inside the scheduler.

use thiserror::Error;

/// Failure reported by the camera-device layer.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("camera access failed: {0}")]
    Access(String),
    #[error("stream configuration rejected: {0}")]
    Configuration(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Distinguished reason code for a failed session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// No rear-facing camera in the device enumeration.
    NoRearCamera,
    /// Any other device or stream configuration failure.
    Device,
}

/// Session-level error surfaced to the caller of
/// [`CaptureSession::start`](crate::capture::CaptureSession::start).
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no rear-facing camera found")]
    NoRearCamera,
    #[error("failed to enumerate cameras")]
    Enumeration(#[source] DeviceError),
    #[error("failed to open camera {id}")]
    Open {
        id: String,
        #[source]
        source: DeviceError,
    },
    #[error("camera {id} reports no {kind} sizes")]
    NoOutputSizes { id: String, kind: &'static str },
    #[error("failed to configure capture stream")]
    Configure(#[source] DeviceError),
    #[error("failed to start repeating capture")]
    StartPreview(#[source] DeviceError),
    #[error("session cannot start from state {0:?}")]
    InvalidState(crate::capture::SessionState),
}

impl CaptureError {
    pub fn reason(&self) -> FailureReason {
        match self {
            CaptureError::NoRearCamera => FailureReason::NoRearCamera,
            _ => FailureReason::Device,
        }
    }
}

/// The frame's buffer was released before it could be wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("frame {sequence} was released before use")]
pub struct StaleFrameError {
    pub sequence: u64,
}

/// A detection backend failed for one submitted image.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("detector backend failed: {0}")]
    Backend(String),
    #[error("detection task panicked")]
    Panicked,
}

/// Failure turning a raw capture buffer into a luma plane.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("buffer holds {actual} bytes, expected at least {expected}")]
    ShortBuffer { expected: usize, actual: usize },
    #[error("unsupported pixel format: {0:?}")]
    UnsupportedFormat(crate::capture::PixelFormat),
    #[error(transparent)]
    Jpeg(#[from] jpeg_decoder::Error),
}
