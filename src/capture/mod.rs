pub mod decoder;
pub mod device;
pub mod frame;
pub mod session;
pub mod v4l2;

pub use device::{
    AfMode, AfTrigger, CameraCharacteristics, CameraDevice, CameraManager, CaptureRequest,
    DisplayRotation, FixedRotation, ImageCallback, LensFacing,
};
pub use frame::{ChannelStats, Frame, FrameChannel, PixelFormat, RawImage};
pub use session::{CaptureSession, PreviewInfo, SessionConfig, SessionState};
pub use v4l2::{V4l2Camera, V4l2Manager};
