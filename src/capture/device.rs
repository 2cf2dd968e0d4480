//! Seam between the capture session and a physical camera stack.

use serde::{Deserialize, Serialize};

use super::frame::RawImage;
use crate::error::DeviceError;
use crate::geometry::CaptureSize;

/// Which way a lens points relative to the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LensFacing {
    Front,
    Back,
    External,
}

/// Autofocus modes a camera may advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AfMode {
    Off,
    /// Single-trigger autofocus
    Auto,
    Macro,
    ContinuousVideo,
    ContinuousPicture,
    Edof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfTrigger {
    Start,
    Cancel,
}

/// Static description of one camera
#[derive(Debug, Clone)]
pub struct CameraCharacteristics {
    pub facing: Option<LensFacing>,
    /// Clockwise mounting angle of the sensor; missing means 0
    pub sensor_orientation: Option<i32>,
    /// Sizes usable for the host preview surface
    pub preview_sizes: Vec<CaptureSize>,
    /// Sizes usable for the frame stream fed to detection
    pub stream_sizes: Vec<CaptureSize>,
    /// `None` when the camera does not report autofocus at all
    pub af_modes: Option<Vec<AfMode>>,
}

/// Pick the best autofocus mode for scanning.
///
/// Continuous video beats continuous picture beats single trigger; anything
/// else leaves autofocus unset.
pub fn choose_af_mode(available: Option<&[AfMode]>) -> Option<AfMode> {
    let available = available?;
    [AfMode::ContinuousVideo, AfMode::ContinuousPicture, AfMode::Auto]
        .into_iter()
        .find(|mode| available.contains(mode))
}

/// Repeating preview request sent to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub preview_size: CaptureSize,
    pub stream_size: CaptureSize,
    /// Frames the device may have outstanding in the frame channel
    pub max_images: usize,
    pub af_mode: Option<AfMode>,
    pub af_trigger: Option<AfTrigger>,
}

impl CaptureRequest {
    pub fn preview(
        preview_size: CaptureSize,
        stream_size: CaptureSize,
        max_images: usize,
        af_mode: Option<AfMode>,
    ) -> Self {
        let af_trigger = af_mode.map(|mode| match mode {
            AfMode::Auto => AfTrigger::Start,
            _ => AfTrigger::Cancel,
        });
        Self {
            preview_size,
            stream_size,
            max_images,
            af_mode,
            af_trigger,
        }
    }
}

/// Callback invoked by the device for every delivered image.
pub type ImageCallback = Box<dyn FnMut(RawImage) + Send + 'static>;

/// Enumerates and opens cameras.
pub trait CameraManager {
    type Device: CameraDevice;

    /// Camera ids in device-reported order.
    fn camera_ids(&self) -> Result<Vec<String>, DeviceError>;

    fn characteristics(&self, id: &str) -> Result<CameraCharacteristics, DeviceError>;

    /// Request exclusive access to a camera.
    fn open(&self, id: &str) -> Result<Self::Device, DeviceError>;
}

/// An opened camera.
pub trait CameraDevice: Send {
    /// Configure streams for `request`.
    fn configure(&mut self, request: &CaptureRequest) -> Result<(), DeviceError>;

    /// Begin the repeating request, delivering images to `on_image` from any thread.
    fn start_repeating(&mut self, on_image: ImageCallback) -> Result<(), DeviceError>;

    /// Stop streaming and release the device. Must tolerate repeated calls.
    fn close(&mut self);
}

/// Source of the current display rotation in degrees (0, 90, 180, 270).
pub trait DisplayRotation: Send + Sync {
    fn rotation_degrees(&self) -> i32;
}

impl<F> DisplayRotation for F
where
    F: Fn() -> i32 + Send + Sync,
{
    fn rotation_degrees(&self) -> i32 {
        self()
    }
}

/// A display that never rotates
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedRotation(pub i32);

impl DisplayRotation for FixedRotation {
    fn rotation_degrees(&self) -> i32 {
        self.0
    }
}
