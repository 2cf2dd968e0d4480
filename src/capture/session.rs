//! Camera lifecycle: find the rear camera, configure its streams, and push
//! every delivered image into the frame scheduler.

use std::sync::Arc;

use tracing::{debug, info, instrument, trace, warn};

use super::device::{
    choose_af_mode, CameraCharacteristics, CameraDevice, CameraManager, CaptureRequest,
    DisplayRotation, LensFacing,
};
use super::frame::{FrameChannel, RawImage};
use crate::error::CaptureError;
use crate::geometry::{compensate_rotation, reported_orientation, select_size, CaptureSize};
use crate::pipeline::FrameScheduler;
use crate::ScannerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Configuring,
    Previewing,
    Stopped,
    Error,
}

/// Session parameters supplied by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub target: CaptureSize,
    /// Capacity of the frame-delivery channel
    pub max_images: usize,
}

impl From<&ScannerConfig> for SessionConfig {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            target: CaptureSize::new(config.target_width, config.target_height),
            max_images: config.max_images,
        }
    }
}

/// What the host needs to lay out its preview
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewInfo {
    pub width: u32,
    pub height: u32,
    /// Sensor orientation as reported to the host
    pub orientation: i32,
}

pub struct CaptureSession<M: CameraManager> {
    manager: M,
    config: SessionConfig,
    scheduler: FrameScheduler,
    rotation: Arc<dyn DisplayRotation>,
    state: SessionState,
    device: Option<M::Device>,
    channel: Option<FrameChannel>,
    preview: Option<PreviewInfo>,
}

impl<M: CameraManager> CaptureSession<M> {
    pub fn new(
        manager: M,
        config: SessionConfig,
        scheduler: FrameScheduler,
        rotation: Arc<dyn DisplayRotation>,
    ) -> Self {
        Self {
            manager,
            config,
            scheduler,
            rotation,
            state: SessionState::Closed,
            device: None,
            channel: None,
            preview: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Preview geometry, once the session is previewing
    pub fn preview(&self) -> Option<PreviewInfo> {
        self.preview
    }

    /// The active frame channel, while previewing
    pub fn channel(&self) -> Option<&FrameChannel> {
        self.channel.as_ref()
    }

    /// Open the first rear-facing camera and start streaming frames.
    ///
    /// Any failure leaves the session in [`SessionState::Error`] with the
    /// device released; no frames flow.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<PreviewInfo, CaptureError> {
        if self.state != SessionState::Closed {
            return Err(CaptureError::InvalidState(self.state));
        }

        match self.try_start() {
            Ok(preview) => Ok(preview),
            Err(err) => {
                warn!(error = %err, "Capture session failed to start");
                self.release();
                self.state = SessionState::Error;
                Err(err)
            }
        }
    }

    fn try_start(&mut self) -> Result<PreviewInfo, CaptureError> {
        self.state = SessionState::Opening;
        let (id, characteristics) = self.find_rear_camera()?;
        let sensor_orientation = characteristics.sensor_orientation.unwrap_or(0);

        let device = self
            .manager
            .open(&id)
            .map_err(|source| CaptureError::Open {
                id: id.clone(),
                source,
            })?;
        let device = self.device.insert(device);
        info!(camera = %id, sensor_orientation, "Camera opened");

        self.state = SessionState::Configuring;
        let target = self.config.target;
        let preview_size = select_size(&characteristics.preview_sizes, target, sensor_orientation)
            .ok_or_else(|| CaptureError::NoOutputSizes {
                id: id.clone(),
                kind: "preview",
            })?;
        let stream_size = select_size(&characteristics.stream_sizes, target, sensor_orientation)
            .ok_or_else(|| CaptureError::NoOutputSizes {
                id: id.clone(),
                kind: "stream",
            })?;

        let af_mode = choose_af_mode(characteristics.af_modes.as_deref());
        match af_mode {
            Some(mode) => info!(?mode, "Setting af mode"),
            None => debug!("No usable autofocus mode, leaving it unset"),
        }

        let request =
            CaptureRequest::preview(preview_size, stream_size, self.config.max_images, af_mode);
        device
            .configure(&request)
            .map_err(CaptureError::Configure)?;

        let channel = FrameChannel::new(self.config.max_images);
        let on_image = {
            let channel = channel.clone();
            let scheduler = self.scheduler.clone();
            let rotation = Arc::clone(&self.rotation);
            Box::new(move |image: RawImage| {
                // Rotation is sampled per frame; the device may turn mid-session
                let compensated =
                    compensate_rotation(rotation.rotation_degrees(), sensor_orientation);
                match channel.acquire(image, compensated) {
                    Some(frame) => scheduler.submit(frame),
                    None => trace!("Frame channel unavailable, dropping image"),
                }
            })
        };
        self.channel = Some(channel);

        device
            .start_repeating(on_image)
            .map_err(CaptureError::StartPreview)?;

        let preview = PreviewInfo {
            width: preview_size.width,
            height: preview_size.height,
            orientation: reported_orientation(sensor_orientation),
        };
        self.preview = Some(preview);
        self.state = SessionState::Previewing;
        info!(%preview_size, %stream_size, "Preview started");
        Ok(preview)
    }

    /// First rear-facing camera in enumeration order.
    fn find_rear_camera(&self) -> Result<(String, CameraCharacteristics), CaptureError> {
        let ids = self
            .manager
            .camera_ids()
            .map_err(CaptureError::Enumeration)?;

        for id in ids {
            let characteristics = self
                .manager
                .characteristics(&id)
                .map_err(CaptureError::Enumeration)?;
            if characteristics.facing == Some(LensFacing::Back) {
                return Ok((id, characteristics));
            }
        }
        Err(CaptureError::NoRearCamera)
    }

    /// Release the device and the frame channel. Safe to call in any state,
    /// any number of times.
    #[instrument(skip(self))]
    pub fn stop(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        self.release();
        self.state = SessionState::Stopped;
        info!("Capture session stopped");
    }

    fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.close();
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.preview = None;
    }
}

impl<M: CameraManager> Drop for CaptureSession<M> {
    fn drop(&mut self) {
        self.stop();
    }
}
