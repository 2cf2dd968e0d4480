//! V4L2 camera manager
//!
//! V4L2 has no notion of lens facing or sensor mounting, so both come from
//! [`CaptureConfig`]. Frames are streamed through mmap buffers on a dedicated
//! thread and reduced to luma before delivery.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Value};
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::decoder::decode_luma;
use super::device::{
    AfMode, CameraCharacteristics, CameraDevice, CameraManager, CaptureRequest, ImageCallback,
};
use super::frame::{PixelFormat, RawImage};
use crate::error::DeviceError;
use crate::geometry::CaptureSize;
use crate::CaptureConfig;

/// `V4L2_CID_FOCUS_AUTO`: continuous autofocus on/off
const CID_FOCUS_AUTO: u32 = 0x009a_090c;

const MAX_DEVICES: usize = 10;

fn fourcc(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Grey => FourCC::new(b"GREY"),
        PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
        PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
    }
}

/// Enumerates `/dev/video*` capture devices
pub struct V4l2Manager {
    config: CaptureConfig,
}

impl V4l2Manager {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl CameraManager for V4l2Manager {
    type Device = V4l2Camera;

    fn camera_ids(&self) -> Result<Vec<String>, DeviceError> {
        if let Some(path) = &self.config.device {
            return Ok(vec![path.clone()]);
        }

        info!("Auto-detecting capture devices...");
        let mut ids = Vec::new();
        for i in 0..MAX_DEVICES {
            let path = format!("/dev/video{}", i);
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            match dev.query_caps() {
                Ok(caps) if caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) => {
                    info!("Found capture device: {} - {}", path, caps.card);
                    ids.push(path);
                }
                Ok(_) => debug!("Skipping {}: no video capture", path),
                Err(e) => debug!("Skipping {}: {}", path, e),
            }
        }
        Ok(ids)
    }

    fn characteristics(&self, id: &str) -> Result<CameraCharacteristics, DeviceError> {
        let device = Device::with_path(id)?;
        let sizes: Vec<CaptureSize> = device
            .enum_framesizes(fourcc(self.config.format))?
            .into_iter()
            .map(|fs| match fs.size {
                FrameSizeEnum::Discrete(d) => CaptureSize::new(d.width, d.height),
                FrameSizeEnum::Stepwise(s) => CaptureSize::new(s.max_width, s.max_height),
            })
            .collect();
        let sizes = largest_first(sizes);

        let af_modes = device
            .query_controls()
            .ok()
            .filter(|controls| controls.iter().any(|c| c.id == CID_FOCUS_AUTO))
            .map(|_| vec![AfMode::ContinuousVideo]);

        Ok(CameraCharacteristics {
            facing: Some(self.config.facing),
            sensor_orientation: Some(self.config.sensor_orientation),
            preview_sizes: sizes.clone(),
            stream_sizes: sizes,
            af_modes,
        })
    }

    fn open(&self, id: &str) -> Result<V4l2Camera, DeviceError> {
        let device = Device::with_path(id)?;
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(DeviceError::Access(format!(
                "{id} doesn't support video capture"
            )));
        }

        Ok(V4l2Camera {
            device: Arc::new(device),
            format: self.config.format,
            buffer_count: self.config.buffer_count,
            size: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }
}

/// An opened V4L2 device
pub struct V4l2Camera {
    device: Arc<Device>,
    format: PixelFormat,
    buffer_count: u32,
    /// Negotiated stream size
    size: Option<CaptureSize>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CameraDevice for V4l2Camera {
    fn configure(&mut self, request: &CaptureRequest) -> Result<(), DeviceError> {
        let mut fmt = self.device.format()?;
        fmt.width = request.stream_size.width;
        fmt.height = request.stream_size.height;
        fmt.fourcc = fourcc(self.format);

        let actual = self.device.set_format(&fmt)?;
        if actual.fourcc != fmt.fourcc {
            return Err(DeviceError::Configuration(format!(
                "driver picked {} instead of {}",
                actual.fourcc, fmt.fourcc
            )));
        }
        self.size = Some(CaptureSize::new(actual.width, actual.height));

        if request.af_mode == Some(AfMode::ContinuousVideo) {
            let control = Control {
                id: CID_FOCUS_AUTO,
                value: Value::Boolean(true),
            };
            if let Err(e) = self.device.set_control(control) {
                warn!("Failed to enable continuous autofocus: {}", e);
            }
        }
        Ok(())
    }

    fn start_repeating(&mut self, mut on_image: ImageCallback) -> Result<(), DeviceError> {
        let size = self
            .size
            .ok_or_else(|| DeviceError::Configuration("stream not configured".into()))?;
        let device = Arc::clone(&self.device);
        let running = Arc::clone(&self.running);
        let format = self.format;
        let buffer_count = self.buffer_count;
        let (ready_tx, ready_rx) = flume::bounded(1);

        running.store(true, Ordering::Release);
        let worker = thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || {
                let mut stream =
                    match MmapStream::with_buffers(&device, Type::VideoCapture, buffer_count) {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                info!("Capture stream started with {} buffers", buffer_count);

                while running.load(Ordering::Acquire) {
                    let (buf, meta) = match stream.next() {
                        Ok(next) => next,
                        Err(e) => {
                            error!("Capture error: {}", e);
                            thread::sleep(Duration::from_millis(10));
                            continue;
                        }
                    };
                    let used = match meta.bytesused as usize {
                        0 => buf.len(),
                        n => n.min(buf.len()),
                    };
                    match decode_luma(&buf[..used], format, size.width, size.height) {
                        Ok(luma) => on_image(RawImage::new(luma, size.width, size.height)),
                        Err(e) => debug!("Dropping undecodable frame: {}", e),
                    }
                }
                info!("Capture stream stopped");
            })?;

        self.worker = Some(worker);
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.close();
                Err(e.into())
            }
            Err(_) => {
                self.close();
                Err(DeviceError::Access("capture thread exited".into()))
            }
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Capture thread panicked");
            }
        }
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drivers list sizes in arbitrary order; selection expects a sorted list.
///
/// Largest first, so that a leading pair of equal area (640x480 next to
/// 480x640) still reads as descending.
fn largest_first(mut sizes: Vec<CaptureSize>) -> Vec<CaptureSize> {
    sizes.sort_by_key(|s| std::cmp::Reverse((s.area(), s.width)));
    sizes.dedup();
    sizes
}
