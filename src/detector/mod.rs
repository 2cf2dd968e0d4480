//! Detection backend seam: what the scheduler submits and what comes back.

pub mod qr;

use bytes::Bytes;
use futures::future::BoxFuture;
use image::{imageops, GrayImage, RgbaImage};

use crate::error::DetectionError;
use crate::geometry::Rotation;
use crate::pipeline::transform::rotate;

pub use qr::QrBackend;

/// Image submitted to a [`DetectionBackend`]
#[derive(Debug, Clone)]
pub enum DetectorImage {
    /// Luma plane shared with the captured frame, plus the rotation to apply
    Direct {
        sequence: u64,
        luma: Bytes,
        width: u32,
        height: u32,
        rotation: Rotation,
    },
    /// Standalone upright bitmap owning its pixels
    Bitmap { sequence: u64, image: RgbaImage },
}

impl DetectorImage {
    /// Sequence number of the frame this image came from
    pub fn sequence(&self) -> u64 {
        match self {
            DetectorImage::Direct { sequence, .. } | DetectorImage::Bitmap { sequence, .. } => {
                *sequence
            }
        }
    }

    pub fn is_bitmap(&self) -> bool {
        matches!(self, DetectorImage::Bitmap { .. })
    }

    /// Upright grayscale view for backends that want plain pixels.
    ///
    /// `None` when a direct image's buffer does not match its dimensions.
    pub fn to_upright_luma(&self) -> Option<GrayImage> {
        match self {
            DetectorImage::Direct {
                luma,
                width,
                height,
                rotation,
                ..
            } => {
                let len = *width as usize * *height as usize;
                let plane = luma.get(..len)?.to_vec();
                let image = GrayImage::from_raw(*width, *height, plane)?;
                Some(rotate(image, *rotation))
            }
            DetectorImage::Bitmap { image, .. } => Some(imageops::grayscale(image)),
        }
    }
}

/// One decoded barcode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barcode {
    pub raw_value: String,
    /// Corner points in upright image coordinates, when the backend reports them
    pub corners: Option<[(i32, i32); 4]>,
}

impl Barcode {
    pub fn new(raw_value: impl Into<String>) -> Self {
        Self {
            raw_value: raw_value.into(),
            corners: None,
        }
    }
}

/// An asynchronous barcode detector.
///
/// `detect` must not block: heavy work belongs inside the returned future
/// (or on a blocking pool the future awaits).
pub trait DetectionBackend: Send + Sync + 'static {
    fn detect(&self, image: DetectorImage) -> BoxFuture<'static, Result<Vec<Barcode>, DetectionError>>;
}

/// Receives every decoded value, in backend order.
pub trait ResultSink: Send + Sync + 'static {
    fn on_barcode_value(&self, raw_value: &str);
}

impl<F> ResultSink for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn on_barcode_value(&self, raw_value: &str) {
        self(raw_value)
    }
}

/// Forwards values into a flume channel
#[derive(Clone)]
pub struct ChannelSink(pub flume::Sender<String>);

impl ResultSink for ChannelSink {
    fn on_barcode_value(&self, raw_value: &str) {
        if self.0.send(raw_value.to_owned()).is_err() {
            tracing::debug!("Result receiver dropped, discarding barcode value");
        }
    }
}
