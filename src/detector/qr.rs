//! QR code backend
//!
//! Decodes QR codes with rqrr on tokio's blocking pool so detection never
//! runs on the thread that completes the scheduler's dispatch.

use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use image::GrayImage;
use tracing::{debug, trace, warn};

use super::{Barcode, DetectionBackend, DetectorImage};
use crate::error::DetectionError;

/// QR code detector backed by rqrr
#[derive(Debug, Clone, Default)]
pub struct QrBackend;

impl QrBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DetectionBackend for QrBackend {
    fn detect(
        &self,
        image: DetectorImage,
    ) -> BoxFuture<'static, Result<Vec<Barcode>, DetectionError>> {
        async move {
            match tokio::task::spawn_blocking(move || detect_sync(&image)).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "QR detection task failed");
                    Err(DetectionError::Panicked)
                }
            }
        }
        .boxed()
    }
}

fn detect_sync(image: &DetectorImage) -> Result<Vec<Barcode>, DetectionError> {
    let start = Instant::now();
    let luma = image.to_upright_luma().ok_or_else(|| {
        DetectionError::Backend(format!(
            "image {} does not match its dimensions",
            image.sequence()
        ))
    })?;

    let barcodes = decode_grids(&luma);
    trace!(
        sequence = image.sequence(),
        count = barcodes.len(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "QR detection complete"
    );
    Ok(barcodes)
}

/// Find and decode every QR grid in an upright grayscale image.
pub fn decode_grids(luma: &GrayImage) -> Vec<Barcode> {
    let (width, height) = luma.dimensions();
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        width as usize,
        height as usize,
        |x, y| luma.get_pixel(x as u32, y as u32).0[0],
    );

    prepared
        .detect_grids()
        .into_iter()
        .filter_map(|grid| {
            let corners = grid.bounds.map(|p| (p.x, p.y));
            match grid.decode() {
                Ok((_meta, content)) => Some(Barcode {
                    raw_value: content,
                    corners: Some(corners),
                }),
                Err(e) => {
                    debug!(error = %e, "Failed to decode QR grid");
                    None
                }
            }
        })
        .collect()
}
