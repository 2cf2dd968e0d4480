//! Frame → detector image conversion.
//!
//! Direct images share the frame's luma buffer. Inverted images are a
//! standalone bitmap: rotated upright, center-cropped, grayscale with every
//! color channel inverted, so the frame can be released as soon as the
//! conversion returns.

use image::{imageops, DynamicImage, GrayImage, Pixel, RgbaImage};

use crate::capture::Frame;
use crate::detector::DetectorImage;
use crate::error::StaleFrameError;
use crate::geometry::Rotation;

/// Edge length of the square cut from the center of an inverted image.
pub const SQUARE_SIZE: u32 = 200;

/// Wrap the frame's buffer and rotation for direct submission.
pub fn to_direct(frame: &Frame) -> Result<DetectorImage, StaleFrameError> {
    let luma = frame.luma()?.clone();
    Ok(DetectorImage::Direct {
        sequence: frame.sequence(),
        luma,
        width: frame.width(),
        height: frame.height(),
        rotation: frame.rotation(),
    })
}

/// Build the cropped, color-inverted representation of a frame.
///
/// The crop is clamped to the rotated image when it is smaller than
/// [`SQUARE_SIZE`].
pub fn to_inverted(frame: &Frame) -> Result<DetectorImage, StaleFrameError> {
    let luma = frame.luma()?;
    let len = frame.width() as usize * frame.height() as usize;
    let plane = luma.get(..len).map(<[u8]>::to_vec).unwrap_or_else(|| {
        // Short buffers are padded black rather than rejected
        let mut plane = luma.to_vec();
        plane.resize(len, 0);
        plane
    });

    let image = GrayImage::from_raw(frame.width(), frame.height(), plane)
        .unwrap_or_else(|| GrayImage::new(frame.width(), frame.height()));
    let upright = rotate(image, frame.rotation());

    let cropped = center_crop(&upright, SQUARE_SIZE);
    let mut bitmap = DynamicImage::ImageLuma8(cropped).to_rgba8();
    invert(&mut bitmap);

    Ok(DetectorImage::Bitmap {
        sequence: frame.sequence(),
        image: bitmap,
    })
}

/// Rotate clockwise by `rotation`.
pub fn rotate(image: GrayImage, rotation: Rotation) -> GrayImage {
    match rotation {
        Rotation::Deg0 => image,
        Rotation::Deg90 => imageops::rotate90(&image),
        Rotation::Deg180 => imageops::rotate180(&image),
        Rotation::Deg270 => imageops::rotate270(&image),
    }
}

fn center_crop(image: &GrayImage, size: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    let crop_w = size.min(width);
    let crop_h = size.min(height);
    let x = width / 2 - crop_w / 2;
    let y = height / 2 - crop_h / 2;
    imageops::crop_imm(image, x, y, crop_w, crop_h).to_image()
}

/// `v -> 255 - v` on every color channel, alpha untouched.
fn invert(bitmap: &mut RgbaImage) {
    for pixel in bitmap.pixels_mut() {
        pixel.apply_without_alpha(|v| 255 - v);
    }
}
