use jpeg_decoder::{Decoder, PixelFormat as JpegFormat};

use super::frame::PixelFormat;
use crate::error::DecodeError;

/// Reduce a raw capture buffer to a packed `width * height` luma plane.
pub fn decode_luma(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, DecodeError> {
    let pixels = width as usize * height as usize;
    match format {
        PixelFormat::Grey => {
            check_len(data, pixels)?;
            Ok(data[..pixels].to_vec())
        }
        PixelFormat::Yuyv4 => {
            // Y0 U Y1 V: luma sits on every even byte
            check_len(data, pixels * 2)?;
            Ok(data[..pixels * 2].iter().step_by(2).copied().collect())
        }
        PixelFormat::Mjpeg => {
            let mut decoder = Decoder::new(data);
            let decoded = decoder.decode()?;
            let info = decoder
                .info()
                .ok_or(DecodeError::UnsupportedFormat(PixelFormat::Mjpeg))?;
            match info.pixel_format {
                JpegFormat::L8 => Ok(decoded),
                JpegFormat::RGB24 => Ok(decoded.chunks_exact(3).map(rgb_to_luma).collect()),
                _ => Err(DecodeError::UnsupportedFormat(PixelFormat::Mjpeg)),
            }
        }
    }
}

fn check_len(data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::ShortBuffer {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// BT.601 luma
fn rgb_to_luma(px: &[u8]) -> u8 {
    let y = 299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32;
    (y / 1000) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_keeps_even_bytes() {
        let data = [10, 128, 20, 128, 30, 128, 40, 128];
        let luma = decode_luma(&data, PixelFormat::Yuyv4, 2, 2).unwrap();
        assert_eq!(luma, vec![10, 20, 30, 40]);
    }

    #[test]
    fn grey_trims_padding() {
        let data = [1, 2, 3, 4, 0, 0];
        let luma = decode_luma(&data, PixelFormat::Grey, 2, 2).unwrap();
        assert_eq!(luma, vec![1, 2, 3, 4]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let err = decode_luma(&[0; 3], PixelFormat::Yuyv4, 2, 2).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::ShortBuffer {
                expected: 8,
                actual: 3
            }
        ));
    }

    #[test]
    fn luma_weights() {
        assert_eq!(rgb_to_luma(&[255, 255, 255]), 255);
        assert_eq!(rgb_to_luma(&[0, 0, 0]), 0);
    }
}
