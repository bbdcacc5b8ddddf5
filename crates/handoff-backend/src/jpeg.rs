//! JPEG encoding for outbound frames, image decoding for inbound ones

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use handoff_core::{HandoffError, HandoffResult};

/// Encode an RGB frame as JPEG at `quality` (1-100)
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> HandoffResult<Bytes> {
    // JPEG at ~80 quality is usually well under 1/10 of raw RGB
    let mut buf = Vec::with_capacity(image.as_raw().len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder
        .encode_image(image)
        .map_err(|e| HandoffError::Image(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Decode JPEG or PNG bytes into an RGB frame
pub fn decode_image(bytes: &[u8]) -> HandoffResult<RgbImage> {
    if bytes.is_empty() {
        return Err(HandoffError::Image("empty image buffer".into()));
    }
    let decoded = image::load_from_memory(bytes).map_err(|e| HandoffError::Image(e.to_string()))?;
    Ok(decoded.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 128]))
    }

    #[test]
    fn test_jpeg_keeps_dimensions() {
        let frame = gradient(64, 48);
        let jpeg = encode_jpeg(&frame, 80).unwrap();

        // SOI marker
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let back = decode_image(&jpeg).unwrap();
        assert_eq!(back.dimensions(), (64, 48));
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let frame = gradient(64, 64);
        let high = encode_jpeg(&frame, 95).unwrap();
        let low = encode_jpeg(&frame, 10).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_garbage_is_image_error() {
        assert!(matches!(decode_image(b"not an image"), Err(HandoffError::Image(_))));
        assert!(matches!(decode_image(&[]), Err(HandoffError::Image(_))));
    }
}
