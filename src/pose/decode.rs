use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("frame payload is not a supported image: {0}")]
    Image(#[from] image::ImageError),
}

/// Turns an encoded frame payload into an RGB raster.
pub trait FrameDecoder: Send + Sync + 'static {
    fn decode(&self, payload: &str) -> Result<RgbImage, DecodeError>;
}

/// Decodes base64 JPEG/PNG payloads as sent by browser clients
/// (`canvas.toDataURL`), with or without the `data:image/...;base64,` prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64ImageDecoder;

impl FrameDecoder for Base64ImageDecoder {
    fn decode(&self, payload: &str) -> Result<RgbImage, DecodeError> {
        let encoded = strip_data_uri(payload);
        let bytes = STANDARD.decode(encoded.trim())?;
        let image = image::load_from_memory(&bytes)?;
        Ok(image.to_rgb8())
    }
}

fn strip_data_uri(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::encoded_frame;

    #[test]
    fn test_decode_png_payload() {
        let image = Base64ImageDecoder.decode(&encoded_frame()).unwrap();
        assert_eq!(image.dimensions(), (8, 6));
    }

    #[test]
    fn test_decode_strips_data_uri_prefix() {
        let payload = format!("data:image/png;base64,{}", encoded_frame());
        assert!(Base64ImageDecoder.decode(&payload).is_ok());
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = Base64ImageDecoder.decode("not base64 !!").unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn test_decode_rejects_non_image_bytes() {
        let payload = STANDARD.encode(b"definitely not a jpeg");
        let err = Base64ImageDecoder.decode(&payload).unwrap_err();
        assert!(matches!(err, DecodeError::Image(_)));
    }
}
