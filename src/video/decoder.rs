//! Decoding of encoded access units into raster images

use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

/// Failure to decode a single access unit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Decoder unavailable: {0}")]
    Init(String),

    #[error("Malformed access unit: {0}")]
    Malformed(String),

    #[error("Access unit rejected by assembler: {0}")]
    Assembly(String),

    #[error("Video datagram not received: {0}")]
    Receive(String),
}

/// Turns access units into images
///
/// `Ok(None)` means the decoder consumed the unit but has no picture yet.
pub trait VideoDecoder: Send {
    fn decode(&mut self, unit: &[u8]) -> Result<Option<RgbImage>, DecodeError>;

    /// Drop all reference state, called when the stream restarts
    fn reset(&mut self) -> Result<(), DecodeError>;
}

impl<T: VideoDecoder + ?Sized> VideoDecoder for Box<T> {
    fn decode(&mut self, unit: &[u8]) -> Result<Option<RgbImage>, DecodeError> {
        (**self).decode(unit)
    }

    fn reset(&mut self) -> Result<(), DecodeError> {
        (**self).reset()
    }
}

/// Scale an image to the configured frame size if it differs
pub fn fit_to(image: RgbImage, width: u32, height: u32) -> RgbImage {
    if image.width() == width && image.height() == height {
        image
    } else {
        imageops::resize(&image, width, height, FilterType::Triangle)
    }
}

#[cfg(feature = "h264")]
pub use self::h264::H264Decoder;

#[cfg(feature = "h264")]
mod h264 {
    use super::{DecodeError, VideoDecoder};
    use image::RgbImage;
    use openh264::decoder::Decoder;
    use openh264::formats::YUVSource;

    /// H.264 elementary stream decoder backed by openh264
    pub struct H264Decoder {
        inner: Decoder,
    }

    impl H264Decoder {
        pub fn new() -> Result<Self, DecodeError> {
            let inner = Decoder::new().map_err(|e| DecodeError::Init(e.to_string()))?;
            Ok(Self { inner })
        }
    }

    impl VideoDecoder for H264Decoder {
        fn decode(&mut self, unit: &[u8]) -> Result<Option<RgbImage>, DecodeError> {
            let yuv = match self.inner.decode(unit) {
                Ok(Some(yuv)) => yuv,
                Ok(None) => return Ok(None),
                Err(e) => return Err(DecodeError::Malformed(e.to_string())),
            };

            let (width, height) = yuv.dimensions();
            let mut rgb = vec![0u8; width * height * 3];
            yuv.write_rgb8(&mut rgb);

            RgbImage::from_raw(width as u32, height as u32, rgb)
                .map(Some)
                .ok_or_else(|| DecodeError::Malformed("picture size mismatch".into()))
        }

        fn reset(&mut self) -> Result<(), DecodeError> {
            self.inner = Decoder::new().map_err(|e| DecodeError::Init(e.to_string()))?;
            Ok(())
        }
    }
}
