//! Bounding images before they are sent to the extraction service.

use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use receipt_core::ResizeSettings;
use tracing::debug;

use crate::error::NormalizeError;

/// An image ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

/// Turns an image file into bytes the extraction service accepts.
pub trait ImageNormalizer: Send + Sync {
    fn normalize(&self, path: &Path) -> Result<NormalizedImage, NormalizeError>;
}

/// Downscales to fit `max_width` x `max_height` (aspect ratio kept, never
/// upscaled) and re-encodes as JPEG at the configured quality.
pub struct ResizingNormalizer {
    settings: ResizeSettings,
}

impl ResizingNormalizer {
    pub fn new(settings: ResizeSettings) -> Self {
        Self { settings }
    }
}

impl ImageNormalizer for ResizingNormalizer {
    fn normalize(&self, path: &Path) -> Result<NormalizedImage, NormalizeError> {
        let mut img = image::open(path).map_err(|source| NormalizeError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        let (width, height) = (img.width(), img.height());

        let s = &self.settings;
        if s.enabled && (width > s.max_width || height > s.max_height) {
            img = img.resize(s.max_width, s.max_height, FilterType::Lanczos3);
            debug!(
                path = %path.display(),
                from = ?(width, height),
                to = ?(img.width(), img.height()),
                "resized image"
            );
        }

        let rgb = img.to_rgb8();
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, s.quality.clamp(1, 100)).encode_image(&rgb)?;

        Ok(NormalizedImage {
            bytes,
            mime_type: "image/jpeg".to_string(),
            width: rgb.width(),
            height: rgb.height(),
        })
    }
}
