//! Capture domain: public API.
//!
//! This module owns everything that happens on the page before the editor
//! opens: region selection, the tab screenshot, screen recording, and the
//! agent task that ties them together.

pub mod agent;
mod recorder;
mod region;
mod screenshot;

pub use recorder::{
    ChannelDisplayMedia, DisplayMediaProvider, MediaStream, RecorderError, RecordingControl,
    ScreenRecorder, StopHandle,
};
pub use region::{PointerEvent, RegionSelector, SelectionOutcome, ViewportRect, MIN_DRAG_PX};
pub use screenshot::{CaptureError, ScreenshotProvider, StaticScreenshot, UnavailableScreenshot};

#[cfg(feature = "xcap")]
pub use screenshot::XcapScreenshot;

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Which kind of capture the popup asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Image,
    Video,
}

/// What the capture agent hands to the editor. Consumed once.
#[derive(Debug, Clone, PartialEq)]
pub enum CapturedPayload {
    /// PNG bytes of the full visible tab.
    Image {
        bytes: Vec<u8>,
        width: u32,
        height: u32,
    },
    /// Concatenated recorder chunks.
    Video {
        bytes: Vec<u8>,
        duration_seconds: f64,
        width: u32,
        height: u32,
    },
}

impl CapturedPayload {
    pub fn mode(&self) -> CaptureMode {
        match self {
            CapturedPayload::Image { .. } => CaptureMode::Image,
            CapturedPayload::Video { .. } => CaptureMode::Video,
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            CapturedPayload::Image { bytes, .. } | CapturedPayload::Video { bytes, .. } => {
                bytes.len()
            }
        }
    }
}

/// Encodes an image as PNG bytes.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CaptureError> {
    let mut png_bytes: Vec<u8> = Vec::new();
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .map_err(|e| CaptureError::EncodingFailed(e.to_string()))?;
    Ok(png_bytes)
}

/// Wraps PNG bytes in a `data:image/png;base64,` URL, the form the
/// background hands screenshots across the context boundary in.
pub fn png_data_url(png_bytes: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png_bytes))
}

/// Extracts the raw bytes from a base64 data URL.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>, CaptureError> {
    let (header, payload) = data_url
        .split_once(',')
        .ok_or_else(|| CaptureError::MalformedDataUrl("missing ',' separator".to_string()))?;

    if !header.starts_with("data:") || !header.ends_with(";base64") {
        return Err(CaptureError::MalformedDataUrl(format!(
            "unsupported header '{}'",
            header
        )));
    }

    STANDARD
        .decode(payload)
        .map_err(|e| CaptureError::MalformedDataUrl(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_carries_png_bytes() {
        let png = encode_png(&RgbaImage::new(4, 4)).unwrap();
        let url = png_data_url(&png);
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(decode_data_url(&url).unwrap(), png);
    }

    #[test]
    fn rejects_non_base64_data_url() {
        let result = decode_data_url("data:text/plain,hello");
        assert!(matches!(result, Err(CaptureError::MalformedDataUrl(_))));
    }

    #[test]
    fn payload_reports_mode() {
        let payload = CapturedPayload::Video {
            bytes: vec![1, 2, 3],
            duration_seconds: 1.5,
            width: 10,
            height: 10,
        };
        assert_eq!(payload.mode(), CaptureMode::Video);
        assert_eq!(payload.byte_len(), 3);
    }
}
