//! Visible-tab screenshot providers.
//!
//! This is the infrastructure layer. The background service only sees the
//! `ScreenshotProvider` trait. `XcapScreenshot` talks to the OS; the static
//! provider serves a file or an in-memory image.

use image::RgbaImage;
use std::path::Path;

/// Source of "what the user currently sees" as RGBA pixels.
pub trait ScreenshotProvider: Send + Sync {
    fn capture_visible(&self) -> Result<RgbaImage, CaptureError>;
}

/// Serves a fixed image, e.g. a screenshot already on disk.
pub struct StaticScreenshot {
    image: RgbaImage,
}

impl StaticScreenshot {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn from_file(path: &Path) -> Result<Self, CaptureError> {
        let image = image::open(path)
            .map_err(|e| CaptureError::CaptureFailed(format!("{}: {}", path.display(), e)))?;
        Ok(Self::new(image.to_rgba8()))
    }
}

impl ScreenshotProvider for StaticScreenshot {
    fn capture_visible(&self) -> Result<RgbaImage, CaptureError> {
        Ok(self.image.clone())
    }
}

/// Stand-in when no capture backend is compiled in.
pub struct UnavailableScreenshot;

impl ScreenshotProvider for UnavailableScreenshot {
    fn capture_visible(&self) -> Result<RgbaImage, CaptureError> {
        Err(CaptureError::CaptureFailed(
            "no screen capture backend; build with the `xcap` feature".to_string(),
        ))
    }
}

/// Captures the primary monitor using the `xcap` crate.
#[cfg(feature = "xcap")]
pub struct XcapScreenshot;

#[cfg(feature = "xcap")]
impl ScreenshotProvider for XcapScreenshot {
    fn capture_visible(&self) -> Result<RgbaImage, CaptureError> {
        use xcap::Monitor;

        let monitors =
            Monitor::all().map_err(|e| CaptureError::MonitorEnumeration(e.to_string()))?;

        let primary = monitors
            .into_iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .or_else(|| {
                // Fallback: if no monitor reports as primary, use the first one
                let all = Monitor::all().ok()?;
                all.into_iter().next()
            })
            .ok_or(CaptureError::NoPrimaryMonitor)?;

        primary
            .capture_image()
            .map_err(|e| CaptureError::PermissionDenied(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Failed to enumerate monitors: {0}")]
    MonitorEnumeration(String),

    #[error("No primary monitor found")]
    NoPrimaryMonitor,

    #[error("Screen capture was not permitted: {0}")]
    PermissionDenied(String),

    #[error("Screen capture failed: {0}")]
    CaptureFailed(String),

    #[error("PNG encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Malformed data URL: {0}")]
    MalformedDataUrl(String),
}
