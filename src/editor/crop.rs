//! Pure crop logic, functional core.
//!
//! Maps on-screen selections to source pixels and cuts sub-images.
//! This module has zero infrastructure dependencies.

use crate::capture::ViewportRect;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Editor selections at or below this size (display pixels, either axis)
/// are rejected as too small.
pub const MIN_CROP_DISPLAY_PX: f64 = 20.0;

/// A rectangle on screen, in display (CSS) pixels.
pub type DisplayRect = ViewportRect;

/// A rectangle in source-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRectangle {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRectangle {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Reject editor selections that are too small to be intentional.
pub fn check_selection_size(selection: &DisplayRect) -> Result<(), CropError> {
    if selection.width <= MIN_CROP_DISPLAY_PX || selection.height <= MIN_CROP_DISPLAY_PX {
        return Err(CropError::TooSmall {
            width: selection.width,
            height: selection.height,
        });
    }
    Ok(())
}

/// Map a display-space selection to source pixels.
///
/// `displayed` is the on-screen size of the element showing the source and
/// `intrinsic` its real pixel size; each axis scales by intrinsic/displayed.
/// The result is clamped to the intrinsic bounds.
pub fn map_to_source(
    selection: &DisplayRect,
    displayed: (f64, f64),
    intrinsic: (u32, u32),
) -> Result<CropRectangle, CropError> {
    let (shown_w, shown_h) = displayed;
    if !(shown_w > 0.0 && shown_h > 0.0) {
        return Err(CropError::InvalidDisplaySize {
            width: shown_w,
            height: shown_h,
        });
    }

    let scale_x = intrinsic.0 as f64 / shown_w;
    let scale_y = intrinsic.1 as f64 / shown_h;

    let to_source = |v: f64, scale: f64, limit: u32| -> u32 {
        (v * scale).round().clamp(0.0, limit as f64) as u32
    };

    let x0 = to_source(selection.left, scale_x, intrinsic.0);
    let y0 = to_source(selection.top, scale_y, intrinsic.1);
    let x1 = to_source(selection.left + selection.width, scale_x, intrinsic.0);
    let y1 = to_source(selection.top + selection.height, scale_y, intrinsic.1);

    if x1 <= x0 || y1 <= y0 {
        return Err(CropError::ZeroDimension);
    }

    Ok(CropRectangle {
        x: x0,
        y: y0,
        width: x1 - x0,
        height: y1 - y0,
    })
}

/// Cut `rect` out of `image`.
pub fn crop_image(image: &RgbaImage, rect: &CropRectangle) -> Result<RgbaImage, CropError> {
    if rect.width == 0 || rect.height == 0 {
        return Err(CropError::ZeroDimension);
    }

    let (img_width, img_height) = image.dimensions();

    if rect.x + rect.width > img_width || rect.y + rect.height > img_height {
        return Err(CropError::OutOfBounds {
            requested: (rect.x, rect.y, rect.width, rect.height),
            image_size: (img_width, img_height),
        });
    }

    Ok(image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image())
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CropError {
    #[error("Selection is too small ({width:.0}x{height:.0}); drag a larger area")]
    TooSmall { width: f64, height: f64 },

    #[error("Crop rectangle has zero width or height")]
    ZeroDimension,

    #[error("Displayed size {width}x{height} is not usable for mapping")]
    InvalidDisplaySize { width: f64, height: f64 },

    #[error(
        "Crop rectangle ({},{},{},{}) exceeds image bounds ({}x{})",
        requested.0, requested.1, requested.2, requested.3,
        image_size.0, image_size.1
    )]
    OutOfBounds {
        requested: (u32, u32, u32, u32),
        image_size: (u32, u32),
    },
}
