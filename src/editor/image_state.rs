//! Editable still image: an immutable baseline and the view derived from it.

use super::chroma::ChromaKeySettings;
use super::crop::{crop_image, CropError, CropRectangle};
use image::RgbaImage;

/// `current` is always `chroma.apply(original)`; nothing writes to
/// `original` after construction. Cropping builds a new `EditableImage`.
#[derive(Debug, Clone)]
pub struct EditableImage {
    original: RgbaImage,
    current: RgbaImage,
    chroma: ChromaKeySettings,
}

impl EditableImage {
    pub fn new(original: RgbaImage, chroma: ChromaKeySettings) -> Self {
        let current = chroma.apply(&original);
        Self {
            original,
            current,
            chroma,
        }
    }

    pub fn original(&self) -> &RgbaImage {
        &self.original
    }

    pub fn current(&self) -> &RgbaImage {
        &self.current
    }

    pub fn chroma(&self) -> &ChromaKeySettings {
        &self.chroma
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.original.dimensions()
    }

    /// Re-project `current` from the baseline with new settings.
    pub fn set_chroma(&mut self, chroma: ChromaKeySettings) {
        self.chroma = chroma;
        self.current = chroma.apply(&self.original);
    }

    /// A new image whose baseline is `rect` of this baseline, with the
    /// same chroma settings applied.
    pub fn cropped(&self, rect: &CropRectangle) -> Result<Self, CropError> {
        let baseline = crop_image(&self.original, rect)?;
        Ok(Self::new(baseline, self.chroma))
    }
}
