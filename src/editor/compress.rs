//! Size-constrained re-encoding.
//!
//! Two deterministic, bounded ladders:
//! - still images: PNG, then JPEG at falling quality, then JPEG at falling
//!   scale; the smallest result wins if nothing fits.
//! - GIFs: the generated GIF if it fits, otherwise re-extraction at lower
//!   frame rates and then narrower widths; failure if nothing fits.

use super::chroma::ChromaKeySettings;
use super::crop::CropRectangle;
use super::gif::{generate_gif, GeneratedGif, GifError, GifExportSettings, GifFrameEncoder};
use super::video::VideoSource;
use crate::status::StatusReporter;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};
use serde::Serialize;
use std::io::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodedFormat {
    Png,
    Jpeg,
    Gif,
}

impl EncodedFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            EncodedFormat::Png => "png",
            EncodedFormat::Jpeg => "jpg",
            EncodedFormat::Gif => "gif",
        }
    }
}

/// Which rung produced a compressed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderStep {
    Lossless,
    Lossy { quality: u8 },
    Downscaled { scale_percent: u8, quality: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub format: EncodedFormat,
    pub step: LadderStep,
    pub width: u32,
    pub height: u32,
    /// False only when every rung overshot and this is the smallest attempt.
    pub within_budget: bool,
}

/// Still-image fallback ladder. Percentages are integers so the rung
/// sequence is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLadder {
    pub max_bytes: usize,
    pub start_quality: u8,
    pub quality_step: u8,
    /// Exclusive lower bound for lossy quality.
    pub quality_floor: u8,
    pub start_scale: u8,
    pub scale_step: u8,
    /// Exclusive lower bound for the downscale percentage.
    pub scale_floor: u8,
    pub downscale_quality: u8,
}

impl CompressionLadder {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            start_quality: 90,
            quality_step: 10,
            quality_floor: 0,
            start_scale: 90,
            scale_step: 10,
            scale_floor: 20,
            downscale_quality: 80,
        }
    }

    /// JPEG qualities tried in stage 2.
    pub fn quality_steps(&self) -> Vec<u8> {
        descending(self.start_quality, self.quality_step, self.quality_floor)
    }

    /// Scale percentages tried in stage 3.
    pub fn scale_steps(&self) -> Vec<u8> {
        descending(self.start_scale, self.scale_step, self.scale_floor)
    }

    pub fn compress(&self, image: &RgbaImage) -> Result<CompressedImage, CompressError> {
        let start = std::time::Instant::now();
        let (width, height) = image.dimensions();

        let lossless = CompressedImage {
            bytes: encode_png(image)?,
            format: EncodedFormat::Png,
            step: LadderStep::Lossless,
            width,
            height,
            within_budget: true,
        };
        if lossless.bytes.len() <= self.max_bytes {
            log::info!("[COMPRESS] PNG fits: {} bytes", lossless.bytes.len());
            return Ok(lossless);
        }

        let mut smallest = lossless;

        let rgb = flatten_rgb(image);
        for quality in self.quality_steps() {
            let bytes = encode_jpeg(&rgb, quality)?;
            log::debug!("[COMPRESS] JPEG q{}: {} bytes", quality, bytes.len());
            let candidate = CompressedImage {
                bytes,
                format: EncodedFormat::Jpeg,
                step: LadderStep::Lossy { quality },
                width,
                height,
                within_budget: true,
            };
            if candidate.bytes.len() <= self.max_bytes {
                self.log_fit(&candidate, start);
                return Ok(candidate);
            }
            smallest = smaller(smallest, candidate);
        }

        for scale_percent in self.scale_steps() {
            let w = ((width as u64 * scale_percent as u64) / 100).max(1) as u32;
            let h = ((height as u64 * scale_percent as u64) / 100).max(1) as u32;
            let scaled = image::imageops::resize(&rgb, w, h, FilterType::Triangle);
            let bytes = encode_jpeg(&scaled, self.downscale_quality)?;
            log::debug!(
                "[COMPRESS] {}% ({}x{}) q{}: {} bytes",
                scale_percent,
                w,
                h,
                self.downscale_quality,
                bytes.len()
            );
            let candidate = CompressedImage {
                bytes,
                format: EncodedFormat::Jpeg,
                step: LadderStep::Downscaled {
                    scale_percent,
                    quality: self.downscale_quality,
                },
                width: w,
                height: h,
                within_budget: true,
            };
            if candidate.bytes.len() <= self.max_bytes {
                self.log_fit(&candidate, start);
                return Ok(candidate);
            }
            smallest = smaller(smallest, candidate);
        }

        log::warn!(
            "[COMPRESS] Nothing fit {} bytes; smallest was {} bytes ({:?})",
            self.max_bytes,
            smallest.bytes.len(),
            smallest.step
        );
        smallest.within_budget = false;
        Ok(smallest)
    }

    fn log_fit(&self, result: &CompressedImage, start: std::time::Instant) {
        log::info!(
            "[COMPRESS] {:?} fits: {} bytes (limit {}) in {}ms",
            result.step,
            result.bytes.len(),
            self.max_bytes,
            start.elapsed().as_millis()
        );
    }
}

fn descending(start: u8, step: u8, floor_exclusive: u8) -> Vec<u8> {
    let mut steps = Vec::new();
    let mut value = start;
    while value > floor_exclusive {
        steps.push(value);
        if step == 0 || value < step {
            break;
        }
        value -= step;
    }
    steps
}

fn smaller(a: CompressedImage, b: CompressedImage) -> CompressedImage {
    if b.bytes.len() < a.bytes.len() {
        b
    } else {
        a
    }
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CompressError> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| CompressError::Encode(format!("PNG: {}", e)))?;
    Ok(bytes)
}

/// JPEG has no alpha channel; transparent areas keep their color values.
fn flatten_rgb(image: &RgbaImage) -> image::RgbImage {
    DynamicImage::ImageRgba8(image.clone()).to_rgb8()
}

fn encode_jpeg(image: &image::RgbImage, quality: u8) -> Result<Vec<u8>, CompressError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(image)
        .map_err(|e| CompressError::Encode(format!("JPEG q{}: {}", quality, e)))?;
    Ok(bytes)
}

/// GIF fallback ladder. Each rung re-extracts from the video source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GifBudgetLadder {
    pub max_bytes: usize,
    pub fps_step: u32,
    pub min_fps: u32,
    /// Width multiplier per rung, in percent.
    pub width_percent: u32,
    pub min_width: u32,
}

impl GifBudgetLadder {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            fps_step: 2,
            min_fps: 4,
            width_percent: 80,
            min_width: 32,
        }
    }

    /// Accept an existing GIF as-is if it fits.
    pub fn accepts(&self, gif: &GeneratedGif) -> bool {
        gif.bytes.len() <= self.max_bytes
    }

    /// Settings tried in order: the user's, then lower frame rates down to
    /// `min_fps`, then narrower widths down to `min_width` at that rate.
    /// The time range is never changed, and a rate that leaves the range
    /// without a single frame is never tried.
    pub fn rungs(&self, initial: &GifExportSettings) -> Vec<GifExportSettings> {
        let mut rungs = vec![*initial];
        let mut current = *initial;

        while current.fps > self.min_fps && self.fps_step > 0 {
            let mut lower = current;
            lower.fps = current.fps.saturating_sub(self.fps_step).max(self.min_fps);
            if lower.frame_count() == 0 {
                break;
            }
            current = lower;
            rungs.push(current);
        }

        if self.width_percent > 0 && self.width_percent < 100 {
            while current.output_width > self.min_width {
                let narrower = current.output_width * self.width_percent / 100;
                current.output_width = narrower.max(self.min_width);
                rungs.push(current);
            }
        }

        rungs
    }

    /// Return `existing` if it fits, otherwise walk the rungs (skipping
    /// the one `existing` was made with) until a GIF fits.
    #[allow(clippy::too_many_arguments)]
    pub fn fit(
        &self,
        existing: Option<GeneratedGif>,
        initial: &GifExportSettings,
        source: &mut dyn VideoSource,
        crop: Option<&CropRectangle>,
        chroma: Option<&ChromaKeySettings>,
        encoder: &dyn GifFrameEncoder,
        status: &StatusReporter,
    ) -> Result<GeneratedGif, CompressError> {
        let mut smallest = usize::MAX;

        if let Some(gif) = existing.as_ref() {
            if self.accepts(gif) {
                return Ok(gif.clone());
            }
            smallest = gif.bytes.len();
        }

        for rung in self.rungs(initial) {
            if existing.as_ref().map(|g| g.settings) == Some(rung) {
                continue;
            }
            status.info(format!(
                "GIF is over {} KB, retrying at {}fps / {}px...",
                self.max_bytes / 1024,
                rung.fps,
                rung.output_width
            ));
            let gif = generate_gif(source, &rung, crop, chroma, encoder, status)?;
            log::info!(
                "[COMPRESS] GIF {}fps {}px: {} bytes",
                rung.fps,
                rung.output_width,
                gif.bytes.len()
            );
            if self.accepts(&gif) {
                return Ok(gif);
            }
            smallest = smallest.min(gif.bytes.len());
        }

        Err(CompressError::GifOverBudget {
            max_bytes: self.max_bytes,
            smallest,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error(
        "Could not get the GIF under {} KB (smallest was {} KB). Lower the frame rate or shorten the time range.",
        max_bytes / 1024,
        smallest / 1024
    )]
    GifOverBudget { max_bytes: usize, smallest: usize },

    #[error(transparent)]
    Gif(#[from] GifError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::gif::ImageGifEncoder;
    use crate::editor::video::FrameTimeline;
    use image::{Rgb, Rgba};

    /// Deterministic noise that PNG cannot shrink.
    fn noise(width: u32, height: u32) -> RgbaImage {
        let mut state: u32 = 0x1234_5678;
        RgbaImage::from_fn(width, height, |_, _| {
            let mut next = || {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state & 0xff) as u8
            };
            Rgba([next(), next(), next(), 255])
        })
    }

    #[test]
    fn rung_sequences_are_fixed() {
        let ladder = CompressionLadder::new(1024);
        assert_eq!(
            ladder.quality_steps(),
            vec![90, 80, 70, 60, 50, 40, 30, 20, 10]
        );
        assert_eq!(ladder.scale_steps(), vec![90, 80, 70, 60, 50, 40, 30]);
    }

    #[test]
    fn small_png_is_returned_unchanged() {
        let img = RgbaImage::from_pixel(64, 64, Rgba([10, 20, 30, 255]));
        let result = CompressionLadder::new(128 * 1024).compress(&img).unwrap();
        assert_eq!(result.step, LadderStep::Lossless);
        assert_eq!(result.format, EncodedFormat::Png);
        assert_eq!(result.bytes, encode_png(&img).unwrap());
        assert!(result.within_budget);
    }

    #[test]
    fn oversized_image_ends_within_budget() {
        let img = noise(300, 300);
        let budget = 128 * 1024;
        assert!(encode_png(&img).unwrap().len() > budget);

        let result = CompressionLadder::new(budget).compress(&img).unwrap();
        assert!(result.within_budget);
        assert!(result.bytes.len() <= budget);
        assert_eq!(result.format, EncodedFormat::Jpeg);
    }

    #[test]
    fn impossible_budget_returns_smallest_flagged() {
        let img = noise(64, 64);
        let result = CompressionLadder::new(10).compress(&img).unwrap();
        assert!(!result.within_budget);
        assert!(result.bytes.len() > 10);
        // The last downscale rung is the smallest image the ladder makes.
        let png = encode_png(&img).unwrap();
        assert!(result.bytes.len() < png.len());
    }

    #[test]
    fn jpeg_rung_drops_alpha() {
        let rgb = flatten_rgb(&RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 0])));
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([1, 2, 3]));
    }

    #[test]
    fn gif_rungs_lower_fps_then_width() {
        let ladder = GifBudgetLadder::new(1000);
        let initial = GifExportSettings {
            start_time: 0.0,
            end_time: 2.0,
            fps: 9,
            output_width: 64,
        };
        let rungs: Vec<(u32, u32)> = ladder
            .rungs(&initial)
            .iter()
            .map(|s| (s.fps, s.output_width))
            .collect();
        assert_eq!(
            rungs,
            vec![(9, 64), (7, 64), (5, 64), (4, 64), (4, 51), (4, 40), (4, 32)]
        );
    }

    #[test]
    fn fitting_gif_is_accepted_without_reextraction() {
        let ladder = GifBudgetLadder::new(1000);
        let gif = GeneratedGif {
            bytes: vec![0; 999],
            settings: GifExportSettings::default(),
            frame_count: 30,
            width: 128,
            height: 72,
        };
        let mut source = FrameTimeline::uniform(vec![RgbaImage::new(2, 2)], 1.0).unwrap();
        let result = ladder
            .fit(
                Some(gif.clone()),
                &gif.settings,
                &mut source,
                None,
                None,
                &ImageGifEncoder::default(),
                &StatusReporter::silent(),
            )
            .unwrap();
        assert_eq!(result, gif);
    }

    #[test]
    fn oversized_gif_fails_with_guidance() {
        let frames: Vec<RgbaImage> = (0..20).map(|_| noise(64, 64)).collect();
        let mut source = FrameTimeline::uniform(frames, 10.0).unwrap();
        let settings = GifExportSettings {
            start_time: 0.0,
            end_time: 1.0,
            fps: 6,
            output_width: 64,
        };
        let result = GifBudgetLadder::new(64).fit(
            None,
            &settings,
            &mut source,
            None,
            None,
            &ImageGifEncoder::default(),
            &StatusReporter::silent(),
        );
        match result {
            Err(err @ CompressError::GifOverBudget { .. }) => {
                assert!(err.to_string().contains("Lower the frame rate"));
            }
            other => panic!("expected GifOverBudget, got {:?}", other.map(|g| g.bytes.len())),
        }
    }

    #[test]
    fn short_range_keeps_frame_rate_and_ends_over_budget() {
        let frames: Vec<RgbaImage> = (0..20).map(|_| noise(64, 64)).collect();
        let mut source = FrameTimeline::uniform(frames, 10.0).unwrap();
        let settings = GifExportSettings {
            start_time: 0.0,
            end_time: 0.1,
            fps: 10,
            output_width: 64,
        };
        let ladder = GifBudgetLadder::new(64);
        assert!(ladder.rungs(&settings).iter().all(|s| s.frame_count() > 0));
        assert!(ladder.rungs(&settings).iter().all(|s| s.fps == 10));

        let result = ladder.fit(
            None,
            &settings,
            &mut source,
            None,
            None,
            &ImageGifEncoder::default(),
            &StatusReporter::silent(),
        );
        match result {
            Err(err @ CompressError::GifOverBudget { .. }) => {
                assert!(err.to_string().contains("shorten the time range"));
            }
            Err(other) => panic!("expected GifOverBudget, got {}", other),
            Ok(gif) => panic!("expected GifOverBudget, got {} bytes", gif.bytes.len()),
        }
    }

    #[test]
    fn ladder_reextracts_until_gif_fits() {
        let frames: Vec<RgbaImage> = (0..20).map(|_| noise(64, 64)).collect();
        let mut source = FrameTimeline::uniform(frames, 10.0).unwrap();
        let settings = GifExportSettings {
            start_time: 0.0,
            end_time: 1.0,
            fps: 10,
            output_width: 64,
        };
        let encoder = ImageGifEncoder::default();
        let status = StatusReporter::silent();
        let first = generate_gif(&mut source, &settings, None, None, &encoder, &status).unwrap();

        // Budget just under the first attempt forces at least one more rung.
        let ladder = GifBudgetLadder::new(first.bytes.len() - 1);
        let fitted = ladder
            .fit(
                Some(first.clone()),
                &settings,
                &mut source,
                None,
                None,
                &encoder,
                &status,
            )
            .unwrap();
        assert!(fitted.bytes.len() < first.bytes.len());
        assert!(fitted.settings.fps < 10 || fitted.settings.output_width < 64);
    }
}
