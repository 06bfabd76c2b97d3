//! GIF export: frame extraction from a video source and encoding.
//!
//! Extraction is strictly sequential: seek, read, filter, next. Any failure
//! aborts the whole GIF and the partial frame buffer is dropped with it.

use super::chroma::ChromaKeySettings;
use super::crop::{crop_image, CropError, CropRectangle};
use super::video::{VideoError, VideoSource};
use crate::status::StatusReporter;
use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::FilterType;
use image::{Delay, Frame, RgbaImage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GifExportSettings {
    pub start_time: f64,
    pub end_time: f64,
    pub fps: u32,
    pub output_width: u32,
}

impl Default for GifExportSettings {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            end_time: 3.0,
            fps: 10,
            output_width: 128,
        }
    }
}

impl GifExportSettings {
    /// `floor((end - start) * fps)`.
    pub fn frame_count(&self) -> usize {
        let span = (self.end_time - self.start_time) * self.fps as f64;
        if span.is_finite() && span > 0.0 {
            // Guard against 2.9999999 style products for exact ranges.
            (span + 1e-9).floor() as usize
        } else {
            0
        }
    }

    /// Timestamp of frame `index`.
    pub fn frame_time(&self, index: usize) -> f64 {
        self.start_time + index as f64 / self.fps as f64
    }

    /// Inter-frame delay, `1000 / fps` milliseconds.
    pub fn frame_delay(&self) -> Delay {
        Delay::from_numer_denom_ms(1000, self.fps.max(1))
    }

    /// Reject settings that cannot produce frames from a `duration`-second video.
    pub fn validate(&self, duration: f64) -> Result<(), GifError> {
        if self.fps == 0 {
            return Err(GifError::InvalidSettings("frame rate must be at least 1".into()));
        }
        if self.output_width == 0 {
            return Err(GifError::InvalidSettings("output width must be at least 1".into()));
        }
        if !(self.start_time >= 0.0) || !(self.end_time > self.start_time) {
            return Err(GifError::InvalidSettings(format!(
                "time range {}s..{}s is empty",
                self.start_time, self.end_time
            )));
        }
        if self.end_time > duration + 1e-6 {
            return Err(GifError::InvalidSettings(format!(
                "end time {}s is past the end of the {:.2}s video",
                self.end_time, duration
            )));
        }
        if self.frame_count() == 0 {
            return Err(GifError::NoFrames);
        }
        Ok(())
    }

    /// Defaults for a freshly opened video: end at min(3s, duration).
    pub fn for_duration(mut self, duration: f64) -> Self {
        self.start_time = 0.0;
        self.end_time = self.end_time.min(duration).max(0.0);
        self
    }
}

/// Output canvas size: the target width and the height that keeps the
/// source (or crop) aspect ratio, rounded down.
pub fn output_size(output_width: u32, source: (u32, u32)) -> (u32, u32) {
    let (sw, sh) = source;
    let height = (output_width as f64 * sh as f64 / sw.max(1) as f64).floor() as u32;
    (output_width, height.max(1))
}

/// Sample, crop, scale and key every frame of the range, in order.
pub fn extract_frames(
    source: &mut dyn VideoSource,
    settings: &GifExportSettings,
    crop: Option<&CropRectangle>,
    chroma: Option<&ChromaKeySettings>,
    status: &StatusReporter,
) -> Result<Vec<RgbaImage>, GifError> {
    settings.validate(source.duration())?;

    let region = match crop {
        Some(rect) => *rect,
        None => {
            let (w, h) = source.dimensions();
            CropRectangle::full(w, h)
        }
    };
    let (out_w, out_h) = output_size(settings.output_width, (region.width, region.height));
    let total = settings.frame_count();

    log::info!(
        "[GIF] Extracting {} frames at {}fps, {}x{} from {:?}",
        total,
        settings.fps,
        out_w,
        out_h,
        region
    );

    let mut frames = Vec::with_capacity(total);
    for index in 0..total {
        let raw = source.seek(settings.frame_time(index))?;
        let cut = if crop.is_some() {
            crop_image(&raw, &region)?
        } else {
            raw
        };
        let scaled = image::imageops::resize(&cut, out_w, out_h, FilterType::Triangle);
        let frame = match chroma {
            Some(keying) if keying.enabled => keying.apply(&scaled),
            _ => scaled,
        };
        frames.push(frame);
        status.info(format!("Loading frames... ({}/{})", index + 1, total));
    }

    Ok(frames)
}

/// Third-party GIF encoder boundary.
pub trait GifFrameEncoder: Send + Sync {
    /// Encode `frames` with a fixed inter-frame `delay`, reporting progress
    /// in `0.0..=1.0`.
    fn encode(
        &self,
        frames: &[RgbaImage],
        delay: Delay,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Vec<u8>, GifError>;
}

/// Looping GIF encoder backed by the `image` crate.
pub struct ImageGifEncoder {
    /// Quantization speed 1..=30; lower is slower and better.
    pub speed: i32,
}

impl Default for ImageGifEncoder {
    fn default() -> Self {
        Self { speed: 10 }
    }
}

impl GifFrameEncoder for ImageGifEncoder {
    fn encode(
        &self,
        frames: &[RgbaImage],
        delay: Delay,
        progress: &mut dyn FnMut(f32),
    ) -> Result<Vec<u8>, GifError> {
        if frames.is_empty() {
            return Err(GifError::NoFrames);
        }

        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new_with_speed(&mut bytes, self.speed);
            encoder
                .set_repeat(Repeat::Infinite)
                .map_err(|e| GifError::Encode(e.to_string()))?;

            for (index, frame) in frames.iter().enumerate() {
                encoder
                    .encode_frame(Frame::from_parts(frame.clone(), 0, 0, delay))
                    .map_err(|e| GifError::Encode(format!("frame {}: {}", index, e)))?;
                progress((index + 1) as f32 / frames.len() as f32);
            }
        }
        Ok(bytes)
    }
}

/// A finished GIF and the settings that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedGif {
    pub bytes: Vec<u8>,
    pub settings: GifExportSettings,
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
}

/// Extract and encode one GIF.
pub fn generate_gif(
    source: &mut dyn VideoSource,
    settings: &GifExportSettings,
    crop: Option<&CropRectangle>,
    chroma: Option<&ChromaKeySettings>,
    encoder: &dyn GifFrameEncoder,
    status: &StatusReporter,
) -> Result<GeneratedGif, GifError> {
    let start = std::time::Instant::now();
    let frames = extract_frames(source, settings, crop, chroma, status)?;
    let (width, height) = frames[0].dimensions();

    status.info("Encoding GIF...");
    let mut last_percent = 0u32;
    let bytes = encoder.encode(&frames, settings.frame_delay(), &mut |fraction| {
        let percent = (fraction * 100.0).round() as u32;
        if percent != last_percent {
            last_percent = percent;
            status.info(format!("Encoding GIF... {}%", percent));
        }
    })?;

    log::info!(
        "[GIF] Encoded {} frames ({}x{}) into {} bytes in {}ms",
        frames.len(),
        width,
        height,
        bytes.len(),
        start.elapsed().as_millis()
    );

    Ok(GeneratedGif {
        bytes,
        settings: *settings,
        frame_count: frames.len(),
        width,
        height,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum GifError {
    #[error("Invalid GIF settings: {0}")]
    InvalidSettings(String),

    #[error("The selected range contains no frames")]
    NoFrames,

    #[error(transparent)]
    Video(#[from] VideoError),

    #[error(transparent)]
    Crop(#[from] CropError),

    #[error("GIF encoding failed: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::chroma::Rgb;
    use crate::editor::video::FrameTimeline;
    use image::Rgba;
    use std::sync::Mutex;

    /// Records every seek so ordering can be checked.
    struct RecordingSource {
        inner: FrameTimeline,
        seeks: Vec<f64>,
    }

    impl VideoSource for RecordingSource {
        fn dimensions(&self) -> (u32, u32) {
            self.inner.dimensions()
        }
        fn duration(&self) -> f64 {
            self.inner.duration()
        }
        fn seek(&mut self, time: f64) -> Result<RgbaImage, VideoError> {
            self.seeks.push(time);
            self.inner.seek(time)
        }
    }

    fn video(width: u32, height: u32, seconds: usize) -> FrameTimeline {
        let frames = (0..seconds * 10)
            .map(|i| RgbaImage::from_pixel(width, height, Rgba([(i % 255) as u8, 0, 0, 255])))
            .collect();
        FrameTimeline::uniform(frames, 10.0).unwrap()
    }

    #[test]
    fn three_seconds_at_ten_fps_is_thirty_frames() {
        let settings = GifExportSettings {
            start_time: 0.0,
            end_time: 3.0,
            fps: 10,
            output_width: 64,
        };
        assert_eq!(settings.frame_count(), 30);

        let mut source = RecordingSource {
            inner: video(320, 240, 4),
            seeks: Vec::new(),
        };
        let frames =
            extract_frames(&mut source, &settings, None, None, &StatusReporter::silent()).unwrap();
        assert_eq!(frames.len(), 30);
        assert_eq!(source.seeks.len(), 30);
        // Sequential, ascending, i/fps apart.
        for (i, t) in source.seeks.iter().enumerate() {
            assert!((t - i as f64 / 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn output_keeps_source_aspect() {
        assert_eq!(output_size(128, (1920, 1080)), (128, 72));
        assert_eq!(output_size(100, (3, 1)), (100, 33));
    }

    #[test]
    fn crop_sets_aspect_and_content() {
        let mut frame = RgbaImage::from_pixel(200, 100, Rgba([0, 0, 255, 255]));
        for x in 100..200 {
            for y in 0..100 {
                frame.put_pixel(x, y, Rgba([255, 255, 0, 255]));
            }
        }
        let mut source = FrameTimeline::uniform(vec![frame; 10], 10.0).unwrap();
        let settings = GifExportSettings {
            start_time: 0.0,
            end_time: 0.5,
            fps: 4,
            output_width: 20,
        };
        let crop = CropRectangle {
            x: 100,
            y: 0,
            width: 100,
            height: 50,
        };
        let frames = extract_frames(
            &mut source,
            &settings,
            Some(&crop),
            None,
            &StatusReporter::silent(),
        )
        .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].dimensions(), (20, 10));
        assert_eq!(frames[0].get_pixel(10, 5), &Rgba([255, 255, 0, 255]));
    }

    #[test]
    fn chroma_key_applies_per_frame() {
        let green = RgbaImage::from_pixel(8, 8, Rgba([0, 255, 0, 255]));
        let mut source = FrameTimeline::uniform(vec![green; 5], 5.0).unwrap();
        let chroma = ChromaKeySettings {
            enabled: true,
            color: Rgb::new(0, 255, 0),
            sensitivity: 10.0,
        };
        let settings = GifExportSettings {
            start_time: 0.0,
            end_time: 1.0,
            fps: 2,
            output_width: 8,
        };
        let frames = extract_frames(
            &mut source,
            &settings,
            None,
            Some(&chroma),
            &StatusReporter::silent(),
        )
        .unwrap();
        assert!(frames
            .iter()
            .all(|f| f.pixels().all(|p| p.0[3] == 0)));
    }

    #[test]
    fn invalid_ranges_are_rejected_before_seeking() {
        let mut source = RecordingSource {
            inner: video(10, 10, 1),
            seeks: Vec::new(),
        };
        for settings in [
            GifExportSettings {
                start_time: 0.5,
                end_time: 0.5,
                ..Default::default()
            },
            GifExportSettings {
                end_time: 9.0,
                ..Default::default()
            },
            GifExportSettings {
                end_time: 1.0,
                fps: 0,
                ..Default::default()
            },
        ] {
            let result =
                extract_frames(&mut source, &settings, None, None, &StatusReporter::silent());
            assert!(matches!(result, Err(GifError::InvalidSettings(_))));
        }
        assert!(source.seeks.is_empty());
    }

    struct FailingSource;

    impl VideoSource for FailingSource {
        fn dimensions(&self) -> (u32, u32) {
            (10, 10)
        }
        fn duration(&self) -> f64 {
            5.0
        }
        fn seek(&mut self, time: f64) -> Result<RgbaImage, VideoError> {
            if time >= 0.5 {
                Err(VideoError::Decode("corrupt frame".into()))
            } else {
                Ok(RgbaImage::new(10, 10))
            }
        }
    }

    #[test]
    fn frame_failure_aborts_whole_gif() {
        let settings = GifExportSettings {
            start_time: 0.0,
            end_time: 1.0,
            fps: 10,
            output_width: 10,
        };
        let result = generate_gif(
            &mut FailingSource,
            &settings,
            None,
            None,
            &ImageGifEncoder::default(),
            &StatusReporter::silent(),
        );
        assert!(matches!(result, Err(GifError::Video(_))));
    }

    #[test]
    fn encoder_reports_progress_and_writes_gif() {
        let frames = vec![RgbaImage::from_pixel(6, 6, Rgba([9, 9, 9, 255])); 4];
        let seen = Mutex::new(Vec::new());
        let bytes = ImageGifEncoder::default()
            .encode(&frames, Delay::from_numer_denom_ms(100, 1), &mut |p| {
                seen.lock().unwrap().push(p)
            })
            .unwrap();
        assert_eq!(&bytes[..6], b"GIF89a");
        assert_eq!(*seen.lock().unwrap(), vec![0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn generate_gif_reports_status() {
        let (status, mut rx) = StatusReporter::channel();
        let mut source = video(40, 20, 1);
        let settings = GifExportSettings {
            start_time: 0.0,
            end_time: 0.3,
            fps: 10,
            output_width: 20,
        };
        let gif = generate_gif(
            &mut source,
            &settings,
            None,
            None,
            &ImageGifEncoder::default(),
            &status,
        )
        .unwrap();
        assert_eq!(gif.frame_count, 3);
        assert_eq!((gif.width, gif.height), (20, 10));

        let mut messages = Vec::new();
        while let Ok(s) = rx.try_recv() {
            messages.push(s.message);
        }
        assert!(messages.contains(&"Loading frames... (3/3)".to_string()));
        assert!(messages.contains(&"Encoding GIF... 100%".to_string()));
    }

    #[test]
    fn new_video_defaults_end_at_three_seconds_or_less() {
        let short = GifExportSettings::default().for_duration(1.2);
        assert_eq!(short.end_time, 1.2);
        let long = GifExportSettings::default().for_duration(10.0);
        assert_eq!(long.end_time, 3.0);
    }
}
