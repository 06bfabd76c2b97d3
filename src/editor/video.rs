//! Seekable video sources for frame extraction.
//!
//! A `VideoSource` holds one decode position, so `seek` takes `&mut self`:
//! the borrow checker serializes seeks the same way awaiting `seeked` does
//! on a `<video>` element.

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, RgbaImage};
use std::io::Cursor;

pub trait VideoSource: Send {
    /// Intrinsic frame size.
    fn dimensions(&self) -> (u32, u32);

    /// Total length in seconds.
    fn duration(&self) -> f64;

    /// Move to `time` seconds and return the frame shown there.
    fn seek(&mut self, time: f64) -> Result<RgbaImage, VideoError>;
}

/// Turns captured video bytes into a seekable source.
pub trait VideoDecoder: Send + Sync {
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn VideoSource>, VideoError>;
}

/// Decoded frames laid out on a timeline.
pub struct FrameTimeline {
    frames: Vec<RgbaImage>,
    /// Start time of each frame, ascending; `starts[0] == 0`.
    starts: Vec<f64>,
    duration: f64,
    position: f64,
}

impl FrameTimeline {
    /// Build from `(frame, display seconds)` pairs. All frames must share
    /// one size and every duration must be positive.
    pub fn new(frames: Vec<(RgbaImage, f64)>) -> Result<Self, VideoError> {
        let first = frames.first().ok_or(VideoError::Empty)?;
        let size = first.0.dimensions();

        let mut images = Vec::with_capacity(frames.len());
        let mut starts = Vec::with_capacity(frames.len());
        let mut t = 0.0;
        for (index, (frame, seconds)) in frames.into_iter().enumerate() {
            if frame.dimensions() != size {
                return Err(VideoError::Decode(format!(
                    "frame {} is {:?}, expected {:?}",
                    index,
                    frame.dimensions(),
                    size
                )));
            }
            if !(seconds > 0.0) {
                return Err(VideoError::Decode(format!(
                    "frame {} has non-positive duration {}",
                    index, seconds
                )));
            }
            starts.push(t);
            images.push(frame);
            t += seconds;
        }

        Ok(Self {
            frames: images,
            starts,
            duration: t,
            position: 0.0,
        })
    }

    /// Every frame shown for `1/fps` seconds.
    pub fn uniform(frames: Vec<RgbaImage>, fps: f64) -> Result<Self, VideoError> {
        if !(fps > 0.0) {
            return Err(VideoError::Decode(format!("invalid frame rate {}", fps)));
        }
        Self::new(frames.into_iter().map(|f| (f, 1.0 / fps)).collect())
    }

    /// Decode an animated GIF.
    pub fn from_gif_bytes(bytes: &[u8]) -> Result<Self, VideoError> {
        let decoder =
            GifDecoder::new(Cursor::new(bytes)).map_err(|e| VideoError::Decode(e.to_string()))?;
        let frames = decoder
            .into_frames()
            .collect_frames()
            .map_err(|e| VideoError::Decode(e.to_string()))?;

        let timed = frames
            .into_iter()
            .map(|frame| {
                let (numer, denom) = frame.delay().numer_denom_ms();
                let mut seconds = numer as f64 / denom.max(1) as f64 / 1000.0;
                // Zero-delay GIF frames play at the browser minimum.
                if seconds <= 0.0 {
                    seconds = 0.1;
                }
                (frame.into_buffer(), seconds)
            })
            .collect();

        Self::new(timed)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Current decode position in seconds.
    pub fn position(&self) -> f64 {
        self.position
    }
}

impl VideoSource for FrameTimeline {
    fn dimensions(&self) -> (u32, u32) {
        self.frames[0].dimensions()
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn seek(&mut self, time: f64) -> Result<RgbaImage, VideoError> {
        if !time.is_finite() || time < 0.0 {
            return Err(VideoError::SeekOutOfRange {
                time,
                duration: self.duration,
            });
        }
        // Seeking at or past the end shows the last frame, like <video>.
        let time = time.min(self.duration);
        let index = self.starts.partition_point(|start| *start <= time).max(1) - 1;
        self.position = time;
        Ok(self.frames[index].clone())
    }
}

/// Opens captured bytes as an animated GIF.
pub struct GifVideoDecoder;

impl VideoDecoder for GifVideoDecoder {
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn VideoSource>, VideoError> {
        Ok(Box::new(FrameTimeline::from_gif_bytes(bytes)?))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VideoError {
    #[error("Video has no frames")]
    Empty,

    #[error("Could not decode video: {0}")]
    Decode(String),

    #[error("Cannot seek to {time}s in a {duration}s video")]
    SeekOutOfRange { time: f64, duration: f64 },
}
