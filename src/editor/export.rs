//! Emoji export: letterboxing, naming and saving.

use super::compress::{CompressError, CompressedImage, CompressionLadder, EncodedFormat};
use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use image::RgbaImage;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static EMOJI_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_-]+$").expect("valid regex"));

/// Where an export goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    /// Save under a timestamped filename.
    Download,
    /// Save as `<name>.<ext>` and open the workspace emoji page.
    Emoji { name: String },
}

/// Trim and check an emoji name. Returns the trimmed name.
pub fn validate_emoji_name(raw: &str) -> Result<String, ExportError> {
    let name = raw.trim();
    if !EMOJI_NAME.is_match(name) {
        return Err(ExportError::InvalidEmojiName(name.to_string()));
    }
    Ok(name.to_string())
}

/// `2024-05-01T12-30-00.png`
pub fn timestamp_filename(now: DateTime<Utc>, format: EncodedFormat) -> String {
    format!("{}.{}", now.format("%Y-%m-%dT%H-%M-%S"), format.extension())
}

pub fn emoji_filename(name: &str, format: EncodedFormat) -> String {
    format!("{}.{}", name, format.extension())
}

/// Scale `image` to fit an `edge`×`edge` transparent square, centered.
pub fn letterbox(image: &RgbaImage, edge: u32) -> RgbaImage {
    let (w, h) = image.dimensions();
    let mut canvas = RgbaImage::new(edge, edge);
    if w == 0 || h == 0 || edge == 0 {
        return canvas;
    }

    let scale = (edge as f64 / w as f64).min(edge as f64 / h as f64);
    let fit_w = ((w as f64 * scale).round() as u32).clamp(1, edge);
    let fit_h = ((h as f64 * scale).round() as u32).clamp(1, edge);
    let scaled = image::imageops::resize(image, fit_w, fit_h, FilterType::Triangle);

    let left = (edge - fit_w) / 2;
    let top = (edge - fit_h) / 2;
    image::imageops::overlay(&mut canvas, &scaled, left as i64, top as i64);
    canvas
}

/// Letterbox a still image and run it through the size ladder.
pub fn prepare_image(
    image: &RgbaImage,
    edge: u32,
    max_bytes: usize,
) -> Result<CompressedImage, ExportError> {
    let square = letterbox(image, edge);
    Ok(CompressionLadder::new(max_bytes).compress(&square)?)
}

/// File-save collaborator.
pub trait FileSaver: Send + Sync {
    /// Write `bytes` as `filename` and return the full path.
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, ExportError>;
}

/// Saves into one directory, creating it on first use.
pub struct DirectorySaver {
    dir: PathBuf,
}

impl DirectorySaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileSaver for DirectorySaver {
    fn save(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, ExportError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(filename);
        std::fs::write(&path, bytes)?;
        log::info!("[EXPORT] Saved {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Invalid emoji name '{0}': use only lowercase letters, digits, '_' and '-'")]
    InvalidEmojiName(String),

    #[error("No workspace configured. Set your workspace name first.")]
    WorkspaceNotSet,

    #[error("Generate a GIF first")]
    NoGif,

    #[error("Could not save file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Compress(#[from] CompressError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::Rgba;

    #[test]
    fn emoji_names_are_checked_after_trimming() {
        assert_eq!(validate_emoji_name("  party_parrot-2 ").unwrap(), "party_parrot-2");
        for bad in ["", "   ", "Party", "has space", "emoji!", "smile.png"] {
            assert!(
                matches!(validate_emoji_name(bad), Err(ExportError::InvalidEmojiName(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn timestamp_name_has_no_colons() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 9).unwrap();
        assert_eq!(timestamp_filename(at, EncodedFormat::Png), "2024-05-01T12-30-09.png");
        assert_eq!(timestamp_filename(at, EncodedFormat::Jpeg), "2024-05-01T12-30-09.jpg");
        assert_eq!(emoji_filename("wave", EncodedFormat::Gif), "wave.gif");
    }

    #[test]
    fn wide_image_is_centered_vertically() {
        let wide = RgbaImage::from_pixel(200, 100, Rgba([255, 0, 0, 255]));
        let square = letterbox(&wide, 128);
        assert_eq!(square.dimensions(), (128, 128));
        // 128x64 band starting at row 32.
        assert_eq!(square.get_pixel(64, 31).0[3], 0);
        assert_eq!(square.get_pixel(64, 32), &Rgba([255, 0, 0, 255]));
        assert_eq!(square.get_pixel(64, 95), &Rgba([255, 0, 0, 255]));
        assert_eq!(square.get_pixel(64, 96).0[3], 0);
        assert_eq!(square.get_pixel(0, 64), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn small_image_is_scaled_up() {
        let tall = RgbaImage::from_pixel(10, 20, Rgba([0, 0, 255, 255]));
        let square = letterbox(&tall, 128);
        assert_eq!(square.get_pixel(31, 0).0[3], 0);
        assert_eq!(square.get_pixel(32, 0), &Rgba([0, 0, 255, 255]));
        assert_eq!(square.get_pixel(95, 127), &Rgba([0, 0, 255, 255]));
        assert_eq!(square.get_pixel(96, 127).0[3], 0);
    }

    #[test]
    fn prepared_image_is_square_png_within_budget() {
        let img = RgbaImage::from_pixel(50, 50, Rgba([1, 2, 3, 255]));
        let out = prepare_image(&img, 128, 128 * 1024).unwrap();
        assert_eq!(out.format, EncodedFormat::Png);
        assert_eq!((out.width, out.height), (128, 128));
        assert!(out.within_budget);
    }

    #[test]
    fn directory_saver_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let saver = DirectorySaver::new(dir.path().join("nested"));
        let path = saver.save("a.png", b"abc").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"abc");
    }
}
