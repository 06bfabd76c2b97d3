//! Editor domain: public API.
//!
//! Pure image/video transforms live in the leaf modules; `session` owns one
//! capture's editing state and drives export.

pub mod chroma;
pub mod compress;
pub mod crop;
pub mod export;
pub mod gif;
pub mod image_state;
pub mod session;
pub mod video;

pub use chroma::{apply_chroma_key, ChromaKeySettings, Rgb};
pub use compress::{CompressionLadder, CompressedImage, EncodedFormat, GifBudgetLadder};
pub use crop::{CropRectangle, DisplayRect};
pub use export::{DirectorySaver, ExportTarget, FileSaver};
pub use gif::{GeneratedGif, GifExportSettings, GifFrameEncoder, ImageGifEncoder};
pub use image_state::EditableImage;
pub use session::{EditorClosed, EditorInit, EditorServices, EditorSession, ExportOutcome};
pub use video::{FrameTimeline, GifVideoDecoder, VideoDecoder, VideoSource};

use crate::capture::CaptureError;
use crate::messaging::ChannelError;
use crate::settings::SettingsError;
use chroma::ChromaError;
use compress::CompressError;
use crop::CropError;
use export::ExportError;
use gif::GifError;
use video::VideoError;

/// Coarse failure classes shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Permission, platform or messaging failure.
    Platform,
    /// Bad input; nothing was attempted.
    Validation,
    /// The result cannot be made small enough.
    Budget,
    /// Decode or encode failure.
    Encoding,
}

/// Any failure surfaced by an editing session.
#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Crop(#[from] CropError),

    #[error(transparent)]
    Chroma(#[from] ChromaError),

    #[error(transparent)]
    Video(#[from] VideoError),

    #[error(transparent)]
    Gif(#[from] GifError),

    #[error(transparent)]
    Compress(#[from] CompressError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Background request failed: {0}")]
    Background(String),

    #[error("This action needs a {expected} capture")]
    WrongMode { expected: &'static str },

    #[error("Editor task failed: {0}")]
    Task(String),
}

impl EditorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EditorError::Capture(e) => match e {
                CaptureError::EncodingFailed(_) | CaptureError::MalformedDataUrl(_) => {
                    ErrorKind::Encoding
                }
                _ => ErrorKind::Platform,
            },
            EditorError::Crop(_) | EditorError::Chroma(_) | EditorError::WrongMode { .. } => {
                ErrorKind::Validation
            }
            EditorError::Video(_) => ErrorKind::Encoding,
            EditorError::Gif(e) => gif_kind(e),
            EditorError::Compress(e) => compress_kind(e),
            EditorError::Export(e) => match e {
                ExportError::InvalidEmojiName(_)
                | ExportError::WorkspaceNotSet
                | ExportError::NoGif => ErrorKind::Validation,
                ExportError::Io(_) => ErrorKind::Platform,
                ExportError::Compress(e) => compress_kind(e),
            },
            EditorError::Settings(SettingsError::EmptyWorkspace) => ErrorKind::Validation,
            EditorError::Settings(_)
            | EditorError::Channel(_)
            | EditorError::Background(_)
            | EditorError::Task(_) => ErrorKind::Platform,
        }
    }

    /// Status-line text for this failure.
    pub fn user_message(&self) -> String {
        match self {
            EditorError::Channel(_) => {
                "Lost contact with the extension. Reload the page and try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}

fn gif_kind(e: &GifError) -> ErrorKind {
    match e {
        GifError::InvalidSettings(_) | GifError::NoFrames | GifError::Crop(_) => {
            ErrorKind::Validation
        }
        GifError::Video(_) | GifError::Encode(_) => ErrorKind::Encoding,
    }
}

fn compress_kind(e: &CompressError) -> ErrorKind {
    match e {
        CompressError::GifOverBudget { .. } => ErrorKind::Budget,
        CompressError::Encode(_) => ErrorKind::Encoding,
        CompressError::Gif(e) => gif_kind(e),
    }
}
