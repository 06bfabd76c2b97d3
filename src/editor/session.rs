//! One editing session: created from a capture, discarded on close.
//!
//! Still images are edited destructively (crop replaces the baseline) with
//! the chroma view recomputed from the baseline on every change. Videos keep
//! the source untouched; crop, chroma and range only shape GIF generation.

use super::chroma::ChromaKeySettings;
use super::compress::{EncodedFormat, GifBudgetLadder};
use super::crop::{check_selection_size, map_to_source, CropRectangle, DisplayRect};
use super::export::{
    emoji_filename, prepare_image, timestamp_filename, validate_emoji_name, ExportError,
    ExportTarget, FileSaver,
};
use super::gif::{generate_gif, GeneratedGif, GifExportSettings, GifFrameEncoder};
use super::image_state::EditableImage;
use super::video::{VideoDecoder, VideoSource};
use super::{EditorError, ErrorKind};
use crate::background::{BackgroundClient, BackgroundRequest, BackgroundResponse};
use crate::capture::{CaptureMode, CapturedPayload, ViewportRect};
use crate::config::EditorConfig;
use crate::settings::SettingsStore;
use crate::status::StatusReporter;
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// What the capture agent sends to open the editor.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorInit {
    pub payload: CapturedPayload,
    /// Image mode: the region selected on the page, in viewport pixels.
    pub selection: Option<ViewportRect>,
    /// Viewport size in CSS pixels when the capture was taken.
    pub viewport: (f64, f64),
}

/// Close signal posted back to the capture agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorClosed {
    /// Close button.
    User,
    /// Delayed close after the upload flow finished.
    AfterUpload,
}

/// Collaborators a session talks to.
#[derive(Clone)]
pub struct EditorServices {
    pub config: EditorConfig,
    pub settings: Arc<dyn SettingsStore>,
    pub saver: Arc<dyn FileSaver>,
    pub background: BackgroundClient,
    pub decoder: Arc<dyn VideoDecoder>,
    pub encoder: Arc<dyn GifFrameEncoder>,
    pub status: StatusReporter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub format: EncodedFormat,
    pub size: usize,
    pub within_budget: bool,
    /// Workspace page opened by the upload flow.
    pub opened_url: Option<String>,
}

struct ImageEdit {
    /// As it was when the editor opened; target of reset.
    opened: EditableImage,
    image: EditableImage,
}

struct VideoEdit {
    source: Arc<Mutex<Box<dyn VideoSource>>>,
    dimensions: (u32, u32),
    duration: f64,
    settings: GifExportSettings,
    crop: Option<CropRectangle>,
    chroma: ChromaKeySettings,
    gif: Option<GeneratedGif>,
}

enum Content {
    Image(ImageEdit),
    Video(VideoEdit),
}

pub struct EditorSession {
    services: EditorServices,
    content: Content,
    close_tx: Arc<watch::Sender<Option<EditorClosed>>>,
}

impl EditorSession {
    /// Decode the payload and build the editing state. For images, the
    /// page selection becomes the initial crop, scaled from viewport pixels
    /// to screenshot pixels (the device pixel ratio).
    pub async fn open(init: EditorInit, services: EditorServices) -> Result<Self, EditorError> {
        let status = services.status.clone();
        let content = match Self::load(init, &services).await {
            Ok(content) => content,
            Err(e) => {
                status.error(e.user_message());
                return Err(e);
            }
        };
        let (close_tx, _) = watch::channel(None);
        Ok(Self {
            services,
            content,
            close_tx: Arc::new(close_tx),
        })
    }

    async fn load(init: EditorInit, services: &EditorServices) -> Result<Content, EditorError> {
        let start = std::time::Instant::now();
        match init.payload {
            CapturedPayload::Image { bytes, .. } => {
                let screenshot = blocking(move || {
                    image::load_from_memory(&bytes)
                        .map(|img| img.to_rgba8())
                        .map_err(|e| {
                            EditorError::Capture(crate::capture::CaptureError::EncodingFailed(
                                e.to_string(),
                            ))
                        })
                })
                .await?;

                let baseline = match init.selection {
                    Some(selection) => initial_crop(&screenshot, &selection, init.viewport)?,
                    None => screenshot,
                };
                let (w, h) = baseline.dimensions();
                log::info!(
                    "[EDITOR] Opened {}x{} image in {}ms",
                    w,
                    h,
                    start.elapsed().as_millis()
                );

                let image = EditableImage::new(baseline, services.config.chroma);
                Ok(Content::Image(ImageEdit {
                    opened: image.clone(),
                    image,
                }))
            }
            CapturedPayload::Video { bytes, .. } => {
                let decoder = services.decoder.clone();
                let source = blocking(move || Ok(decoder.open(&bytes)?)).await?;
                let dimensions = source.dimensions();
                let duration = source.duration();
                let settings = services.config.gif.for_duration(duration);
                log::info!(
                    "[EDITOR] Opened {}x{} video, {:.2}s, in {}ms",
                    dimensions.0,
                    dimensions.1,
                    duration,
                    start.elapsed().as_millis()
                );
                services.status.info(format!(
                    "Video loaded: {:.1}s, {}x{}",
                    duration, dimensions.0, dimensions.1
                ));

                Ok(Content::Video(VideoEdit {
                    source: Arc::new(Mutex::new(source)),
                    dimensions,
                    duration,
                    settings,
                    crop: None,
                    chroma: services.config.chroma,
                    gif: None,
                }))
            }
        }
    }

    pub fn mode(&self) -> CaptureMode {
        match self.content {
            Content::Image(_) => CaptureMode::Image,
            Content::Video(_) => CaptureMode::Video,
        }
    }

    pub fn status(&self) -> &StatusReporter {
        &self.services.status
    }

    /// Pixel size of what is being edited: the current image, or the
    /// video frame.
    pub fn dimensions(&self) -> (u32, u32) {
        match &self.content {
            Content::Image(edit) => edit.image.dimensions(),
            Content::Video(edit) => edit.dimensions,
        }
    }

    /// Image mode: the editable image.
    pub fn image(&self) -> Option<&EditableImage> {
        match &self.content {
            Content::Image(edit) => Some(&edit.image),
            Content::Video(_) => None,
        }
    }

    pub fn chroma(&self) -> ChromaKeySettings {
        match &self.content {
            Content::Image(edit) => *edit.image.chroma(),
            Content::Video(edit) => edit.chroma,
        }
    }

    /// Change chroma settings. Images are re-keyed from their baseline;
    /// for videos this invalidates any generated GIF.
    pub fn set_chroma(&mut self, chroma: ChromaKeySettings) {
        match &mut self.content {
            Content::Image(edit) => edit.image.set_chroma(chroma),
            Content::Video(edit) => {
                edit.chroma = chroma;
                edit.gif = None;
            }
        }
    }

    /// Crop to a selection drawn over the displayed image or video.
    /// `displayed` is the on-screen size of that element.
    pub fn crop(
        &mut self,
        selection: DisplayRect,
        displayed: (f64, f64),
    ) -> Result<CropRectangle, EditorError> {
        let result = self.crop_inner(selection, displayed);
        self.report(result)
    }

    fn crop_inner(
        &mut self,
        selection: DisplayRect,
        displayed: (f64, f64),
    ) -> Result<CropRectangle, EditorError> {
        check_selection_size(&selection)?;
        let rect = match &mut self.content {
            Content::Image(edit) => {
                let rect = map_to_source(&selection, displayed, edit.image.dimensions())?;
                edit.image = edit.image.cropped(&rect)?;
                rect
            }
            Content::Video(edit) => {
                let rect = map_to_source(&selection, displayed, edit.dimensions)?;
                edit.crop = Some(rect);
                edit.gif = None;
                rect
            }
        };
        log::info!("[EDITOR] Crop {:?}", rect);
        self.services
            .status
            .info(format!("Crop: {}x{}", rect.width, rect.height));
        Ok(rect)
    }

    /// Images return to how they were when the editor opened; videos drop
    /// the crop rectangle.
    pub fn reset(&mut self) {
        match &mut self.content {
            Content::Image(edit) => {
                let chroma = *edit.image.chroma();
                edit.image = edit.opened.clone();
                edit.image.set_chroma(chroma);
            }
            Content::Video(edit) => {
                edit.crop = None;
                edit.gif = None;
            }
        }
        self.services.status.info("Crop reset");
    }

    /// Video mode: active crop, if any.
    pub fn video_crop(&self) -> Option<CropRectangle> {
        match &self.content {
            Content::Video(edit) => edit.crop,
            Content::Image(_) => None,
        }
    }

    pub fn video_duration(&self) -> Option<f64> {
        match &self.content {
            Content::Video(edit) => Some(edit.duration),
            Content::Image(_) => None,
        }
    }

    pub fn gif_settings(&self) -> Option<GifExportSettings> {
        match &self.content {
            Content::Video(edit) => Some(edit.settings),
            Content::Image(_) => None,
        }
    }

    pub fn set_gif_settings(&mut self, settings: GifExportSettings) -> Result<(), EditorError> {
        let result = match &mut self.content {
            Content::Video(edit) => match settings.validate(edit.duration) {
                Ok(()) => {
                    edit.settings = settings;
                    edit.gif = None;
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
            Content::Image(_) => Err(EditorError::WrongMode { expected: "video" }),
        };
        self.report(result)
    }

    pub fn generated_gif(&self) -> Option<&GeneratedGif> {
        match &self.content {
            Content::Video(edit) => edit.gif.as_ref(),
            Content::Image(_) => None,
        }
    }

    /// Build the GIF from the current range, crop and chroma settings.
    pub async fn generate_gif(&mut self) -> Result<&GeneratedGif, EditorError> {
        let result = self.generate_gif_inner().await;
        self.report(result)?;
        self.generated_gif()
            .ok_or(EditorError::WrongMode { expected: "video" })
    }

    async fn generate_gif_inner(&mut self) -> Result<(), EditorError> {
        let Content::Video(edit) = &mut self.content else {
            return Err(EditorError::WrongMode { expected: "video" });
        };
        edit.gif = None;

        let source = edit.source.clone();
        let settings = edit.settings;
        let crop = edit.crop;
        let chroma = edit.chroma;
        let encoder = self.services.encoder.clone();
        let status = self.services.status.clone();

        let gif = blocking(move || {
            let mut source = lock_source(&source)?;
            Ok(generate_gif(
                &mut **source,
                &settings,
                crop.as_ref(),
                Some(&chroma),
                encoder.as_ref(),
                &status,
            )?)
        })
        .await?;

        self.services.status.success(format!(
            "GIF ready: {} frames, {}x{}, {} KB",
            gif.frame_count,
            gif.width,
            gif.height,
            kb(gif.bytes.len())
        ));
        edit.gif = Some(gif);
        Ok(())
    }

    /// Compress and save. The upload flow checks the name and workspace
    /// before any compression, then opens the workspace emoji page and
    /// schedules the editor to close.
    pub async fn export(&mut self, target: ExportTarget) -> Result<ExportOutcome, EditorError> {
        let result = self.export_inner(target).await;
        self.report(result)
    }

    async fn export_inner(&mut self, target: ExportTarget) -> Result<ExportOutcome, EditorError> {
        let upload = match &target {
            ExportTarget::Download => None,
            ExportTarget::Emoji { name } => {
                let name = validate_emoji_name(name)?;
                let workspace = self
                    .services
                    .settings
                    .workspace()?
                    .filter(|w| !w.trim().is_empty())
                    .ok_or(ExportError::WorkspaceNotSet)?;
                Some((name, workspace))
            }
        };

        let config = self.services.config.clone();
        let status = self.services.status.clone();

        let (bytes, format, within_budget) = match &mut self.content {
            Content::Image(edit) => {
                status.info("Compressing...");
                let image = edit.image.current().clone();
                let compressed = blocking(move || {
                    Ok(prepare_image(&image, config.emoji_edge, config.max_bytes)?)
                })
                .await?;
                (compressed.bytes, compressed.format, compressed.within_budget)
            }
            Content::Video(edit) => {
                let gif = edit.gif.clone().ok_or(ExportError::NoGif)?;
                let source = edit.source.clone();
                let settings = edit.settings;
                let crop = edit.crop;
                let chroma = edit.chroma;
                let encoder = self.services.encoder.clone();
                let ladder_status = status.clone();

                let fitted = blocking(move || {
                    let ladder = GifBudgetLadder::new(config.max_bytes);
                    if ladder.accepts(&gif) {
                        return Ok(gif);
                    }
                    let mut source = lock_source(&source)?;
                    ladder
                        .fit(
                            Some(gif),
                            &settings,
                            &mut **source,
                            crop.as_ref(),
                            Some(&chroma),
                            encoder.as_ref(),
                            &ladder_status,
                        )
                        .map_err(|e| EditorError::Export(ExportError::Compress(e)))
                })
                .await?;

                let bytes = fitted.bytes.clone();
                edit.gif = Some(fitted);
                (bytes, EncodedFormat::Gif, true)
            }
        };

        let limit_kb = kb(self.services.config.max_bytes);
        if !within_budget {
            status.error(format!(
                "Could not get under {} KB; saving the smallest version ({} KB)",
                limit_kb,
                kb(bytes.len())
            ));
        }

        let filename = match &upload {
            Some((name, _)) => emoji_filename(name, format),
            None => timestamp_filename(chrono::Utc::now(), format),
        };
        let size = bytes.len();
        let saver = self.services.saver.clone();
        let path = blocking(move || Ok(saver.save(&filename, &bytes)?)).await?;

        let mut outcome = ExportOutcome {
            path,
            format,
            size,
            within_budget,
            opened_url: None,
        };

        let Some((name, workspace)) = upload else {
            let message = format!("Downloaded {} ({} KB)", display_name(&outcome), kb(size));
            if within_budget {
                status.success(message);
            } else {
                status.error(format!("{}, over the {} KB limit", message, limit_kb));
            }
            return Ok(outcome);
        };

        let reply = self
            .services
            .background
            .call(BackgroundRequest::OpenWorkspacePage { workspace })
            .await?;
        match reply {
            BackgroundResponse::Opened { url } => outcome.opened_url = Some(url),
            BackgroundResponse::Error(e) => return Err(EditorError::Background(e)),
            other => {
                return Err(EditorError::Background(format!(
                    "unexpected reply {:?}",
                    other
                )))
            }
        }

        let delay = Duration::from_millis(self.services.config.close_delay_ms);
        let message = format!(
            "Saved {} ({} KB). Upload it as :{}: on the page that just opened. Closing in {}s...",
            display_name(&outcome),
            kb(size),
            name,
            delay.as_secs()
        );
        if within_budget {
            status.success(message);
        } else {
            status.error(format!(
                "{} It is over the {} KB limit and may be rejected.",
                message, limit_kb
            ));
        }
        self.close_after(delay);
        Ok(outcome)
    }

    /// Close signal for whoever hosts the editor.
    pub fn closed(&self) -> watch::Receiver<Option<EditorClosed>> {
        self.close_tx.subscribe()
    }

    /// Close button.
    pub fn close(&self) {
        self.close_tx.send_replace(Some(EditorClosed::User));
    }

    fn close_after(&self, delay: Duration) {
        let tx = self.close_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.borrow().is_none() {
                tx.send_replace(Some(EditorClosed::AfterUpload));
            }
        });
    }

    /// Every failure becomes a status message.
    fn report<T>(&self, result: Result<T, EditorError>) -> Result<T, EditorError> {
        if let Err(e) = &result {
            match e.kind() {
                ErrorKind::Validation => log::info!("[EDITOR] Rejected: {}", e),
                _ => log::error!("[EDITOR] {:?} error: {}", e.kind(), e),
            }
            self.services.status.error(e.user_message());
        }
        result
    }
}

/// Map the page selection into screenshot pixels and cut it out.
fn initial_crop(
    screenshot: &RgbaImage,
    selection: &ViewportRect,
    viewport: (f64, f64),
) -> Result<RgbaImage, EditorError> {
    let (sw, sh) = screenshot.dimensions();
    let dpr = if viewport.0 > 0.0 {
        sw as f64 / viewport.0
    } else {
        1.0
    };
    log::info!("[EDITOR] Device pixel ratio {:.2}", dpr);

    // One ratio for both axes: the viewport height is the screenshot
    // height divided by the same ratio.
    let displayed = (sw as f64 / dpr, sh as f64 / dpr);
    let rect = map_to_source(selection, displayed, (sw, sh))?;
    Ok(super::crop::crop_image(screenshot, &rect)?)
}

fn lock_source(
    source: &Mutex<Box<dyn VideoSource>>,
) -> Result<std::sync::MutexGuard<'_, Box<dyn VideoSource>>, EditorError> {
    source
        .lock()
        .map_err(|e| EditorError::Task(format!("video source poisoned: {}", e)))
}

async fn blocking<T, F>(work: F) -> Result<T, EditorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EditorError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EditorError::Task(e.to_string()))?
}

fn kb(bytes: usize) -> usize {
    bytes.div_ceil(1024)
}

fn display_name(outcome: &ExportOutcome) -> String {
    outcome
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| outcome.path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{BackgroundService, PageOpener};
    use crate::capture::{encode_png, StaticScreenshot};
    use crate::editor::chroma::Rgb;
    use crate::editor::export::DirectorySaver;
    use crate::editor::gif::ImageGifEncoder;
    use crate::editor::video::GifVideoDecoder;
    use crate::settings::MemorySettingsStore;
    use crate::status::{Status, StatusKind};
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba};
    use tokio::sync::mpsc;

    struct NoopOpener;

    impl PageOpener for NoopOpener {
        fn open(&self, _url: &str) -> Result<(), String> {
            Ok(())
        }
    }

    struct Harness {
        services: EditorServices,
        statuses: mpsc::UnboundedReceiver<Status>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn new(workspace: Option<&str>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let (status, statuses) = StatusReporter::channel();
            let (background, _) = BackgroundService::new(
                Arc::new(StaticScreenshot::new(RgbaImage::new(1, 1))),
                Arc::new(NoopOpener),
                "slack.com",
            )
            .spawn();
            let settings = match workspace {
                Some(ws) => MemorySettingsStore::with_workspace(ws),
                None => MemorySettingsStore::default(),
            };
            let config = EditorConfig {
                close_delay_ms: 50,
                ..EditorConfig::default()
            };
            Self {
                services: EditorServices {
                    config,
                    settings: Arc::new(settings),
                    saver: Arc::new(DirectorySaver::new(dir.path())),
                    background,
                    decoder: Arc::new(GifVideoDecoder),
                    encoder: Arc::new(ImageGifEncoder::default()),
                    status,
                },
                statuses,
                dir,
            }
        }

        fn drain(&mut self) -> Vec<Status> {
            let mut out = Vec::new();
            while let Ok(s) = self.statuses.try_recv() {
                out.push(s);
            }
            out
        }
    }

    fn screenshot_payload(width: u32, height: u32) -> CapturedPayload {
        let image = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 0, 255])
        });
        CapturedPayload::Image {
            bytes: encode_png(&image).unwrap(),
            width,
            height,
        }
    }

    fn gif_payload(frames: usize, fps: u32) -> CapturedPayload {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            for i in 0..frames {
                let frame = RgbaImage::from_pixel(80, 40, Rgba([(i * 20) as u8, 0, 200, 255]));
                encoder
                    .encode_frame(Frame::from_parts(
                        frame,
                        0,
                        0,
                        Delay::from_numer_denom_ms(1000, fps),
                    ))
                    .unwrap();
            }
        }
        CapturedPayload::Video {
            bytes,
            duration_seconds: frames as f64 / fps as f64,
            width: 80,
            height: 40,
        }
    }

    fn rect(left: f64, top: f64, width: f64, height: f64) -> DisplayRect {
        DisplayRect {
            left,
            top,
            width,
            height,
        }
    }

    #[tokio::test]
    async fn selection_is_scaled_by_device_pixel_ratio() {
        let harness = Harness::new(None);
        let init = EditorInit {
            payload: screenshot_payload(200, 100),
            selection: Some(rect(10.0, 5.0, 30.0, 20.0)),
            viewport: (100.0, 50.0),
        };
        let session = EditorSession::open(init, harness.services.clone())
            .await
            .unwrap();
        let image = session.image().unwrap();
        assert_eq!(image.dimensions(), (60, 40));
        assert_eq!(image.original().get_pixel(0, 0), &Rgba([20, 10, 0, 255]));
    }

    #[tokio::test]
    async fn crop_then_reset_restores_opened_image() {
        let mut harness = Harness::new(None);
        let init = EditorInit {
            payload: screenshot_payload(100, 100),
            selection: None,
            viewport: (100.0, 100.0),
        };
        let mut session = EditorSession::open(init, harness.services.clone())
            .await
            .unwrap();

        session
            .crop(rect(0.0, 0.0, 25.0, 25.0), (50.0, 50.0))
            .unwrap();
        assert_eq!(session.image().unwrap().dimensions(), (50, 50));

        let too_small = session.crop(rect(0.0, 0.0, 10.0, 40.0), (50.0, 50.0));
        assert!(matches!(too_small, Err(EditorError::Crop(_))));
        assert_eq!(session.image().unwrap().dimensions(), (50, 50));

        session.reset();
        assert_eq!(session.image().unwrap().dimensions(), (100, 100));

        let statuses = harness.drain();
        assert!(statuses.iter().any(|s| s.message == "Crop: 50x50"));
        assert!(statuses.iter().any(|s| s.kind == StatusKind::Error));
    }

    #[tokio::test]
    async fn chroma_survives_reset() {
        let harness = Harness::new(None);
        let init = EditorInit {
            payload: screenshot_payload(40, 40),
            selection: None,
            viewport: (40.0, 40.0),
        };
        let mut session = EditorSession::open(init, harness.services.clone())
            .await
            .unwrap();
        let keyed = ChromaKeySettings {
            enabled: true,
            color: Rgb::new(0, 0, 0),
            sensitivity: 5.0,
        };
        session.set_chroma(keyed);
        session
            .crop(rect(10.0, 10.0, 25.0, 25.0), (40.0, 40.0))
            .unwrap();
        session.reset();
        assert_eq!(session.chroma(), keyed);
        // (0,0) is black and keyed out.
        assert_eq!(session.image().unwrap().current().get_pixel(0, 0).0[3], 0);
    }

    #[tokio::test]
    async fn invalid_name_fails_before_anything_is_saved() {
        let mut harness = Harness::new(Some("acme"));
        let init = EditorInit {
            payload: screenshot_payload(64, 64),
            selection: None,
            viewport: (64.0, 64.0),
        };
        let mut session = EditorSession::open(init, harness.services.clone())
            .await
            .unwrap();

        let result = session
            .export(ExportTarget::Emoji {
                name: "Not Valid".into(),
            })
            .await;
        assert!(matches!(
            result,
            Err(EditorError::Export(ExportError::InvalidEmojiName(_)))
        ));
        assert_eq!(std::fs::read_dir(harness.dir.path()).unwrap().count(), 0);
        let statuses = harness.drain();
        assert!(!statuses.iter().any(|s| s.message == "Compressing..."));
        assert_eq!(statuses.last().unwrap().kind, StatusKind::Error);
    }

    #[tokio::test]
    async fn over_budget_download_is_reported_as_error() {
        let mut harness = Harness::new(None);
        harness.services.config.max_bytes = 16;
        let init = EditorInit {
            payload: screenshot_payload(64, 64),
            selection: None,
            viewport: (64.0, 64.0),
        };
        let mut session = EditorSession::open(init, harness.services.clone())
            .await
            .unwrap();

        let outcome = session.export(ExportTarget::Download).await.unwrap();
        assert!(!outcome.within_budget);
        assert!(outcome.path.exists());

        let statuses = harness.drain();
        assert!(!statuses.iter().any(|s| s.kind == StatusKind::Success));
        let last = statuses.last().unwrap();
        assert_eq!(last.kind, StatusKind::Error);
        assert!(last.message.contains("over the 1 KB limit"), "{}", last.message);
    }

    #[tokio::test]
    async fn upload_flow_requires_workspace() {
        let harness = Harness::new(None);
        let init = EditorInit {
            payload: screenshot_payload(64, 64),
            selection: None,
            viewport: (64.0, 64.0),
        };
        let mut session = EditorSession::open(init, harness.services.clone())
            .await
            .unwrap();
        let result = session
            .export(ExportTarget::Emoji {
                name: "wave".into(),
            })
            .await;
        assert!(matches!(
            result,
            Err(EditorError::Export(ExportError::WorkspaceNotSet))
        ));
    }

    #[tokio::test]
    async fn upload_flow_saves_opens_and_closes() {
        let harness = Harness::new(Some("acme"));
        let init = EditorInit {
            payload: screenshot_payload(64, 32),
            selection: None,
            viewport: (64.0, 32.0),
        };
        let mut session = EditorSession::open(init, harness.services.clone())
            .await
            .unwrap();
        let mut closed = session.closed();

        let outcome = session
            .export(ExportTarget::Emoji {
                name: " party_cat ".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.format, EncodedFormat::Png);
        assert_eq!(outcome.path, harness.dir.path().join("party_cat.png"));
        assert_eq!(
            outcome.opened_url.as_deref(),
            Some("https://acme.slack.com/customize/emoji")
        );

        let saved = image::open(&outcome.path).unwrap();
        assert_eq!((saved.width(), saved.height()), (128, 128));

        closed.changed().await.unwrap();
        assert_eq!(*closed.borrow(), Some(EditorClosed::AfterUpload));
    }

    #[tokio::test]
    async fn video_needs_a_generated_gif_before_export() {
        let harness = Harness::new(None);
        let init = EditorInit {
            payload: gif_payload(10, 10),
            selection: None,
            viewport: (80.0, 40.0),
        };
        let mut session = EditorSession::open(init, harness.services.clone())
            .await
            .unwrap();
        let result = session.export(ExportTarget::Download).await;
        assert!(matches!(result, Err(EditorError::Export(ExportError::NoGif))));
    }

    #[tokio::test]
    async fn video_session_generates_and_downloads_gif() {
        let mut harness = Harness::new(None);
        let init = EditorInit {
            payload: gif_payload(20, 10),
            selection: None,
            viewport: (80.0, 40.0),
        };
        let mut session = EditorSession::open(init, harness.services.clone())
            .await
            .unwrap();

        // Two seconds of video: default range ends at the video end.
        let settings = session.gif_settings().unwrap();
        assert!((settings.end_time - 2.0).abs() < 1e-6);

        session
            .crop(rect(40.0, 0.0, 40.0, 40.0), (80.0, 40.0))
            .unwrap();
        assert_eq!(session.video_crop().unwrap().width, 40);

        session
            .set_gif_settings(GifExportSettings {
                start_time: 0.0,
                end_time: 1.0,
                fps: 5,
                output_width: 32,
            })
            .unwrap();

        let gif = session.generate_gif().await.unwrap();
        assert_eq!(gif.frame_count, 5);
        assert_eq!((gif.width, gif.height), (32, 32));

        let outcome = session.export(ExportTarget::Download).await.unwrap();
        assert_eq!(outcome.format, EncodedFormat::Gif);
        assert!(outcome.path.to_string_lossy().ends_with(".gif"));
        assert!(outcome.size <= 128 * 1024);

        let statuses = harness.drain();
        assert!(statuses
            .iter()
            .any(|s| s.kind == StatusKind::Success && s.message.contains("KB")));
    }

    #[tokio::test]
    async fn settings_past_video_end_are_rejected() {
        let harness = Harness::new(None);
        let init = EditorInit {
            payload: gif_payload(10, 10),
            selection: None,
            viewport: (80.0, 40.0),
        };
        let mut session = EditorSession::open(init, harness.services.clone())
            .await
            .unwrap();
        let result = session.set_gif_settings(GifExportSettings {
            end_time: 5.0,
            ..session.gif_settings().unwrap()
        });
        assert!(matches!(result, Err(EditorError::Gif(_))));
    }
}
