//! Background service: takes tab screenshots and opens the workspace emoji
//! page on request. Requests are handled one at a time, in arrival order.

use crate::capture::{encode_png, png_data_url, ScreenshotProvider};
use crate::messaging::{self, Client, Inbox};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundRequest {
    /// Screenshot of what is currently visible.
    CaptureVisibleTab,
    OpenWorkspacePage { workspace: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundResponse {
    /// `data:image/png;base64,...`
    Screenshot(String),
    Opened { url: String },
    Error(String),
}

pub type BackgroundClient = Client<BackgroundRequest, BackgroundResponse>;

/// `https://<workspace>.<host>/customize/emoji`
pub fn workspace_emoji_url(workspace: &str, host: &str) -> String {
    format!("https://{}.{}/customize/emoji", workspace.trim(), host)
}

/// Opens a URL in a new browser tab.
pub trait PageOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), String>;
}

/// Hands URLs to the desktop's default browser.
pub struct SystemBrowser {
    launcher: PathBuf,
}

impl SystemBrowser {
    const LAUNCHERS: [&'static str; 3] = ["xdg-open", "open", "wslview"];

    /// Find a launcher on `PATH`.
    pub fn detect() -> Option<Self> {
        Self::LAUNCHERS.iter().find_map(|name| {
            which::which(name).ok().map(|launcher| {
                log::info!("[BACKGROUND] Using {} to open pages", launcher.display());
                Self { launcher }
            })
        })
    }

    pub fn with_launcher(launcher: impl Into<PathBuf>) -> Self {
        Self {
            launcher: launcher.into(),
        }
    }
}

impl PageOpener for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), String> {
        tokio::process::Command::new(&self.launcher)
            .arg(url)
            .kill_on_drop(false)
            .spawn()
            .map(|_| ())
            .map_err(|e| format!("Could not launch {}: {}", self.launcher.display(), e))
    }
}

/// Used when no launcher exists; logs the URL so it can be opened by hand.
pub struct LogOnlyOpener;

impl PageOpener for LogOnlyOpener {
    fn open(&self, url: &str) -> Result<(), String> {
        log::warn!("[BACKGROUND] No browser launcher found; open {} manually", url);
        Ok(())
    }
}

pub struct BackgroundService {
    screenshots: Arc<dyn ScreenshotProvider>,
    opener: Arc<dyn PageOpener>,
    workspace_host: String,
}

impl BackgroundService {
    pub fn new(
        screenshots: Arc<dyn ScreenshotProvider>,
        opener: Arc<dyn PageOpener>,
        workspace_host: impl Into<String>,
    ) -> Self {
        Self {
            screenshots,
            opener,
            workspace_host: workspace_host.into(),
        }
    }

    /// Start serving. The task ends when every client is dropped.
    pub fn spawn(self) -> (BackgroundClient, JoinHandle<()>) {
        let (client, inbox) = messaging::channel();
        let handle = tokio::spawn(self.run(inbox));
        (client, handle)
    }

    async fn run(self, mut inbox: Inbox<BackgroundRequest, BackgroundResponse>) {
        while let Some(envelope) = inbox.recv().await {
            let response = self.handle(&envelope.body).await;
            envelope.respond(response);
        }
        log::info!("[BACKGROUND] All clients gone, stopping");
    }

    async fn handle(&self, request: &BackgroundRequest) -> BackgroundResponse {
        match request {
            BackgroundRequest::CaptureVisibleTab => self.capture().await,
            BackgroundRequest::OpenWorkspacePage { workspace } => {
                if workspace.trim().is_empty() {
                    return BackgroundResponse::Error("No workspace given".to_string());
                }
                let url = workspace_emoji_url(workspace, &self.workspace_host);
                match self.opener.open(&url) {
                    Ok(()) => {
                        log::info!("[BACKGROUND] Opened {}", url);
                        BackgroundResponse::Opened { url }
                    }
                    Err(e) => {
                        log::error!("[BACKGROUND] Opening {} failed: {}", url, e);
                        BackgroundResponse::Error(e)
                    }
                }
            }
        }
    }

    async fn capture(&self) -> BackgroundResponse {
        let start = std::time::Instant::now();
        let provider = self.screenshots.clone();

        let result = tokio::task::spawn_blocking(move || {
            let image = provider.capture_visible()?;
            encode_png(&image)
        })
        .await;

        match result {
            Ok(Ok(png)) => {
                log::info!(
                    "[BACKGROUND] Captured tab: {} bytes in {}ms",
                    png.len(),
                    start.elapsed().as_millis()
                );
                BackgroundResponse::Screenshot(png_data_url(&png))
            }
            Ok(Err(e)) => {
                log::error!("[BACKGROUND] Capture failed: {}", e);
                BackgroundResponse::Error(e.to_string())
            }
            Err(e) => BackgroundResponse::Error(format!("Capture task failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{decode_data_url, CaptureError, StaticScreenshot};
    use image::{Rgba, RgbaImage};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingOpener {
        opened: Mutex<Vec<String>>,
    }

    impl PageOpener for RecordingOpener {
        fn open(&self, url: &str) -> Result<(), String> {
            self.opened.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    struct DeniedScreenshot;

    impl ScreenshotProvider for DeniedScreenshot {
        fn capture_visible(&self) -> Result<RgbaImage, CaptureError> {
            Err(CaptureError::PermissionDenied("activeTab not granted".into()))
        }
    }

    fn service(screens: Arc<dyn ScreenshotProvider>, opener: Arc<RecordingOpener>) -> BackgroundClient {
        BackgroundService::new(screens, opener, "slack.com").spawn().0
    }

    #[test]
    fn emoji_page_url() {
        assert_eq!(
            workspace_emoji_url(" acme ", "slack.com"),
            "https://acme.slack.com/customize/emoji"
        );
    }

    #[tokio::test]
    async fn capture_returns_png_data_url() {
        let image = RgbaImage::from_pixel(30, 20, Rgba([1, 2, 3, 255]));
        let client = service(
            Arc::new(StaticScreenshot::new(image)),
            Arc::new(RecordingOpener::default()),
        );

        match client.call(BackgroundRequest::CaptureVisibleTab).await.unwrap() {
            BackgroundResponse::Screenshot(url) => {
                let png = decode_data_url(&url).unwrap();
                let decoded = image::load_from_memory(&png).unwrap();
                assert_eq!((decoded.width(), decoded.height()), (30, 20));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn capture_failure_is_an_error_string() {
        let client = service(Arc::new(DeniedScreenshot), Arc::new(RecordingOpener::default()));
        let response = client.call(BackgroundRequest::CaptureVisibleTab).await.unwrap();
        assert!(matches!(response, BackgroundResponse::Error(msg) if msg.contains("not permitted")));
    }

    #[tokio::test]
    async fn opens_workspace_page() {
        let opener = Arc::new(RecordingOpener::default());
        let client = service(Arc::new(DeniedScreenshot), opener.clone());

        let response = client
            .call(BackgroundRequest::OpenWorkspacePage {
                workspace: "acme".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            response,
            BackgroundResponse::Opened {
                url: "https://acme.slack.com/customize/emoji".into()
            }
        );
        assert_eq!(opener.opened.lock().unwrap().len(), 1);

        let empty = client
            .call(BackgroundRequest::OpenWorkspacePage {
                workspace: "  ".into(),
            })
            .await
            .unwrap();
        assert!(matches!(empty, BackgroundResponse::Error(_)));
        assert_eq!(opener.opened.lock().unwrap().len(), 1);
    }
}
