//! emoji-snip CLI.
//!
//! Usage:
//!   emoji-snip image [screenshot.png] --select 10,10,50,50 --emoji wave
//!   emoji-snip gif recording.gif --start 0 --end 2 --fps 8 --width 96
//!   emoji-snip workspace acme
//!
//! Both capture commands drive the full flow: background service, capture
//! agent and an editor session, with the editing steps taken from flags.

use clap::{Args, Parser, Subcommand};
use emoji_snip_lib::background::{BackgroundService, LogOnlyOpener, PageOpener, SystemBrowser};
use emoji_snip_lib::capture::agent::{CaptureAgent, CaptureTrigger, EditorHost, PageEvent};
use emoji_snip_lib::capture::{
    CaptureMode, ChannelDisplayMedia, PointerEvent, ScreenRecorder, ScreenshotProvider,
    StaticScreenshot, ViewportRect,
};
use emoji_snip_lib::config::EditorConfig;
use emoji_snip_lib::editor::{
    ChromaKeySettings, DirectorySaver, EditorClosed, EditorError, EditorServices, EditorSession,
    ExportOutcome, ExportTarget, GifVideoDecoder, ImageGifEncoder, Rgb,
};
use emoji_snip_lib::messaging;
use emoji_snip_lib::settings::{self, JsonSettingsStore, SettingsStore};
use emoji_snip_lib::status::{StatusKind, StatusReporter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug, Parser)]
#[command(name = "emoji-snip", version, about = "Capture, edit and export custom chat emoji")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory exports are saved into (default: the download directory)
    #[arg(long, global = true)]
    out: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Select a region of a screenshot and export it as an image emoji
    Image(ImageArgs),
    /// Turn an animation into a GIF emoji
    Gif(GifArgs),
    /// Store the workspace name used by the upload flow
    Workspace { name: String },
}

#[derive(Debug, Args)]
struct ImageArgs {
    /// Screenshot to select from. Captures the screen when omitted.
    screenshot: Option<PathBuf>,

    /// Page selection as x,y,w,h in viewport pixels (default: everything)
    #[arg(long, value_parser = parse_rect)]
    select: Option<ViewportRect>,

    /// Device pixel ratio of the screenshot
    #[arg(long, default_value_t = 1.0)]
    dpr: f64,

    #[command(flatten)]
    edit: EditArgs,
}

#[derive(Debug, Args)]
struct GifArgs {
    /// Animated GIF standing in for the screen recording
    animation: PathBuf,

    #[arg(long)]
    start: Option<f64>,

    #[arg(long)]
    end: Option<f64>,

    #[arg(long)]
    fps: Option<u32>,

    /// Output width in pixels
    #[arg(long)]
    width: Option<u32>,

    #[command(flatten)]
    edit: EditArgs,
}

#[derive(Debug, Args)]
struct EditArgs {
    /// Key out this color, e.g. #00ff00
    #[arg(long)]
    chroma: Option<Rgb>,

    /// Chroma key sensitivity
    #[arg(long)]
    sensitivity: Option<f64>,

    /// Editor crop as x,y,w,h in source pixels
    #[arg(long, value_parser = parse_rect)]
    crop: Option<ViewportRect>,

    /// Save as <name> and open the workspace emoji page instead of downloading
    #[arg(long)]
    emoji: Option<String>,
}

/// GIF range overrides applied before generating.
#[derive(Debug, Default, Clone, Copy)]
struct GifOverrides {
    start: Option<f64>,
    end: Option<f64>,
    fps: Option<u32>,
    width: Option<u32>,
}

/// What the "user" does once the editor opens.
#[derive(Debug, Clone)]
struct EditPlan {
    chroma: Option<ChromaKeySettings>,
    crop: Option<ViewportRect>,
    gif: GifOverrides,
    target: ExportTarget,
}

impl EditPlan {
    fn new(edit: EditArgs, defaults: ChromaKeySettings, gif: GifOverrides) -> Self {
        let chroma = edit.chroma.map(|color| ChromaKeySettings {
            enabled: true,
            color,
            sensitivity: edit.sensitivity.unwrap_or(defaults.sensitivity),
        });
        let target = match edit.emoji {
            Some(name) => ExportTarget::Emoji { name },
            None => ExportTarget::Download,
        };
        Self {
            chroma,
            crop: edit.crop,
            gif,
            target,
        }
    }
}

fn parse_rect(raw: &str) -> Result<ViewportRect, String> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("'{}': {}", raw, e))?;
    match parts.as_slice() {
        [left, top, width, height] if *width > 0.0 && *height > 0.0 => Ok(ViewportRect {
            left: *left,
            top: *top,
            width: *width,
            height: *height,
        }),
        _ => Err(format!("'{}' is not x,y,w,h with a positive size", raw)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    emoji_snip_lib::init_logging();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(Some(outcome)) => {
            println!("{}", outcome.path.display());
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Option<ExportOutcome>, String> {
    let mut config = EditorConfig::load(&settings::config_dir());
    if let Some(out) = cli.out {
        config.output_dir = Some(out);
    }
    let store = Arc::new(JsonSettingsStore::default_location());

    match cli.command {
        Command::Workspace { name } => {
            store.save_workspace(&name).map_err(|e| e.to_string())?;
            println!("Workspace saved to {}", store.path().display());
            Ok(None)
        }
        Command::Image(args) => run_image(args, config, store).await.map(Some),
        Command::Gif(args) => run_gif(args, config, store).await.map(Some),
    }
}

async fn run_image(
    args: ImageArgs,
    config: EditorConfig,
    store: Arc<dyn SettingsStore>,
) -> Result<ExportOutcome, String> {
    let provider: Box<dyn ScreenshotProvider> = match &args.screenshot {
        Some(path) => Box::new(StaticScreenshot::from_file(path).map_err(|e| e.to_string())?),
        None => screen_provider(),
    };
    let screenshot = provider.capture_visible().map_err(|e| e.to_string())?;

    let dpr = if args.dpr > 0.0 { args.dpr } else { 1.0 };
    let viewport = (
        screenshot.width() as f64 / dpr,
        screenshot.height() as f64 / dpr,
    );
    let selection = args.select.unwrap_or(ViewportRect {
        left: 0.0,
        top: 0.0,
        width: viewport.0,
        height: viewport.1,
    });

    let plan = EditPlan::new(args.edit, config.chroma, GifOverrides::default());
    let status = status_printer();
    let (background, _) = BackgroundService::new(
        Arc::new(StaticScreenshot::new(screenshot)),
        page_opener(),
        config.workspace_host.clone(),
    )
    .spawn();

    let (done_tx, done) = oneshot::channel();
    let services = services(config, store, background.clone(), status.clone());
    let host = spawn_editor_host(services, plan, done_tx);

    let agent = CaptureAgent::new(
        background,
        host,
        ScreenRecorder::new(ChannelDisplayMedia::denied()),
        viewport,
        status,
    )
    .spawn();

    CaptureTrigger::new(agent.commands.clone())
        .start(CaptureMode::Image)
        .await
        .map_err(|e| e.to_string())?;

    let from = (selection.left, selection.top);
    let to = (
        selection.left + selection.width,
        selection.top + selection.height,
    );
    for event in [
        PointerEvent::Press { x: from.0, y: from.1 },
        PointerEvent::Move { x: to.0, y: to.1 },
        PointerEvent::Release { x: to.0, y: to.1 },
    ] {
        agent
            .page
            .send(PageEvent::Pointer(event))
            .await
            .map_err(|e| e.to_string())?;
    }

    finish(done).await
}

async fn run_gif(
    args: GifArgs,
    config: EditorConfig,
    store: Arc<dyn SettingsStore>,
) -> Result<ExportOutcome, String> {
    let bytes = std::fs::read(&args.animation)
        .map_err(|e| format!("{}: {}", args.animation.display(), e))?;
    let (width, height) = image::ImageReader::new(std::io::Cursor::new(&bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?
        .into_dimensions()
        .map_err(|e| format!("{}: {}", args.animation.display(), e))?;

    let overrides = GifOverrides {
        start: args.start,
        end: args.end,
        fps: args.fps,
        width: args.width,
    };
    let plan = EditPlan::new(args.edit, config.chroma, overrides);
    let status = status_printer();
    let (background, _) = BackgroundService::new(
        screen_provider().into(),
        page_opener(),
        config.workspace_host.clone(),
    )
    .spawn();

    let (done_tx, done) = oneshot::channel();
    let services = services(config, store, background.clone(), status.clone());
    let host = spawn_editor_host(services, plan, done_tx);

    let (media, feed) = ChannelDisplayMedia::new(width, height);
    let agent = CaptureAgent::new(
        background,
        host,
        ScreenRecorder::new(media),
        (width as f64, height as f64),
        status,
    )
    .spawn();

    CaptureTrigger::new(agent.commands.clone())
        .start(CaptureMode::Video)
        .await
        .map_err(|e| e.to_string())?;

    // One chunk, then the stream ends as if sharing was stopped.
    feed.send(bytes).await.map_err(|e| e.to_string())?;
    drop(feed);

    finish(done).await
}

async fn finish(
    done: oneshot::Receiver<Result<ExportOutcome, EditorError>>,
) -> Result<ExportOutcome, String> {
    match done.await {
        Ok(result) => result.map_err(|e| e.user_message()),
        Err(_) => Err("The editor never opened".to_string()),
    }
}

fn services(
    config: EditorConfig,
    store: Arc<dyn SettingsStore>,
    background: emoji_snip_lib::background::BackgroundClient,
    status: StatusReporter,
) -> EditorServices {
    let saver = DirectorySaver::new(config.resolved_output_dir());
    EditorServices {
        config,
        settings: store,
        saver: Arc::new(saver),
        background,
        decoder: Arc::new(GifVideoDecoder),
        encoder: Arc::new(ImageGifEncoder::default()),
        status,
    }
}

#[cfg(feature = "xcap")]
fn screen_provider() -> Box<dyn ScreenshotProvider> {
    Box::new(emoji_snip_lib::capture::XcapScreenshot)
}

#[cfg(not(feature = "xcap"))]
fn screen_provider() -> Box<dyn ScreenshotProvider> {
    Box::new(emoji_snip_lib::capture::UnavailableScreenshot)
}

fn page_opener() -> Arc<dyn PageOpener> {
    match SystemBrowser::detect() {
        Some(browser) => Arc::new(browser),
        None => Arc::new(LogOnlyOpener),
    }
}

/// Print status messages as the editor would show them.
fn status_printer() -> StatusReporter {
    let (reporter, mut rx) = StatusReporter::channel();
    tokio::spawn(async move {
        while let Some(status) = rx.recv().await {
            let tag = match status.kind {
                StatusKind::Info => "info",
                StatusKind::Success => "ok",
                StatusKind::Error => "error",
            };
            eprintln!("[{}] {}", tag, status.message);
        }
    });
    reporter
}

/// Editor side: open a session for the first capture, run the plan and
/// answer the agent once the editor closes.
fn spawn_editor_host(
    services: EditorServices,
    plan: EditPlan,
    done: oneshot::Sender<Result<ExportOutcome, EditorError>>,
) -> EditorHost {
    let (host, mut inbox) = messaging::channel();
    tokio::spawn(async move {
        let Some(envelope) = inbox.recv().await else {
            return;
        };
        let (init, responder) = envelope.into_parts();

        let mut session = match EditorSession::open(init, services).await {
            Ok(session) => session,
            Err(e) => {
                responder.respond(EditorClosed::User);
                let _ = done.send(Err(e));
                return;
            }
        };

        let result = apply_plan(&mut session, &plan).await;
        let uploaded = matches!(&result, Ok(outcome) if outcome.opened_url.is_some());
        if !uploaded {
            session.close();
        }
        let mut closed = session.closed();
        let reason = closed
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|reason| *reason)
            .unwrap_or(EditorClosed::User);
        responder.respond(reason);
        let _ = done.send(result);
    });
    host
}

async fn apply_plan(
    session: &mut EditorSession,
    plan: &EditPlan,
) -> Result<ExportOutcome, EditorError> {
    if let Some(chroma) = plan.chroma {
        session.set_chroma(chroma);
    }
    if let Some(crop) = plan.crop {
        let (w, h) = session.dimensions();
        session.crop(crop, (w as f64, h as f64))?;
    }

    if session.mode() == CaptureMode::Video {
        if let Some(mut settings) = session.gif_settings() {
            let GifOverrides {
                start,
                end,
                fps,
                width,
            } = plan.gif;
            settings.start_time = start.unwrap_or(settings.start_time);
            settings.end_time = end.unwrap_or(settings.end_time);
            settings.fps = fps.unwrap_or(settings.fps);
            settings.output_width = width.unwrap_or(settings.output_width);
            session.set_gif_settings(settings)?;
        }
        session.generate_gif().await?;
    }

    session.export(plan.target.clone()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_selection_rectangles() {
        assert_eq!(
            parse_rect("10, 20,30,40").unwrap(),
            ViewportRect {
                left: 10.0,
                top: 20.0,
                width: 30.0,
                height: 40.0
            }
        );
        assert!(parse_rect("1,2,3").is_err());
        assert!(parse_rect("1,2,0,4").is_err());
        assert!(parse_rect("a,b,c,d").is_err());
    }

    #[test]
    fn cli_parses_gif_command() {
        let cli = Cli::try_parse_from([
            "emoji-snip",
            "gif",
            "rec.gif",
            "--fps",
            "8",
            "--chroma",
            "#00ff00",
            "--emoji",
            "wave",
        ])
        .unwrap();
        match cli.command {
            Command::Gif(args) => {
                assert_eq!(args.fps, Some(8));
                assert_eq!(args.edit.chroma, Some(Rgb::new(0, 255, 0)));
                assert_eq!(args.edit.emoji.as_deref(), Some("wave"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
