//! Page-side capture agent.
//!
//! Receives `StartCapture` from the popup, runs region selection or a screen
//! recording, then opens the editor with the payload and waits for its close
//! signal. One capture at a time.

use super::{
    decode_data_url, CaptureMode, CapturedPayload, DisplayMediaProvider, PointerEvent,
    RecorderError, RegionSelector, ScreenRecorder, SelectionOutcome, StopHandle, ViewportRect,
};
use crate::background::{BackgroundClient, BackgroundRequest, BackgroundResponse};
use crate::editor::{EditorClosed, EditorInit};
use crate::messaging::{self, ChannelError, Client, Inbox};
use crate::status::StatusReporter;
use std::io::Cursor;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCommand {
    StartCapture(CaptureMode),
}

/// `Err` carries the message shown in the popup.
pub type AgentReply = Result<(), String>;

pub type AgentClient = Client<AgentCommand, AgentReply>;

/// Opens the editor and resolves when it closes.
pub type EditorHost = Client<EditorInit, EditorClosed>;

/// Input from the page the agent is injected into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageEvent {
    Pointer(PointerEvent),
    /// Stop button on the floating recording control.
    StopRecording,
}

enum Phase {
    Idle,
    Selecting(RegionSelector),
    Recording(StopHandle),
    EditorOpen,
}

enum Internal {
    RecordingDone(Result<CapturedPayload, RecorderError>),
    EditorClosed(Result<EditorClosed, ChannelError>),
}

pub struct CaptureAgent<P: DisplayMediaProvider> {
    background: BackgroundClient,
    editor: EditorHost,
    recorder: ScreenRecorder<P>,
    /// CSS pixel size of the page viewport.
    viewport: (f64, f64),
    status: StatusReporter,
}

/// Running agent: command client, page event feed and the task.
pub struct AgentHandle {
    pub commands: AgentClient,
    pub page: mpsc::Sender<PageEvent>,
    pub task: JoinHandle<()>,
}

impl<P: DisplayMediaProvider + 'static> CaptureAgent<P> {
    pub fn new(
        background: BackgroundClient,
        editor: EditorHost,
        recorder: ScreenRecorder<P>,
        viewport: (f64, f64),
        status: StatusReporter,
    ) -> Self {
        Self {
            background,
            editor,
            recorder,
            viewport,
            status,
        }
    }

    pub fn spawn(self) -> AgentHandle {
        let (commands, inbox) = messaging::channel();
        let (page, page_rx) = mpsc::channel(64);
        let task = tokio::spawn(self.run(inbox, page_rx));
        AgentHandle {
            commands,
            page,
            task,
        }
    }

    async fn run(
        self,
        mut commands: Inbox<AgentCommand, AgentReply>,
        mut page: mpsc::Receiver<PageEvent>,
    ) {
        let (internal_tx, mut internal) = mpsc::unbounded_channel();
        let mut phase = Phase::Idle;

        loop {
            // Page input queued before a command is handled first.
            tokio::select! {
                biased;
                Some(event) = page.recv() => {
                    self.on_page_event(event, &mut phase, &internal_tx).await;
                }
                Some(event) = internal.recv() => {
                    self.on_internal(event, &mut phase, &internal_tx);
                }
                command = commands.recv() => match command {
                    Some(envelope) => {
                        let (AgentCommand::StartCapture(mode), responder) = envelope.into_parts();
                        let reply = self.start(mode, &mut phase, &internal_tx);
                        responder.respond(reply);
                    }
                    None => break,
                },
            }
        }
        log::info!("[CAPTURE] Agent stopped");
    }

    fn start(
        &self,
        mode: CaptureMode,
        phase: &mut Phase,
        internal: &mpsc::UnboundedSender<Internal>,
    ) -> AgentReply {
        if !matches!(phase, Phase::Idle) {
            return Err("A capture is already in progress".to_string());
        }

        match mode {
            CaptureMode::Image => {
                let mut selector = RegionSelector::new();
                selector.arm();
                *phase = Phase::Selecting(selector);
                log::info!("[CAPTURE] Waiting for region selection");
                self.status.info("Drag to select an area. Press Escape to cancel.");
                Ok(())
            }
            CaptureMode::Video => {
                let control = self.recorder.start().map_err(|e| {
                    self.status.error(e.to_string());
                    e.to_string()
                })?;
                let (stop, task) = control.into_parts();
                let internal = internal.clone();
                tokio::spawn(async move {
                    let result = match task.await {
                        Ok(result) => result,
                        Err(e) => Err(RecorderError::Aborted(e.to_string())),
                    };
                    let _ = internal.send(Internal::RecordingDone(result));
                });
                *phase = Phase::Recording(stop);
                self.status.info("Recording... press Stop when done.");
                Ok(())
            }
        }
    }

    async fn on_page_event(
        &self,
        event: PageEvent,
        phase: &mut Phase,
        internal: &mpsc::UnboundedSender<Internal>,
    ) {
        match event {
            PageEvent::Pointer(pointer) => {
                let outcome = match phase {
                    Phase::Selecting(selector) => selector.handle(pointer),
                    _ => return,
                };
                match outcome {
                    SelectionOutcome::Pending => {}
                    SelectionOutcome::Selected(rect) => {
                        *phase = Phase::Idle;
                        match self.capture_region(rect).await {
                            Ok(init) => self.open_editor(init, phase, internal),
                            Err(message) => self.status.error(message),
                        }
                    }
                    SelectionOutcome::TooSmall => {
                        *phase = Phase::Idle;
                        log::info!("[CAPTURE] Drag too short, selection dropped");
                    }
                    SelectionOutcome::Cancelled => {
                        *phase = Phase::Idle;
                        self.status.info("Capture cancelled");
                    }
                }
            }
            PageEvent::StopRecording => {
                if let Phase::Recording(stop) = phase {
                    stop.stop();
                }
            }
        }
    }

    fn on_internal(
        &self,
        event: Internal,
        phase: &mut Phase,
        internal: &mpsc::UnboundedSender<Internal>,
    ) {
        match event {
            Internal::RecordingDone(Ok(payload)) => {
                let init = EditorInit {
                    payload,
                    selection: None,
                    viewport: self.viewport,
                };
                self.open_editor(init, phase, internal);
            }
            Internal::RecordingDone(Err(e)) => {
                *phase = Phase::Idle;
                self.status.error(e.to_string());
            }
            Internal::EditorClosed(result) => {
                match result {
                    Ok(reason) => log::info!("[CAPTURE] Editor closed ({:?})", reason),
                    Err(e) => {
                        log::error!("[CAPTURE] Editor went away: {}", e);
                        self.status.error(format!("Editor failed to open: {}", e));
                    }
                }
                *phase = Phase::Idle;
            }
        }
    }

    /// Screenshot the tab and build the editor payload.
    async fn capture_region(&self, rect: ViewportRect) -> Result<EditorInit, String> {
        log::info!("[CAPTURE] Selected {:?}, requesting screenshot", rect);
        let reply = self
            .background
            .call(BackgroundRequest::CaptureVisibleTab)
            .await
            .map_err(|e| format!("Screenshot request failed: {}", e))?;

        let data_url = match reply {
            BackgroundResponse::Screenshot(url) => url,
            BackgroundResponse::Error(e) => return Err(format!("Screenshot failed: {}", e)),
            other => return Err(format!("Unexpected screenshot reply: {:?}", other)),
        };

        let bytes = decode_data_url(&data_url).map_err(|e| e.to_string())?;
        let (width, height) = image::ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|e| e.to_string())?
            .into_dimensions()
            .map_err(|e| format!("Screenshot is not a readable image: {}", e))?;

        Ok(EditorInit {
            payload: CapturedPayload::Image {
                bytes,
                width,
                height,
            },
            selection: Some(rect),
            viewport: self.viewport,
        })
    }

    fn open_editor(
        &self,
        init: EditorInit,
        phase: &mut Phase,
        internal: &mpsc::UnboundedSender<Internal>,
    ) {
        log::info!(
            "[CAPTURE] Opening editor with {:?} payload ({} bytes)",
            init.payload.mode(),
            init.payload.byte_len()
        );
        *phase = Phase::EditorOpen;
        let editor = self.editor.clone();
        let internal = internal.clone();
        tokio::spawn(async move {
            let result = editor.call(init).await;
            let _ = internal.send(Internal::EditorClosed(result));
        });
    }
}

/// Popup side: asks the agent on the active page to start a capture.
pub struct CaptureTrigger {
    agent: AgentClient,
}

impl CaptureTrigger {
    pub fn new(agent: AgentClient) -> Self {
        Self { agent }
    }

    pub async fn start(&self, mode: CaptureMode) -> Result<(), TriggerError> {
        match self.agent.call(AgentCommand::StartCapture(mode)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(TriggerError::Rejected(message)),
            Err(e) => {
                log::error!("[CAPTURE] No agent on the page: {}", e);
                Err(TriggerError::NoAgent)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    #[error("Could not reach the page. Reload the page and try again.")]
    NoAgent,

    #[error("{0}")]
    Rejected(String),
}
