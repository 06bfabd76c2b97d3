//! Screen recording into an in-memory chunk buffer.
//!
//! The platform grants a `MediaStream` that yields encoded chunks. The
//! recorder task buffers them until the user presses stop or the stream ends
//! on its own (sharing revoked), then releases the stream and hands back one
//! concatenated video payload.

use super::CapturedPayload;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A granted display stream.
pub struct MediaStream {
    pub width: u32,
    pub height: u32,
    chunks: mpsc::Receiver<Vec<u8>>,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl MediaStream {
    pub fn new(width: u32, height: u32, chunks: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            width,
            height,
            chunks,
            on_release: None,
        }
    }

    /// Hook run once when the recorder stops all tracks.
    pub fn with_release<F>(mut self, on_release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_release = Some(Box::new(on_release));
        self
    }

    fn release(&mut self) {
        self.chunks.close();
        if let Some(on_release) = self.on_release.take() {
            on_release();
        }
    }
}

/// Platform side of `getDisplayMedia`.
pub trait DisplayMediaProvider: Send + Sync {
    fn request_stream(&self) -> Result<MediaStream, RecorderError>;
}

/// Display media fed from a channel. Dropping the sender ends the stream,
/// the same way revoking screen sharing does.
pub struct ChannelDisplayMedia {
    width: u32,
    height: u32,
    receiver: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    released: Arc<AtomicBool>,
}

impl ChannelDisplayMedia {
    pub fn new(width: u32, height: u32) -> (Self, mpsc::Sender<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(256);
        let provider = Self {
            width,
            height,
            receiver: Mutex::new(Some(rx)),
            released: Arc::new(AtomicBool::new(false)),
        };
        (provider, tx)
    }

    /// A provider whose permission prompt is always declined.
    pub fn denied() -> Self {
        Self {
            width: 0,
            height: 0,
            receiver: Mutex::new(None),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True once the recorder has stopped every track.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl DisplayMediaProvider for ChannelDisplayMedia {
    fn request_stream(&self) -> Result<MediaStream, RecorderError> {
        let receiver = self
            .receiver
            .lock()
            .map_err(|e| RecorderError::PermissionDenied(e.to_string()))?
            .take()
            .ok_or_else(|| RecorderError::PermissionDenied("screen sharing declined".into()))?;

        let released = self.released.clone();
        Ok(MediaStream::new(self.width, self.height, receiver)
            .with_release(move || released.store(true, Ordering::SeqCst)))
    }
}

/// Starts recordings against a display media provider.
pub struct ScreenRecorder<P: DisplayMediaProvider> {
    provider: P,
}

impl<P: DisplayMediaProvider> ScreenRecorder<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Ask for the stream and begin buffering. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<RecordingControl, RecorderError> {
        let stream = self.provider.request_stream().map_err(|e| {
            log::error!("[RECORDER] Could not obtain display stream: {}", e);
            e
        })?;

        log::info!("[RECORDER] Recording {}x{}", stream.width, stream.height);

        let (stop_tx, stop_rx) = oneshot::channel();
        let recording = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(record(stream, stop_rx, recording.clone()));

        Ok(RecordingControl {
            stop: Some(stop_tx),
            recording,
            handle,
        })
    }
}

/// The floating control: recording indicator plus the stop button.
pub struct RecordingControl {
    stop: Option<oneshot::Sender<()>>,
    recording: Arc<AtomicBool>,
    handle: JoinHandle<Result<CapturedPayload, RecorderError>>,
}

impl RecordingControl {
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Manual stop. A no-op if the stream already ended.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Split into the stop button and the recorder task, for callers that
    /// keep listening to other events while the recording runs.
    pub fn into_parts(self) -> (StopHandle, JoinHandle<Result<CapturedPayload, RecorderError>>) {
        let RecordingControl {
            stop,
            recording,
            handle,
        } = self;
        (StopHandle { stop, recording }, handle)
    }

    /// Wait for the recorder to finish and take the payload.
    pub async fn finished(self) -> Result<CapturedPayload, RecorderError> {
        // Keep the stop sender alive while waiting so only an explicit stop
        // or the end of the stream ends the recording.
        let RecordingControl { stop, handle, .. } = self;
        let result = handle
            .await
            .map_err(|e| RecorderError::Aborted(e.to_string()))?;
        drop(stop);
        result
    }
}

/// Stop button detached from its recording. Dropping it also stops the
/// recording.
pub struct StopHandle {
    stop: Option<oneshot::Sender<()>>,
    recording: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn record(
    mut stream: MediaStream,
    mut stop_rx: oneshot::Receiver<()>,
    recording: Arc<AtomicBool>,
) -> Result<CapturedPayload, RecorderError> {
    let started = Instant::now();
    let mut chunks: Vec<Vec<u8>> = Vec::new();

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                log::info!("[RECORDER] Stop requested");
                break;
            }
            chunk = stream.chunks.recv() => match chunk {
                Some(chunk) => {
                    if !chunk.is_empty() {
                        chunks.push(chunk);
                    }
                }
                None => {
                    log::info!("[RECORDER] Stream ended, stopping");
                    break;
                }
            },
        }
    }

    // Final data already queued before the stop.
    while let Ok(chunk) = stream.chunks.try_recv() {
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
    }

    recording.store(false, Ordering::SeqCst);
    stream.release();

    let duration_seconds = started.elapsed().as_secs_f64();
    if chunks.is_empty() {
        return Err(RecorderError::NothingRecorded);
    }

    let bytes = chunks.concat();
    log::info!(
        "[RECORDER] Recorded {} chunks, {} bytes in {:.1}s",
        chunks.len(),
        bytes.len(),
        duration_seconds
    );

    Ok(CapturedPayload::Video {
        bytes,
        duration_seconds,
        width: stream.width,
        height: stream.height,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Screen recording was not permitted: {0}")]
    PermissionDenied(String),

    #[error("Recording stopped before any data was captured")]
    NothingRecorded,

    #[error("Recorder task aborted: {0}")]
    Aborted(String),
}
