//! services/coach/src/adapters/browser_audio.rs
//!
//! Audio devices backed by the browser on the other end of the `/live` socket.
//!
//! The browser owns the real microphone and speakers. These adapters turn the
//! socket into the `AudioInput` / `AudioOutput` ports: device requests go out as
//! [`BrowserCommand`]s, and the socket handler feeds permission answers and
//! microphone frames back in through [`BrowserAudioInput`].

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use titanfit_core::audio::PcmBuffer;
use titanfit_core::ports::{
    AudioInput, AudioOutput, CaptureStream, PlaybackDevice, PortError, PortResult,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// A request for the browser side of the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserCommand {
    RequestMicrophone { sample_rate: u32 },
    ReleaseMicrophone,
    Play {
        start_at: f64,
        duration: f64,
        sample_rate: u32,
        pcm: Vec<u8>,
    },
    ReleaseSpeaker,
}

pub type CommandSender = mpsc::UnboundedSender<BrowserCommand>;

//=========================================================================================
// Microphone
//=========================================================================================

struct PendingAnswer {
    request_id: u64,
    answer: oneshot::Sender<bool>,
}

struct InputShared {
    pending_permission: Mutex<Option<PendingAnswer>>,
    next_request_id: AtomicU64,
    frames: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
}

/// The browser microphone. Clones share the same pending request and frame queue.
#[derive(Clone)]
pub struct BrowserAudioInput {
    commands: CommandSender,
    permission_timeout: Duration,
    shared: Arc<InputShared>,
}

impl BrowserAudioInput {
    pub fn new(commands: CommandSender, permission_timeout: Duration) -> Self {
        Self {
            commands,
            permission_timeout,
            shared: Arc::new(InputShared {
                pending_permission: Mutex::new(None),
                next_request_id: AtomicU64::new(0),
                frames: Mutex::new(None),
            }),
        }
    }

    /// Delivers the user's answer to an outstanding microphone request.
    /// An answer with no request outstanding is ignored.
    pub fn answer_permission(&self, granted: bool) {
        let pending = self
            .shared
            .pending_permission
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        match pending {
            Some(pending) => {
                let _ = pending.answer.send(granted);
            }
            None => debug!(granted, "Microphone answer without a pending request."),
        }
    }

    fn register_request(&self, answer: oneshot::Sender<bool>) -> PortResult<PermissionRequest> {
        let request_id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);
        let mut slot = self
            .shared
            .pending_permission
            .lock()
            .map_err(|_| PortError::Unexpected("permission slot poisoned".to_string()))?;
        *slot = Some(PendingAnswer { request_id, answer });
        Ok(PermissionRequest {
            request_id,
            shared: self.shared.clone(),
            commands: self.commands.clone(),
            handed_over: false,
        })
    }

    /// Queues one microphone frame for the capture stream.
    ///
    /// The queue holds a single frame; while it is full, newer frames are dropped.
    /// Returns whether the frame was accepted.
    pub fn push_frame(&self, samples: Vec<f32>) -> bool {
        let Ok(mut slot) = self.shared.frames.lock() else {
            return false;
        };
        let Some(tx) = slot.as_ref() else {
            return false;
        };
        match tx.try_send(samples) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Capture queue full; dropping microphone frame.");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                *slot = None;
                false
            }
        }
    }
}

/// A microphone request in flight.
///
/// Unless it becomes a capture stream, dropping it withdraws the request and
/// tells the browser to let go of the microphone, so a late grant is never left open.
struct PermissionRequest {
    request_id: u64,
    shared: Arc<InputShared>,
    commands: CommandSender,
    handed_over: bool,
}

impl PermissionRequest {
    fn into_capture(mut self, frames: mpsc::Receiver<Vec<f32>>) -> BrowserCapture {
        self.handed_over = true;
        BrowserCapture {
            frames,
            commands: self.commands.clone(),
        }
    }
}

impl Drop for PermissionRequest {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.shared.pending_permission.lock() {
            if slot
                .as_ref()
                .is_some_and(|pending| pending.request_id == self.request_id)
            {
                slot.take();
            }
        }
        if !self.handed_over {
            let _ = self.commands.send(BrowserCommand::ReleaseMicrophone);
            debug!("Microphone request withdrawn.");
        }
    }
}

/// The capture stream handed to the relay. Dropping it releases the microphone.
struct BrowserCapture {
    frames: mpsc::Receiver<Vec<f32>>,
    commands: CommandSender,
}

impl Stream for BrowserCapture {
    type Item = Vec<f32>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_recv(cx)
    }
}

impl Drop for BrowserCapture {
    fn drop(&mut self) {
        let _ = self.commands.send(BrowserCommand::ReleaseMicrophone);
        info!("Microphone released.");
    }
}

#[async_trait]
impl AudioInput for BrowserAudioInput {
    async fn open(&self, sample_rate: u32) -> PortResult<CaptureStream> {
        let (answer_tx, answer_rx) = oneshot::channel();
        let request = self.register_request(answer_tx)?;

        self.commands
            .send(BrowserCommand::RequestMicrophone { sample_rate })
            .map_err(|_| PortError::Closed("browser disconnected".to_string()))?;

        let granted = match tokio::time::timeout(self.permission_timeout, answer_rx).await {
            Ok(Ok(granted)) => granted,
            Ok(Err(_)) => return Err(PortError::Cancelled),
            Err(_) => {
                warn!("Microphone permission request timed out.");
                return Err(PortError::PermissionDenied(
                    "no answer to the microphone request".to_string(),
                ));
            }
        };
        if !granted {
            return Err(PortError::PermissionDenied(
                "microphone access refused".to_string(),
            ));
        }

        let (frame_tx, frame_rx) = mpsc::channel(1);
        *self
            .shared
            .frames
            .lock()
            .map_err(|_| PortError::Unexpected("frame queue poisoned".to_string()))? =
            Some(frame_tx);

        info!(sample_rate, "Microphone opened.");
        Ok(Box::pin(request.into_capture(frame_rx)))
    }
}

//=========================================================================================
// Speaker
//=========================================================================================

/// The browser speaker.
#[derive(Clone)]
pub struct BrowserAudioOutput {
    commands: CommandSender,
}

impl BrowserAudioOutput {
    pub fn new(commands: CommandSender) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl AudioOutput for BrowserAudioOutput {
    async fn open(&self, sample_rate: u32) -> PortResult<Box<dyn PlaybackDevice>> {
        if self.commands.is_closed() {
            return Err(PortError::Closed("browser disconnected".to_string()));
        }
        debug!(sample_rate, "Speaker opened.");
        Ok(Box::new(BrowserPlayback {
            commands: self.commands.clone(),
            opened_at: Instant::now(),
            closed: false,
        }))
    }
}

/// A playback context whose clock starts when it is opened.
/// The browser mirrors it by anchoring `start_at` to its own context time.
struct BrowserPlayback {
    commands: CommandSender,
    opened_at: Instant,
    closed: bool,
}

#[async_trait]
impl PlaybackDevice for BrowserPlayback {
    fn current_time(&self) -> f64 {
        self.opened_at.elapsed().as_secs_f64()
    }

    async fn play(&mut self, buffer: &PcmBuffer, start_at: f64) -> PortResult<()> {
        if self.closed {
            return Err(PortError::Closed("speaker closed".to_string()));
        }
        self.commands
            .send(BrowserCommand::Play {
                start_at,
                duration: buffer.duration(),
                sample_rate: buffer.sample_rate,
                pcm: buffer.to_pcm16(),
            })
            .map_err(|_| PortError::Closed("browser disconnected".to_string()))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.commands.send(BrowserCommand::ReleaseSpeaker);
        }
    }
}
