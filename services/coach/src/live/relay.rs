//! services/coach/src/live/relay.rs
//!
//! The live voice coaching session: microphone to endpoint, endpoint to speaker.
//!
//! A relay moves through `Idle -> Connecting -> Active -> Closing -> Idle`.
//! Only one session runs at a time, across every relay sharing a [`SessionSlot`].
//! Once active, a capture task and a playback
//! task run side by side under a supervisor, which is the only place a session
//! is torn down, whether the user stopped it or the endpoint went away.

use std::sync::Arc;
use titanfit_core::audio::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use titanfit_core::ports::{
    AudioInput, AudioOutput, PortError, PortResult, VoiceTransport,
};
use tokio::sync::{mpsc, watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::capture_task::capture_process;
use super::playback_task::playback_process;

//=========================================================================================
// Public Types
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Connecting,
    Active,
    Closing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    LocalStop,
    /// The microphone stream ended on its own.
    InputEnded,
    RemoteClosed(Option<String>),
    RemoteError(String),
    OutputFailed(String),
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::LocalStop => write!(f, "stopped"),
            EndReason::InputEnded => write!(f, "microphone closed"),
            EndReason::RemoteClosed(None) => write!(f, "coach disconnected"),
            EndReason::RemoteClosed(Some(reason)) => write!(f, "coach disconnected: {reason}"),
            EndReason::RemoteError(e) => write!(f, "connection error: {e}"),
            EndReason::OutputFailed(e) => write!(f, "playback failed: {e}"),
        }
    }
}

/// Notifications for whoever drives the relay (the `/live` socket).
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Started,
    Transcript(String),
    Ended { reason: EndReason },
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("a voice session is already running")]
    AlreadyRunning,
    #[error("microphone access was denied: {0}")]
    PermissionDenied(String),
    #[error("the session was stopped before it started")]
    Cancelled,
    #[error("failed to start the voice session: {0}")]
    Port(PortError),
}

impl From<PortError> for RelayError {
    fn from(error: PortError) -> Self {
        match error {
            PortError::PermissionDenied(reason) => RelayError::PermissionDenied(reason),
            PortError::Cancelled => RelayError::Cancelled,
            other => RelayError::Port(other),
        }
    }
}

/// Admits one voice session at a time among the relays that share it.
///
/// Every `/live` socket builds its own relay around its own browser devices;
/// they all share the installation's slot.
#[derive(Clone)]
pub struct SessionSlot(Arc<Semaphore>);

impl SessionSlot {
    pub fn new() -> Self {
        Self(Arc::new(Semaphore::new(1)))
    }

    fn try_claim(&self) -> Option<OwnedSemaphorePermit> {
        self.0.clone().try_acquire_owned().ok()
    }
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self::new()
    }
}

//=========================================================================================
// SessionRelay
//=========================================================================================

struct Session {
    cancellation_token: Option<CancellationToken>,
    supervisor: Option<JoinHandle<()>>,
}

pub struct SessionRelay {
    input: Arc<dyn AudioInput>,
    output: Arc<dyn AudioOutput>,
    transport: Arc<dyn VoiceTransport>,
    slot: SessionSlot,
    state: Arc<watch::Sender<RelayState>>,
    // Start and stop take this lock for their state transitions.
    session: Mutex<Session>,
    events: mpsc::UnboundedSender<RelayEvent>,
}

impl SessionRelay {
    /// Creates an idle relay with a slot of its own, and the receiver for its events.
    pub fn new(
        input: Arc<dyn AudioInput>,
        output: Arc<dyn AudioOutput>,
        transport: Arc<dyn VoiceTransport>,
    ) -> (Self, mpsc::UnboundedReceiver<RelayEvent>) {
        Self::with_slot(input, output, transport, SessionSlot::new())
    }

    /// Creates an idle relay that runs only while it holds `slot`.
    pub fn with_slot(
        input: Arc<dyn AudioInput>,
        output: Arc<dyn AudioOutput>,
        transport: Arc<dyn VoiceTransport>,
        slot: SessionSlot,
    ) -> (Self, mpsc::UnboundedReceiver<RelayEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(RelayState::Idle);
        let relay = Self {
            input,
            output,
            transport,
            slot,
            state: Arc::new(state),
            session: Mutex::new(Session {
                cancellation_token: None,
                supervisor: None,
            }),
            events,
        };
        (relay, events_rx)
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Opens the microphone, the voice endpoint and the speaker, then starts relaying.
    ///
    /// Fails with `AlreadyRunning` unless the relay is idle and the shared slot is
    /// free. On any other failure, including a `stop()` issued while connecting,
    /// everything acquired so far is released and the relay is idle again.
    #[instrument(skip_all)]
    pub async fn start(&self) -> Result<(), RelayError> {
        let (token, permit) = {
            let mut session = self.session.lock().await;
            if self.state() != RelayState::Idle {
                return Err(RelayError::AlreadyRunning);
            }
            let Some(permit) = self.slot.try_claim() else {
                return Err(RelayError::AlreadyRunning);
            };
            let token = CancellationToken::new();
            session.cancellation_token = Some(token.clone());
            session.supervisor = None;
            self.state.send_replace(RelayState::Connecting);
            (token, permit)
        };
        info!("Starting voice session.");

        match self.connect(&token, permit).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut session = self.session.lock().await;
                session.cancellation_token = None;
                self.state.send_replace(RelayState::Idle);
                warn!("Voice session failed to start: {}", e);
                Err(e)
            }
        }
    }

    async fn connect(
        &self,
        token: &CancellationToken,
        permit: OwnedSemaphorePermit,
    ) -> Result<(), RelayError> {
        let capture = cancellable(token, self.input.open(CAPTURE_SAMPLE_RATE)).await?;
        let link = cancellable(token, self.transport.connect()).await?;
        let mut device = cancellable(token, self.output.open(PLAYBACK_SAMPLE_RATE)).await?;

        // The session lock orders this check against a concurrent stop().
        let mut session = self.session.lock().await;
        if token.is_cancelled() {
            drop(session);
            device.close().await;
            return Err(RelayError::Cancelled);
        }

        // Active before any task exists, so the supervisor's Idle always comes last.
        self.state.send_replace(RelayState::Active);
        let _ = self.events.send(RelayEvent::Started);

        let capture_handle = tokio::spawn(capture_process(
            capture,
            link.uplink,
            token.child_token(),
        ));
        let playback_handle = tokio::spawn(playback_process(
            link.downlink,
            device,
            self.events.clone(),
            token.child_token(),
        ));
        session.supervisor = Some(tokio::spawn(supervise(
            capture_handle,
            playback_handle,
            token.clone(),
            self.state.clone(),
            self.events.clone(),
            permit,
        )));

        drop(session);
        info!("Voice session active.");
        Ok(())
    }

    /// Ends the current session and waits until teardown has finished.
    /// Does nothing when the relay is idle.
    pub async fn stop(&self) {
        let (token, supervisor) = {
            let mut session = self.session.lock().await;
            if self.state() == RelayState::Idle {
                return;
            }
            (
                session.cancellation_token.clone(),
                session.supervisor.take(),
            )
        };

        info!("Stopping voice session.");
        if let Some(token) = token {
            token.cancel();
        }
        if let Some(supervisor) = supervisor {
            if let Err(e) = supervisor.await {
                error!("Voice session supervisor failed: {:?}", e);
            }
        }

        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == RelayState::Idle).await;
    }
}

impl Drop for SessionRelay {
    fn drop(&mut self) {
        if let Ok(session) = self.session.try_lock() {
            if let Some(token) = &session.cancellation_token {
                token.cancel();
            }
        }
    }
}

async fn cancellable<T>(
    token: &CancellationToken,
    step: impl std::future::Future<Output = PortResult<T>>,
) -> Result<T, RelayError> {
    tokio::select! {
        _ = token.cancelled() => Err(RelayError::Cancelled),
        result = step => result.map_err(RelayError::from),
    }
}

//=========================================================================================
// Supervisor
//=========================================================================================

/// Waits for the session to end for any reason, then tears it down.
///
/// A local stop wins over whatever the workers report, since cancelling them
/// makes both finish at once. The slot is handed back after the relay is idle.
async fn supervise(
    mut capture: JoinHandle<EndReason>,
    mut playback: JoinHandle<EndReason>,
    cancellation_token: CancellationToken,
    state: Arc<watch::Sender<RelayState>>,
    events: mpsc::UnboundedSender<RelayEvent>,
    permit: OwnedSemaphorePermit,
) {
    let mut capture_done = false;
    let mut playback_done = false;

    let reason = tokio::select! {
        biased;
        _ = cancellation_token.cancelled() => EndReason::LocalStop,
        finished = &mut playback => {
            playback_done = true;
            finished.unwrap_or_else(|e| EndReason::RemoteError(format!("playback task failed: {e}")))
        }
        finished = &mut capture => {
            capture_done = true;
            finished.unwrap_or_else(|e| EndReason::RemoteError(format!("capture task failed: {e}")))
        }
    };

    state.send_replace(RelayState::Closing);
    cancellation_token.cancel();

    if !capture_done {
        if let Err(e) = capture.await {
            error!("Capture task failed: {:?}", e);
        }
    }
    if !playback_done {
        if let Err(e) = playback.await {
            error!("Playback task failed: {:?}", e);
        }
    }

    info!(?reason, "Voice session ended.");
    state.send_replace(RelayState::Idle);
    let _ = events.send(RelayEvent::Ended { reason });
    drop(permit);
}
