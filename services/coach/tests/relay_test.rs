//! Session relay lifecycle against in-process audio devices and voice endpoint.

use async_trait::async_trait;
use futures::channel::mpsc as remote;
use futures::{stream, Sink, SinkExt, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use coach_lib::live::{
    EndReason, RelayError, RelayEvent, RelayState, SessionRelay, SessionSlot,
};
use titanfit_core::audio::{encode_frame, PcmBuffer};
use titanfit_core::ports::{
    AudioInput, AudioOutput, CaptureStream, PlaybackDevice, PortError, PortResult, VoiceEvent,
    VoiceFrame, VoiceLink, VoiceTransport,
};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(2);

//=========================================================================================
// Fakes
//=========================================================================================

#[derive(Clone, Copy, PartialEq)]
enum Permission {
    Grant,
    Deny,
    NeverAnswer,
}

/// Sets the flag when the capture stream is dropped.
struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct FakeMicrophone {
    permission: Permission,
    frames: Mutex<Option<mpsc::Receiver<Vec<f32>>>>,
    released: Arc<AtomicBool>,
}

impl FakeMicrophone {
    fn new(permission: Permission) -> (Arc<Self>, mpsc::Sender<Vec<f32>>) {
        let (tx, rx) = mpsc::channel(8);
        let mic = Arc::new(Self {
            permission,
            frames: Mutex::new(Some(rx)),
            released: Arc::new(AtomicBool::new(false)),
        });
        (mic, tx)
    }
}

#[async_trait]
impl AudioInput for FakeMicrophone {
    async fn open(&self, _sample_rate: u32) -> PortResult<CaptureStream> {
        match self.permission {
            Permission::Deny => {
                return Err(PortError::PermissionDenied("refused".to_string()));
            }
            Permission::NeverAnswer => futures::future::pending::<()>().await,
            Permission::Grant => {}
        }
        let rx = self
            .frames
            .lock()
            .unwrap()
            .take()
            .expect("microphone opened twice");
        let guard = ReleaseGuard(self.released.clone());
        Ok(Box::pin(stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|frame| (frame, (rx, guard)))
        })))
    }
}

#[derive(Default)]
struct SpeakerLog {
    plays: Mutex<Vec<(f64, f64)>>,
    closed: AtomicBool,
}

struct FakeSpeaker {
    log: Arc<SpeakerLog>,
}

struct FakeDevice {
    log: Arc<SpeakerLog>,
}

#[async_trait]
impl AudioOutput for FakeSpeaker {
    async fn open(&self, _sample_rate: u32) -> PortResult<Box<dyn PlaybackDevice>> {
        Ok(Box::new(FakeDevice {
            log: self.log.clone(),
        }))
    }
}

#[async_trait]
impl PlaybackDevice for FakeDevice {
    // The clock stands still, so every buffer is queued behind the previous one.
    fn current_time(&self) -> f64 {
        0.0
    }

    async fn play(&mut self, buffer: &PcmBuffer, start_at: f64) -> PortResult<()> {
        self.log
            .plays
            .lock()
            .unwrap()
            .push((start_at, buffer.duration()));
        Ok(())
    }

    async fn close(&mut self) {
        self.log.closed.store(true, Ordering::SeqCst);
    }
}

/// The remote side of a fake voice session.
struct Remote {
    received: remote::UnboundedReceiver<VoiceFrame>,
    events: remote::UnboundedSender<PortResult<VoiceEvent>>,
}

/// An uplink that rejects its first `failures` frames, then delivers the rest.
struct FlakyUplink {
    inner: remote::UnboundedSender<VoiceFrame>,
    failures: usize,
}

impl Sink<VoiceFrame> for FlakyUplink {
    type Error = PortError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<PortResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(mut self: Pin<&mut Self>, frame: VoiceFrame) -> PortResult<()> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(PortError::Closed("frame rejected".to_string()));
        }
        self.inner
            .unbounded_send(frame)
            .map_err(|e| PortError::Closed(e.to_string()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<PortResult<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<PortResult<()>> {
        self.inner.close_channel();
        Poll::Ready(Ok(()))
    }
}

#[derive(Default)]
struct FakeEndpoint {
    connects: AtomicUsize,
    remote: Mutex<Option<Remote>>,
    unreachable: bool,
    failing_sends: usize,
}

#[async_trait]
impl VoiceTransport for FakeEndpoint {
    async fn connect(&self) -> PortResult<VoiceLink> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(PortError::Unexpected("voice endpoint unreachable".to_string()));
        }
        let (up_tx, up_rx) = remote::unbounded();
        let (down_tx, down_rx) = remote::unbounded();
        *self.remote.lock().unwrap() = Some(Remote {
            received: up_rx,
            events: down_tx,
        });
        Ok(VoiceLink {
            uplink: Box::pin(FlakyUplink {
                inner: up_tx,
                failures: self.failing_sends,
            }),
            downlink: Box::pin(down_rx),
        })
    }
}

struct Harness {
    relay: Arc<SessionRelay>,
    events: mpsc::UnboundedReceiver<RelayEvent>,
    mic: Arc<FakeMicrophone>,
    mic_frames: mpsc::Sender<Vec<f32>>,
    speaker: Arc<SpeakerLog>,
    endpoint: Arc<FakeEndpoint>,
}

impl Harness {
    fn new(permission: Permission) -> Self {
        Self::build(permission, FakeEndpoint::default(), SessionSlot::new())
    }

    fn build(permission: Permission, endpoint: FakeEndpoint, slot: SessionSlot) -> Self {
        let (mic, mic_frames) = FakeMicrophone::new(permission);
        let speaker = Arc::new(SpeakerLog::default());
        let endpoint = Arc::new(endpoint);
        let (relay, events) = SessionRelay::with_slot(
            mic.clone(),
            Arc::new(FakeSpeaker {
                log: speaker.clone(),
            }),
            endpoint.clone(),
            slot,
        );
        Self {
            relay: Arc::new(relay),
            events,
            mic,
            mic_frames,
            speaker,
            endpoint,
        }
    }

    fn remote(&self) -> Remote {
        self.endpoint
            .remote
            .lock()
            .unwrap()
            .take()
            .expect("endpoint not connected")
    }

    async fn next_event(&mut self) -> RelayEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for a relay event")
            .expect("relay event channel closed")
    }
}

fn silence(seconds: f64) -> String {
    encode_frame(&vec![0.0; (24_000.0 * seconds).round() as usize])
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

//=========================================================================================
// Tests
//=========================================================================================

#[tokio::test]
async fn start_then_stop_releases_every_device() {
    let mut h = Harness::new(Permission::Grant);

    h.relay.start().await.unwrap();
    assert_eq!(h.relay.state(), RelayState::Active);
    assert_eq!(h.next_event().await, RelayEvent::Started);

    h.relay.stop().await;
    assert_eq!(h.relay.state(), RelayState::Idle);
    assert_eq!(
        h.next_event().await,
        RelayEvent::Ended {
            reason: EndReason::LocalStop
        }
    );
    assert!(h.mic.released.load(Ordering::SeqCst));
    assert!(h.speaker.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn second_start_is_rejected_while_running() {
    let h = Harness::new(Permission::Grant);

    h.relay.start().await.unwrap();
    assert!(matches!(h.relay.start().await, Err(RelayError::AlreadyRunning)));
    assert_eq!(h.endpoint.connects.load(Ordering::SeqCst), 1);

    h.relay.stop().await;
}

#[tokio::test]
async fn stop_when_idle_does_nothing() {
    let mut h = Harness::new(Permission::Grant);

    h.relay.stop().await;
    h.relay.stop().await;
    assert_eq!(h.relay.state(), RelayState::Idle);
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn denied_microphone_leaves_the_relay_idle() {
    let h = Harness::new(Permission::Deny);

    let result = h.relay.start().await;
    assert!(matches!(result, Err(RelayError::PermissionDenied(_))));
    assert_eq!(h.relay.state(), RelayState::Idle);
    assert_eq!(h.endpoint.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stop_while_connecting_cancels_the_start() {
    let h = Harness::new(Permission::NeverAnswer);

    let relay = h.relay.clone();
    let starting = tokio::spawn(async move { relay.start().await });
    let relay = h.relay.clone();
    wait_until(move || relay.state() == RelayState::Connecting).await;

    h.relay.stop().await;
    let result = starting.await.unwrap();
    assert!(matches!(result, Err(RelayError::Cancelled)));
    assert_eq!(h.relay.state(), RelayState::Idle);
    assert_eq!(h.endpoint.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn remote_close_tears_the_session_down() {
    let mut h = Harness::new(Permission::Grant);
    h.relay.start().await.unwrap();
    assert_eq!(h.next_event().await, RelayEvent::Started);

    let remote = h.remote();
    remote
        .events
        .unbounded_send(Ok(VoiceEvent::Closed(Some("bye".to_string()))))
        .unwrap();

    assert_eq!(
        h.next_event().await,
        RelayEvent::Ended {
            reason: EndReason::RemoteClosed(Some("bye".to_string()))
        }
    );
    assert_eq!(h.relay.state(), RelayState::Idle);
    assert!(h.mic.released.load(Ordering::SeqCst));
    assert!(h.speaker.closed.load(Ordering::SeqCst));

    // A fresh session can start after a remote close.
    *h.mic.frames.lock().unwrap() = Some(mpsc::channel(1).1);
    h.relay.start().await.unwrap();
    h.relay.stop().await;
}

#[tokio::test]
async fn inbound_audio_is_scheduled_back_to_back() {
    let mut h = Harness::new(Permission::Grant);
    h.relay.start().await.unwrap();
    assert_eq!(h.next_event().await, RelayEvent::Started);

    let remote = h.remote();
    for seconds in [0.5, 0.3, 0.4] {
        remote
            .events
            .unbounded_send(Ok(VoiceEvent::Audio(silence(seconds))))
            .unwrap();
    }
    remote
        .events
        .unbounded_send(Ok(VoiceEvent::Text("Nice pace".to_string())))
        .unwrap();

    assert_eq!(
        h.next_event().await,
        RelayEvent::Transcript("Nice pace".to_string())
    );
    let speaker = h.speaker.clone();
    wait_until(move || speaker.plays.lock().unwrap().len() == 3).await;

    let starts: Vec<f64> = h.speaker.plays.lock().unwrap().iter().map(|p| p.0).collect();
    for (actual, expected) in starts.iter().zip([0.0, 0.5, 0.8]) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    h.relay.stop().await;
}

#[tokio::test]
async fn captured_frames_reach_the_endpoint_as_pcm16() {
    let mut h = Harness::new(Permission::Grant);
    h.relay.start().await.unwrap();
    assert_eq!(h.next_event().await, RelayEvent::Started);
    let mut remote = h.remote();

    let samples = vec![0.0, 0.5, -0.5];
    h.mic_frames.send(samples.clone()).await.unwrap();

    let frame = tokio::time::timeout(WAIT, remote.received.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
    assert_eq!(frame.data, encode_frame(&samples));

    h.relay.stop().await;
    // The uplink is closed once capture has finished.
    assert_eq!(
        tokio::time::timeout(WAIT, remote.received.next()).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn remote_error_tears_the_session_down() {
    let mut h = Harness::new(Permission::Grant);
    h.relay.start().await.unwrap();
    assert_eq!(h.next_event().await, RelayEvent::Started);

    let remote = h.remote();
    remote
        .events
        .unbounded_send(Err(PortError::Closed("connection reset".to_string())))
        .unwrap();

    let RelayEvent::Ended { reason } = h.next_event().await else {
        panic!("expected the session to end");
    };
    assert!(matches!(reason, EndReason::RemoteError(ref e) if e.contains("connection reset")));
    assert_eq!(h.relay.state(), RelayState::Idle);
    assert!(h.mic.released.load(Ordering::SeqCst));
    assert!(h.speaker.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failed_send_does_not_hold_up_later_frames() {
    let endpoint = FakeEndpoint {
        failing_sends: 1,
        ..FakeEndpoint::default()
    };
    let mut h = Harness::build(Permission::Grant, endpoint, SessionSlot::new());
    h.relay.start().await.unwrap();
    assert_eq!(h.next_event().await, RelayEvent::Started);
    let mut remote = h.remote();

    h.mic_frames.send(vec![0.25]).await.unwrap();
    h.mic_frames.send(vec![-0.25]).await.unwrap();

    let frame = tokio::time::timeout(WAIT, remote.received.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.data, encode_frame(&[-0.25]));
    assert_eq!(h.relay.state(), RelayState::Active);

    h.relay.stop().await;
}

#[tokio::test]
async fn unreachable_endpoint_releases_the_granted_microphone() {
    let endpoint = FakeEndpoint {
        unreachable: true,
        ..FakeEndpoint::default()
    };
    let h = Harness::build(Permission::Grant, endpoint, SessionSlot::new());

    let result = h.relay.start().await;
    assert!(matches!(result, Err(RelayError::Port(_))));
    assert_eq!(h.relay.state(), RelayState::Idle);
    assert!(h.mic.released.load(Ordering::SeqCst));
    assert!(!h.speaker.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn relays_sharing_a_slot_run_one_session_at_a_time() {
    let slot = SessionSlot::new();
    let mut first = Harness::build(Permission::Grant, FakeEndpoint::default(), slot.clone());
    let second = Harness::build(Permission::Grant, FakeEndpoint::default(), slot);

    first.relay.start().await.unwrap();
    assert_eq!(first.next_event().await, RelayEvent::Started);

    assert!(matches!(second.relay.start().await, Err(RelayError::AlreadyRunning)));
    assert_eq!(second.relay.state(), RelayState::Idle);
    assert_eq!(second.endpoint.connects.load(Ordering::SeqCst), 0);

    first.relay.stop().await;
    second.relay.start().await.unwrap();
    assert_eq!(second.relay.state(), RelayState::Active);
    second.relay.stop().await;
}

#[tokio::test]
async fn failed_start_frees_the_slot() {
    let slot = SessionSlot::new();
    let denied = Harness::build(Permission::Deny, FakeEndpoint::default(), slot.clone());
    let granted = Harness::build(Permission::Grant, FakeEndpoint::default(), slot);

    assert!(denied.relay.start().await.is_err());
    granted.relay.start().await.unwrap();
    granted.relay.stop().await;
}
