//! services/coach/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a live coaching WebSocket.
//! The browser on the other end is the session's microphone and speaker; the
//! relay behind it talks to the voice endpoint.

use crate::{
    adapters::browser_audio::{BrowserAudioInput, BrowserAudioOutput, BrowserCommand},
    live::{RelayError, RelayEvent, SessionRelay},
    web::{
        protocol::{ClientMessage, ServerMessage},
        state::AppState,
    },
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn live_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    info!("New live coaching connection established.");

    // The sender is wrapped in an Arc<Mutex<>> to allow for shared mutable access across tasks.
    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    // --- 1. Wire the browser up as the session's audio devices ---
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let microphone =
        BrowserAudioInput::new(commands_tx.clone(), app_state.config.mic_permission_timeout);
    let speaker = BrowserAudioOutput::new(commands_tx);
    let (relay, events) = SessionRelay::with_slot(
        Arc::new(microphone.clone()),
        Arc::new(speaker),
        app_state.voice.clone(),
        app_state.live_slot.clone(),
    );
    let relay = Arc::new(relay);

    let forwarder = tokio::spawn(forward_outbound(commands_rx, events, ws_sender.clone()));

    // --- 2. Main Message Loop ---
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                handle_text_message(text.as_str(), &relay, &microphone, &ws_sender).await;
            }
            Some(Ok(Message::Binary(data))) => match decode_f32_frame(&data) {
                Some(samples) => {
                    microphone.push_frame(samples);
                }
                None => warn!("Ignoring audio frame of {} bytes.", data.len()),
            },
            Some(Ok(Message::Close(_))) => {
                info!("Client sent close message.");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
            None => {
                info!("Client disconnected.");
                break;
            }
        }
    }

    // --- 3. Cleanup ---
    relay.stop().await;
    forwarder.abort();
    info!("Live coaching connection closed.");
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: &str,
    relay: &Arc<SessionRelay>,
    microphone: &BrowserAudioInput,
    ws_sender: &WsSender,
) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Start) => {
            info!("Start message received.");
            // Starting waits for the microphone answer, which arrives through this loop.
            let relay = relay.clone();
            let ws_sender = ws_sender.clone();
            tokio::spawn(async move {
                if let Err(e) = relay.start().await {
                    report_start_failure(&ws_sender, e).await;
                }
            });
        }
        Ok(ClientMessage::Stop) => {
            info!("Stop message received.");
            relay.stop().await;
        }
        Ok(ClientMessage::MicrophoneGranted) => microphone.answer_permission(true),
        Ok(ClientMessage::MicrophoneDenied) => microphone.answer_permission(false),
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
        }
    }
}

async fn report_start_failure(ws_sender: &WsSender, error: RelayError) {
    send_message(ws_sender, &start_failure_message(error)).await;
}

fn start_failure_message(error: RelayError) -> ServerMessage {
    let message = match error {
        RelayError::Cancelled => {
            return ServerMessage::SessionEnded {
                reason: RelayError::Cancelled.to_string(),
            };
        }
        RelayError::AlreadyRunning => "A voice session is already running.".to_string(),
        RelayError::PermissionDenied(_) => {
            "Microphone access is required for live coaching.".to_string()
        }
        RelayError::Port(e) => {
            error!("Voice session failed to start: {}", e);
            "The live coach is unavailable right now. Please try again.".to_string()
        }
    };
    ServerMessage::Error { message }
}

//=========================================================================================
// Outbound Traffic
//=========================================================================================

/// Forwards device commands and relay events to the browser until both sources close.
async fn forward_outbound(
    mut commands: mpsc::UnboundedReceiver<BrowserCommand>,
    mut events: mpsc::UnboundedReceiver<RelayEvent>,
    ws_sender: WsSender,
) {
    let mut commands_open = true;
    let mut events_open = true;

    while commands_open || events_open {
        tokio::select! {
            command = commands.recv(), if commands_open => match command {
                Some(command) => {
                    if !send_command(&ws_sender, command).await {
                        break;
                    }
                }
                None => commands_open = false,
            },
            event = events.recv(), if events_open => match event {
                Some(event) => {
                    if !send_message(&ws_sender, &event_message(event)).await {
                        break;
                    }
                }
                None => events_open = false,
            },
        }
    }
    debug!("Outbound forwarder finished.");
}

fn event_message(event: RelayEvent) -> ServerMessage {
    match event {
        RelayEvent::Started => ServerMessage::SessionStarted,
        RelayEvent::Transcript(text) => ServerMessage::Transcript { text },
        RelayEvent::Ended { reason } => ServerMessage::SessionEnded {
            reason: reason.to_string(),
        },
    }
}

async fn send_command(ws_sender: &WsSender, command: BrowserCommand) -> bool {
    match command {
        BrowserCommand::RequestMicrophone { sample_rate } => {
            send_message(ws_sender, &ServerMessage::MicrophoneRequested { sample_rate }).await
        }
        BrowserCommand::ReleaseMicrophone => {
            send_message(ws_sender, &ServerMessage::MicrophoneReleased).await
        }
        BrowserCommand::ReleaseSpeaker => {
            send_message(ws_sender, &ServerMessage::SpeakerReleased).await
        }
        BrowserCommand::Play {
            start_at,
            duration,
            sample_rate,
            pcm,
        } => {
            let header = ServerMessage::PlaybackScheduled {
                start_at,
                duration,
                sample_rate,
            };
            // Header and audio go out under one lock so no other frame lands between them.
            let Ok(header_json) = serde_json::to_string(&header) else {
                return false;
            };
            let mut sender = ws_sender.lock().await;
            if sender.send(Message::Text(header_json.into())).await.is_err() {
                error!("Failed to send playback header.");
                return false;
            }
            if sender.send(Message::Binary(pcm.into())).await.is_err() {
                error!("Failed to send audio chunk to client.");
                return false;
            }
            true
        }
    }
}

async fn send_message(ws_sender: &WsSender, message: &ServerMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return false;
        }
    };
    if ws_sender.lock().await.send(Message::Text(json.into())).await.is_err() {
        error!("Failed to send message to client.");
        return false;
    }
    true
}

/// Interprets a binary frame as little-endian `f32` samples.
fn decode_f32_frame(data: &[u8]) -> Option<Vec<f32>> {
    if data.is_empty() || data.len() % 4 != 0 {
        return None;
    }
    Some(
        data.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}
