//! services/coach/src/adapters/voice_ws.rs
//!
//! This module contains the adapter for the live voice endpoint.
//! It implements the `VoiceTransport` port from the `core` crate over a
//! bidirectional WebSocket speaking the Gemini Live JSON protocol.

use async_trait::async_trait;
use futures::{future, stream, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use titanfit_core::ports::{
    PortError, PortResult, VoiceEvent, VoiceFrame, VoiceLink, VoiceTransport,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const SETUP_TIMEOUT: Duration = Duration::from_secs(15);
const SYSTEM_INSTRUCTION: &str =
    "You are Titan, the AI Fitness Coach. Speak to the user as a peer and expert.";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `VoiceTransport` for the Gemini Live endpoint.
#[derive(Clone)]
pub struct WsVoiceTransport {
    endpoint: String,
    api_key: String,
    model: String,
    voice_name: String,
}

impl WsVoiceTransport {
    /// Creates a new `WsVoiceTransport`.
    pub fn new(endpoint: String, api_key: String, model: String, voice_name: String) -> Self {
        Self {
            endpoint,
            api_key,
            model,
            voice_name,
        }
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, urlencoding::encode(&self.api_key))
    }

    fn setup_message(&self) -> String {
        json!({
            "setup": {
                "model": self.model,
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": { "voiceName": self.voice_name }
                        }
                    }
                },
                "systemInstruction": {
                    "parts": [{ "text": SYSTEM_INSTRUCTION }]
                },
                "outputAudioTranscription": {}
            }
        })
        .to_string()
    }
}

//=========================================================================================
// Wire Format
//=========================================================================================

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    output_transcription: Option<Transcription>,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Deserialize, Default)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Deserialize)]
struct Transcription {
    text: String,
}

/// Serializes one captured frame as a realtime-input message.
fn realtime_input(frame: &VoiceFrame) -> String {
    json!({
        "realtimeInput": {
            "mediaChunks": [{ "mimeType": frame.mime_type, "data": frame.data }]
        }
    })
    .to_string()
}

fn message_text(message: &Message) -> Option<&str> {
    match message {
        Message::Text(text) => Some(text.as_str()),
        Message::Binary(bytes) => std::str::from_utf8(bytes).ok(),
        _ => None,
    }
}

fn is_setup_complete(raw: &str) -> bool {
    serde_json::from_str::<ServerMessage>(raw)
        .map(|m| m.setup_complete.is_some())
        .unwrap_or(false)
}

/// Maps one server message to the events it carries, in order.
fn parse_server_message(raw: &str) -> Vec<VoiceEvent> {
    let message: ServerMessage = match serde_json::from_str(raw) {
        Ok(m) => m,
        Err(e) => {
            warn!("Ignoring unparseable voice message: {}", e);
            return Vec::new();
        }
    };

    let Some(content) = message.server_content else {
        return Vec::new();
    };

    let mut events = Vec::new();
    for part in content.model_turn.unwrap_or_default().parts {
        if let Some(inline) = part.inline_data {
            events.push(VoiceEvent::Audio(inline.data));
        }
        if let Some(text) = part.text.filter(|t| !t.is_empty()) {
            events.push(VoiceEvent::Text(text));
        }
    }
    if let Some(transcription) = content.output_transcription {
        if !transcription.text.is_empty() {
            events.push(VoiceEvent::Text(transcription.text));
        }
    }
    if content.turn_complete {
        events.push(VoiceEvent::TurnComplete);
    }
    events
}

fn downlink_events(
    message: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Vec<PortResult<VoiceEvent>> {
    match message {
        Ok(Message::Close(frame)) => {
            let reason = frame
                .map(|f| f.reason.to_string())
                .filter(|r| !r.is_empty());
            vec![Ok(VoiceEvent::Closed(reason))]
        }
        Ok(message) => match message_text(&message) {
            Some(raw) => parse_server_message(raw).into_iter().map(Ok).collect(),
            None => Vec::new(),
        },
        Err(e) => vec![Err(PortError::Closed(e.to_string()))],
    }
}

//=========================================================================================
// `VoiceTransport` Trait Implementation
//=========================================================================================

#[async_trait]
impl VoiceTransport for WsVoiceTransport {
    async fn connect(&self) -> PortResult<VoiceLink> {
        let (socket, _) = connect_async(self.url())
            .await
            .map_err(|e| PortError::Unexpected(format!("voice endpoint unreachable: {}", e)))?;
        let (mut sink, mut source) = socket.split();

        sink.send(Message::Text(self.setup_message()))
            .await
            .map_err(|e| PortError::Closed(e.to_string()))?;

        let handshake = async {
            while let Some(message) = source.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => return Err(PortError::Closed(e.to_string())),
                };
                if let Message::Close(frame) = &message {
                    let reason = frame
                        .as_ref()
                        .map(|f| f.reason.to_string())
                        .unwrap_or_default();
                    return Err(PortError::Closed(reason));
                }
                if message_text(&message).is_some_and(is_setup_complete) {
                    return Ok(());
                }
                debug!("Skipping pre-setup voice message.");
            }
            Err(PortError::Closed("stream ended during setup".to_string()))
        };
        tokio::time::timeout(SETUP_TIMEOUT, handshake)
            .await
            .map_err(|_| PortError::Unexpected("voice setup timed out".to_string()))??;

        info!(model = %self.model, "Voice session established.");

        let uplink = sink
            .sink_map_err(|e| PortError::Closed(e.to_string()))
            .with(|frame: VoiceFrame| {
                future::ready(Ok::<_, PortError>(Message::Text(realtime_input(&frame))))
            });
        let downlink = source.flat_map(|message| stream::iter(downlink_events(message)));

        Ok(VoiceLink {
            uplink: Box::pin(uplink),
            downlink: Box::pin(downlink),
        })
    }
}
