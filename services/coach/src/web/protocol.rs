//! services/coach/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the
//! coach server for live voice coaching.

use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================
// NOTE: Microphone audio is sent as raw Binary frames of little-endian f32 samples,
// not as part of this enum.
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts a voice session. The server answers with `microphone_requested`.
    Start,

    /// Ends the running voice session.
    Stop,

    /// The user allowed microphone access; audio frames follow.
    MicrophoneGranted,

    /// The user refused microphone access.
    MicrophoneDenied,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================
// NOTE: The coach's voice is sent as raw Binary frames of 16-bit little-endian PCM.
// Each frame is announced by a `playback_scheduled` message.
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Asks the browser to open its microphone at `sample_rate`.
    MicrophoneRequested { sample_rate: u32 },

    /// Tells the browser to stop capturing.
    MicrophoneReleased,

    /// The microphone, endpoint and speaker are all open.
    SessionStarted,

    /// Text the coach produced alongside its voice.
    Transcript { text: String },

    /// The next binary frame starts at `start_at` seconds on the session's playback clock.
    PlaybackScheduled {
        start_at: f64,
        duration: f64,
        sample_rate: u32,
    },

    /// The speaker can be closed.
    SpeakerReleased,

    SessionEnded { reason: String },

    /// Reports an error to the client, which should display an error message.
    Error { message: String },
}
