//! crates/titanfit_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific storage, network, or audio implementations.

use async_trait::async_trait;
use futures::{Sink, Stream};
use std::pin::Pin;

use crate::audio::PcmBuffer;
use crate::domain::{Goal, Language, UserProfile};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., disk, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Storage failure: {0}")]
    Storage(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Connection closed: {0}")]
    Closed(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Durable Key-Value Storage
//=========================================================================================

/// Durable string storage scoped to one installation.
///
/// All operations are synchronous and complete without suspending.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> PortResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> PortResult<()>;

    /// Writes every pair or none of them; no reader observes a partial batch.
    fn set_many(&self, entries: &[(&str, String)]) -> PortResult<()>;

    fn remove(&self, key: &str) -> PortResult<()>;

    fn clear(&self) -> PortResult<()>;
}

//=========================================================================================
// Generation Service
//=========================================================================================

/// The hosted content generator. Every method returns the raw model text;
/// parsing and validation belong to the core.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate_workout(&self, profile: &UserProfile) -> PortResult<String>;

    async fn generate_meal_plan(&self, profile: &UserProfile) -> PortResult<String>;

    /// Free-form coaching reply, possibly carrying an embedded `planData` block.
    async fn chat(&self, message: &str, profile: &UserProfile) -> PortResult<String>;

    /// A short list of tips for the goal, one per line.
    async fn fitness_tips(&self, goal: Goal, language: Language) -> PortResult<String>;
}

//=========================================================================================
// Audio Devices
//=========================================================================================

/// Microphone frames as normalized samples in `[-1.0, 1.0]`.
/// Dropping the stream releases the capture device.
pub type CaptureStream = Pin<Box<dyn Stream<Item = Vec<f32>> + Send>>;

#[async_trait]
pub trait AudioInput: Send + Sync {
    /// Requests microphone access and starts capturing mono frames.
    ///
    /// Returns `PortError::PermissionDenied` when the user refuses access.
    async fn open(&self, sample_rate: u32) -> PortResult<CaptureStream>;
}

#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn open(&self, sample_rate: u32) -> PortResult<Box<dyn PlaybackDevice>>;
}

/// An open playback context with its own monotonic clock.
#[async_trait]
pub trait PlaybackDevice: Send {
    /// Seconds elapsed on the playback clock.
    fn current_time(&self) -> f64;

    /// Queues `buffer` to start at `start_at` on the playback clock.
    async fn play(&mut self, buffer: &PcmBuffer, start_at: f64) -> PortResult<()>;

    /// Releases the output device. Further calls to `play` fail.
    async fn close(&mut self);
}

//=========================================================================================
// Live Voice Endpoint
//=========================================================================================

/// One captured frame on its way to the remote endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceFrame {
    /// Base64 of 16-bit little-endian PCM.
    pub data: String,
    pub mime_type: String,
}

/// Something the remote endpoint said.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// Base64 of 16-bit little-endian PCM at the playback rate.
    Audio(String),
    Text(String),
    TurnComplete,
    Closed(Option<String>),
}

pub type VoiceUplink = Pin<Box<dyn Sink<VoiceFrame, Error = PortError> + Send>>;
pub type VoiceDownlink = Pin<Box<dyn Stream<Item = PortResult<VoiceEvent>> + Send>>;

/// An established bidirectional session, split so that capture and playback
/// can be driven independently.
pub struct VoiceLink {
    pub uplink: VoiceUplink,
    pub downlink: VoiceDownlink,
}

#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Opens a session and completes the endpoint's handshake.
    async fn connect(&self) -> PortResult<VoiceLink>;
}
