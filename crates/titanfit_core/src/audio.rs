//! crates/titanfit_core/src/audio.rs
//!
//! PCM conversion and gapless playback scheduling for live voice coaching.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::ports::{PortError, PortResult};

/// Microphone capture rate, mono.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Rate of the audio returned by the voice endpoint, mono.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Samples per captured frame.
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

/// Scale between normalized samples and 16-bit integers, both directions.
pub const PCM_SCALE: f32 = 32768.0;

pub fn capture_mime_type() -> String {
    format!("audio/pcm;rate={CAPTURE_SAMPLE_RATE}")
}

//=========================================================================================
// PCM16 Codec
//=========================================================================================

/// Converts normalized samples into 16-bit little-endian PCM bytes.
///
/// Values outside the representable range saturate at `i16::MIN`/`i16::MAX`.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let value = (sample * PCM_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Converts 16-bit little-endian PCM bytes into normalized samples.
pub fn decode_pcm16(bytes: &[u8]) -> PortResult<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(PortError::Unexpected(format!(
            "PCM16 payload has an odd length of {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| f32::from(i16::from_le_bytes([chunk[0], chunk[1]])) / PCM_SCALE)
        .collect())
}

/// Encodes a captured frame for the wire: PCM16, then base64.
pub fn encode_frame(samples: &[f32]) -> String {
    STANDARD.encode(encode_pcm16(samples))
}

/// Decodes a base64 PCM16 payload received from the voice endpoint.
pub fn decode_frame(data: &str, sample_rate: u32) -> PortResult<PcmBuffer> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| PortError::Unexpected(format!("Invalid base64 audio payload: {e}")))?;
    Ok(PcmBuffer {
        samples: decode_pcm16(&bytes)?,
        sample_rate,
    })
}

//=========================================================================================
// Playback Buffers and Scheduling
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmBuffer {
    /// Length of the buffer in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    pub fn to_pcm16(&self) -> Vec<u8> {
        encode_pcm16(&self.samples)
    }
}

/// A buffer handed to the device and not yet finished.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: u64,
    pub start: f64,
    pub end: f64,
}

/// Places inbound buffers back to back on the playback clock.
///
/// Each buffer starts at the later of the current clock time and the end of
/// the previously scheduled buffer, so playback is gapless and in arrival
/// order regardless of network jitter.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start: f64,
    next_id: u64,
    active: Vec<ScheduledBuffer>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a slot for a buffer of `duration` seconds and returns it.
    pub fn schedule(&mut self, now: f64, duration: f64) -> ScheduledBuffer {
        self.prune(now);
        let start = self.next_start.max(now);
        let end = start + duration;
        self.next_start = end;
        let scheduled = ScheduledBuffer {
            id: self.next_id,
            start,
            end,
        };
        self.next_id += 1;
        self.active.push(scheduled);
        scheduled
    }

    /// Drops buffers that have finished playing by `now`.
    pub fn prune(&mut self, now: f64) {
        self.active.retain(|buffer| buffer.end > now);
    }

    pub fn active(&self) -> &[ScheduledBuffer] {
        &self.active
    }

    /// Where the next buffer would start if the clock stood still.
    pub fn cursor(&self) -> f64 {
        self.next_start
    }

    pub fn reset(&mut self) {
        self.next_start = 0.0;
        self.active.clear();
    }
}
