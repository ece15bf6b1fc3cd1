//! services/coach/src/live/playback_task.rs
//!
//! The "worker" that plays the coach's voice as it arrives.

use futures::StreamExt;
use titanfit_core::audio::{decode_frame, PlaybackScheduler, PLAYBACK_SAMPLE_RATE};
use titanfit_core::ports::{PlaybackDevice, VoiceDownlink, VoiceEvent};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::relay::{EndReason, RelayEvent};

/// Schedules inbound audio back to back on the device clock and forwards
/// transcripts, until the endpoint goes away or the session is cancelled.
///
/// Returns why the loop ended. The output device is closed before returning.
pub async fn playback_process(
    mut downlink: VoiceDownlink,
    mut device: Box<dyn PlaybackDevice>,
    events: UnboundedSender<RelayEvent>,
    cancellation_token: CancellationToken,
) -> EndReason {
    info!("Playback process started.");
    let mut scheduler = PlaybackScheduler::new();

    let reason = loop {
        let polled = tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => None,
            next = downlink.next() => Some(next),
        };
        let Some(next) = polled else {
            break EndReason::LocalStop;
        };

        match next {
            None => break EndReason::RemoteClosed(None),
            Some(Err(e)) => break EndReason::RemoteError(e.to_string()),
            Some(Ok(VoiceEvent::Closed(reason))) => break EndReason::RemoteClosed(reason),
            Some(Ok(VoiceEvent::Audio(data))) => {
                let buffer = match decode_frame(&data, PLAYBACK_SAMPLE_RATE) {
                    Ok(buffer) => buffer,
                    Err(e) => {
                        warn!("Dropping undecodable audio chunk: {}", e);
                        continue;
                    }
                };
                let slot = scheduler.schedule(device.current_time(), buffer.duration());
                debug!(id = slot.id, start = slot.start, end = slot.end, "Audio scheduled.");
                if let Err(e) = device.play(&buffer, slot.start).await {
                    break EndReason::OutputFailed(e.to_string());
                }
            }
            Some(Ok(VoiceEvent::Text(text))) => {
                let _ = events.send(RelayEvent::Transcript(text));
            }
            Some(Ok(VoiceEvent::TurnComplete)) => debug!("Coach turn complete."),
        }
    };

    scheduler.reset();
    device.close().await;
    info!(?reason, "Playback process finished.");
    reason
}
