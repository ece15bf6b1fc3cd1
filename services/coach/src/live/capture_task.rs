//! services/coach/src/live/capture_task.rs
//!
//! The "worker" that streams microphone frames to the voice endpoint.

use futures::{SinkExt, StreamExt};
use titanfit_core::audio::{capture_mime_type, encode_frame};
use titanfit_core::ports::{CaptureStream, VoiceFrame, VoiceUplink};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::relay::EndReason;

/// Forwards captured frames until cancelled or until the microphone goes away,
/// and reports which of the two happened.
///
/// A frame that fails to send is logged and skipped. On exit the microphone is
/// released and the uplink closed.
pub async fn capture_process(
    mut capture: CaptureStream,
    mut uplink: VoiceUplink,
    cancellation_token: CancellationToken,
) -> EndReason {
    info!("Capture process started.");
    let mime_type = capture_mime_type();

    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => break EndReason::LocalStop,
            next = capture.next() => next,
        };
        let Some(samples) = next else {
            info!("Capture stream ended.");
            break EndReason::InputEnded;
        };

        let frame = VoiceFrame {
            data: encode_frame(&samples),
            mime_type: mime_type.clone(),
        };
        tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => break EndReason::LocalStop,
            sent = uplink.send(frame) => {
                if let Err(e) = sent {
                    warn!("Failed to send audio frame: {}", e);
                }
            }
        }
    };

    drop(capture);
    if let Err(e) = uplink.close().await {
        debug!("Uplink close reported: {}", e);
    }
    info!(?reason, "Capture process finished.");
    reason
}
