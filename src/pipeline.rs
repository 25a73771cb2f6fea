//! Wires the capture thread to the control loop through the hand-off queue.

use crate::audio::CaptureError;
use crate::capture_loop::{spawn_capture, CaptureSettings, CaptureSummary, SourceFactory};
use crate::listen_runner::ControlLoop;
use crate::stats::ListenStats;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("failed to start capture thread: {0}")]
    Spawn(std::io::Error),

    #[error("capture thread panicked")]
    CapturePanicked,
}

/// What both halves did before shutting down
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub listen: ListenStats,
    pub capture: CaptureSummary,
}

/// Run capture and control until `token` is cancelled or the source ends.
///
/// A fatal capture error still lets the control loop finish the segment it
/// is on before the error is returned.
pub async fn run(
    open: SourceFactory,
    settings: CaptureSettings,
    control: ControlLoop,
    queue_capacity: usize,
    token: CancellationToken,
) -> Result<PipelineReport, PipelineError> {
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));
    let gate = control.playback_gate().clone();

    let capture = spawn_capture(open, settings, gate, tx, token.clone())
        .map_err(PipelineError::Spawn)?;

    let listen = control.run(rx, token.clone()).await;

    // The queue is gone, make sure the capture thread notices
    token.cancel();
    let joined = tokio::task::spawn_blocking(move || capture.join())
        .await
        .map_err(|_| PipelineError::CapturePanicked)?;

    match joined {
        Ok(Ok(capture)) => {
            info!(
                "Pipeline stopped: {} frames, {} segments ({} dropped, {} too short)",
                capture.frames, capture.segments_queued, capture.segments_dropped, capture.too_short
            );
            Ok(PipelineReport { listen, capture })
        }
        Ok(Err(e)) => {
            warn!("Capture ended with error: {}", e);
            Err(e.into())
        }
        Err(_) => Err(PipelineError::CapturePanicked),
    }
}
