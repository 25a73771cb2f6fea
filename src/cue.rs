//! Thinking cue: soft sounds played while a dispatch is outstanding.

use crate::playback::PlaybackGate;
use crate::services::Earcon;
use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const STOP_GRACE: Duration = Duration::from_millis(500);

pub struct ThinkingCue {
    earcon: Arc<dyn Earcon>,
    clips: Vec<PathBuf>,
    gap: Duration,
    gate: PlaybackGate,
}

impl ThinkingCue {
    pub fn new(earcon: Arc<dyn Earcon>, clips: Vec<PathBuf>, gap: Duration, gate: PlaybackGate) -> Self {
        Self {
            earcon,
            clips,
            gap,
            gate,
        }
    }

    /// Start looping the clips in a background task
    pub fn start(&self) -> CueHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        let earcon = self.earcon.clone();
        let mut clips = self.clips.clone();
        let gap = self.gap;
        // Taken before spawning so capture is off by the time we return
        let guard = self.gate.suspend();

        let task = tokio::spawn(async move {
            let _guard = guard;
            debug!("🎵 Thinking cue started");
            if clips.is_empty() {
                child.cancelled().await;
                return;
            }
            loop {
                clips.shuffle(&mut rand::rng());
                for clip in &clips {
                    tokio::select! {
                        _ = child.cancelled() => return,
                        result = earcon.play(clip) => {
                            if let Err(e) = result {
                                warn!("Cue clip {} failed: {}", clip.display(), e);
                            }
                        }
                    }
                    tokio::select! {
                        _ = child.cancelled() => return,
                        _ = tokio::time::sleep(gap) => {}
                    }
                }
            }
        });

        CueHandle { token, task }
    }
}

/// Running cue; must be stopped explicitly
pub struct CueHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl CueHandle {
    /// Signal the task and wait briefly for it to finish
    pub async fn stop(mut self) {
        self.token.cancel();
        if tokio::time::timeout(STOP_GRACE, &mut self.task).await.is_err() {
            warn!("Thinking cue did not stop in time, aborting");
            self.task.abort();
        }
        debug!("🎵 Thinking cue stopped");
    }
}
