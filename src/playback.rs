//! Playback mutex
//!
//! While anything is played through the speakers the capture thread must
//! not listen. Holders take a [`PlaybackGuard`]; when the last guard drops
//! capture stays suspended for a short settle delay so the tail of the
//! playback is not picked up as speech.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Default)]
struct GateState {
    holders: usize,
    resume_at: Option<Instant>,
}

#[derive(Debug)]
struct GateInner {
    state: Mutex<GateState>,
    settle: Duration,
}

/// Shared between the control loop (which suspends) and the capture thread
/// (which polls)
#[derive(Debug, Clone)]
pub struct PlaybackGate {
    inner: Arc<GateInner>,
}

impl PlaybackGate {
    pub fn new(settle: Duration) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState::default()),
                settle,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        // Plain counters stay valid even if a holder panicked
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Suspend capture until the returned guard (and any others) drop
    pub fn suspend(&self) -> PlaybackGuard {
        let mut state = self.lock();
        state.holders += 1;
        state.resume_at = None;
        if state.holders == 1 {
            debug!("🔇 Paused listening (playback)");
        }
        PlaybackGuard { gate: self.clone() }
    }

    /// Whether capture should discard frames at `now`
    pub fn is_suspended(&self, now: Instant) -> bool {
        let state = self.lock();
        state.holders > 0 || state.resume_at.is_some_and(|at| now < at)
    }

    /// Whether a guard is currently held
    pub fn is_playing(&self) -> bool {
        self.lock().holders > 0
    }

    pub fn settle(&self) -> Duration {
        self.inner.settle
    }

    fn release(&self, now: Instant) {
        let mut state = self.lock();
        state.holders = state.holders.saturating_sub(1);
        if state.holders == 0 {
            state.resume_at = Some(now + self.inner.settle);
            debug!("🎤 Resuming listening in {:?}", self.inner.settle);
        }
    }
}

/// Keeps capture suspended while alive
#[derive(Debug)]
pub struct PlaybackGuard {
    gate: PlaybackGate,
}

impl Drop for PlaybackGuard {
    fn drop(&mut self) {
        self.gate.release(Instant::now());
    }
}
