//! Speaker gate
//!
//! Ties an open conversation to the voice that started it. The gate itself
//! holds no state: the bound speaker lives in the listening state machine,
//! the gate only answers "who dominated this segment" and "is the bound
//! speaker in this one".

use crate::audio_seg::SpeechSegment;
use crate::services::{with_deadline, Diarizer, SpeakerId, SpeakerTurn};
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of checking a segment against the bound speaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Bound speaker is present (or the gate is off, or nothing is bound)
    Match,
    /// Only other speakers were heard
    Mismatch { heard: Vec<SpeakerId> },
    /// Diarization failed, segment let through
    FailOpen,
}

impl GateDecision {
    pub fn admits(&self) -> bool {
        !matches!(self, GateDecision::Mismatch { .. })
    }
}

pub struct SpeakerGate {
    diarizer: Option<Arc<dyn Diarizer>>,
    timeout: Duration,
}

impl SpeakerGate {
    pub fn new(diarizer: Arc<dyn Diarizer>, timeout: Duration) -> Self {
        Self {
            diarizer: Some(diarizer),
            timeout,
        }
    }

    /// A gate that matches everything
    pub fn disabled() -> Self {
        Self {
            diarizer: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.diarizer.is_some()
    }

    /// Speaker with the most talk time in the triggering segment
    pub async fn identify(&self, segment: &SpeechSegment) -> Option<SpeakerId> {
        let diarizer = self.diarizer.as_ref()?;
        debug!("🎭 Identifying trigger speaker...");

        match with_deadline("diarizer", self.timeout, diarizer.diarize(segment)).await {
            Ok(turns) => {
                let speaker = dominant_speaker(&turns);
                match &speaker {
                    Some(id) => info!("🎭 Trigger speaker identified: {}", id),
                    None => debug!("🎭 No speaker found in trigger segment"),
                }
                speaker
            }
            Err(e) => {
                warn!("Speaker identification error: {}", e);
                None
            }
        }
    }

    /// Whether `segment` may continue the conversation bound to `bound`
    pub async fn check(&self, segment: &SpeechSegment, bound: Option<&SpeakerId>) -> GateDecision {
        let (Some(diarizer), Some(bound)) = (self.diarizer.as_ref(), bound) else {
            return GateDecision::Match;
        };

        let turns = match with_deadline("diarizer", self.timeout, diarizer.diarize(segment)).await
        {
            Ok(turns) => turns,
            Err(e) => {
                warn!("Speaker matching error, accepting: {}", e);
                return GateDecision::FailOpen;
            }
        };

        let heard: SmallVec<[&str; 4]> = turns.iter().map(|t| t.speaker.as_str()).collect();
        if heard.contains(&bound.as_str()) {
            debug!("🎭 Speaker match confirmed");
            GateDecision::Match
        } else {
            info!("🎭 Different speaker detected, ignoring audio");
            let mut heard: Vec<SpeakerId> = heard.into_iter().map(str::to_string).collect();
            heard.sort();
            heard.dedup();
            GateDecision::Mismatch { heard }
        }
    }
}

/// Speaker with the largest cumulative speaking time
pub fn dominant_speaker(turns: &[SpeakerTurn]) -> Option<SpeakerId> {
    let mut totals: SmallVec<[(&str, f32); 4]> = SmallVec::new();
    for turn in turns {
        match totals.iter_mut().find(|(id, _)| *id == turn.speaker) {
            Some((_, seconds)) => *seconds += turn.seconds,
            None => totals.push((turn.speaker.as_str(), turn.seconds)),
        }
    }
    totals
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(id, _)| id.to_string())
}
