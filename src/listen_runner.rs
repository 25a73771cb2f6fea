//! Control loop - connects the segment queue to the services and the FSM
//!
//! One segment is handled at a time, start to finish: transcription,
//! filtering, trigger validation, speaker gating, dispatch and speech. The
//! loop also ticks the FSM so pending windows expire on time.

use crate::audio_seg::SpeechSegment;
use crate::cue::ThinkingCue;
use crate::hallucination::HallucinationFilter;
use crate::listen_fsm::{Action, ListenConfig, ListenFsm, ListeningMode};
use crate::playback::PlaybackGate;
use crate::recorder::{Outcome, SegmentRecorder};
use crate::services::{with_deadline, Dispatcher, ModeContext, SpeakerId, Speaker, Transcriber};
use crate::speaker_gate::SpeakerGate;
use crate::stats::ListenStats;
use crate::transcript::Transcript;
use crate::trigger::{TriggerValidator, TriggerVerdict};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The external collaborators of the control loop
pub struct Services {
    pub transcriber: Arc<dyn Transcriber>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub speaker: Arc<dyn Speaker>,
    pub speaker_gate: SpeakerGate,
    pub cue: Option<ThinkingCue>,
}

/// Upper bounds for each service call
#[derive(Debug, Clone)]
pub struct ServiceTimeouts {
    pub transcribe: Duration,
    pub dispatch: Duration,
    pub speak: Duration,
}

impl Default for ServiceTimeouts {
    fn default() -> Self {
        Self {
            transcribe: Duration::from_secs(10),
            dispatch: Duration::from_secs(10),
            speak: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub trigger_phrase: String,
    pub deny_list: Vec<String>,
    pub listen: ListenConfig,
    pub timeouts: ServiceTimeouts,
    /// How often pending windows are checked
    pub poll_interval: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            trigger_phrase: "computer".to_string(),
            deny_list: crate::hallucination::DEFAULT_DENY_LIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            listen: ListenConfig::default(),
            timeouts: ServiceTimeouts::default(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

pub struct ControlLoop {
    fsm: ListenFsm,
    filter: HallucinationFilter,
    validator: TriggerValidator,
    services: Services,
    playback: PlaybackGate,
    timeouts: ServiceTimeouts,
    poll_interval: Duration,
    recorder: Option<SegmentRecorder>,
    stats: ListenStats,
}

impl ControlLoop {
    pub fn new(cfg: ControlConfig, services: Services, playback: PlaybackGate) -> Self {
        let filter = HallucinationFilter::new(&cfg.deny_list, &cfg.trigger_phrase);
        Self {
            fsm: ListenFsm::new(cfg.listen),
            validator: TriggerValidator::new(&cfg.trigger_phrase, filter.clone()),
            filter,
            services,
            playback,
            timeouts: cfg.timeouts,
            poll_interval: cfg.poll_interval,
            recorder: None,
            stats: ListenStats::default(),
        }
    }

    pub fn with_recorder(mut self, recorder: SegmentRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn playback_gate(&self) -> &PlaybackGate {
        &self.playback
    }

    pub fn fsm(&self) -> &ListenFsm {
        &self.fsm
    }

    pub fn stats(&self) -> &ListenStats {
        &self.stats
    }

    /// Run until cancelled or the queue closes; returns the final counters
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<SpeechSegment>,
        token: CancellationToken,
    ) -> ListenStats {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "👂 Listening for \"{}\"{}",
            self.validator.phrase(),
            if self.services.speaker_gate.is_enabled() {
                " (speaker gate on)"
            } else {
                ""
            }
        );

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    info!("🛑 Stop requested");
                    break;
                }

                _ = ticker.tick() => {
                    if self.expire_window(Instant::now()) {
                        self.perform_actions(&mut rx, &token).await;
                    }
                }

                segment = rx.recv() => match segment {
                    Some(segment) => self.handle_segment(segment, &mut rx, &token).await,
                    None => {
                        info!("Segment queue closed");
                        break;
                    }
                }
            }
        }

        rx.close();
        let dropped = drain_queue(&mut rx);
        if dropped > 0 {
            debug!("Released {} queued segments", dropped);
        }
        self.stats.drained += dropped;

        self.stats.log_summary();
        if let Some(recorder) = &self.recorder {
            recorder.write_stats(&self.stats);
        }
        self.stats
    }

    /// Process one completed segment end to end
    pub async fn handle_segment(
        &mut self,
        segment: SpeechSegment,
        rx: &mut mpsc::Receiver<SpeechSegment>,
        token: &CancellationToken,
    ) {
        let handed_off = Instant::now();
        self.stats.segments += 1;

        // A window that ran out while the segment was being captured is closed first
        if self.expire_window(handed_off) {
            self.perform_actions(rx, token).await;
        }

        let file = self
            .recorder
            .as_mut()
            .and_then(|recorder| recorder.record_segment(&segment));
        let file = file.as_deref();

        debug!(
            "🧠 Transcribing {:.1}s segment",
            segment.duration().as_secs_f32()
        );
        let raw = match with_deadline(
            "transcriber",
            self.timeouts.transcribe,
            self.services.transcriber.transcribe(&segment),
        )
        .await
        {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No speech in segment");
                self.stats.empty_transcripts += 1;
                self.record(file, None, Outcome::NoSpeech);
                return;
            }
            Err(e) => {
                warn!("Transcription failed: {}", e);
                self.stats.service_errors += 1;
                self.record(file, None, Outcome::Error);
                return;
            }
        };

        if token.is_cancelled() {
            debug!("Stop requested, dropping transcript");
            return;
        }

        let Some(transcript) = Transcript::from_raw(&raw) else {
            debug!("Transcript too short: \"{}\"", raw.trim());
            self.stats.empty_transcripts += 1;
            self.record(file, Some(&raw), Outcome::NoSpeech);
            return;
        };
        let text = transcript.text;
        self.stats.transcripts += 1;

        if let Err(h) = self.filter.check(&text) {
            info!("🚫 Filtered hallucination ({}): \"{}\"", h, preview(&text));
            self.stats.hallucinations += 1;
            self.record(file, Some(&text), Outcome::Hallucination);
            return;
        }
        info!("👂 HEARD: \"{}\"", text);

        match self.validator.validate(&text) {
            Some(TriggerVerdict::Command(command)) => {
                self.accept_trigger(Some(command), &segment).await;
                self.record(file, Some(&text), Outcome::Trigger);
            }
            Some(TriggerVerdict::Bare) => {
                self.accept_trigger(None, &segment).await;
                self.record(file, Some(&text), Outcome::Trigger);
            }
            Some(TriggerVerdict::Rejected(_)) => {
                self.stats.rejected_triggers += 1;
                // May still be a reply that happens to contain the trigger word
                self.continue_conversation(
                    text,
                    &segment,
                    file,
                    Outcome::RejectedTrigger,
                    handed_off,
                )
                .await;
            }
            None => {
                self.continue_conversation(text, &segment, file, Outcome::Ignored, handed_off)
                    .await;
            }
        }

        if self.perform_actions(rx, token).await {
            let latency = handed_off.elapsed();
            debug!("⏱️ Segment handled in {}ms", latency.as_millis());
            self.stats.record_latency(latency);
        }
    }

    fn expire_window(&mut self, now: Instant) -> bool {
        let expired = self.fsm.check_timeout(now).is_some();
        if expired {
            self.stats.timeouts += 1;
        }
        expired
    }

    async fn accept_trigger(&mut self, command: Option<String>, segment: &SpeechSegment) {
        self.stats.triggers += 1;
        let speaker = self.services.speaker_gate.identify(segment).await;
        self.fsm.on_trigger(command, speaker, Instant::now());
    }

    /// `handed_off` is when the segment left the queue. The pending window is
    /// judged at that moment, service latency does not count against it.
    async fn continue_conversation(
        &mut self,
        text: String,
        segment: &SpeechSegment,
        file: Option<&str>,
        idle_outcome: Outcome,
        handed_off: Instant,
    ) {
        if !self.fsm.is_pending() {
            debug!("No trigger, ignoring: \"{}\"", preview(&text));
            self.stats.ignored += 1;
            self.record(file, Some(&text), idle_outcome);
            return;
        }

        let decision = self
            .services
            .speaker_gate
            .check(segment, self.fsm.binding())
            .await;
        if !decision.admits() {
            // Mode and deadline stay as they are
            self.stats.speaker_rejections += 1;
            self.record(file, Some(&text), Outcome::WrongSpeaker);
            return;
        }

        let outcome = match self.fsm.mode() {
            ListeningMode::FollowUp => Outcome::FollowUp,
            _ => Outcome::Command,
        };
        if self.fsm.on_utterance(text.clone(), handed_off) {
            self.record(file, Some(&text), outcome);
        } else {
            self.stats.ignored += 1;
            self.record(file, Some(&text), idle_outcome);
        }
    }

    /// Execute queued FSM actions. Returns whether anything was dispatched.
    async fn perform_actions(
        &mut self,
        rx: &mut mpsc::Receiver<SpeechSegment>,
        token: &CancellationToken,
    ) -> bool {
        let mut dispatched = false;
        for action in self.fsm.drain_actions() {
            if token.is_cancelled() {
                info!("🛑 Stop requested, skipping {:?}", action);
                continue;
            }
            match action {
                Action::Dispatch {
                    text,
                    context,
                    speaker,
                } => {
                    self.dispatch(&text, context, speaker, rx).await;
                    dispatched = true;
                }
                Action::Prompt(text) => {
                    self.stats.prompts += 1;
                    self.speak(&text, rx).await;
                }
            }
        }
        dispatched
    }

    async fn dispatch(
        &mut self,
        text: &str,
        context: ModeContext,
        speaker: Option<SpeakerId>,
        rx: &mut mpsc::Receiver<SpeechSegment>,
    ) {
        match context {
            ModeContext::Command => self.stats.commands += 1,
            ModeContext::FollowUp => self.stats.follow_ups += 1,
        }
        info!("📤 Dispatching {:?}: \"{}\"", context, text);

        let cue = self.services.cue.as_ref().map(ThinkingCue::start);
        let result = with_deadline(
            "dispatcher",
            self.timeouts.dispatch,
            self.services.dispatcher.dispatch(text, context),
        )
        .await;
        if let Some(cue) = cue {
            cue.stop().await;
        }

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Dispatch failed: {}", e);
                self.stats.service_errors += 1;
                return;
            }
        };

        if let Some(response) = reply.spoken_response.as_deref() {
            self.speak(response, rx).await;
        }
        if reply.expect_followup {
            // The reply window opens once the response has been spoken
            self.fsm.enter_follow_up(speaker, Instant::now());
        }
    }

    /// Speak with capture suspended; stale queued segments are dropped
    async fn speak(&mut self, text: &str, rx: &mut mpsc::Receiver<SpeechSegment>) {
        let guard = self.playback.suspend();
        let drained = drain_queue(rx);
        if drained > 0 {
            debug!("Dropped {} queued segments before speaking", drained);
            self.stats.drained += drained;
        }

        info!("🗣️ Speaking: \"{}\"", text);
        if let Err(e) = with_deadline(
            "speaker",
            self.timeouts.speak,
            self.services.speaker.speak(text),
        )
        .await
        {
            warn!("Speech failed: {}", e);
            self.stats.service_errors += 1;
        }

        // A segment that cleared the gate just before suspension lands late
        let late = drain_queue(rx);
        if late > 0 {
            debug!("Dropped {} segments queued while speaking", late);
            self.stats.drained += late;
        }
        drop(guard);
    }

    fn record(&mut self, file: Option<&str>, text: Option<&str>, outcome: Outcome) {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record_outcome(file, text, outcome);
        }
    }
}

fn drain_queue(rx: &mut mpsc::Receiver<SpeechSegment>) -> u64 {
    let mut dropped = 0;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}

fn preview(text: &str) -> String {
    const MAX: usize = 50;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    }
}
