//! Scripted fakes for the external services and the frame source.

use crate::audio::{AudioFrame, CaptureError, FrameSource};
use crate::audio_seg::{CloseReason, SpeechSegment};
use crate::playback::PlaybackGate;
use crate::services::{
    DispatchReply, Diarizer, Dispatcher, Earcon, ModeContext, Result, ServiceError, Speaker,
    SpeakerTurn, Transcriber,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub const RATE: u32 = 44_100;
pub const FRAME: usize = 4410;

/// Raw amplitude that comes out of the level analyzer around 0.8
pub const LOUD: i16 = 20_000;

/// A segment of `seconds` of constant audio
pub fn segment_of(seconds: f32) -> SpeechSegment {
    SpeechSegment {
        samples: vec![1000; (seconds * RATE as f32) as usize],
        sample_rate: RATE,
        start_time: Instant::now(),
        peak_level: 0.5,
        duration_frames: (seconds * 10.0) as usize,
        close_reason: CloseReason::Silence,
    }
}

pub fn frame(amplitude: i16) -> AudioFrame {
    AudioFrame::new(vec![amplitude; FRAME], RATE)
}

/// `speech` loud frames followed by `silence` silent ones
pub fn utterance_frames(speech: usize, silence: usize) -> Vec<std::result::Result<AudioFrame, CaptureError>> {
    std::iter::repeat_with(|| Ok(frame(LOUD)))
        .take(speech)
        .chain(std::iter::repeat_with(|| Ok(frame(0))).take(silence))
        .collect()
}

/// Frame source replaying a fixed script, then reporting exhaustion
pub struct ScriptedSource {
    steps: VecDeque<std::result::Result<AudioFrame, CaptureError>>,
    delay: Duration,
}

impl ScriptedSource {
    pub fn new(steps: Vec<std::result::Result<AudioFrame, CaptureError>>) -> Self {
        Self {
            steps: steps.into(),
            delay: Duration::ZERO,
        }
    }

    /// Sleep before every read, like a real device
    pub fn paced(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> std::result::Result<Option<AudioFrame>, CaptureError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match self.steps.pop_front() {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn sample_rate(&self) -> u32 {
        RATE
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Returns scripted transcripts in order, then silence
#[derive(Default)]
pub struct FakeTranscriber {
    script: Mutex<VecDeque<Result<Option<String>>>>,
    delay: Duration,
    calls: Mutex<usize>,
}

impl FakeTranscriber {
    pub fn new<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self {
            script: Mutex::new(texts.into_iter().map(|t| Ok(Some(t.into()))).collect()),
            ..Default::default()
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push(&self, result: Result<Option<String>>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _segment: &SpeechSegment) -> Result<Option<String>> {
        *self.calls.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        next.unwrap_or(Ok(None))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Returns scripted diarization results in order, then no speakers
#[derive(Default)]
pub struct FakeDiarizer {
    script: Mutex<VecDeque<Result<Vec<SpeakerTurn>>>>,
    calls: Mutex<usize>,
}

impl FakeDiarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: Result<Vec<SpeakerTurn>>) {
        self.script.lock().unwrap().push_back(result);
    }

    /// Queue a segment spoken by `speaker` alone
    pub fn push_speaker(&self, speaker: &str) {
        self.push(Ok(vec![SpeakerTurn {
            speaker: speaker.to_string(),
            seconds: 1.0,
        }]));
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Diarizer for FakeDiarizer {
    async fn diarize(&self, _segment: &SpeechSegment) -> Result<Vec<SpeakerTurn>> {
        *self.calls.lock().unwrap() += 1;
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(vec![]))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Records calls; replies in the order given, the last reply repeats
pub struct FakeDispatcher {
    replies: Mutex<VecDeque<DispatchReply>>,
    calls: Mutex<Vec<(String, ModeContext)>>,
}

impl FakeDispatcher {
    pub fn replying(reply: DispatchReply) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([reply])),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every dispatch fails
    pub fn failing() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply used by the next dispatch after the ones already queued
    pub fn then(self, reply: DispatchReply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<(String, ModeContext)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for FakeDispatcher {
    async fn dispatch(&self, utterance: &str, context: ModeContext) -> Result<DispatchReply> {
        self.calls
            .lock()
            .unwrap()
            .push((utterance.to_string(), context));
        let mut replies = self.replies.lock().unwrap();
        let reply = if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        };
        reply.ok_or_else(|| ServiceError::failed("dispatcher", "scripted failure"))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Records spoken text and whether capture was paused at the time
pub struct FakeSpeaker {
    fail: bool,
    gate: Option<PlaybackGate>,
    spoken: Mutex<Vec<String>>,
    paused_while_speaking: Mutex<Vec<bool>>,
    late_segment: Mutex<Option<mpsc::Sender<SpeechSegment>>>,
}

impl FakeSpeaker {
    pub fn new() -> Self {
        Self {
            fail: false,
            gate: None,
            spoken: Mutex::new(Vec::new()),
            paused_while_speaking: Mutex::new(Vec::new()),
            late_segment: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn watching(gate: PlaybackGate) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn paused_while_speaking(&self) -> Vec<bool> {
        self.paused_while_speaking.lock().unwrap().clone()
    }

    /// Queue one segment on `tx` during the next utterance, like a capture
    /// thread that passed the gate just before playback started
    pub fn queue_while_speaking(&self, tx: mpsc::Sender<SpeechSegment>) {
        *self.late_segment.lock().unwrap() = Some(tx);
    }
}

#[async_trait]
impl Speaker for FakeSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        if self.fail {
            return Err(ServiceError::failed("speaker", "scripted failure"));
        }
        if let Some(gate) = &self.gate {
            self.paused_while_speaking
                .lock()
                .unwrap()
                .push(gate.is_suspended(Instant::now()));
        }
        if let Some(tx) = self.late_segment.lock().unwrap().take() {
            tx.try_send(segment_of(1.2)).unwrap();
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Records played clips, each taking `duration`
pub struct FakeEarcon {
    duration: Duration,
    played: Mutex<Vec<PathBuf>>,
}

impl FakeEarcon {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            played: Mutex::new(Vec::new()),
        }
    }

    pub fn played(&self) -> Vec<PathBuf> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl Earcon for FakeEarcon {
    async fn play(&self, clip: &Path) -> Result<()> {
        self.played.lock().unwrap().push(clip.to_path_buf());
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}
