//! Audio segmentation module
//!
//! Turns a stream of analysed frames into discrete speech segments using an
//! energy VAD whose threshold follows the loudness of the current speaker.
//! A segment opens on the first frame above the threshold and closes once
//! enough silence has accumulated or the speech ceiling is hit. The ceiling
//! counts speech frames only, pauses inside a segment do not use it up. Segments
//! shorter than the minimum duration are dropped here and never leave the
//! capture thread.

use crate::audio::samples_to_duration;
use crate::level::LevelSample;
use std::io::Cursor;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, span, trace, Level};

/// Configuration for audio segmentation
#[derive(Debug, Clone, PartialEq)]
pub struct SegConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Duration of one frame in milliseconds
    pub frame_ms: u32,

    /// Threshold used when no speech is active
    pub baseline_threshold: f32,

    /// The threshold never drops below this
    pub threshold_floor: f32,

    /// Threshold follows `peak * peak_ratio` while speaking
    pub peak_ratio: f32,

    /// Levels below `threshold * silence_ratio` count as full silence
    pub silence_ratio: f32,

    /// Accumulated silence that closes a segment
    pub silence_budget_ms: u64,

    /// Hard ceiling on speech inside one segment
    pub max_segment_ms: u64,

    /// Shorter segments are treated as noise spikes
    pub min_segment_ms: u64,
}

impl Default for SegConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_ms: 100,
            baseline_threshold: 0.35,
            threshold_floor: 0.25,
            peak_ratio: 0.4,
            silence_ratio: 0.3,
            silence_budget_ms: 1200, // 12 frames
            max_segment_ms: 8000,    // 80 frames
            min_segment_ms: 1000,
        }
    }
}

impl SegConfig {
    /// Silence budget expressed in frame units
    pub fn silence_budget_units(&self) -> f32 {
        self.silence_budget_ms as f32 / self.frame_ms.max(1) as f32
    }

    pub fn max_segment_frames(&self) -> usize {
        ((self.max_segment_ms / self.frame_ms.max(1) as u64) as usize).max(1)
    }

    pub fn min_segment_samples(&self) -> usize {
        (self.sample_rate as u64 * self.min_segment_ms / 1000) as usize
    }
}

/// Reason a segment was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Closed due to silence budget
    Silence,

    /// Closed due to maximum segment length
    MaxLength,
}

/// Speech threshold that tracks the peak level of the current segment
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveThreshold {
    current: f32,
    peak: f32,
    baseline: f32,
    floor: f32,
    peak_ratio: f32,
}

impl AdaptiveThreshold {
    pub fn new(baseline: f32, floor: f32, peak_ratio: f32) -> Self {
        let baseline = baseline.max(floor);
        Self {
            current: baseline,
            peak: 0.0,
            baseline,
            floor,
            peak_ratio,
        }
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn baseline(&self) -> f32 {
        self.baseline
    }

    /// Record a speech frame and re-derive the threshold from the peak
    pub fn observe_speech(&mut self, level: f32) {
        self.peak = self.peak.max(level);
        self.current = self.floor.max(self.peak * self.peak_ratio);
    }

    pub fn reset(&mut self) {
        self.current = self.baseline;
        self.peak = 0.0;
    }
}

/// Per-frame decision of the VAD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// No segment open, frame ignored
    Idle,
    /// Frame opens a new segment
    Start,
    /// Frame belongs to the open segment
    Continue,
    /// Frame is the last one of the segment
    End(CloseReason),
}

/// Energy VAD with an adaptive threshold and fractional silence counting
#[derive(Debug, Clone)]
pub struct AdaptiveVad {
    threshold: AdaptiveThreshold,
    active: bool,
    silence_units: f32,
    speech_frames: usize,
    silence_ratio: f32,
    silence_budget: f32,
    max_frames: usize,
}

impl AdaptiveVad {
    pub fn new(cfg: &SegConfig) -> Self {
        Self {
            threshold: AdaptiveThreshold::new(
                cfg.baseline_threshold,
                cfg.threshold_floor,
                cfg.peak_ratio,
            ),
            active: false,
            silence_units: 0.0,
            speech_frames: 0,
            silence_ratio: cfg.silence_ratio,
            silence_budget: cfg.silence_budget_units(),
            max_frames: cfg.max_segment_frames(),
        }
    }

    pub fn threshold(&self) -> &AdaptiveThreshold {
        &self.threshold
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn silence_units(&self) -> f32 {
        self.silence_units
    }

    /// Classify one frame level
    pub fn process(&mut self, level: f32) -> VadDecision {
        if level > self.threshold.current() {
            let started = !self.active;
            if started {
                self.active = true;
                self.speech_frames = 0;
            }
            self.threshold.observe_speech(level);
            self.silence_units = 0.0;
            self.speech_frames += 1;

            if self.speech_frames >= self.max_frames {
                self.end();
                return VadDecision::End(CloseReason::MaxLength);
            }
            return if started {
                VadDecision::Start
            } else {
                VadDecision::Continue
            };
        }

        if !self.active {
            return VadDecision::Idle;
        }

        if level < self.threshold.current() * self.silence_ratio {
            self.silence_units += 1.0;
        } else {
            // Background noise, not confirmed silence
            self.silence_units += 0.5;
        }

        if self.silence_units >= self.silence_budget {
            self.end();
            VadDecision::End(CloseReason::Silence)
        } else {
            VadDecision::Continue
        }
    }

    fn end(&mut self) {
        self.active = false;
        self.silence_units = 0.0;
        self.speech_frames = 0;
        self.threshold.reset();
    }

    /// Back to the initial state, dropping any open segment
    pub fn reset(&mut self) {
        self.end();
    }
}

/// A completed segment ready for transcription
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// Shaped PCM samples (16-bit mono)
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub start_time: Instant,
    pub peak_level: f32,
    pub duration_frames: usize,
    pub close_reason: CloseReason,
}

impl SpeechSegment {
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }

    /// Encode the segment as an in-memory WAV file
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, hound::Error> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, self.wav_spec())?;
            for &sample in &self.samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    pub fn write_wav(&self, path: &Path) -> Result<(), hound::Error> {
        let mut writer = hound::WavWriter::create(path, self.wav_spec())?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()
    }
}

/// Accumulates frames between segment start and end
#[derive(Debug, Default)]
pub struct SegmentBuffer {
    samples: Vec<i16>,
    start_time: Option<Instant>,
    peak_level: f32,
    frames: usize,
}

impl SegmentBuffer {
    pub fn begin(&mut self, at: Instant) {
        self.clear();
        self.start_time = Some(at);
    }

    pub fn push(&mut self, sample: &LevelSample) {
        self.samples.extend_from_slice(sample.frame.samples());
        self.peak_level = self.peak_level.max(sample.level);
        self.frames += 1;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_open(&self) -> bool {
        self.start_time.is_some()
    }

    /// Hand the buffered audio off, leaving the buffer empty
    pub fn take(&mut self, sample_rate: u32, close_reason: CloseReason) -> Option<SpeechSegment> {
        let start_time = self.start_time.take()?;
        let segment = SpeechSegment {
            samples: std::mem::take(&mut self.samples),
            sample_rate,
            start_time,
            peak_level: self.peak_level,
            duration_frames: self.frames,
            close_reason,
        };
        self.clear();
        Some(segment)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.start_time = None;
        self.peak_level = 0.0;
        self.frames = 0;
    }
}

/// What a frame did to the segmenter
#[derive(Debug, Clone)]
pub enum SegmentEvent {
    /// A new segment opened
    Started { level: f32 },

    /// A segment closed and is long enough to transcribe
    Completed(SpeechSegment),

    /// A segment closed but was shorter than the minimum
    TooShort {
        duration: Duration,
        reason: CloseReason,
    },
}

/// Audio segmenter that processes analysed frames and produces segments
pub struct AudioSegmenter {
    cfg: SegConfig,
    vad: AdaptiveVad,
    buffer: SegmentBuffer,
    min_samples: usize,
}

impl AudioSegmenter {
    pub fn new(cfg: SegConfig) -> Self {
        Self {
            vad: AdaptiveVad::new(&cfg),
            buffer: SegmentBuffer::default(),
            min_samples: cfg.min_segment_samples(),
            cfg,
        }
    }

    pub fn config(&self) -> &SegConfig {
        &self.cfg
    }

    pub fn vad(&self) -> &AdaptiveVad {
        &self.vad
    }

    /// Feed one analysed frame
    pub fn push_frame(&mut self, sample: &LevelSample) -> Option<SegmentEvent> {
        let _span = span!(Level::TRACE, "segment.push_frame").entered();

        match self.vad.process(sample.level) {
            VadDecision::Idle => {
                trace!("Ambient level: {:.3}", sample.level);
                None
            }
            VadDecision::Start => {
                info!("🎙️ Speech detected (level: {:.3})", sample.level);
                self.buffer.begin(sample.frame.captured_at());
                self.buffer.push(sample);
                Some(SegmentEvent::Started {
                    level: sample.level,
                })
            }
            VadDecision::Continue => {
                self.buffer.push(sample);
                None
            }
            VadDecision::End(reason) => {
                if !self.buffer.is_open() {
                    // Opened and closed on the same frame
                    self.buffer.begin(sample.frame.captured_at());
                }
                self.buffer.push(sample);
                self.finalize(reason)
            }
        }
    }

    fn finalize(&mut self, reason: CloseReason) -> Option<SegmentEvent> {
        let buffered = self.buffer.len();
        let segment = self.buffer.take(self.cfg.sample_rate, reason)?;

        if buffered < self.min_samples {
            let duration = segment.duration();
            debug!(
                "⚠️ Segment too short ({:.1}s), dropping",
                duration.as_secs_f32()
            );
            return Some(SegmentEvent::TooShort { duration, reason });
        }

        match reason {
            CloseReason::Silence => info!(
                "🔇 Speech ended, buffered {:.1}s",
                segment.duration().as_secs_f32()
            ),
            CloseReason::MaxLength => info!(
                "⏰ Speech ceiling reached, forcing end at {:.1}s",
                segment.duration().as_secs_f32()
            ),
        }
        Some(SegmentEvent::Completed(segment))
    }

    /// Drop any open segment and return the VAD to its baseline
    pub fn reset(&mut self) {
        self.vad.reset();
        self.buffer.clear();
    }

    /// Check if a segment is currently open
    pub fn is_capturing(&self) -> bool {
        self.vad.is_active()
    }

    /// Get the number of samples in the current buffer
    pub fn buffer_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Get the current buffer duration
    pub fn buffer_duration(&self) -> Duration {
        samples_to_duration(self.buffer.len(), self.cfg.sample_rate)
    }
}
