//! Capture thread
//!
//! Pulls frames from the source, shapes them, runs the VAD and pushes
//! completed segments onto the hand-off queue. Nothing here blocks except
//! the frame read itself: a full queue drops the segment.

use crate::audio::{CaptureError, FrameSource};
use crate::audio_seg::{AudioSegmenter, SegConfig, SegmentEvent, SpeechSegment};
use crate::level::{LevelAnalyzer, LevelConfig};
use crate::playback::PlaybackGate;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a failed read before trying again
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub level: LevelConfig,
    pub segmentation: SegConfig,
    /// Consecutive failed reads before the device counts as gone
    pub max_read_errors: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            level: LevelConfig::default(),
            segmentation: SegConfig::default(),
            max_read_errors: 50,
        }
    }
}

/// Frame and segment counts of one capture run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub frames: u64,
    /// Frames thrown away while playback was active
    pub suspended_frames: u64,
    pub segments_started: u64,
    pub segments_queued: u64,
    /// Segments lost to a full queue
    pub segments_dropped: u64,
    pub too_short: u64,
    pub read_errors: u64,
}

/// Source factory, invoked on the capture thread
pub type SourceFactory =
    Box<dyn FnOnce() -> Result<Box<dyn FrameSource>, CaptureError> + Send + 'static>;

/// Start the capture thread
pub fn spawn_capture(
    open: SourceFactory,
    settings: CaptureSettings,
    gate: PlaybackGate,
    tx: mpsc::Sender<SpeechSegment>,
    token: CancellationToken,
) -> std::io::Result<JoinHandle<Result<CaptureSummary, CaptureError>>> {
    std::thread::Builder::new()
        .name("voxgate-capture".to_string())
        .spawn(move || {
            let mut source = open()?;
            info!("🎤 Capture started on {}", source.describe());
            let result = run_capture(source.as_mut(), &settings, &gate, &tx, &token);
            match &result {
                Ok(summary) => info!(
                    "🎤 Capture stopped: {} frames, {} segments queued",
                    summary.frames, summary.segments_queued
                ),
                Err(e) => error!("🎤 Capture failed: {}", e),
            }
            result
        })
}

/// Capture loop body, runs until cancelled, the source ends or the queue closes
pub fn run_capture(
    source: &mut dyn FrameSource,
    settings: &CaptureSettings,
    gate: &PlaybackGate,
    tx: &mpsc::Sender<SpeechSegment>,
    token: &CancellationToken,
) -> Result<CaptureSummary, CaptureError> {
    let analyzer = LevelAnalyzer::new(settings.level);
    let mut segmenter = AudioSegmenter::new(settings.segmentation.clone());
    let mut summary = CaptureSummary::default();
    let mut consecutive_errors = 0usize;
    let mut suspended = false;

    while !token.is_cancelled() {
        let frame = match source.read_frame() {
            Ok(Some(frame)) => {
                consecutive_errors = 0;
                frame
            }
            Ok(None) => {
                info!("Frame source exhausted");
                break;
            }
            Err(e) if !e.is_fatal() => {
                consecutive_errors += 1;
                summary.read_errors += 1;
                warn!(
                    "Audio stream error ({}/{}): {}",
                    consecutive_errors, settings.max_read_errors, e
                );
                if consecutive_errors >= settings.max_read_errors {
                    return Err(CaptureError::DeviceUnavailable(format!(
                        "{} consecutive read failures, last: {}",
                        consecutive_errors, e
                    )));
                }
                std::thread::sleep(READ_RETRY_DELAY);
                continue;
            }
            Err(e) => return Err(e),
        };
        summary.frames += 1;

        if gate.is_suspended(Instant::now()) {
            if !suspended {
                debug!("Playback active, discarding frames");
                segmenter.reset();
                suspended = true;
            }
            summary.suspended_frames += 1;
            continue;
        }
        if suspended {
            debug!("Playback settled, listening again");
            suspended = false;
        }

        let sample = analyzer.analyze(&frame);
        match segmenter.push_frame(&sample) {
            Some(SegmentEvent::Started { .. }) => summary.segments_started += 1,
            Some(SegmentEvent::TooShort { .. }) => summary.too_short += 1,
            Some(SegmentEvent::Completed(segment)) => match tx.try_send(segment) {
                Ok(()) => {
                    summary.segments_queued += 1;
                    debug!("💾 Queued segment for transcription");
                }
                Err(TrySendError::Full(segment)) => {
                    summary.segments_dropped += 1;
                    warn!(
                        "Hand-off queue full, dropping {:.1}s segment",
                        segment.duration().as_secs_f32()
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    info!("Hand-off queue closed, stopping capture");
                    break;
                }
            },
            None => {}
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{frame, utterance_frames, ScriptedSource, LOUD};

    fn capture(
        source: ScriptedSource,
        gate: &PlaybackGate,
        capacity: usize,
    ) -> (Result<CaptureSummary, CaptureError>, Vec<SpeechSegment>) {
        let (tx, mut rx) = mpsc::channel(capacity);
        let token = CancellationToken::new();
        let mut source = source;
        let result = run_capture(&mut source, &CaptureSettings::default(), gate, &tx, &token);
        drop(tx);
        let mut segments = Vec::new();
        while let Ok(segment) = rx.try_recv() {
            segments.push(segment);
        }
        (result, segments)
    }

    #[test]
    fn test_utterances_become_segments() {
        let mut steps = utterance_frames(15, 12);
        steps.extend(utterance_frames(3, 12));
        steps.extend(utterance_frames(1, 3)); // still open when the script ends
        let gate = PlaybackGate::new(Duration::ZERO);

        let (result, segments) = capture(ScriptedSource::new(steps), &gate, 8);
        let summary = result.unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].duration_frames, 27);
        assert_eq!(segments[1].duration_frames, 15);
        assert_eq!(summary.segments_started, 3);
        assert_eq!(summary.segments_queued, 2);
        assert_eq!(summary.frames, 46);
    }

    #[test]
    fn test_buffered_samples_are_shaped() {
        let gate = PlaybackGate::new(Duration::ZERO);
        let (_, segments) = capture(ScriptedSource::new(utterance_frames(10, 12)), &gate, 8);
        assert_eq!(segments[0].samples[0], (LOUD as f32 * 1.3) as i16);
    }

    #[test]
    fn test_no_segments_while_playback_active() {
        let gate = PlaybackGate::new(Duration::ZERO);
        let _speaking = gate.suspend();
        let steps = utterance_frames(40, 20);

        let (result, segments) = capture(ScriptedSource::new(steps), &gate, 8);
        let summary = result.unwrap();

        assert!(segments.is_empty());
        assert_eq!(summary.segments_started, 0);
        assert_eq!(summary.suspended_frames, 60);
    }

    /// Suspends the gate for frames `from..to` of the wrapped script
    struct InterruptedSource {
        inner: ScriptedSource,
        gate: PlaybackGate,
        guard: Option<crate::playback::PlaybackGuard>,
        read: usize,
        from: usize,
        to: usize,
    }

    impl FrameSource for InterruptedSource {
        fn read_frame(&mut self) -> Result<Option<crate::audio::AudioFrame>, CaptureError> {
            if self.read == self.from {
                self.guard = Some(self.gate.suspend());
            }
            if self.read == self.to {
                self.guard = None;
            }
            self.read += 1;
            self.inner.read_frame()
        }

        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }

        fn describe(&self) -> String {
            "interrupted".to_string()
        }
    }

    #[test]
    fn test_suspension_drops_open_segment() {
        let gate = PlaybackGate::new(Duration::ZERO);
        // Speech opens a segment, playback interrupts it, silence follows.
        // Without a reset the silence would close and forward the segment.
        let mut source = InterruptedSource {
            inner: ScriptedSource::new(utterance_frames(15, 12)),
            gate: gate.clone(),
            guard: None,
            read: 0,
            from: 5,
            to: 15,
        };
        let (tx, mut rx) = mpsc::channel(8);
        let summary = run_capture(
            &mut source,
            &CaptureSettings::default(),
            &gate,
            &tx,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(summary.segments_started, 1);
        assert_eq!(summary.suspended_frames, 10);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_segments() {
        let mut steps = Vec::new();
        for _ in 0..3 {
            steps.extend(utterance_frames(10, 12));
        }
        let gate = PlaybackGate::new(Duration::ZERO);
        let (result, segments) = capture(ScriptedSource::new(steps), &gate, 1);
        let summary = result.unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(summary.segments_dropped, 2);
    }

    #[test]
    fn test_transient_errors_are_tolerated() {
        let mut steps = vec![
            Err(CaptureError::Read("overrun".into())),
            Err(CaptureError::Read("overrun".into())),
        ];
        steps.extend(utterance_frames(10, 12));
        let gate = PlaybackGate::new(Duration::ZERO);
        let (result, segments) = capture(ScriptedSource::new(steps), &gate, 8);
        assert_eq!(result.unwrap().read_errors, 2);
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn test_too_many_read_errors_are_fatal() {
        let steps = (0..3)
            .map(|_| Err(CaptureError::Read("gone".into())))
            .collect();
        let settings = CaptureSettings {
            max_read_errors: 3,
            ..CaptureSettings::default()
        };
        let (tx, _rx) = mpsc::channel(1);
        let mut source = ScriptedSource::new(steps);
        let err = run_capture(
            &mut source,
            &settings,
            &PlaybackGate::new(Duration::ZERO),
            &tx,
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_fatal_error_stops_immediately() {
        let steps = vec![
            Ok(frame(0)),
            Err(CaptureError::DeviceUnavailable("unplugged".into())),
            Ok(frame(0)),
        ];
        let gate = PlaybackGate::new(Duration::ZERO);
        let (result, _) = capture(ScriptedSource::new(steps), &gate, 8);
        assert!(result.unwrap_err().is_fatal());
    }

    #[test]
    fn test_cancellation_stops_thread() {
        let token = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(8);
        let endless: Vec<_> = (0..10_000).map(|_| Ok(frame(0))).collect();
        let handle = spawn_capture(
            Box::new(move || {
                Ok(Box::new(ScriptedSource::new(endless).paced(Duration::from_millis(1)))
                    as Box<dyn FrameSource>)
            }),
            CaptureSettings::default(),
            PlaybackGate::new(Duration::ZERO),
            tx,
            token.clone(),
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        let summary = handle.join().unwrap().unwrap();
        assert!(summary.frames < 10_000);
    }

    #[test]
    fn test_open_failure_is_returned() {
        let (tx, _rx) = mpsc::channel(8);
        let handle = spawn_capture(
            Box::new(|| Err(CaptureError::DeviceUnavailable("no mic".into()))),
            CaptureSettings::default(),
            PlaybackGate::new(Duration::ZERO),
            tx,
            CancellationToken::new(),
        )
        .unwrap();
        assert!(matches!(
            handle.join().unwrap(),
            Err(CaptureError::DeviceUnavailable(_))
        ));
    }
}
