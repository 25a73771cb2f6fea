//! Audio frame sources
//!
//! Provides the raw frame producers for the capture thread: a PulseAudio
//! recording stream for live microphones and a WAV replay source. Frames are
//! 16-bit mono PCM, by default 100ms at 44.1 kHz (4410 samples).

use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::{Context, FlagSet as ContextFlagSet};
use libpulse_binding::def::Retval;
use libpulse_binding::mainloop::standard::{IterateResult, Mainloop};
use libpulse_binding::proplist::Proplist;
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Error type for frame capture
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The device could not be opened or has gone away for good
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A single read failed; the next one may succeed
    #[error("capture read failed: {0}")]
    Read(String),

    #[error("unsupported audio format: {0}")]
    Format(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Whether the pipeline cannot continue after this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CaptureError::Read(_))
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;

/// One fixed-size block of mono 16-bit samples.
///
/// Frames are immutable once produced; the level analyzer builds a new
/// frame from the shaped samples instead of editing in place.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
    captured_at: Instant,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            captured_at: Instant::now(),
        }
    }

    /// Same capture time, different samples
    pub fn with_samples(&self, samples: Vec<i16>) -> Self {
        Self {
            samples,
            sample_rate: self.sample_rate,
            captured_at: self.captured_at,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }
}

/// Number of samples in a frame of `frame_ms` milliseconds
pub fn frame_samples(sample_rate: u32, frame_ms: u32) -> usize {
    (sample_rate as u64 * frame_ms as u64 / 1000) as usize
}

pub fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(samples as f64 / sample_rate as f64)
}

/// A blocking producer of audio frames.
///
/// Implementations are created and driven on the capture thread only, so
/// they do not need to be `Send`.
pub trait FrameSource {
    /// Block until the next frame is available. `Ok(None)` means the
    /// source is exhausted and capture should stop.
    fn read_frame(&mut self) -> Result<Option<AudioFrame>>;

    fn sample_rate(&self) -> u32;

    /// Human-readable name for logs
    fn describe(&self) -> String;
}

/// Represents an audio device
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Device name (PulseAudio source name)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Sample rate
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u8,
    /// Is this device a monitor (system playback) or a microphone
    pub is_monitor: bool,
}

/// Audio device type for easy filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// Microphone or other input device
    Microphone,
    /// Monitor of system audio output
    Monitor,
    /// Any device type
    Any,
}

/// Reads frames from a PulseAudio recording stream using the simple API.
pub struct PulseFrameSource {
    simple: Simple,
    /// Current device name, `None` for the server default
    device_name: Option<String>,
    sample_rate: u32,
    frame_samples: usize,
    /// Reused byte buffer for each read
    buffer: Vec<u8>,
}

impl PulseFrameSource {
    /// Open a mono S16LE recording stream on `device` (or the default source).
    pub fn open(
        app_name: &str,
        device: Option<&str>,
        sample_rate: u32,
        frame_samples: usize,
    ) -> Result<Self> {
        if frame_samples == 0 {
            return Err(CaptureError::Format("frame size must be non-zero".to_string()));
        }

        let spec = Spec {
            format: Format::S16le,
            channels: 1,
            rate: sample_rate,
        };
        if !spec.is_valid() {
            return Err(CaptureError::Format(format!(
                "invalid sample spec at {}Hz",
                sample_rate
            )));
        }

        info!(
            "Opening capture stream on {} at {}Hz ({} samples/frame)",
            device.unwrap_or("default source"),
            sample_rate,
            frame_samples
        );

        let simple = Simple::new(
            None,     // default server
            app_name, // application name
            Direction::Record,
            device,   // specific device or default
            "record", // stream description
            &spec,
            None, // default channel map
            None, // default buffering
        )
        .map_err(|e| CaptureError::DeviceUnavailable(ToString::to_string(&e)))?;

        Ok(Self {
            simple,
            device_name: device.map(|d| d.to_string()),
            sample_rate,
            frame_samples,
            buffer: vec![0u8; frame_samples * 2],
        })
    }

    /// Get the current device name, if any
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// List available audio input devices
    pub fn list_devices(device_type: DeviceType) -> Result<Vec<AudioDevice>> {
        let devices = Arc::new(Mutex::new(Vec::new()));
        let devices_clone = devices.clone();

        let mut proplist = Proplist::new()
            .ok_or_else(|| CaptureError::DeviceUnavailable("Failed to create proplist".to_string()))?;
        proplist
            .set_str(
                libpulse_binding::proplist::properties::APPLICATION_NAME,
                "voxgate-device-lister",
            )
            .map_err(|_| CaptureError::DeviceUnavailable("Failed to set proplist".to_string()))?;

        let mut mainloop = Mainloop::new()
            .ok_or_else(|| CaptureError::DeviceUnavailable("Failed to create mainloop".to_string()))?;

        let mut context = Context::new_with_proplist(&mainloop, "voxgate-context", &proplist)
            .ok_or_else(|| CaptureError::DeviceUnavailable("Failed to create context".to_string()))?;

        context
            .connect(None, ContextFlagSet::NOFLAGS, None)
            .map_err(|e| CaptureError::DeviceUnavailable(ToString::to_string(&e)))?;

        // Wait for context to be ready
        loop {
            match mainloop.iterate(false) {
                IterateResult::Quit(_) | IterateResult::Err(_) => {
                    return Err(CaptureError::DeviceUnavailable(
                        "Mainloop iterate failed".to_string(),
                    ));
                }
                IterateResult::Success(_) => {}
            }

            match context.get_state() {
                libpulse_binding::context::State::Ready => break,
                libpulse_binding::context::State::Failed
                | libpulse_binding::context::State::Terminated => {
                    return Err(CaptureError::DeviceUnavailable(
                        "Connection failed".to_string(),
                    ));
                }
                _ => {}
            }
        }

        let operation_done = Arc::new(Mutex::new(false));
        let operation_done_clone = operation_done.clone();

        let introspector = context.introspect();
        let _op = introspector.get_source_info_list(move |source_info_list| match source_info_list {
            ListResult::Item(source_info) => {
                let is_monitor = source_info.monitor_of_sink.is_some()
                    || source_info
                        .name
                        .as_ref()
                        .map(|name| name.contains("monitor"))
                        .unwrap_or(false);

                let should_include = match device_type {
                    DeviceType::Microphone => !is_monitor,
                    DeviceType::Monitor => is_monitor,
                    DeviceType::Any => true,
                };

                if should_include {
                    if let (Some(name), Some(description)) = (
                        source_info.name.as_ref().map(|s| s.to_string()),
                        source_info.description.as_ref().map(|s| s.to_string()),
                    ) {
                        if let Ok(mut devices) = devices_clone.lock() {
                            devices.push(AudioDevice {
                                name,
                                description,
                                sample_rate: source_info.sample_spec.rate,
                                channels: source_info.sample_spec.channels,
                                is_monitor,
                            });
                        }
                    }
                }
            }
            ListResult::End => {
                if let Ok(mut done) = operation_done_clone.lock() {
                    *done = true;
                }
            }
            ListResult::Error => {
                if let Ok(mut done) = operation_done_clone.lock() {
                    *done = true;
                }
                error!("Error listing audio devices");
            }
        });

        loop {
            match mainloop.iterate(false) {
                IterateResult::Quit(_) | IterateResult::Err(_) => {
                    return Err(CaptureError::DeviceUnavailable(
                        "Mainloop iterate failed".to_string(),
                    ));
                }
                IterateResult::Success(_) => {}
            }

            if let Ok(done) = operation_done.lock() {
                if *done {
                    break;
                }
            }
        }

        let result = devices
            .lock()
            .map(|devices| devices.clone())
            .map_err(|_| CaptureError::DeviceUnavailable("Failed to access devices list".to_string()));

        context.disconnect();
        mainloop.quit(Retval(0));

        result
    }
}

impl FrameSource for PulseFrameSource {
    fn read_frame(&mut self) -> Result<Option<AudioFrame>> {
        self.simple
            .read(&mut self.buffer)
            .map_err(|e| CaptureError::Read(ToString::to_string(&e)))?;
        let samples = bytes_to_samples(&self.buffer);
        debug_assert_eq!(samples.len(), self.frame_samples);
        Ok(Some(AudioFrame::new(samples, self.sample_rate)))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn describe(&self) -> String {
        format!(
            "pulse:{}",
            self.device_name.as_deref().unwrap_or("default")
        )
    }
}

/// Replays a 16-bit mono WAV file as a stream of frames.
pub struct WavFrameSource {
    path: PathBuf,
    samples: Vec<i16>,
    position: usize,
    sample_rate: u32,
    frame_samples: usize,
    /// Deliver frames no faster than real time
    paced: bool,
    next_due: Option<Instant>,
}

impl WavFrameSource {
    pub fn open(path: &Path, frame_ms: u32, paced: bool) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        if spec.channels != 1
            || spec.bits_per_sample != 16
            || spec.sample_format != hound::SampleFormat::Int
        {
            return Err(CaptureError::Format(format!(
                "{} must be 16-bit mono PCM (got {} channels, {} bits)",
                path.display(),
                spec.channels,
                spec.bits_per_sample
            )));
        }

        let samples = reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let frame_samples = frame_samples(spec.sample_rate, frame_ms);
        if frame_samples == 0 {
            return Err(CaptureError::Format("frame size must be non-zero".to_string()));
        }

        info!(
            "Replaying {} ({:.1}s at {}Hz)",
            path.display(),
            samples.len() as f32 / spec.sample_rate as f32,
            spec.sample_rate
        );

        Ok(Self {
            path: path.to_path_buf(),
            samples,
            position: 0,
            sample_rate: spec.sample_rate,
            frame_samples,
            paced,
            next_due: None,
        })
    }
}

impl FrameSource for WavFrameSource {
    fn read_frame(&mut self) -> Result<Option<AudioFrame>> {
        let end = self.position + self.frame_samples;
        if end > self.samples.len() {
            // Partial trailing frame is dropped, like a short device read
            debug!("WAV replay finished after {} samples", self.position);
            return Ok(None);
        }

        if self.paced {
            let frame_len = samples_to_duration(self.frame_samples, self.sample_rate);
            let due = self.next_due.unwrap_or_else(Instant::now);
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
            self.next_due = Some(due + frame_len);
        }

        let frame = AudioFrame::new(self.samples[self.position..end].to_vec(), self.sample_rate);
        self.position = end;
        Ok(Some(frame))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn describe(&self) -> String {
        format!("wav:{}", self.path.display())
    }
}

/// Convert little-endian S16 bytes to samples
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_frame_samples() {
        assert_eq!(frame_samples(44_100, 100), 4410);
        assert_eq!(frame_samples(16_000, 20), 320);
    }

    #[test]
    fn test_bytes_to_samples() {
        let samples = [0i16, 100, -100, i16::MAX, i16::MIN];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert_eq!(bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn test_wav_source_yields_whole_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        // 2.5 frames of 100ms at 8kHz
        let samples: Vec<i16> = (0..2000).map(|i| (i % 100) as i16).collect();
        write_wav(&path, &samples, 8000);

        let mut source = WavFrameSource::open(&path, 100, false).unwrap();
        assert_eq!(source.sample_rate(), 8000);

        let first = source.read_frame().unwrap().unwrap();
        assert_eq!(first.len(), 800);
        assert_eq!(first.samples()[..3], [0, 1, 2]);
        assert!(source.read_frame().unwrap().is_some());
        assert!(source.read_frame().unwrap().is_none());
    }

    #[test]
    fn test_wav_source_rejects_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();

        let err = WavFrameSource::open(&path, 100, false).err().unwrap();
        assert!(matches!(err, CaptureError::Format(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_read_errors_are_transient() {
        assert!(!CaptureError::Read("overrun".into()).is_fatal());
        assert!(CaptureError::DeviceUnavailable("gone".into()).is_fatal());
    }
}
