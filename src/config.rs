//! Configuration file and its mapping onto the runtime settings.

use crate::audio_seg::SegConfig;
use crate::backends::WhisperSettings;
use crate::capture_loop::CaptureSettings;
use crate::hallucination::DEFAULT_DENY_LIST;
use crate::level::LevelConfig;
use crate::listen_fsm::ListenConfig;
use crate::listen_runner::{ControlConfig, ServiceTimeouts};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub vad: VadConfig,
    pub listen: ListenSection,
    pub filter: FilterConfig,
    pub speaker_gate: SpeakerGateConfig,
    pub services: ServicesConfig,
    pub playback: PlaybackConfig,
    /// Save forwarded segments and transcript outcomes here
    pub record_dir: Option<PathBuf>,
}

/// Audio input and per-frame shaping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// PulseAudio source name (None = default input)
    pub device: Option<String>,
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub gain: f32,
    /// Fraction of full scale below which samples are attenuated
    pub noise_floor: f32,
    pub noise_attenuation: f32,
    /// Consecutive failed reads before the device counts as gone
    pub max_read_errors: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let level = LevelConfig::default();
        Self {
            device: None,
            sample_rate: 44_100,
            frame_ms: 100,
            gain: level.gain,
            noise_floor: level.gate_fraction,
            noise_attenuation: level.gate_attenuation,
            max_read_errors: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub baseline_threshold: f32,
    pub threshold_floor: f32,
    pub peak_ratio: f32,
    pub silence_ratio: f32,
    pub silence_budget_ms: u64,
    pub max_segment_ms: u64,
    pub min_segment_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        let seg = SegConfig::default();
        Self {
            baseline_threshold: seg.baseline_threshold,
            threshold_floor: seg.threshold_floor,
            peak_ratio: seg.peak_ratio,
            silence_ratio: seg.silence_ratio,
            silence_budget_ms: seg.silence_budget_ms,
            max_segment_ms: seg.max_segment_ms,
            min_segment_ms: seg.min_segment_ms,
        }
    }
}

/// Trigger phrase and listening windows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenSection {
    pub trigger_phrase: String,
    pub command_timeout_ms: u64,
    pub follow_up_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Spoken when the command window runs out
    pub help_prompt: String,
    /// Completed segments waiting for the control loop
    pub queue_capacity: usize,
}

impl Default for ListenSection {
    fn default() -> Self {
        Self {
            trigger_phrase: "computer".to_string(),
            command_timeout_ms: 5000,
            follow_up_timeout_ms: 8000,
            poll_interval_ms: 100,
            help_prompt: "How can I help?".to_string(),
            queue_capacity: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Known transcription artifacts, matched on whole words
    pub deny_list: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            deny_list: DEFAULT_DENY_LIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakerGateConfig {
    pub enabled: bool,
    /// Diarizer command: reads WAV on stdin, prints speaker turns as JSON
    pub command: Vec<String>,
}

/// A dispatcher backend, tried in list order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatcherBackend {
    Command { argv: Vec<String> },
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CueConfig {
    /// Player command, `{clip}` is replaced by the clip path
    pub command: Vec<String>,
    pub clips: Vec<PathBuf>,
    pub gap_ms: u64,
}

impl Default for CueConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            clips: Vec::new(),
            gap_ms: 200,
        }
    }
}

impl CueConfig {
    pub fn is_enabled(&self) -> bool {
        !self.command.is_empty() && !self.clips.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// ggml Whisper model
    pub whisper_model: Option<PathBuf>,
    pub initial_prompt: Option<String>,
    pub transcribe_timeout_ms: u64,
    pub diarize_timeout_ms: u64,
    pub dispatch_timeout_ms: u64,
    pub speak_timeout_ms: u64,
    pub dispatchers: Vec<DispatcherBackend>,
    /// Speech commands, each reading the text on stdin
    pub speakers: Vec<Vec<String>>,
    pub cue: CueConfig,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            whisper_model: None,
            initial_prompt: None,
            transcribe_timeout_ms: 10_000,
            diarize_timeout_ms: 5_000,
            dispatch_timeout_ms: 10_000,
            speak_timeout_ms: 30_000,
            dispatchers: vec![DispatcherBackend::Log],
            speakers: Vec::new(),
            cue: CueConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Capture stays off this long after playback ends
    pub settle_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { settle_ms: 200 }
    }
}

impl Config {
    /// Load from a TOML file, missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.capture.sample_rate == 0 || self.capture.frame_ms == 0 {
            return invalid("sample rate and frame size must be non-zero");
        }
        if self.capture.gain <= 0.0 {
            return invalid("gain must be positive");
        }
        if !(0.0..=1.0).contains(&self.capture.noise_floor) {
            return invalid("noise floor must be within [0, 1]");
        }
        if self.capture.max_read_errors == 0 {
            return invalid("max_read_errors must be at least 1");
        }
        if self.vad.threshold_floor > self.vad.baseline_threshold {
            return invalid("threshold floor is above the baseline threshold");
        }
        if !(0.0..=1.0).contains(&self.vad.baseline_threshold) {
            return invalid("baseline threshold must be within [0, 1]");
        }
        if self.vad.peak_ratio <= 0.0 || self.vad.silence_ratio <= 0.0 {
            return invalid("peak and silence ratios must be positive");
        }
        if self.vad.silence_budget_ms < self.capture.frame_ms as u64 {
            return invalid("silence budget is shorter than one frame");
        }
        if self.vad.min_segment_ms > self.vad.max_segment_ms {
            return invalid("minimum segment length exceeds the maximum");
        }
        if self.listen.trigger_phrase.trim().is_empty() {
            return invalid("trigger phrase is empty");
        }
        if self.listen.queue_capacity == 0 || self.listen.poll_interval_ms == 0 {
            return invalid("queue capacity and poll interval must be non-zero");
        }
        if self.speaker_gate.enabled && self.speaker_gate.command.is_empty() {
            return invalid("speaker gate is enabled but no diarizer command is set");
        }
        let empty_command = self.services.dispatchers.iter().any(|d| {
            matches!(d, DispatcherBackend::Command { argv } if argv.is_empty())
        }) || self.services.speakers.iter().any(Vec::is_empty);
        if empty_command {
            return invalid("backend command lines must not be empty");
        }
        Ok(())
    }

    pub fn level_config(&self) -> LevelConfig {
        LevelConfig {
            gain: self.capture.gain,
            gate_fraction: self.capture.noise_floor,
            gate_attenuation: self.capture.noise_attenuation,
        }
    }

    pub fn seg_config(&self) -> SegConfig {
        SegConfig {
            sample_rate: self.capture.sample_rate,
            frame_ms: self.capture.frame_ms,
            baseline_threshold: self.vad.baseline_threshold,
            threshold_floor: self.vad.threshold_floor,
            peak_ratio: self.vad.peak_ratio,
            silence_ratio: self.vad.silence_ratio,
            silence_budget_ms: self.vad.silence_budget_ms,
            max_segment_ms: self.vad.max_segment_ms,
            min_segment_ms: self.vad.min_segment_ms,
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            level: self.level_config(),
            segmentation: self.seg_config(),
            max_read_errors: self.capture.max_read_errors,
        }
    }

    pub fn listen_config(&self) -> ListenConfig {
        ListenConfig {
            command_timeout: Duration::from_millis(self.listen.command_timeout_ms),
            follow_up_timeout: Duration::from_millis(self.listen.follow_up_timeout_ms),
            help_prompt: self.listen.help_prompt.clone(),
        }
    }

    pub fn control_config(&self) -> ControlConfig {
        ControlConfig {
            trigger_phrase: self.listen.trigger_phrase.clone(),
            deny_list: self.filter.deny_list.clone(),
            listen: self.listen_config(),
            timeouts: ServiceTimeouts {
                transcribe: Duration::from_millis(self.services.transcribe_timeout_ms),
                dispatch: Duration::from_millis(self.services.dispatch_timeout_ms),
                speak: Duration::from_millis(self.services.speak_timeout_ms),
            },
            poll_interval: Duration::from_millis(self.listen.poll_interval_ms),
        }
    }

    pub fn whisper_settings(&self) -> WhisperSettings {
        WhisperSettings {
            initial_prompt: self.services.initial_prompt.clone(),
            ..WhisperSettings::default()
        }
    }

    pub fn diarize_timeout(&self) -> Duration {
        Duration::from_millis(self.services.diarize_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.playback.settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_runtime_defaults() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.seg_config(), SegConfig::default());
        assert_eq!(config.level_config(), LevelConfig::default());
        assert_eq!(config.listen_config().command_timeout, Duration::from_secs(5));
        assert_eq!(config.listen_config().follow_up_timeout, Duration::from_secs(8));
        assert_eq!(config.settle_delay(), Duration::from_millis(200));
        assert_eq!(config.services.dispatchers, vec![DispatcherBackend::Log]);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            record_dir = "/tmp/voxgate"

            [listen]
            trigger_phrase = "hey jarvis"
            command_timeout_ms = 3000

            [vad]
            silence_budget_ms = 800

            [[services.dispatchers]]
            kind = "command"
            argv = ["./assistant", "--json"]

            [[services.dispatchers]]
            kind = "log"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen.trigger_phrase, "hey jarvis");
        assert_eq!(config.listen.follow_up_timeout_ms, 8000);
        assert_eq!(config.seg_config().silence_budget_units(), 8.0);
        assert_eq!(config.vad.baseline_threshold, 0.35);
        assert_eq!(config.record_dir, Some(PathBuf::from("/tmp/voxgate")));
        assert_eq!(
            config.services.dispatchers[0],
            DispatcherBackend::Command {
                argv: vec!["./assistant".into(), "--json".into()]
            }
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_impossible_values() {
        let mut config = Config::default();
        config.vad.threshold_floor = 0.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.listen.trigger_phrase = "  ".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.speaker_gate.enabled = true;
        assert!(config.validate().is_err());
        config.speaker_gate.command = vec!["diarize".into()];
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.capture.frame_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error_and_missing_file() {
        assert!(matches!(
            Config::from_toml("[listen]\ncommand_timeout_ms = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            Config::load(Path::new("/nonexistent/voxgate.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxgate.toml");
        std::fs::write(&path, "[playback]\nsettle_ms = 350\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.settle_delay(), Duration::from_millis(350));
    }
}
