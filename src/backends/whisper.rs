//! Local speech recognition with whisper.cpp

use crate::audio_seg::SpeechSegment;
use crate::services::{Result, ServiceError, Transcriber};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Whisper models expect 16 kHz mono input
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Settings passed to every decode
#[derive(Debug, Clone)]
pub struct WhisperSettings {
    pub language: String,
    pub initial_prompt: Option<String>,
    pub no_speech_threshold: f32,
    pub threads: i32,
}

impl Default for WhisperSettings {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            initial_prompt: None,
            no_speech_threshold: 0.4,
            threads: std::thread::available_parallelism()
                .map(|n| (n.get() as i32 - 1).max(1))
                .unwrap_or(1),
        }
    }
}

pub struct WhisperTranscriber {
    context: Arc<Mutex<WhisperContext>>,
    settings: WhisperSettings,
}

impl WhisperTranscriber {
    /// Load a ggml model from disk
    pub fn load(model: &Path, settings: WhisperSettings) -> Result<Self> {
        info!("Loading Whisper model from {}", model.display());
        let path = model.to_str().ok_or_else(|| {
            ServiceError::failed("whisper", format!("model path is not UTF-8: {}", model.display()))
        })?;
        let context = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| ServiceError::failed("whisper", e.to_string()))?;

        Ok(Self {
            context: Arc::new(Mutex::new(context)),
            settings,
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, segment: &SpeechSegment) -> Result<Option<String>> {
        let audio = resample_linear(&segment.samples, segment.sample_rate, WHISPER_SAMPLE_RATE);
        let context = self.context.clone();
        let settings = self.settings.clone();

        let text = tokio::task::spawn_blocking(move || -> Result<String> {
            let guard = context
                .lock()
                .map_err(|_| ServiceError::failed("whisper", "failed to lock whisper context"))?;
            let mut state = guard
                .create_state()
                .map_err(|e| ServiceError::failed("whisper", e.to_string()))?;

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);
            params.set_token_timestamps(false);
            params.set_translate(false);
            // Each utterance stands alone
            params.set_no_context(true);
            params.set_language(Some(settings.language.as_str()));
            params.set_temperature(0.0);
            params.set_no_speech_thold(settings.no_speech_threshold);
            params.set_n_threads(settings.threads);
            if let Some(prompt) = settings.initial_prompt.as_deref() {
                params.set_initial_prompt(prompt);
            }

            state
                .full(params, &audio)
                .map_err(|e| ServiceError::failed("whisper", e.to_string()))?;

            let count = state
                .full_n_segments()
                .map_err(|e| ServiceError::failed("whisper", e.to_string()))?;
            let mut text = String::new();
            for i in 0..count {
                let piece = state
                    .full_get_segment_text(i)
                    .map_err(|e| ServiceError::failed("whisper", e.to_string()))?;
                text.push_str(&piece);
            }
            Ok(text)
        })
        .await
        .map_err(|e| ServiceError::failed("whisper", format!("decode task failed: {}", e)))??;

        debug!("Whisper output: '{}'", text.trim());
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }

    fn name(&self) -> &str {
        "whisper"
    }
}

/// Linear-interpolation resampler producing normalised f32 samples
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let normalised = samples.iter().map(|&s| s as f32 / 32768.0);
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return normalised.collect();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio).floor() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx] as f32 / 32768.0;
            let b = samples.get(idx + 1).map_or(a, |&s| s as f32 / 32768.0);
            a + (b - a) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_length() {
        let one_second = vec![0i16; 44_100];
        assert_eq!(resample_linear(&one_second, 44_100, 16_000).len(), 16_000);
    }

    #[test]
    fn test_resample_identity_normalises() {
        let out = resample_linear(&[16384, -32768], 16_000, 16_000);
        assert_eq!(out, vec![0.5, -1.0]);
    }

    #[test]
    fn test_resample_interpolates() {
        // Halving the rate picks every other sample
        let out = resample_linear(&[0, 8192, 16384, 24576], 32_000, 16_000);
        assert_eq!(out, vec![0.0, 0.5]);

        // Upsampling lands halfway between neighbours
        let out = resample_linear(&[0, 16384], 8_000, 16_000);
        assert_eq!(out, vec![0.0, 0.25, 0.5, 0.5]);
    }
}
