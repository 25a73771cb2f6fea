//! Per-frame loudness and light signal shaping.
//!
//! Each frame is amplified, soft-gated below a noise floor and clipped back
//! into the 16-bit range. The shaped samples are what the segmenter
//! buffers; the level (peak / full scale) is what the VAD compares.

use crate::audio::AudioFrame;

const FULL_SCALE: f32 = 32768.0;

/// Frame after shaping, together with its normalised level in [0, 1]
#[derive(Debug, Clone)]
pub struct LevelSample {
    pub frame: AudioFrame,
    pub level: f32,
}

/// Gain and gate settings for the analyzer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelConfig {
    /// Linear amplification applied to every sample
    pub gain: f32,
    /// Fraction of full scale below which samples are attenuated
    pub gate_fraction: f32,
    /// Multiplier applied to gated samples
    pub gate_attenuation: f32,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            gain: 1.3,
            gate_fraction: 0.1,
            gate_attenuation: 0.3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LevelAnalyzer {
    config: LevelConfig,
    gate: f32,
}

impl LevelAnalyzer {
    pub fn new(config: LevelConfig) -> Self {
        Self {
            gate: config.gate_fraction * FULL_SCALE,
            config,
        }
    }

    pub fn config(&self) -> &LevelConfig {
        &self.config
    }

    /// Shape the frame and measure its peak level
    pub fn analyze(&self, frame: &AudioFrame) -> LevelSample {
        let mut peak: f32 = 0.0;
        let shaped: Vec<i16> = frame
            .samples()
            .iter()
            .map(|&s| {
                let mut x = s as f32 * self.config.gain;
                if x.abs() < self.gate {
                    x *= self.config.gate_attenuation;
                }
                let clipped = x.clamp(-32767.0, 32767.0);
                peak = peak.max(clipped.abs());
                clipped as i16
            })
            .collect();

        LevelSample {
            level: (peak / FULL_SCALE).min(1.0),
            frame: frame.with_samples(shaped),
        }
    }
}

impl Default for LevelAnalyzer {
    fn default() -> Self {
        Self::new(LevelConfig::default())
    }
}

/// Peak level of raw samples without any shaping
pub fn peak_level(samples: &[i16]) -> f32 {
    let peak = samples
        .iter()
        .map(|&s| (s as i32).unsigned_abs())
        .max()
        .unwrap_or(0);
    (peak as f32 / FULL_SCALE).min(1.0)
}
