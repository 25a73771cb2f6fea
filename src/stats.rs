//! Counters and latency tracking for the control loop

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::info;

const MAX_LATENCIES: usize = 100;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListenStats {
    pub segments: u64,
    pub transcripts: u64,
    pub empty_transcripts: u64,
    pub hallucinations: u64,
    pub triggers: u64,
    pub rejected_triggers: u64,
    pub commands: u64,
    pub follow_ups: u64,
    pub prompts: u64,
    /// Pending windows that ran out
    pub timeouts: u64,
    pub ignored: u64,
    pub speaker_rejections: u64,
    pub service_errors: u64,
    /// Segments dropped from the queue when playback started or on shutdown
    pub drained: u64,

    /// Hand-off to dispatch completion, most recent last
    #[serde(skip)]
    latencies: VecDeque<Duration>,
}

impl ListenStats {
    pub fn record_latency(&mut self, latency: Duration) {
        self.latencies.push_back(latency);
        if self.latencies.len() > MAX_LATENCIES {
            self.latencies.pop_front();
        }
    }

    pub fn latencies(&self) -> impl Iterator<Item = &Duration> {
        self.latencies.iter()
    }

    /// (min, max, average) over the recent latencies
    pub fn latency_summary(&self) -> Option<(Duration, Duration, Duration)> {
        let min = *self.latencies.iter().min()?;
        let max = *self.latencies.iter().max()?;
        let sum: Duration = self.latencies.iter().sum();
        Some((min, max, sum / self.latencies.len() as u32))
    }

    pub fn log_summary(&self) {
        info!(
            "📊 {} segments, {} transcripts ({} empty, {} hallucinations), {} triggers ({} rejected)",
            self.segments,
            self.transcripts,
            self.empty_transcripts,
            self.hallucinations,
            self.triggers,
            self.rejected_triggers
        );
        info!(
            "📊 {} commands, {} follow-ups, {} timeouts, {} prompts, {} ignored, {} wrong speaker, {} service errors, {} drained",
            self.commands,
            self.follow_ups,
            self.timeouts,
            self.prompts,
            self.ignored,
            self.speaker_rejections,
            self.service_errors,
            self.drained
        );
        if let Some((min, max, avg)) = self.latency_summary() {
            info!(
                "📊 Response latency over {}: min {}ms, max {}ms, avg {}ms",
                self.latencies.len(),
                min.as_millis(),
                max.as_millis(),
                avg.as_millis()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_summary() {
        let mut stats = ListenStats::default();
        assert!(stats.latency_summary().is_none());

        for ms in [100, 300, 200] {
            stats.record_latency(Duration::from_millis(ms));
        }
        let (min, max, avg) = stats.latency_summary().unwrap();
        assert_eq!(min, Duration::from_millis(100));
        assert_eq!(max, Duration::from_millis(300));
        assert_eq!(avg, Duration::from_millis(200));
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let mut stats = ListenStats::default();
        for ms in 0..(MAX_LATENCIES as u64 + 20) {
            stats.record_latency(Duration::from_millis(ms));
        }
        assert_eq!(stats.latencies().count(), MAX_LATENCIES);
        assert_eq!(stats.latencies().next(), Some(&Duration::from_millis(20)));
    }
}
