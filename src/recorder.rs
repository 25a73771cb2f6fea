//! Segment recorder - saves forwarded segments and transcript outcomes to disk

use crate::audio_seg::SpeechSegment;
use crate::stats::ListenStats;
use chrono::Local;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// What became of a recorded segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    NoSpeech,
    Hallucination,
    Trigger,
    RejectedTrigger,
    Command,
    FollowUp,
    Ignored,
    WrongSpeaker,
    Error,
}

#[derive(Serialize)]
struct TranscriptLine<'a> {
    time: String,
    file: Option<&'a str>,
    text: Option<&'a str>,
    outcome: Outcome,
}

pub struct SegmentRecorder {
    base: PathBuf, // <root>/20250603_153055/
    log: Option<BufWriter<File>>,
    counter: u64,
}

impl SegmentRecorder {
    /// Create a timestamped session directory under `root`
    pub fn new(root: &Path) -> std::io::Result<Self> {
        let ts = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let base = root.join(ts);
        fs::create_dir_all(&base)?;
        info!("Recording enabled, saving to: {:?}", base);

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(base.join("transcripts.jsonl"))?;

        Ok(Self {
            base,
            log: Some(BufWriter::new(log)),
            counter: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.base
    }

    /// Write the segment as WAV, returning its file name
    pub fn record_segment(&mut self, segment: &SpeechSegment) -> Option<String> {
        self.counter += 1;
        let name = format!(
            "segment_{:04}_{}.wav",
            self.counter,
            Local::now().format("%H%M%S%.3f")
        );
        let path = self.base.join(&name);

        match segment.write_wav(&path) {
            Ok(()) => {
                debug!("Saved segment to {:?}", path);
                Some(name)
            }
            Err(e) => {
                error!("Failed to write segment: {}", e);
                None
            }
        }
    }

    /// Append one line to transcripts.jsonl
    pub fn record_outcome(&mut self, file: Option<&str>, text: Option<&str>, outcome: Outcome) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        let line = TranscriptLine {
            time: Local::now().to_rfc3339(),
            file,
            text,
            outcome,
        };
        let result = serde_json::to_string(&line)
            .map_err(std::io::Error::from)
            .and_then(|json| writeln!(log, "{}", json))
            .and_then(|_| log.flush());
        if let Err(e) = result {
            error!("Failed to write transcript log, disabling: {}", e);
            self.log = None;
        }
    }

    /// Write the final counters next to the recordings
    pub fn write_stats(&self, stats: &ListenStats) {
        let path = self.base.join("stats.json");
        let result = serde_json::to_vec_pretty(stats)
            .map_err(std::io::Error::from)
            .and_then(|json| fs::write(&path, json));
        if let Err(e) = result {
            error!("Failed to write stats: {}", e);
        }
    }
}
