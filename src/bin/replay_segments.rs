//! Offline segmentation: run a WAV file through the level analyzer and the
//! adaptive VAD and print where segments open and close.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use voxgate::audio::{FrameSource, WavFrameSource};
use voxgate::audio_seg::{AudioSegmenter, CloseReason, SegmentEvent};
use voxgate::config::Config;
use voxgate::level::LevelAnalyzer;

#[derive(Parser, Debug)]
#[command(name = "replay_segments", about = "Show VAD segment boundaries for a WAV file")]
struct Cli {
    /// 16-bit mono WAV file
    wav: PathBuf,

    /// TOML configuration file (capture and vad sections are used)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write each completed segment as a WAV file here
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Print the level of every frame
    #[arg(long)]
    levels: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let mut source = WavFrameSource::open(&cli.wav, config.capture.frame_ms, false)
        .with_context(|| format!("opening {}", cli.wav.display()))?;
    config.capture.sample_rate = source.sample_rate();
    config.validate()?;

    if let Some(dir) = &cli.out {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let analyzer = LevelAnalyzer::new(config.level_config());
    let mut segmenter = AudioSegmenter::new(config.seg_config());
    let frame_secs = config.capture.frame_ms as f32 / 1000.0;

    println!("🎤 Segmenting {}", cli.wav.display());
    let mut index = 0usize;
    let mut opened_at = 0.0f32;
    let mut completed = 0usize;
    let mut too_short = 0usize;

    while let Some(frame) = source.read_frame()? {
        let at = index as f32 * frame_secs;
        index += 1;

        let sample = analyzer.analyze(&frame);
        if cli.levels {
            println!(
                "{:7.1}s level {:.3} threshold {:.3}",
                at,
                sample.level,
                segmenter.vad().threshold().current()
            );
        }

        match segmenter.push_frame(&sample) {
            Some(SegmentEvent::Started { level }) => {
                opened_at = at;
                println!("{:7.1}s ▶ speech (level {:.3})", at, level);
            }
            Some(SegmentEvent::Completed(segment)) => {
                completed += 1;
                let why = match segment.close_reason {
                    CloseReason::Silence => "silence",
                    CloseReason::MaxLength => "max length",
                };
                println!(
                    "{:7.1}s ■ segment {} from {:.1}s, {:.1}s long, peak {:.3} ({})",
                    at + frame_secs,
                    completed,
                    opened_at,
                    segment.duration().as_secs_f32(),
                    segment.peak_level,
                    why
                );
                if let Some(dir) = &cli.out {
                    let path = dir.join(format!("segment_{:03}.wav", completed));
                    segment
                        .write_wav(&path)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("          saved {}", path.display());
                }
            }
            Some(SegmentEvent::TooShort { duration, .. }) => {
                too_short += 1;
                println!(
                    "{:7.1}s ✕ dropped {:.1}s blip",
                    at + frame_secs,
                    duration.as_secs_f32()
                );
            }
            None => {}
        }
    }

    if segmenter.is_capturing() {
        println!(
            "File ended mid-speech, {:.1}s left unclosed",
            segmenter.buffer_duration().as_secs_f32()
        );
    }
    println!(
        "\n{} frames, {} segments, {} too short",
        index, completed, too_short
    );
    Ok(())
}
