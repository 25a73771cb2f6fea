//! voxgate - voice front end
//!
//! Listens on the microphone (or replays a WAV file), waits for the trigger
//! phrase and hands validated commands and follow-ups to the configured
//! dispatcher.

#![forbid(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use voxgate::audio::{
    frame_samples, CaptureError, FrameSource, PulseFrameSource, WavFrameSource,
};
use voxgate::backends::{
    CommandDiarizer, CommandDispatcher, CommandEarcon, CommandSpeaker, LogDispatcher, LogSpeaker,
    WhisperTranscriber,
};
use voxgate::capture_loop::SourceFactory;
use voxgate::config::{Config, DispatcherBackend};
use voxgate::cue::ThinkingCue;
use voxgate::listen_runner::{ControlLoop, Services};
use voxgate::pipeline;
use voxgate::playback::PlaybackGate;
use voxgate::recorder::SegmentRecorder;
use voxgate::services::{Dispatcher, FallbackDispatcher, FallbackSpeaker, Speaker};
use voxgate::speaker_gate::SpeakerGate;

#[derive(Parser, Debug)]
#[command(name = "voxgate", version, about = "Trigger-phrase voice front end")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "VOXGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Trigger phrase, overrides the config file
    #[arg(long, env = "VOXGATE_TRIGGER")]
    trigger: Option<String>,

    /// PulseAudio source to record from
    #[arg(long, env = "VOXGATE_DEVICE")]
    device: Option<String>,

    /// ggml Whisper model
    #[arg(long, env = "VOXGATE_WHISPER_MODEL")]
    whisper_model: Option<PathBuf>,

    /// Turn the speaker gate off even if the config enables it
    #[arg(long)]
    no_speaker_gate: bool,

    /// Save segments and transcripts under this directory
    #[arg(long, env = "VOXGATE_RECORD_DIR")]
    record_dir: Option<PathBuf>,

    /// Read audio from a 16-bit mono WAV file instead of the microphone
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Replay the WAV file at real-time speed
    #[arg(long, requires = "wav")]
    realtime: bool,

    /// More logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(trigger) = &cli.trigger {
        config.listen.trigger_phrase = trigger.clone();
    }
    if cli.device.is_some() {
        config.capture.device = cli.device.clone();
    }
    if cli.whisper_model.is_some() {
        config.services.whisper_model = cli.whisper_model.clone();
    }
    if cli.no_speaker_gate {
        config.speaker_gate.enabled = false;
    }
    if cli.record_dir.is_some() {
        config.record_dir = cli.record_dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn build_dispatcher(config: &Config) -> Arc<dyn Dispatcher> {
    let backends: Vec<Arc<dyn Dispatcher>> = config
        .services
        .dispatchers
        .iter()
        .map(|backend| match backend {
            DispatcherBackend::Command { argv } => {
                Arc::new(CommandDispatcher::new(argv.clone())) as Arc<dyn Dispatcher>
            }
            DispatcherBackend::Log => Arc::new(LogDispatcher),
        })
        .collect();

    if backends.is_empty() {
        warn!("No dispatcher configured, commands are only logged");
        return Arc::new(LogDispatcher);
    }
    Arc::new(FallbackDispatcher::new(backends))
}

fn build_speaker(config: &Config) -> Arc<dyn Speaker> {
    let backends: Vec<Arc<dyn Speaker>> = config
        .services
        .speakers
        .iter()
        .map(|argv| Arc::new(CommandSpeaker::new(argv.clone())) as Arc<dyn Speaker>)
        .collect();

    if backends.is_empty() {
        warn!("No speaker configured, responses are only logged");
        return Arc::new(LogSpeaker);
    }
    Arc::new(FallbackSpeaker::new(backends))
}

fn build_services(config: &Config, playback: &PlaybackGate) -> Result<Services> {
    let Some(model) = &config.services.whisper_model else {
        bail!("no Whisper model configured (use --whisper-model or services.whisper_model)");
    };
    let transcriber = WhisperTranscriber::load(model, config.whisper_settings())
        .with_context(|| format!("loading Whisper model {}", model.display()))?;

    let speaker_gate = if config.speaker_gate.enabled {
        info!("🎭 Speaker gate enabled");
        SpeakerGate::new(
            Arc::new(CommandDiarizer::new(config.speaker_gate.command.clone())),
            config.diarize_timeout(),
        )
    } else {
        SpeakerGate::disabled()
    };

    let cue_config = &config.services.cue;
    let cue = cue_config.is_enabled().then(|| {
        ThinkingCue::new(
            Arc::new(CommandEarcon::new(cue_config.command.clone())),
            cue_config.clips.clone(),
            Duration::from_millis(cue_config.gap_ms),
            playback.clone(),
        )
    });

    Ok(Services {
        transcriber: Arc::new(transcriber),
        dispatcher: build_dispatcher(config),
        speaker: build_speaker(config),
        speaker_gate,
        cue,
    })
}

/// Pick the frame source. A WAV file fixes the sample rate of the run.
fn build_source(cli: &Cli, config: &mut Config) -> Result<SourceFactory> {
    if let Some(path) = &cli.wav {
        let source = WavFrameSource::open(path, config.capture.frame_ms, cli.realtime)
            .with_context(|| format!("opening {}", path.display()))?;
        if source.sample_rate() != config.capture.sample_rate {
            info!(
                "Using the WAV sample rate of {}Hz instead of {}Hz",
                source.sample_rate(),
                config.capture.sample_rate
            );
            config.capture.sample_rate = source.sample_rate();
        }
        return Ok(Box::new(
            move || -> std::result::Result<Box<dyn FrameSource>, CaptureError> {
                Ok(Box::new(source))
            },
        ));
    }

    let device = config.capture.device.clone();
    let rate = config.capture.sample_rate;
    let samples = frame_samples(rate, config.capture.frame_ms);
    Ok(Box::new(
        move || -> std::result::Result<Box<dyn FrameSource>, CaptureError> {
            let source = PulseFrameSource::open("voxgate", device.as_deref(), rate, samples)?;
            Ok(Box::new(source))
        },
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    info!("Starting voxgate");

    let mut config = load_config(&cli)?;
    let open = build_source(&cli, &mut config)?;

    let playback = PlaybackGate::new(config.settle_delay());
    let services = build_services(&config, &playback)?;

    let mut control = ControlLoop::new(config.control_config(), services, playback);
    if let Some(dir) = &config.record_dir {
        let recorder = SegmentRecorder::new(dir)
            .with_context(|| format!("creating recording directory under {}", dir.display()))?;
        control = control.with_recorder(recorder);
    }

    let token = CancellationToken::new();
    let stopper = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("🛑 Ctrl+C received, shutting down");
                stopper.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let report = pipeline::run(
        open,
        config.capture_settings(),
        control,
        config.listen.queue_capacity,
        token,
    )
    .await?;

    info!(
        "Done: {} frames captured, {} segments handled, {} dispatched",
        report.capture.frames,
        report.listen.segments,
        report.listen.commands + report.listen.follow_ups
    );
    Ok(())
}
