//! Backends that shell out to external programs.
//!
//! Each backend is configured with an argv list. Input goes to the child's
//! stdin, the reply (if any) is read from stdout.

use crate::audio_seg::SpeechSegment;
use crate::services::{
    DispatchReply, Diarizer, Dispatcher, Earcon, ModeContext, Result, ServiceError, Speaker,
    SpeakerTurn,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Placeholder replaced by the clip path in earcon commands
const CLIP_PLACEHOLDER: &str = "{clip}";

/// Spawn `argv`, feed `input` on stdin and collect stdout
async fn run_process(service: &'static str, argv: &[String], input: &[u8]) -> Result<Vec<u8>> {
    let (program, args) = argv
        .split_first()
        .ok_or(ServiceError::Unavailable(service))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        // A child that exits without reading is judged by its exit status
        if let Err(e) = stdin.write_all(input).await {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(e.into());
            }
        }
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ServiceError::failed(
            service,
            format!("{} exited with {}: {}", program, output.status, stderr.trim()),
        ));
    }
    Ok(output.stdout)
}

#[derive(Serialize)]
struct DispatchRequest<'a> {
    text: &'a str,
    context: ModeContext,
}

#[derive(Deserialize)]
struct DispatchResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    expect_followup: bool,
}

/// Sends `{"text", "context"}` as JSON and reads the reply from stdout.
///
/// The reply may be JSON `{"text", "expect_followup"}` or plain text.
pub struct CommandDispatcher {
    argv: Vec<String>,
}

impl CommandDispatcher {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl Dispatcher for CommandDispatcher {
    async fn dispatch(&self, utterance: &str, context: ModeContext) -> Result<DispatchReply> {
        let request = serde_json::to_vec(&DispatchRequest {
            text: utterance,
            context,
        })?;
        let stdout = run_process("dispatcher", &self.argv, &request).await?;
        Ok(parse_reply(&stdout))
    }

    fn name(&self) -> &str {
        "command"
    }
}

fn parse_reply(stdout: &[u8]) -> DispatchReply {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();

    let (spoken, expect_followup) = match serde_json::from_str::<DispatchResponse>(text) {
        Ok(reply) => (reply.text.unwrap_or_default(), reply.expect_followup),
        Err(_) => (text.to_string(), false),
    };
    let spoken = spoken.trim();

    DispatchReply {
        spoken_response: (!spoken.is_empty()).then(|| spoken.to_string()),
        expect_followup,
    }
}

/// Logs the utterance and stays silent
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn dispatch(&self, utterance: &str, context: ModeContext) -> Result<DispatchReply> {
        info!("📨 {:?}: \"{}\"", context, utterance);
        Ok(DispatchReply::silent())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Logs what would have been said
pub struct LogSpeaker;

#[async_trait]
impl Speaker for LogSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        info!("🔈 (no speaker) \"{}\"", text);
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Pipes the text into a TTS program and waits for it to exit
pub struct CommandSpeaker {
    argv: Vec<String>,
}

impl CommandSpeaker {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl Speaker for CommandSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        debug!("🔊 Speaking: \"{}\"", text);
        run_process("speaker", &self.argv, text.as_bytes()).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("command")
    }
}

/// Writes the segment as WAV to stdin, expects `[{"speaker", "seconds"}]`
pub struct CommandDiarizer {
    argv: Vec<String>,
}

impl CommandDiarizer {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl Diarizer for CommandDiarizer {
    async fn diarize(&self, segment: &SpeechSegment) -> Result<Vec<SpeakerTurn>> {
        let wav = segment
            .to_wav_bytes()
            .map_err(|e| ServiceError::failed("diarizer", e.to_string()))?;
        let stdout = run_process("diarizer", &self.argv, &wav).await?;
        Ok(serde_json::from_slice(&stdout)?)
    }

    fn name(&self) -> &str {
        "command"
    }
}

/// Plays a clip with an external player. `{clip}` in the argv is replaced by
/// the path, otherwise the path is appended.
pub struct CommandEarcon {
    argv: Vec<String>,
}

impl CommandEarcon {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    fn argv_for(&self, clip: &Path) -> Vec<String> {
        let clip = clip.display().to_string();
        if self.argv.iter().any(|a| a.contains(CLIP_PLACEHOLDER)) {
            self.argv
                .iter()
                .map(|a| a.replace(CLIP_PLACEHOLDER, &clip))
                .collect()
        } else {
            let mut argv = self.argv.clone();
            argv.push(clip);
            argv
        }
    }
}

#[async_trait]
impl Earcon for CommandEarcon {
    async fn play(&self, clip: &Path) -> Result<()> {
        run_process("earcon", &self.argv_for(clip), &[]).await?;
        Ok(())
    }
}
