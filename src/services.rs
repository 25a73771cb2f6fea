//! External service contracts
//!
//! Transcription, diarization, command dispatch and speech output are black
//! boxes to the pipeline. Each is a trait object so backends can be swapped
//! or chained, and every call is bounded by a deadline.

use crate::audio_seg::SpeechSegment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Error type for external service calls
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{service} timed out after {after:?}")]
    Timeout {
        service: &'static str,
        after: Duration,
    },

    #[error("{service} failed: {message}")]
    Failed {
        service: &'static str,
        message: String,
    },

    #[error("no {0} backend configured")]
    Unavailable(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServiceError {
    pub fn failed(service: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Failed {
            service,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Identifier assigned to a voice by the diarizer
pub type SpeakerId = String;

/// Cumulative speaking time of one speaker within a segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerTurn {
    pub speaker: SpeakerId,
    pub seconds: f32,
}

/// Why the utterance is being dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeContext {
    /// Command following the trigger phrase
    Command,
    /// Reply to a response that asked for one
    FollowUp,
}

/// What the dispatcher wants done after handling an utterance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReply {
    pub spoken_response: Option<String>,
    pub expect_followup: bool,
}

impl DispatchReply {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn say(text: impl Into<String>) -> Self {
        Self {
            spoken_response: Some(text.into()),
            expect_followup: false,
        }
    }

    pub fn ask(text: impl Into<String>) -> Self {
        Self {
            spoken_response: Some(text.into()),
            expect_followup: true,
        }
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// `Ok(None)` or empty text means nothing was said
    async fn transcribe(&self, segment: &SpeechSegment) -> Result<Option<String>>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait Diarizer: Send + Sync {
    async fn diarize(&self, segment: &SpeechSegment) -> Result<Vec<SpeakerTurn>>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, utterance: &str, context: ModeContext) -> Result<DispatchReply>;

    fn name(&self) -> &str;
}

/// Text-to-speech output; returns once playback has finished
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(&self, text: &str) -> Result<()>;

    fn name(&self) -> &str;
}

/// Short non-speech sound clips
#[async_trait]
pub trait Earcon: Send + Sync {
    async fn play(&self, clip: &Path) -> Result<()>;
}

/// Run `fut` with a deadline, turning expiry into `ServiceError::Timeout`
pub async fn with_deadline<T, F>(service: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout {
            service,
            after: limit,
        }),
    }
}

/// Tries each dispatcher in order until one succeeds
pub struct FallbackDispatcher {
    backends: Vec<Arc<dyn Dispatcher>>,
}

impl FallbackDispatcher {
    pub fn new(backends: Vec<Arc<dyn Dispatcher>>) -> Self {
        Self { backends }
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[async_trait]
impl Dispatcher for FallbackDispatcher {
    async fn dispatch(&self, utterance: &str, context: ModeContext) -> Result<DispatchReply> {
        let mut last_error = ServiceError::Unavailable("dispatcher");
        for backend in &self.backends {
            match backend.dispatch(utterance, context).await {
                Ok(reply) => {
                    debug!("Dispatched via {}", backend.name());
                    return Ok(reply);
                }
                Err(e) => {
                    warn!("Dispatcher {} failed: {}", backend.name(), e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    fn name(&self) -> &str {
        "fallback"
    }
}

/// Tries each speaker in order until one succeeds
pub struct FallbackSpeaker {
    backends: Vec<Arc<dyn Speaker>>,
}

impl FallbackSpeaker {
    pub fn new(backends: Vec<Arc<dyn Speaker>>) -> Self {
        Self { backends }
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[async_trait]
impl Speaker for FallbackSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        let mut last_error = ServiceError::Unavailable("speaker");
        for backend in &self.backends {
            match backend.speak(text).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Speaker {} failed: {}", backend.name(), e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    fn name(&self) -> &str {
        "fallback"
    }
}
