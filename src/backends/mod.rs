//! Concrete service backends

pub mod command;
pub mod whisper;

pub use command::{CommandDiarizer, CommandDispatcher, CommandEarcon, CommandSpeaker, LogDispatcher, LogSpeaker};
pub use whisper::{WhisperSettings, WhisperTranscriber};
