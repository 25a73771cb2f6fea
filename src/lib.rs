//! voxgate - turns a live microphone feed into validated, attributable utterances
//!
//! A capture thread shapes frames, runs an adaptive energy VAD and queues
//! speech segments. A single control loop transcribes each segment, drops
//! transcription artifacts, validates the trigger phrase, checks the speaker
//! and drives the listening state machine that decides what gets dispatched.

#![forbid(unsafe_code)]

pub mod audio;
pub mod audio_seg;
pub mod backends;
pub mod capture_loop;
pub mod config;
pub mod cue;
pub mod hallucination;
pub mod level;
pub mod listen_fsm;
pub mod listen_runner;
pub mod pipeline;
pub mod playback;
pub mod recorder;
pub mod services;
pub mod speaker_gate;
pub mod stats;
pub mod transcript;
pub mod trigger;

#[cfg(test)]
mod test_support;
