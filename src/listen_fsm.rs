//! Listening state machine
//!
//! Owns the listening mode, its deadline and the speaker binding:
//! - Idle: only a validated trigger does anything
//! - CommandCollection: a bare trigger was heard, the next utterance is the command
//! - FollowUp: the last response asked a question, the next utterance is the reply
//!
//! Every method takes the current time explicitly. Side effects are queued
//! as [`Action`]s and collected with [`ListenFsm::drain_actions`] after each
//! event.

use crate::services::{ModeContext, SpeakerId};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningMode {
    /// Waiting for the trigger phrase
    Idle,
    /// Trigger heard, command content pending
    CommandCollection,
    /// A response invited a reply
    FollowUp,
}

/// Work for the control loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Hand the utterance to the dispatcher
    Dispatch {
        text: String,
        context: ModeContext,
        speaker: Option<SpeakerId>,
    },
    /// Speak a prompt (command window expired)
    Prompt(String),
}

#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub command_timeout: Duration,
    pub follow_up_timeout: Duration,
    pub help_prompt: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
            follow_up_timeout: Duration::from_secs(8),
            help_prompt: "How can I help?".to_string(),
        }
    }
}

pub struct ListenFsm {
    cfg: ListenConfig,

    mode: ListeningMode,

    /// When the pending mode expires
    deadline: Option<Instant>,

    /// Speaker allowed to continue, only set outside Idle
    binding: Option<SpeakerId>,

    /// Outbound action queue (drained after each event)
    actions: Vec<Action>,
}

impl ListenFsm {
    pub fn new(cfg: ListenConfig) -> Self {
        Self {
            cfg,
            mode: ListeningMode::Idle,
            deadline: None,
            binding: None,
            actions: Vec::new(),
        }
    }

    pub fn mode(&self) -> ListeningMode {
        self.mode
    }

    pub fn binding(&self) -> Option<&SpeakerId> {
        self.binding.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the next utterance is accepted without the trigger
    pub fn is_pending(&self) -> bool {
        self.mode != ListeningMode::Idle
    }

    /// A validated trigger. `command` is the text that followed it, if any.
    ///
    /// Always takes precedence over a pending mode and replaces the binding.
    pub fn on_trigger(&mut self, command: Option<String>, speaker: Option<SpeakerId>, now: Instant) {
        if self.is_pending() {
            info!("🔔 New trigger replaces pending {:?}", self.mode);
        }
        self.go_idle();

        match command {
            Some(text) => {
                info!("⚡ Command with trigger: \"{}\"", text);
                self.actions.push(Action::Dispatch {
                    text,
                    context: ModeContext::Command,
                    speaker,
                });
            }
            None => {
                info!(
                    "👂 Listening for command ({}s)",
                    self.cfg.command_timeout.as_secs_f32()
                );
                self.mode = ListeningMode::CommandCollection;
                self.deadline = Some(now + self.cfg.command_timeout);
                self.binding = speaker;
            }
        }
    }

    /// An accepted utterance without a trigger. Returns whether it was used.
    pub fn on_utterance(&mut self, text: String, now: Instant) -> bool {
        self.check_timeout(now);

        let context = match self.mode {
            ListeningMode::Idle => {
                debug!("Ignoring utterance while idle: \"{}\"", text);
                return false;
            }
            ListeningMode::CommandCollection => {
                info!("⚡ Command: \"{}\"", text);
                ModeContext::Command
            }
            ListeningMode::FollowUp => {
                info!("💬 Follow-up: \"{}\"", text);
                ModeContext::FollowUp
            }
        };

        let speaker = self.binding.take();
        self.go_idle();
        self.actions.push(Action::Dispatch {
            text,
            context,
            speaker,
        });
        true
    }

    /// Expire the pending mode if its deadline has passed
    pub fn check_timeout(&mut self, now: Instant) -> Option<ListeningMode> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }

        let expired = self.mode;
        match expired {
            ListeningMode::CommandCollection => {
                info!("⏱️ No command heard, prompting");
                self.actions.push(Action::Prompt(self.cfg.help_prompt.clone()));
            }
            ListeningMode::FollowUp => {
                info!("⏱️ Follow-up window closed");
            }
            ListeningMode::Idle => {}
        }
        self.go_idle();
        Some(expired)
    }

    /// Open the reply window, typically after the response has been spoken
    pub fn enter_follow_up(&mut self, speaker: Option<SpeakerId>, now: Instant) {
        info!(
            "💬 Waiting for follow-up ({}s)",
            self.cfg.follow_up_timeout.as_secs_f32()
        );
        self.mode = ListeningMode::FollowUp;
        self.deadline = Some(now + self.cfg.follow_up_timeout);
        self.binding = speaker;
    }

    /// Drain all pending actions
    pub fn drain_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    fn go_idle(&mut self) {
        self.mode = ListeningMode::Idle;
        self.deadline = None;
        self.binding = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fsm() -> ListenFsm {
        ListenFsm::new(ListenConfig::default())
    }

    fn dispatch(text: &str, context: ModeContext, speaker: Option<&str>) -> Action {
        Action::Dispatch {
            text: text.to_string(),
            context,
            speaker: speaker.map(str::to_string),
        }
    }

    #[test]
    fn test_trigger_with_command_dispatches_directly() {
        let mut fsm = fsm();
        let now = Instant::now();
        fsm.on_trigger(Some("turn on the lights".into()), Some("A".into()), now);

        assert_eq!(fsm.mode(), ListeningMode::Idle);
        assert_eq!(fsm.binding(), None);
        assert_eq!(
            fsm.drain_actions(),
            vec![dispatch("turn on the lights", ModeContext::Command, Some("A"))]
        );
        assert!(fsm.drain_actions().is_empty());
    }

    #[test]
    fn test_bare_trigger_then_timeout_prompts() {
        let mut fsm = fsm();
        let t0 = Instant::now();
        fsm.on_trigger(None, Some("A".into()), t0);
        assert_eq!(fsm.mode(), ListeningMode::CommandCollection);
        assert_eq!(fsm.binding().map(String::as_str), Some("A"));
        assert!(fsm.drain_actions().is_empty());

        assert_eq!(fsm.check_timeout(t0 + Duration::from_millis(4900)), None);
        assert_eq!(fsm.mode(), ListeningMode::CommandCollection);

        assert_eq!(
            fsm.check_timeout(t0 + Duration::from_secs(5)),
            Some(ListeningMode::CommandCollection)
        );
        assert_eq!(fsm.mode(), ListeningMode::Idle);
        assert_eq!(fsm.binding(), None);
        assert_eq!(
            fsm.drain_actions(),
            vec![Action::Prompt("How can I help?".into())]
        );
    }

    #[test]
    fn test_bare_trigger_then_command() {
        let mut fsm = fsm();
        let t0 = Instant::now();
        fsm.on_trigger(None, Some("A".into()), t0);
        assert!(fsm.on_utterance("dim the lights".into(), t0 + Duration::from_secs(2)));

        assert_eq!(fsm.mode(), ListeningMode::Idle);
        assert_eq!(
            fsm.drain_actions(),
            vec![dispatch("dim the lights", ModeContext::Command, Some("A"))]
        );
    }

    #[test]
    fn test_late_command_is_not_collected() {
        let mut fsm = fsm();
        let t0 = Instant::now();
        fsm.on_trigger(None, None, t0);
        assert!(!fsm.on_utterance("dim the lights".into(), t0 + Duration::from_secs(6)));
        assert_eq!(
            fsm.drain_actions(),
            vec![Action::Prompt("How can I help?".into())]
        );
    }

    #[test]
    fn test_idle_utterance_is_discarded() {
        let mut fsm = fsm();
        assert!(!fsm.on_utterance("just chatting".into(), Instant::now()));
        assert_eq!(fsm.mode(), ListeningMode::Idle);
        assert!(fsm.drain_actions().is_empty());
    }

    #[test]
    fn test_follow_up_reply() {
        let mut fsm = fsm();
        let t0 = Instant::now();
        fsm.enter_follow_up(Some("A".into()), t0);
        assert_eq!(fsm.mode(), ListeningMode::FollowUp);

        assert!(fsm.on_utterance("yes please".into(), t0 + Duration::from_secs(7)));
        assert_eq!(
            fsm.drain_actions(),
            vec![dispatch("yes please", ModeContext::FollowUp, Some("A"))]
        );
        assert_eq!(fsm.mode(), ListeningMode::Idle);
    }

    #[test]
    fn test_follow_up_timeout_is_silent() {
        let mut fsm = fsm();
        let t0 = Instant::now();
        fsm.enter_follow_up(None, t0);
        assert_eq!(fsm.check_timeout(t0 + Duration::from_secs(7)), None);
        assert_eq!(
            fsm.check_timeout(t0 + Duration::from_secs(8)),
            Some(ListeningMode::FollowUp)
        );
        assert_eq!(fsm.mode(), ListeningMode::Idle);
        assert!(fsm.drain_actions().is_empty());
    }

    #[test]
    fn test_new_trigger_overrides_pending_mode() {
        let mut fsm = fsm();
        let t0 = Instant::now();
        fsm.enter_follow_up(Some("A".into()), t0);

        fsm.on_trigger(None, Some("B".into()), t0 + Duration::from_secs(1));
        assert_eq!(fsm.mode(), ListeningMode::CommandCollection);
        assert_eq!(fsm.binding().map(String::as_str), Some("B"));
        // Deadline restarts from the new trigger
        assert_eq!(fsm.deadline(), Some(t0 + Duration::from_secs(6)));

        fsm.on_trigger(Some("play music".into()), Some("C".into()), t0 + Duration::from_secs(2));
        assert_eq!(fsm.mode(), ListeningMode::Idle);
        assert_eq!(fsm.binding(), None);
        assert_eq!(
            fsm.drain_actions(),
            vec![dispatch("play music", ModeContext::Command, Some("C"))]
        );
    }

    #[test]
    fn test_binding_only_outside_idle() {
        let mut fsm = fsm();
        let t0 = Instant::now();
        let steps: Vec<Box<dyn Fn(&mut ListenFsm)>> = vec![
            Box::new(move |f| f.on_trigger(None, Some("A".into()), t0)),
            Box::new(move |f| {
                f.on_utterance("x y z".into(), t0);
            }),
            Box::new(move |f| f.enter_follow_up(Some("A".into()), t0)),
            Box::new(move |f| {
                f.check_timeout(t0 + Duration::from_secs(60));
            }),
            Box::new(move |f| f.on_trigger(Some("go".into()), Some("A".into()), t0)),
        ];
        for step in steps {
            step(&mut fsm);
            assert!(fsm.binding().is_none() || fsm.is_pending());
        }
    }
}
