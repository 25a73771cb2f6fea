//! Trigger phrase validation
//!
//! A transcript that contains the trigger phrase is only treated as a real
//! trigger if it survives a few sanity checks: the text must not be a
//! hallucination, the trigger must not be the dangling tail of unrelated
//! speech, its immediate neighbourhood must not loop, and whatever follows
//! it must be plausible command content.

use crate::hallucination::{detect_repetition, Hallucination, HallucinationFilter};
use crate::transcript::{word_counts, words};
use std::fmt;
use tracing::{debug, info, warn};

/// Words inspected on each side of the trigger
const CONTEXT_WINDOW: usize = 4;
/// A neighbour word may appear at most this often
const CONTEXT_MAX_REPEATS: usize = 2;
/// Lead-in words allowed before a bare trigger
const BARE_MAX_LEAD_IN: usize = 2;
/// Trailing text this short is not a command
const MIN_COMMAND_CHARS: usize = 3;

/// Outcome of validating a transcript that mentions the trigger
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerVerdict {
    /// Trigger followed by command content
    Command(String),
    /// Trigger on its own, command still to come
    Bare,
    /// Trigger present but not credible
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// Whole transcript is a hallucination
    Hallucinated(Hallucination),
    /// Trigger ends a longer stretch of speech
    TrailingTrigger,
    /// A word loops right next to the trigger
    LocalRepetition { word: String, count: usize },
    /// Text after the trigger is a hallucination
    JunkCommand(Hallucination),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Hallucinated(h) => write!(f, "trigger inside hallucination: {}", h),
            RejectReason::TrailingTrigger => write!(f, "no command after trigger"),
            RejectReason::LocalRepetition { word, count } => {
                write!(f, "'{}' appears {} times near trigger", word, count)
            }
            RejectReason::JunkCommand(h) => write!(f, "command text is junk: {}", h),
        }
    }
}

/// Internal analysis failure, resolved by accepting the trigger
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("trigger text found but no run of words contains it")]
    Unanchored,
}

#[derive(Debug, Clone)]
pub struct TriggerValidator {
    phrase: String,
    tokens: Vec<String>,
    filter: HallucinationFilter,
}

impl TriggerValidator {
    pub fn new(phrase: &str, filter: HallucinationFilter) -> Self {
        let phrase = phrase.trim().to_lowercase();
        let tokens = words(&phrase).into_iter().map(str::to_string).collect();
        Self {
            phrase,
            tokens,
            filter,
        }
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Cheap substring test, run before validation
    pub fn mentions_trigger(&self, text: &str) -> bool {
        !self.phrase.is_empty() && text.contains(&self.phrase)
    }

    /// Validate normalised transcript text. `None` if the trigger is absent.
    pub fn validate(&self, text: &str) -> Option<TriggerVerdict> {
        if !self.mentions_trigger(text) {
            return None;
        }

        let verdict = match self.analyze(text) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Trigger validation error ({}), accepting", e);
                self.fail_open(text)
            }
        };

        match &verdict {
            TriggerVerdict::Command(command) => info!("🔔 Trigger with command: \"{}\"", command),
            TriggerVerdict::Bare => info!("🔔 Trigger heard, waiting for command"),
            TriggerVerdict::Rejected(reason) => info!("🚫 Trigger rejected: {}", reason),
        }
        Some(verdict)
    }

    fn analyze(&self, text: &str) -> Result<TriggerVerdict, AnalysisError> {
        let words = words(text);
        let (start, end) = self.anchor(&words).ok_or(AnalysisError::Unanchored)?;

        if let Err(h) = self.filter.check(text) {
            return Ok(TriggerVerdict::Rejected(RejectReason::Hallucinated(h)));
        }

        let command = words[end + 1..].join(" ");
        if command.chars().count() < MIN_COMMAND_CHARS {
            return Ok(if start <= BARE_MAX_LEAD_IN {
                TriggerVerdict::Bare
            } else {
                TriggerVerdict::Rejected(RejectReason::TrailingTrigger)
            });
        }

        let from = start.saturating_sub(CONTEXT_WINDOW);
        let to = (end + 1 + CONTEXT_WINDOW).min(words.len());
        let neighbours = words[from..to]
            .iter()
            .copied()
            .filter(|w| !self.tokens.iter().any(|t| w.contains(t.as_str())));
        if let Some((word, count)) = word_counts(neighbours, 2)
            .into_iter()
            .filter(|(_, count)| *count > CONTEXT_MAX_REPEATS)
            .max_by_key(|(_, count)| *count)
        {
            return Ok(TriggerVerdict::Rejected(RejectReason::LocalRepetition {
                word: word.to_string(),
                count,
            }));
        }

        if let Some(h) = detect_repetition(&command) {
            return Ok(TriggerVerdict::Rejected(RejectReason::JunkCommand(h)));
        }

        Ok(TriggerVerdict::Command(command))
    }

    /// First run of words containing the trigger tokens, as (first, last) index.
    /// A token inside a longer word ("supercomputer") still anchors.
    fn anchor(&self, words: &[&str]) -> Option<(usize, usize)> {
        let n = self.tokens.len();
        if n == 0 || words.len() < n {
            return None;
        }
        (0..=words.len() - n)
            .find(|&i| {
                self.tokens
                    .iter()
                    .zip(&words[i..i + n])
                    .all(|(t, w)| w.contains(t.as_str()))
            })
            .map(|i| (i, i + n - 1))
    }

    /// Accept with whatever follows the first occurrence of the phrase
    fn fail_open(&self, text: &str) -> TriggerVerdict {
        let rest = text
            .find(&self.phrase)
            .map(|at| &text[at + self.phrase.len()..])
            .unwrap_or("");
        let command = words(rest).join(" ");
        debug!("Fail-open command: \"{}\"", command);
        if command.chars().count() < MIN_COMMAND_CHARS {
            TriggerVerdict::Bare
        } else {
            TriggerVerdict::Command(command)
        }
    }
}
