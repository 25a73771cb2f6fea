//! Hallucination filter
//!
//! Speech recognisers produce fluent garbage on noise: the same phrase
//! looped, one word over and over, or stock video outro lines. This module
//! flags such transcripts so they never reach the listening state machine.

use crate::transcript::{contains_words, word_counts, words};
use std::fmt;
use tracing::debug;

/// Phrase lengths checked for looping
const PHRASE_LENGTHS: std::ops::RangeInclusive<usize> = 3..=7;
const PHRASE_REPEATS: usize = 3;
const WORD_MIN_LEN: usize = 2;
const WORD_MIN_REPEATS: f32 = 3.0;
const WORD_REPEAT_SHARE: f32 = 0.2;
const DIVERSITY_MIN_WORDS: usize = 50;
const DIVERSITY_MIN_RATIO: f32 = 0.30;

/// Default artifact phrases seen from whisper models on silence and noise
pub const DEFAULT_DENY_LIST: &[&str] = &[
    "subscribe to",
    "like and subscribe",
    "thank you for watching",
    "don't forget to",
    "please like",
    "vauffin",
    "ash",
    "阿姨",
];

/// Why a transcript was flagged
#[derive(Debug, Clone, PartialEq)]
pub enum Hallucination {
    RepeatedPhrase { phrase: String, count: usize },
    RepeatedWord { word: String, count: usize, total: usize },
    LowDiversity { unique: usize, total: usize },
    DenyListed(String),
}

impl fmt::Display for Hallucination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hallucination::RepeatedPhrase { phrase, count } => {
                write!(f, "repetitive phrase '{}' ({} times)", phrase, count)
            }
            Hallucination::RepeatedWord { word, count, total } => {
                write!(f, "repetitive word '{}' ({}/{} words)", word, count, total)
            }
            Hallucination::LowDiversity { unique, total } => write!(
                f,
                "low vocabulary diversity {}/{} ({:.2})",
                unique,
                total,
                *unique as f32 / *total as f32
            ),
            Hallucination::DenyListed(phrase) => write!(f, "known artifact '{}'", phrase),
        }
    }
}

/// Repetition checks that do not depend on configuration
pub fn detect_repetition(text: &str) -> Option<Hallucination> {
    let words = words(text);
    let total = words.len();

    for len in PHRASE_LENGTHS {
        if len > total {
            break;
        }
        let mut counts = std::collections::HashMap::new();
        for window in words.windows(len) {
            *counts.entry(window).or_insert(0usize) += 1;
        }
        if let Some((phrase, count)) = counts
            .into_iter()
            .filter(|(_, count)| *count >= PHRASE_REPEATS)
            .max_by_key(|(_, count)| *count)
        {
            return Some(Hallucination::RepeatedPhrase {
                phrase: phrase.join(" "),
                count,
            });
        }
    }

    let limit = WORD_MIN_REPEATS.max(total as f32 * WORD_REPEAT_SHARE);
    if let Some((word, count)) = word_counts(words.iter().copied(), WORD_MIN_LEN)
        .into_iter()
        .filter(|(_, count)| *count as f32 > limit)
        .max_by_key(|(_, count)| *count)
    {
        return Some(Hallucination::RepeatedWord {
            word: word.to_string(),
            count,
            total,
        });
    }

    if total > DIVERSITY_MIN_WORDS {
        let unique = words
            .iter()
            .collect::<std::collections::HashSet<_>>()
            .len();
        if (unique as f32 / total as f32) < DIVERSITY_MIN_RATIO {
            return Some(Hallucination::LowDiversity { unique, total });
        }
    }

    None
}

/// Full transcript filter: repetition plus the deny-list
#[derive(Debug, Clone)]
pub struct HallucinationFilter {
    deny_list: Vec<Vec<String>>,
    trigger: String,
}

impl HallucinationFilter {
    pub fn new<S: AsRef<str>>(deny_list: &[S], trigger: &str) -> Self {
        let deny_list = deny_list
            .iter()
            .map(|phrase| {
                words(&phrase.as_ref().to_lowercase())
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|phrase| !phrase.is_empty())
            .collect();
        Self {
            deny_list,
            trigger: trigger.trim().to_lowercase(),
        }
    }

    pub fn with_default_deny_list(trigger: &str) -> Self {
        Self::new(DEFAULT_DENY_LIST, trigger)
    }

    /// `Ok(())` when the normalised text looks like real speech
    pub fn check(&self, text: &str) -> Result<(), Hallucination> {
        if let Some(found) = detect_repetition(text) {
            debug!("🔍 {}", found);
            return Err(found);
        }

        // Trigger phrases are never dropped for matching the deny-list
        if !self.trigger.is_empty() && text.contains(&self.trigger) {
            return Ok(());
        }

        let text_words = words(text);
        for phrase in &self.deny_list {
            let phrase: Vec<&str> = phrase.iter().map(String::as_str).collect();
            if contains_words(&text_words, &phrase) {
                let found = Hallucination::DenyListed(phrase.join(" "));
                debug!("🔍 {}", found);
                return Err(found);
            }
        }

        Ok(())
    }

    pub fn is_hallucination(&self, text: &str) -> bool {
        self.check(text).is_err()
    }
}
