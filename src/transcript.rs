//! Transcript text handling shared by the filters.

use std::collections::HashMap;

/// Characters the transcription engine likes to put in front of a sentence
const LEADING_JUNK: &[char] = &['.', ',', ';', ':', '-', '!', '?'];

/// A transcribed utterance after normalisation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
}

impl Transcript {
    /// Normalise raw engine output. Returns `None` when nothing usable is left.
    pub fn from_raw(raw: &str) -> Option<Self> {
        let text = normalize(raw);
        if text.chars().count() <= 1 {
            return None;
        }
        Some(Self { text })
    }

    pub fn words(&self) -> Vec<&str> {
        words(&self.text)
    }
}

/// Trim, lower-case and strip leading punctuation
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .trim_start_matches(LEADING_JUNK)
        .trim()
        .to_string()
}

/// Split into words with surrounding punctuation removed
pub fn words(text: &str) -> Vec<&str> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
        .filter(|w| !w.is_empty())
        .collect()
}

/// Occurrence count per word, ignoring words of `min_len` characters or less
pub fn word_counts<'a, I>(words: I, min_len: usize) -> HashMap<&'a str, usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts = HashMap::new();
    for word in words {
        if word.chars().count() > min_len {
            *counts.entry(word).or_insert(0) += 1;
        }
    }
    counts
}

/// Whether `needle` occurs in `haystack` as a run of whole words
pub fn contains_words(haystack: &[&str], needle: &[&str]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  ... Computer, Lights ON. "), "computer, lights on.");
        assert_eq!(normalize("-?!hello"), "hello");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_from_raw_drops_tiny_text() {
        assert!(Transcript::from_raw("").is_none());
        assert!(Transcript::from_raw(" . k ").is_none());
        assert_eq!(Transcript::from_raw(" . ok ").unwrap().text, "ok");
        assert_eq!(Transcript::from_raw("No").unwrap().text, "no");
        assert_eq!(Transcript::from_raw("Yes.").unwrap().text, "yes.");
    }

    #[test]
    fn test_words_strip_punctuation() {
        assert_eq!(
            words("computer, what's the time?  -- "),
            vec!["computer", "what's", "the", "time"]
        );
    }

    #[test]
    fn test_word_counts_skip_short_words() {
        let counts = word_counts(words("a cat and a dog and a cat"), 2);
        assert_eq!(counts.get("cat"), Some(&2));
        assert_eq!(counts.get("and"), Some(&2));
        assert_eq!(counts.get("a"), None);
    }

    #[test]
    fn test_contains_words() {
        let hay = words("please like and subscribe");
        assert!(contains_words(&hay, &["like", "and", "subscribe"]));
        assert!(!contains_words(&hay, &["subscribe", "to"]));
        assert!(!contains_words(&words("ashore"), &["ash"]));
    }
}
