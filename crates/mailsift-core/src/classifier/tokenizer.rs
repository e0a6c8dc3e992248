//! Text analysis: accent folding, word splitting, stopwords and n-grams.

use super::stopwords;
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

#[allow(clippy::expect_used)]
static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w\w+\b").expect("word pattern is valid"));

/// Splits text into word n-grams.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    ngram_range: (usize, usize),
    stopwords: HashSet<String>,
}

impl Tokenizer {
    /// Creates a tokenizer for an inclusive n-gram range and a set of
    /// stopword languages.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty or zero-based range, or
    /// an unknown language.
    pub fn new<S: AsRef<str>>(ngram_range: (usize, usize), languages: &[S]) -> Result<Self> {
        let (min, max) = ngram_range;
        if min == 0 || min > max {
            return Err(Error::Config(format!("invalid n-gram range {min}..={max}")));
        }

        let mut stopwords = HashSet::new();
        for language in languages {
            let words = stopwords::for_language(language.as_ref()).ok_or_else(|| {
                Error::Config(format!("no stopword list for {:?}", language.as_ref()))
            })?;
            stopwords.extend(words.iter().map(|word| fold(word)));
        }

        Ok(Self {
            ngram_range,
            stopwords,
        })
    }

    /// Returns the n-gram range.
    #[must_use]
    pub const fn ngram_range(&self) -> (usize, usize) {
        self.ngram_range
    }

    /// Produces the n-gram terms of a text, in order of appearance.
    #[must_use]
    pub fn analyze(&self, text: &str) -> Vec<String> {
        let folded = fold(text);
        let words: Vec<&str> = WORD
            .find_iter(&folded)
            .map(|m| m.as_str())
            .filter(|word| !self.stopwords.contains(*word))
            .collect();

        let (min, max) = self.ngram_range;
        let mut terms = Vec::new();
        for n in min..=max {
            terms.extend(words.windows(n).map(|window| window.join(" ")));
        }
        terms
    }
}

/// Lowercases and removes accents.
///
/// Lowercasing runs on both sides of the decomposition: compatibility forms
/// can decompose to capitals, and a few capitals lowercase to a combining
/// sequence.
fn fold(text: &str) -> String {
    text.to_lowercase()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}
