//! Token to index mapping shared by every feature vector.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Insertion-ordered token vocabulary.
///
/// Indices are dense and assigned in first-seen order. Tokens are only ever
/// appended, so an index stays valid for the life of the vocabulary.
/// Document frequencies are tracked alongside for TF-IDF weighting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredVocabulary", into = "StoredVocabulary")]
pub struct Vocabulary {
    tokens: Vec<String>,
    index: HashMap<String, usize>,
    document_frequencies: Vec<u64>,
    documents: u64,
}

impl Vocabulary {
    /// Creates an empty vocabulary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns true if no token has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Looks up the index of a token.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<usize> {
        self.index.get(token).copied()
    }

    /// Returns the token at an index.
    #[must_use]
    pub fn token(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(String::as_str)
    }

    /// Iterates over tokens in index order.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    /// Appends every unseen token, lowercased. Returns how many were added.
    pub fn extend<I, S>(&mut self, tokens: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.tokens.len();
        for token in tokens {
            self.insert(token.as_ref().to_lowercase());
        }
        self.tokens.len() - before
    }

    fn insert(&mut self, token: String) -> usize {
        if let Some(&index) = self.index.get(&token) {
            return index;
        }
        let index = self.tokens.len();
        self.index.insert(token.clone(), index);
        self.tokens.push(token);
        self.document_frequencies.push(0);
        index
    }

    /// Counts one training document containing the given tokens.
    ///
    /// Each distinct known token has its document frequency raised by one.
    /// Unknown tokens are ignored.
    pub fn record_document<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let seen: HashSet<usize> = tokens
            .into_iter()
            .filter_map(|token| self.get(token.as_ref()))
            .collect();
        for index in seen {
            self.document_frequencies[index] += 1;
        }
        self.documents += 1;
    }

    /// Returns the number of training documents containing a token.
    #[must_use]
    pub fn document_frequency(&self, index: usize) -> u64 {
        self.document_frequencies.get(index).copied().unwrap_or(0)
    }

    /// Returns the number of training documents recorded.
    #[must_use]
    pub const fn documents(&self) -> u64 {
        self.documents
    }
}

/// On-disk shape: the index is implied by token order.
#[derive(Serialize, Deserialize)]
struct StoredVocabulary {
    tokens: Vec<String>,
    document_frequencies: Vec<u64>,
    documents: u64,
}

impl From<Vocabulary> for StoredVocabulary {
    fn from(vocabulary: Vocabulary) -> Self {
        Self {
            tokens: vocabulary.tokens,
            document_frequencies: vocabulary.document_frequencies,
            documents: vocabulary.documents,
        }
    }
}

impl TryFrom<StoredVocabulary> for Vocabulary {
    type Error = String;

    fn try_from(stored: StoredVocabulary) -> Result<Self, Self::Error> {
        if stored.tokens.len() != stored.document_frequencies.len() {
            return Err(format!(
                "{} tokens but {} document frequencies",
                stored.tokens.len(),
                stored.document_frequencies.len()
            ));
        }

        let mut index = HashMap::with_capacity(stored.tokens.len());
        for (position, token) in stored.tokens.iter().enumerate() {
            if index.insert(token.clone(), position).is_some() {
                return Err(format!("duplicate token {token:?}"));
            }
        }

        Ok(Self {
            tokens: stored.tokens,
            index,
            document_frequencies: stored.document_frequencies,
            documents: stored.documents,
        })
    }
}
