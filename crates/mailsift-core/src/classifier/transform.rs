//! Feature vectors over the shared vocabulary.

use super::tokenizer::Tokenizer;
use super::vocabulary::Vocabulary;
use mailsift_mime::MailContent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How term counts are weighted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VectorizerKind {
    /// Raw term counts.
    #[default]
    Count,
    /// Term counts scaled by smoothed inverse document frequency, each field
    /// L2-normalized.
    Tfidf,
}

impl VectorizerKind {
    /// Name used in configuration and artifact file names.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Tfidf => "tfidf",
        }
    }
}

impl fmt::Display for VectorizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sparse feature vector, sorted by index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    entries: Vec<(usize, f64)>,
}

impl SparseVector {
    /// Returns the number of non-zero entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if every entry is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the value at an index.
    #[must_use]
    pub fn get(&self, index: usize) -> f64 {
        self.entries
            .binary_search_by_key(&index, |(i, _)| *i)
            .map_or(0.0, |position| self.entries[position].1)
    }

    /// Iterates over non-zero `(index, value)` entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.entries.iter().copied()
    }

    /// Returns the element-wise sum of two vectors.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        let mut sum: BTreeMap<usize, f64> = self.entries.iter().copied().collect();
        for (index, value) in other.iter() {
            *sum.entry(index).or_default() += value;
        }
        sum.into_iter().collect()
    }

    fn l2_normalize(&mut self) {
        let norm = self.entries.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, value) in &mut self.entries {
                *value /= norm;
            }
        }
    }
}

impl FromIterator<(usize, f64)> for SparseVector {
    fn from_iter<T: IntoIterator<Item = (usize, f64)>>(iter: T) -> Self {
        let mut merged = BTreeMap::<usize, f64>::new();
        for (index, value) in iter {
            *merged.entry(index).or_default() += value;
        }
        Self {
            entries: merged.into_iter().filter(|(_, v)| v.abs() > 0.0).collect(),
        }
    }
}

/// Turns [`MailContent`] into [`SparseVector`]s.
///
/// Sender, subject and body are analyzed separately with the same rules and
/// their vectors summed.
#[derive(Debug, Clone)]
pub struct FeatureTransform {
    kind: VectorizerKind,
    tokenizer: Tokenizer,
}

impl FeatureTransform {
    /// Creates a transform.
    #[must_use]
    pub const fn new(kind: VectorizerKind, tokenizer: Tokenizer) -> Self {
        Self { kind, tokenizer }
    }

    /// Returns the vectorizer kind.
    #[must_use]
    pub const fn kind(&self) -> VectorizerKind {
        self.kind
    }

    /// Analyzes one text into terms.
    #[must_use]
    pub fn analyze(&self, text: &str) -> Vec<String> {
        self.tokenizer.analyze(text)
    }

    fn fields(&self, content: &MailContent) -> [Vec<String>; 3] {
        [
            self.analyze(&content.sender),
            self.analyze(&content.subject),
            self.analyze(&content.body),
        ]
    }

    /// Adds the terms of every document to the vocabulary and records their
    /// document frequencies. Returns how many terms were new.
    pub fn extend(&self, contents: &[MailContent], vocabulary: &mut Vocabulary) -> usize {
        contents
            .iter()
            .map(|content| {
                let terms: Vec<String> = self.fields(content).into_iter().flatten().collect();
                let added = vocabulary.extend(&terms);
                vocabulary.record_document(&terms);
                added
            })
            .sum()
    }

    /// Vectorizes a document against a fixed vocabulary. Unknown terms are
    /// ignored.
    #[must_use]
    pub fn transform(&self, content: &MailContent, vocabulary: &Vocabulary) -> SparseVector {
        self.fields(content)
            .iter()
            .map(|terms| self.vectorize_field(terms, vocabulary))
            .fold(SparseVector::default(), |sum, field| sum.add(&field))
    }

    fn vectorize_field(&self, terms: &[String], vocabulary: &Vocabulary) -> SparseVector {
        let counts: SparseVector = terms
            .iter()
            .filter_map(|term| vocabulary.get(term))
            .map(|index| (index, 1.0))
            .collect();

        match self.kind {
            VectorizerKind::Count => counts,
            VectorizerKind::Tfidf => {
                #[allow(clippy::cast_precision_loss)]
                let documents = vocabulary.documents() as f64;
                let mut weighted: SparseVector = counts
                    .iter()
                    .map(|(index, count)| {
                        #[allow(clippy::cast_precision_loss)]
                        let df = vocabulary.document_frequency(index) as f64;
                        let idf = ((1.0 + documents) / (1.0 + df)).ln() + 1.0;
                        (index, count * idf)
                    })
                    .collect();
                weighted.l2_normalize();
                weighted
            }
        }
    }
}
