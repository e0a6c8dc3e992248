//! Naive Bayes models.

use super::Label;
use super::transform::SparseVector;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Laplace smoothing.
const ALPHA: f64 = 1.0;

/// Statistical model kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    /// Multinomial naive Bayes over feature values.
    #[default]
    MultinomialNb,
    /// Bernoulli naive Bayes over feature presence.
    BernoulliNb,
}

impl ModelKind {
    /// Name used in configuration and artifact file names.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MultinomialNb => "multinomial-nb",
            Self::BernoulliNb => "bernoulli-nb",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A two-class naive Bayes model.
///
/// Training accumulates per-class statistics, so fitting batch after batch
/// gives the same model as fitting the concatenated batches at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    kind: ModelKind,
    /// Training documents per class, indexed by [`Label::index`].
    class_counts: [u64; 2],
    /// Multinomial: summed feature values. Bernoulli: documents with the
    /// feature present.
    feature_stats: [Vec<f64>; 2],
    /// Sum of each class row of `feature_stats`.
    feature_totals: [f64; 2],
    /// Bernoulli only: per-class sum of `ln(1 - p)` over all features.
    #[serde(skip)]
    absent_log_sum: OnceLock<[f64; 2]>,
}

impl Model {
    /// Creates an untrained model.
    #[must_use]
    pub fn new(kind: ModelKind) -> Self {
        Self {
            kind,
            class_counts: [0; 2],
            feature_stats: [Vec::new(), Vec::new()],
            feature_totals: [0.0; 2],
            absent_log_sum: OnceLock::new(),
        }
    }

    /// Returns the model kind.
    #[must_use]
    pub const fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Returns true once at least one document has been fitted.
    #[must_use]
    pub const fn is_trained(&self) -> bool {
        self.class_counts[0] + self.class_counts[1] > 0
    }

    /// Returns the number of features the model covers.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.feature_stats[0].len()
    }

    /// Returns the number of fitted documents with a label.
    #[must_use]
    pub const fn class_count(&self, label: Label) -> u64 {
        self.class_counts[label.index()]
    }

    /// Accumulates a batch of labelled vectors.
    ///
    /// `n_features` is the vocabulary size after the batch was added; the
    /// statistics grow to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the numbers of vectors and labels differ.
    pub fn fit(
        &mut self,
        features: &[SparseVector],
        labels: &[Label],
        n_features: usize,
    ) -> Result<()> {
        if features.len() != labels.len() {
            return Err(Error::InvalidTraining(format!(
                "{} feature vectors but {} labels",
                features.len(),
                labels.len()
            )));
        }

        let n_features = n_features.max(self.n_features());
        for stats in &mut self.feature_stats {
            stats.resize(n_features, 0.0);
        }

        for (vector, label) in features.iter().zip(labels) {
            let class = label.index();
            self.class_counts[class] += 1;
            for (index, value) in vector.iter() {
                let increment = match self.kind {
                    ModelKind::MultinomialNb => value,
                    ModelKind::BernoulliNb if value > 0.0 => 1.0,
                    ModelKind::BernoulliNb => continue,
                };
                if let Some(stat) = self.feature_stats[class].get_mut(index) {
                    *stat += increment;
                    self.feature_totals[class] += increment;
                }
            }
        }

        self.absent_log_sum = OnceLock::new();
        Ok(())
    }

    /// Predicts the label of a vector. Ties go to ham.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Untrained`] if nothing has been fitted.
    pub fn predict(&self, features: &SparseVector) -> Result<Label> {
        if !self.is_trained() {
            return Err(Error::Untrained);
        }

        let ham = self.joint_log_likelihood(features, Label::Ham);
        let spam = self.joint_log_likelihood(features, Label::Spam);
        Ok(if spam > ham { Label::Spam } else { Label::Ham })
    }

    #[allow(clippy::cast_precision_loss)]
    fn joint_log_likelihood(&self, features: &SparseVector, label: Label) -> f64 {
        let class = label.index();
        let total_documents = (self.class_counts[0] + self.class_counts[1]) as f64;
        let prior = (self.class_counts[class] as f64 / total_documents).ln();
        let stats = &self.feature_stats[class];
        let n_features = stats.len() as f64;

        match self.kind {
            ModelKind::MultinomialNb => {
                let denominator = (self.feature_totals[class] + ALPHA * n_features).ln();
                prior
                    + features
                        .iter()
                        .filter_map(|(index, value)| {
                            stats
                                .get(index)
                                .map(|stat| value * ((stat + ALPHA).ln() - denominator))
                        })
                        .sum::<f64>()
            }
            ModelKind::BernoulliNb => {
                let documents = self.class_counts[class] as f64;
                let log_p = |stat: f64| ((stat + ALPHA) / (documents + 2.0 * ALPHA)).ln();
                let log_not_p = |stat: f64| (1.0 - (stat + ALPHA) / (documents + 2.0 * ALPHA)).ln();

                let absent = self.absent_log_sum.get_or_init(|| {
                    [0, 1].map(|c| {
                        let documents = self.class_counts[c] as f64;
                        self.feature_stats[c]
                            .iter()
                            .map(|stat| (1.0 - (stat + ALPHA) / (documents + 2.0 * ALPHA)).ln())
                            .sum()
                    })
                })[class];

                prior
                    + absent
                    + features
                        .iter()
                        .filter(|(_, value)| *value > 0.0)
                        .filter_map(|(index, _)| stats.get(index))
                        .map(|&stat| log_p(stat) - log_not_p(stat))
                        .sum::<f64>()
            }
        }
    }
}
