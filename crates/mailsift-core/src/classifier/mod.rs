//! Bag-of-words spam classifier.
//!
//! A classifier is three pieces that only make sense together:
//! - a [`Vocabulary`] mapping terms to feature indices,
//! - a [`FeatureTransform`] turning mail into [`SparseVector`]s over it,
//! - a [`Model`] trained on those vectors.
//!
//! [`ClassifierService`] owns them as one snapshot that can be learned
//! into, saved, and swapped on reload while predictions keep running.
//!
//! # Example
//!
//! ```ignore
//! use mailsift_core::classifier::{ClassifierService, Label};
//!
//! let service = ClassifierService::from_config(&config.classifier)?;
//! service.learn(&contents, &labels)?;
//! service.save()?;
//!
//! let label = service.predict(&content)?;
//! ```

mod model;
mod service;
mod stopwords;
mod store;
mod tokenizer;
mod transform;
mod vocabulary;

pub use model::{Model, ModelKind};
pub use service::ClassifierService;
pub use store::{ArtifactHeader, SnapshotStore};
pub use tokenizer::Tokenizer;
pub use transform::{FeatureTransform, SparseVector, VectorizerKind};
pub use vocabulary::Vocabulary;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    /// Legitimate mail.
    Ham,
    /// Unsolicited mail.
    Spam,
}

impl Label {
    /// Returns the textual form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ham => "ham",
            Self::Spam => "spam",
        }
    }

    /// Returns true for spam.
    #[must_use]
    pub const fn is_spam(&self) -> bool {
        matches!(self, Self::Spam)
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Ham => 0,
            Self::Spam => 1,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ham" => Ok(Self::Ham),
            "spam" => Ok(Self::Spam),
            other => Err(format!("unknown label {other:?}")),
        }
    }
}
