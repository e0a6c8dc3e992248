//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No usable persisted classifier artifact.
    #[error("Load error: {0}")]
    Load(String),

    /// A persisted artifact was written for a different configuration.
    #[error("Type mismatch in {artifact}: expected {expected}, found {found}")]
    TypeMismatch {
        /// File the tag was read from.
        artifact: String,
        /// Tag derived from the configuration.
        expected: String,
        /// Tag stored in the artifact.
        found: String,
    },

    /// Delivery to the next hop failed as a whole.
    #[error("Transport error: {0}")]
    Transport(String),

    /// SMTP conversation with the next hop failed.
    #[error("SMTP error: {0}")]
    Smtp(#[from] mailsift_smtp::Error),

    /// The envelope carried no content.
    #[error("Empty message")]
    EmptyContent,

    /// Learning was requested outside training mode.
    #[error("Classifier is not in training mode")]
    NotTraining,

    /// Prediction was requested before any training.
    #[error("Classifier has not been trained")]
    Untrained,

    /// Training input is inconsistent.
    #[error("Invalid training data: {0}")]
    InvalidTraining(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// MIME handling error.
    #[error("MIME error: {0}")]
    Mime(#[from] mailsift_mime::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if the error means no classifier could be loaded.
    #[must_use]
    pub const fn is_load_error(&self) -> bool {
        matches!(self, Self::Load(_) | Self::TypeMismatch { .. })
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
