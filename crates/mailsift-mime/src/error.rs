//! Error types for message parsing and content extraction.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while reading message structure.
///
/// Extraction itself never fails; malformed parts degrade to raw bytes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A `Content-Type` value without a `type/subtype` pair.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// A body that is not valid Base64.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// A subject-tag pattern failed to compile.
    #[error("Invalid subject pattern: {0}")]
    Pattern(#[from] regex::Error),
}
