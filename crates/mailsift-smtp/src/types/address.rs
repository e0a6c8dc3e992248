//! Envelope address type.

use crate::error::{Error, Result};

/// Address used in `MAIL FROM` and `RCPT TO`.
///
/// Relayed envelopes carry whatever the upstream MTA accepted, so validation
/// only rejects values that would break the command line itself. The empty
/// reverse path (`<>`) used by bounces is allowed for senders via
/// [`Address::null`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string, stripping surrounding angle brackets.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is empty or contains whitespace,
    /// control characters, or angle brackets.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        let trimmed = addr
            .trim()
            .strip_prefix('<')
            .and_then(|a| a.strip_suffix('>'))
            .unwrap_or_else(|| addr.trim())
            .to_string();
        if trimmed.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }
        Self::validate(&trimmed)?;
        Ok(Self(trimmed))
    }

    /// Creates a sender address, mapping an empty value to the null reverse path.
    ///
    /// # Errors
    ///
    /// Returns an error if a non-empty value is invalid.
    pub fn sender(addr: &str) -> Result<Self> {
        let trimmed = addr.trim();
        if trimmed.is_empty() || trimmed == "<>" {
            return Ok(Self::null());
        }
        Self::new(trimmed)
    }

    /// The null reverse path.
    #[must_use]
    pub const fn null() -> Self {
        Self(String::new())
    }

    /// Returns true for the null reverse path.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(addr: &str) -> Result<()> {
        if let Some(bad) = addr
            .chars()
            .find(|c| c.is_whitespace() || c.is_control() || *c == '<' || *c == '>')
        {
            return Err(Error::InvalidAddress(format!(
                "{addr:?} contains forbidden character {bad:?}"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
