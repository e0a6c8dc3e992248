//! Per-recipient decision whether to classify.

use crate::config::FilterConfig;
use crate::error::{Error, Result};
use regex::{Regex, RegexBuilder};

/// One compiled recipient rule.
#[derive(Debug, Clone)]
pub struct RecipientRule {
    pattern: Regex,
    apply: bool,
}

impl RecipientRule {
    /// Compiles a rule. The pattern is case-insensitive and anchored at the
    /// start of the address.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the pattern does not compile.
    pub fn new(pattern: &str, apply: bool) -> Result<Self> {
        let pattern = RegexBuilder::new(&format!("^(?:{pattern})"))
            .case_insensitive(true)
            .build()
            .map_err(|err| Error::Config(format!("invalid recipient pattern {pattern:?}: {err}")))?;
        Ok(Self { pattern, apply })
    }

    /// Returns true if the rule matches a recipient.
    #[must_use]
    pub fn matches(&self, recipient: &str) -> bool {
        self.pattern.is_match(recipient)
    }
}

/// Ordered recipient rules where the last match wins.
#[derive(Debug, Clone)]
pub struct RecipientPolicy {
    rules: Vec<RecipientRule>,
    default: bool,
}

impl RecipientPolicy {
    /// Creates a policy from `(pattern, apply)` pairs in declaration order.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for the first invalid pattern.
    pub fn new<I, S>(rules: I, default: bool) -> Result<Self>
    where
        I: IntoIterator<Item = (S, bool)>,
        S: AsRef<str>,
    {
        let rules = rules
            .into_iter()
            .map(|(pattern, apply)| RecipientRule::new(pattern.as_ref(), apply))
            .collect::<Result<_>>()?;
        Ok(Self { rules, default })
    }

    /// Creates a policy from the filter configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for the first invalid pattern.
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        Self::new(
            config
                .rules
                .iter()
                .map(|rule| (rule.pattern.as_str(), rule.apply)),
            config.default,
        )
    }

    /// Decides whether a recipient is classified.
    ///
    /// Every rule is evaluated; each match overwrites the result.
    #[must_use]
    pub fn apply(&self, recipient: &str) -> bool {
        self.rules.iter().fold(self.default, |result, rule| {
            if rule.matches(recipient) {
                rule.apply
            } else {
                result
            }
        })
    }

    /// Splits recipients into `(skip, apply)`, keeping their order.
    #[must_use]
    pub fn partition(&self, recipients: &[String]) -> (Vec<String>, Vec<String>) {
        let (apply, skip): (Vec<String>, Vec<String>) = recipients
            .iter()
            .cloned()
            .partition(|recipient| self.apply(recipient));
        (skip, apply)
    }
}
