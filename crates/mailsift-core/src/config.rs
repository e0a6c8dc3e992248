//! Daemon configuration.
//!
//! Loaded from a TOML file. Every section and field has a default, so an
//! empty file (or none at all) yields a working relay on localhost.
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:10025"
//! next_hop = "127.0.0.1:10026"
//!
//! [classifier]
//! model = "multinomial-nb"
//! vectorizer = "tfidf"
//!
//! [filter]
//! subject_prefix = "*** AI-SPAM ***"
//! rules = [
//!     { pattern = "postmaster@", apply = false },
//! ]
//! ```

use crate::classifier::{ModelKind, VectorizerKind};
use crate::error::{Error, Result};
use mailsift_mime::{DEFAULT_MAX_BODY_CHARS, DEFAULT_SPAM_SUBJECT_PATTERNS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Listener and next-hop settings.
    pub server: ServerConfig,
    /// Classifier settings.
    pub classifier: ClassifierConfig,
    /// Recipient rules and rewriting.
    pub filter: FilterConfig,
    /// Logging settings.
    pub log: LogConfig,
}

impl Config {
    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or fails validation.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        let classifier = &self.classifier;
        if classifier.ngram_min == 0 || classifier.ngram_min > classifier.ngram_max {
            return Err(Error::Config(format!(
                "invalid n-gram range {}..={}",
                classifier.ngram_min, classifier.ngram_max
            )));
        }
        if classifier.train_chunk_size == 0 {
            return Err(Error::Config("train_chunk_size must be positive".into()));
        }
        if self.server.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be positive".into()));
        }
        if self.filter.header_prefix.is_empty()
            || !self
                .filter
                .header_prefix
                .bytes()
                .all(|b| b.is_ascii_graphic() && b != b':')
        {
            return Err(Error::Config(format!(
                "invalid header prefix {:?}",
                self.filter.header_prefix
            )));
        }
        Ok(())
    }
}

/// Listener and next-hop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Inbound address: `host:port` or a unix socket path.
    pub listen: String,
    /// Next-hop address: `host[:port]` or a unix socket path.
    pub next_hop: String,
    /// Name used in our greeting and in EHLO to the next hop.
    pub hostname: String,
    /// Largest accepted message in bytes.
    pub max_message_size: usize,
    /// Bound on one delivery to the next hop.
    pub timeout_secs: u64,
    /// Use STARTTLS towards TCP next hops that offer it.
    pub starttls: bool,
}

impl ServerConfig {
    /// Returns the delivery timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:10025".to_string(),
            next_hop: "127.0.0.1:10026".to_string(),
            hostname: "localhost".to_string(),
            max_message_size: 32 * 1024 * 1024,
            timeout_secs: 60,
            starttls: false,
        }
    }
}

/// Classifier settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Directory holding the vocabulary and model artifacts.
    pub data_dir: PathBuf,
    /// Statistical model kind.
    pub model: ModelKind,
    /// Vectorizer kind.
    pub vectorizer: VectorizerKind,
    /// Smallest n-gram length.
    pub ngram_min: usize,
    /// Largest n-gram length.
    pub ngram_max: usize,
    /// Stopword lists to apply (`english`, `german`).
    pub stopword_languages: Vec<String>,
    /// Documents per training batch.
    pub train_chunk_size: usize,
    /// Body characters fed to the classifier.
    pub max_body_chars: usize,
    /// Start empty when no artifacts exist and allow learning.
    pub training: bool,
}

impl ClassifierConfig {
    /// Returns the n-gram range as `(min, max)`.
    #[must_use]
    pub const fn ngram_range(&self) -> (usize, usize) {
        (self.ngram_min, self.ngram_max)
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            model: ModelKind::default(),
            vectorizer: VectorizerKind::default(),
            ngram_min: 1,
            ngram_max: 2,
            stopword_languages: vec!["german".to_string(), "english".to_string()],
            train_chunk_size: 1_000,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
            training: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir().map_or_else(
        || PathBuf::from("/var/lib/mailsift"),
        |dir| dir.join("mailsift"),
    )
}

/// One recipient rule as written in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Regular expression matched at the start of the recipient address.
    pub pattern: String,
    /// Whether matching recipients are classified.
    pub apply: bool,
}

/// Recipient rules and rewriting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// Result for recipients no rule matches.
    pub default: bool,
    /// Ordered rules; the last match wins.
    pub rules: Vec<RuleConfig>,
    /// Prefix added to the subject of spam; empty disables it.
    pub subject_prefix: Option<String>,
    /// Prefix of the diagnostic header names.
    pub header_prefix: String,
    /// Subject tags removed before classification.
    pub spam_subject_patterns: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            default: true,
            rules: Vec::new(),
            subject_prefix: Some("*** AI-SPAM ***".to_string()),
            header_prefix: "Mailsift".to_string(),
            spam_subject_patterns: DEFAULT_SPAM_SUBJECT_PATTERNS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Level for the mailsift crates when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server.listen, "127.0.0.1:10025");
        assert_eq!(config.server.timeout(), Duration::from_secs(60));
        assert_eq!(config.classifier.ngram_range(), (1, 2));
        assert_eq!(config.filter.header_prefix, "Mailsift");
        assert!(config.filter.default);
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml(
            r#"
[server]
listen = "/run/mailsift/in.sock"
next_hop = "mx.internal:2525"
starttls = true

[classifier]
data_dir = "/tmp/models"
model = "bernoulli-nb"
vectorizer = "tfidf"
ngram_min = 1
ngram_max = 1
training = true

[filter]
default = false
subject_prefix = "[SPAM]"
rules = [
    { pattern = ".*@example\\.com", apply = true },
    { pattern = "abuse@", apply = false },
]

[log]
level = "debug"
"#,
        )
        .unwrap();

        assert_eq!(config.server.next_hop, "mx.internal:2525");
        assert!(config.server.starttls);
        assert_eq!(config.classifier.model, ModelKind::BernoulliNb);
        assert_eq!(config.classifier.vectorizer, VectorizerKind::Tfidf);
        assert_eq!(config.classifier.data_dir, PathBuf::from("/tmp/models"));
        assert_eq!(config.filter.rules.len(), 2);
        assert!(!config.filter.rules[1].apply);
        assert_eq!(config.filter.subject_prefix.as_deref(), Some("[SPAM]"));
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_invalid_values() {
        assert!(Config::from_toml("[classifier]\nngram_min = 3\nngram_max = 2\n").is_err());
        assert!(Config::from_toml("[classifier]\ntrain_chunk_size = 0\n").is_err());
        assert!(Config::from_toml("[filter]\nheader_prefix = \"X Bad\"\n").is_err());
        assert!(Config::from_toml("[server]\nbogus = 1\n").is_err());
        assert!(Config::from_toml("[classifier]\nmodel = \"svm\"\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailsift.toml");
        std::fs::write(&path, "[server]\ntimeout_secs = 5\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.timeout_secs, 5);

        assert!(matches!(
            Config::load(dir.path().join("missing.toml")),
            Err(Error::Io(_))
        ));
    }
}
