//! Reduction of a raw message to the text the classifier sees.

use crate::error::Result;
use crate::message::Message;
use regex::{Regex, RegexBuilder};
use tracing::debug;

/// Subject prefixes left by earlier filtering passes.
pub const DEFAULT_SPAM_SUBJECT_PATTERNS: &[&str] =
    &[r"^\s*\*+\s*SPAM\s*\*+\s*", r"^\s*\*+\s*AI\-SPAM\s*\*+\s*"];

/// Default number of body characters kept.
pub const DEFAULT_MAX_BODY_CHARS: usize = 50_000;

/// The (sender, subject, body) triple derived from one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailContent {
    /// Decoded `From` header with whitespace collapsed.
    pub sender: String,
    /// Decoded `Subject` header with spam tags removed.
    pub subject: String,
    /// Plain-text body, truncated.
    pub body: String,
}

impl MailContent {
    /// Creates content from its parts.
    #[must_use]
    pub fn new(
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Extracts [`MailContent`] from raw message bytes.
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    subject_patterns: Vec<Regex>,
    max_body_chars: usize,
}

impl ContentExtractor {
    /// Creates an extractor. Patterns are matched case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern does not compile.
    pub fn new<S: AsRef<str>>(patterns: &[S], max_body_chars: usize) -> Result<Self> {
        let subject_patterns = patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern.as_ref())
                    .case_insensitive(true)
                    .build()
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            subject_patterns,
            max_body_chars,
        })
    }

    /// Extracts the classification triple.
    ///
    /// HTML is preferred over plain text when both are present and is
    /// rendered to text first. Attachments are never read.
    #[must_use]
    pub fn extract(&self, raw: &[u8]) -> MailContent {
        let message = Message::parse(raw);

        let sender = message
            .from()
            .map(|from| from.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        let subject = self.strip_subject(&message.subject().unwrap_or_default());

        let body = if let Some(part) = message.html_part() {
            render_html(&part.body_text())
        } else {
            message
                .text_part()
                .map(crate::message::Part::body_text)
                .unwrap_or_default()
        };

        MailContent {
            sender,
            subject,
            body: truncate_chars(body, self.max_body_chars),
        }
    }

    /// Removes every configured spam tag from a subject, in pattern order.
    #[must_use]
    pub fn strip_subject(&self, subject: &str) -> String {
        self.subject_patterns
            .iter()
            .fold(subject.to_string(), |subject, pattern| {
                pattern.replace_all(&subject, "").into_owned()
            })
    }
}

impl Default for ContentExtractor {
    fn default() -> Self {
        let subject_patterns = DEFAULT_SPAM_SUBJECT_PATTERNS
            .iter()
            .filter_map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .ok()
            })
            .collect();

        Self {
            subject_patterns,
            max_body_chars: DEFAULT_MAX_BODY_CHARS,
        }
    }
}

fn render_html(html: &str) -> String {
    htmd::convert(html).unwrap_or_else(|err| {
        debug!(error = %err, "html rendering failed, using markup as text");
        html.to_string()
    })
}

fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((index, _)) = text.char_indices().nth(max_chars) {
        text.truncate(index);
    }
    text
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::needless_collect)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_extract_plain() {
        let raw = b"From: \"Shop\"\r\n   <deals@example.com>\r\n\
Subject: *** SPAM *** Cheap watches\r\n\
\r\n\
Buy now\r\n";
        let content = ContentExtractor::default().extract(raw);
        assert_eq!(content.sender, "\"Shop\" <deals@example.com>");
        assert_eq!(content.subject, "Cheap watches");
        assert_eq!(content.body, "Buy now\r\n");
    }

    #[test]
    fn test_extract_strips_both_default_tags() {
        let extractor = ContentExtractor::default();
        assert_eq!(
            extractor.strip_subject("** SPAM ** *** ai-spam *** Hello"),
            "Hello"
        );
        assert_eq!(extractor.strip_subject("Re: SPAM filter"), "Re: SPAM filter");
    }

    #[test]
    fn test_extract_prefers_html() {
        let raw = b"Subject: =?utf-8?Q?Caf=C3=A9?=\r\n\
Content-Type: multipart/alternative; boundary=x\r\n\
\r\n\
--x\r\n\
Content-Type: text/plain\r\n\
\r\n\
plain version\r\n\
--x\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>html <b>version</b></p>\r\n\
--x--\r\n";
        let content = ContentExtractor::default().extract(raw);
        assert_eq!(content.subject, "Café");
        assert!(content.body.contains("html"));
        assert!(content.body.contains("version"));
        assert!(!content.body.contains("<p>"));
    }

    #[test]
    fn test_extract_without_headers_or_text() {
        let content = ContentExtractor::default().extract(b"\r\n");
        assert_eq!(content, MailContent::default());
    }

    #[test]
    fn test_body_is_truncated() {
        let extractor = ContentExtractor::new(DEFAULT_SPAM_SUBJECT_PATTERNS, 3).unwrap();
        let content = extractor.extract("Subject: x\n\nhéllo".as_bytes());
        assert_eq!(content.body, "hél");
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(ContentExtractor::new(&["("], 10).is_err());
    }

    proptest! {
        #[test]
        fn prop_body_never_exceeds_limit(body in "\\PC{0,200}", limit in 0usize..100) {
            let extractor = ContentExtractor::new(&[] as &[&str], limit).unwrap();
            let raw = format!("Subject: s\r\n\r\n{body}");
            let content = extractor.extract(raw.as_bytes());
            prop_assert!(content.body.chars().count() <= limit);
        }
    }
}
