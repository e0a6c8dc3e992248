//! Header block handling.

use crate::encoding::decode_rfc2047;
use std::fmt;

/// Ordered collection of message headers.
///
/// Names keep the spelling they arrived with; lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Gets the first value for a header with encoded words decoded.
    #[must_use]
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_rfc2047)
    }

    /// Gets all values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Returns the number of header fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no header fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns an iterator over all headers in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parses a header block.
    ///
    /// Continuation lines (leading space or tab) are unfolded into the previous
    /// field. Lines that are not `name: value` (such as an mbox `From ` line)
    /// are skipped. Parsing stops at the first empty line.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value.trim().to_string());
            }

            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim_end();
                if !name.is_empty() && !name.contains(char::is_whitespace) {
                    current = Some((name.to_string(), value.trim().to_string()));
                }
            }
        }

        if let Some((name, value)) = current {
            headers.add(name, value.trim().to_string());
        }

        headers
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

/// Position of the blank line that ends a header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderBoundary {
    /// Byte offset where the blank line starts.
    pub offset: usize,
    /// The blank line itself: `\r\n` or `\n`.
    pub line_ending: &'static [u8],
}

impl HeaderBoundary {
    /// Byte offset where the body starts.
    #[must_use]
    pub const fn body_start(&self) -> usize {
        self.offset + self.line_ending.len()
    }
}

/// Finds the blank line separating headers from the body.
#[must_use]
pub fn find_header_boundary(raw: &[u8]) -> Option<HeaderBoundary> {
    let mut offset = 0;
    for line in raw.split_inclusive(|&b| b == b'\n') {
        match line {
            b"\r\n" => {
                return Some(HeaderBoundary {
                    offset,
                    line_ending: b"\r\n",
                });
            }
            b"\n" => {
                return Some(HeaderBoundary {
                    offset,
                    line_ending: b"\n",
                });
            }
            _ => offset += line.len(),
        }
    }
    None
}

/// Splits raw message bytes into the header block and the body.
///
/// A message without a blank line is all headers.
#[must_use]
pub fn split_header_block(raw: &[u8]) -> (&[u8], &[u8]) {
    find_header_boundary(raw).map_or((raw, &[][..]), |boundary| {
        (&raw[..boundary.offset], &raw[boundary.body_start()..])
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive_lookup() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_headers_keep_order_and_duplicates() {
        let headers = Headers::parse("Received: a\r\nX-One: 1\r\nReceived: b\r\n\r\n");
        assert_eq!(headers.get_all("received"), vec!["a", "b"]);
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Received", "X-One", "Received"]);
    }

    #[test]
    fn test_headers_parse_folded() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "Subject: A long\r\n",
            "\tsubject line\r\n",
            "Content-Type: text/plain;\r\n",
            " charset=utf-8\r\n",
            "\r\n",
            "Ignored: body\r\n"
        );

        let headers = Headers::parse(text);
        assert_eq!(headers.get("Subject"), Some("A long subject line"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(headers.get("Ignored"), None);
    }

    #[test]
    fn test_headers_skip_mbox_separator() {
        let headers = Headers::parse("From a@b Thu Jan  1 00:00:00 2024\nFrom: a@b\n");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("from"), Some("a@b"));
    }

    #[test]
    fn test_get_decoded() {
        let headers = Headers::parse("Subject: =?utf-8?B?SMOpbGxv?= world\r\n");
        assert_eq!(headers.get_decoded("subject").unwrap(), "Héllo world");
    }

    #[test]
    fn test_display_round_trips_fields() {
        let mut headers = Headers::new();
        headers.add("From", "a@b");
        headers.add("To", "c@d");
        assert_eq!(headers.to_string(), "From: a@b\r\nTo: c@d\r\n");
    }

    #[test]
    fn test_find_header_boundary() {
        let crlf = find_header_boundary(b"A: 1\r\nB: 2\r\n\r\nbody").unwrap();
        assert_eq!(crlf.offset, 12);
        assert_eq!(crlf.line_ending, b"\r\n");
        assert_eq!(crlf.body_start(), 14);

        let lf = find_header_boundary(b"A: 1\n\nbody").unwrap();
        assert_eq!(lf.offset, 5);
        assert_eq!(lf.line_ending, b"\n");

        assert!(find_header_boundary(b"A: 1\r\nB: 2\r\n").is_none());
    }

    #[test]
    fn test_split_header_block() {
        let (head, body) = split_header_block(b"A: 1\r\n\r\nhello\r\n");
        assert_eq!(head, b"A: 1\r\n");
        assert_eq!(body, b"hello\r\n");

        let (head, body) = split_header_block(b"A: 1\r\n");
        assert_eq!(head, b"A: 1\r\n");
        assert!(body.is_empty());
    }
}
