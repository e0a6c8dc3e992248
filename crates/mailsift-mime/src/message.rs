//! MIME message structure and handling.

use crate::content_type::ContentType;
use crate::encoding::{decode_base64, decode_charset, decode_quoted_printable};
use crate::header::{Headers, split_header_block};
use std::fmt;
use tracing::debug;

/// Multipart nesting deeper than this is treated as an opaque body.
const MAX_DEPTH: usize = 16;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// One node of a MIME tree.
///
/// Leaf parts carry their raw `body`; multipart nodes carry `parts` and keep
/// the raw body (preamble and delimiters included) for reference.
#[derive(Debug, Clone, Default)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body (raw, still transfer-encoded).
    pub body: Vec<u8>,
    /// Child parts of a multipart node.
    pub parts: Vec<Part>,
}

impl Part {
    /// Creates a new leaf part.
    #[must_use]
    pub const fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self {
            headers,
            body,
            parts: Vec::new(),
        }
    }

    fn parse(raw: &[u8], depth: usize) -> Self {
        let (head, body) = split_header_block(raw);
        let headers = Headers::parse(&String::from_utf8_lossy(head));
        let mut part = Self::new(headers, body.to_vec());

        let content_type = part.content_type();
        if content_type.is_multipart() {
            match content_type.boundary() {
                Some(boundary) if depth < MAX_DEPTH => {
                    part.parts = split_multipart(body, boundary)
                        .into_iter()
                        .map(|child| Self::parse(child, depth + 1))
                        .collect();
                }
                Some(_) => debug!(depth, "multipart nesting too deep, not descending"),
                None => debug!("multipart without boundary"),
            }
        }

        part
    }

    /// Gets the content type, falling back to `text/plain` when the header is
    /// missing or unparsable.
    #[must_use]
    pub fn content_type(&self) -> ContentType {
        self.headers
            .get("content-type")
            .and_then(|value| ContentType::parse(value).ok())
            .unwrap_or_else(ContentType::text_plain)
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Returns true if the part is marked as an attachment.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.headers.get("content-disposition").is_some_and(|value| {
            value
                .trim_start()
                .get(..10)
                .is_some_and(|kind| kind.eq_ignore_ascii_case("attachment"))
        })
    }

    /// Decodes the body according to the transfer encoding.
    ///
    /// Undecodable Base64 yields the raw bytes.
    #[must_use]
    pub fn decode_body(&self) -> Vec<u8> {
        match self.transfer_encoding() {
            TransferEncoding::Base64 => decode_base64(&self.body).unwrap_or_else(|err| {
                debug!(error = %err, "invalid base64 body, using raw bytes");
                self.body.clone()
            }),
            TransferEncoding::QuotedPrintable => decode_quoted_printable(&self.body),
            _ => self.body.clone(),
        }
    }

    /// Gets the decoded body as text in the declared charset.
    #[must_use]
    pub fn body_text(&self) -> String {
        let content_type = self.content_type();
        decode_charset(&self.decode_body(), content_type.charset())
    }

    /// Collects leaf parts depth-first, in document order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Self> {
        if self.parts.is_empty() {
            return vec![self];
        }
        self.parts.iter().flat_map(Self::leaves).collect()
    }

    /// Finds the first inline leaf with the given `text/<sub_type>`.
    #[must_use]
    pub fn find_text(&self, sub_type: &str) -> Option<&Self> {
        self.leaves()
            .into_iter()
            .find(|part| !part.is_attachment() && part.content_type().is("text", sub_type))
    }
}

/// Splits a multipart body into raw child parts.
///
/// The preamble and epilogue are dropped. The line break before each
/// delimiter belongs to the delimiter. A missing close delimiter ends the
/// last part at the end of input.
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut parts = Vec::new();
    let mut current: Option<usize> = None;
    let mut offset = 0;

    for line in body.split_inclusive(|&b| b == b'\n') {
        let trimmed = line.trim_ascii_end();
        if let Some(rest) = trimmed.strip_prefix(delimiter) {
            let closing = rest == b"--";
            if rest.is_empty() || closing {
                if let Some(start) = current.take() {
                    parts.push(strip_line_break(&body[start..offset]));
                }
                if closing {
                    return parts;
                }
                current = Some(offset + line.len());
            }
        }
        offset += line.len();
    }

    if let Some(start) = current {
        parts.push(&body[start..]);
    }
    parts
}

fn strip_line_break(part: &[u8]) -> &[u8] {
    let part = part.strip_suffix(b"\n").unwrap_or(part);
    part.strip_suffix(b"\r").unwrap_or(part)
}

/// A parsed message: the root of its MIME tree.
#[derive(Debug, Clone, Default)]
pub struct Message {
    root: Part,
}

impl Message {
    /// Parses raw message bytes. Parsing never fails; malformed structure
    /// degrades to opaque bodies.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        Self {
            root: Part::parse(raw, 0),
        }
    }

    /// Returns the top-level headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.root.headers
    }

    /// Returns the root part.
    #[must_use]
    pub const fn root(&self) -> &Part {
        &self.root
    }

    /// Gets the decoded From header.
    #[must_use]
    pub fn from(&self) -> Option<String> {
        self.root.headers.get_decoded("from")
    }

    /// Gets the decoded Subject header.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.root.headers.get_decoded("subject")
    }

    /// Finds the first inline text/html part.
    #[must_use]
    pub fn html_part(&self) -> Option<&Part> {
        self.root.find_text("html")
    }

    /// Finds the first inline text/plain part.
    #[must_use]
    pub fn text_part(&self) -> Option<&Part> {
        self.root.find_text("plain")
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::similar_names
)]
mod tests {
    use super::*;

    const ALTERNATIVE: &[u8] = b"From: a@example.com\r\n\
Subject: Offer\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
preamble\r\n\
--outer\r\n\
Content-Type: multipart/alternative; boundary=inner\r\n\
\r\n\
--inner\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Plain body\r\n\
--inner\r\n\
Content-Type: text/html; charset=iso-8859-1\r\n\
Content-Transfer-Encoding: quoted-printable\r\n\
\r\n\
<p>Caf=E9</p>\r\n\
--inner--\r\n\
--outer\r\n\
Content-Type: text/html\r\n\
Content-Disposition: attachment; filename=x.html\r\n\
\r\n\
<p>attached</p>\r\n\
--outer--\r\n\
epilogue\r\n";

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse(" BASE64 "), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::Binary.to_string(), "binary");
    }

    #[test]
    fn test_single_part() {
        let message = Message::parse(b"Subject: Hi\r\nFrom: a@b\r\n\r\nHello, World!\r\n");
        assert_eq!(message.subject().as_deref(), Some("Hi"));
        assert_eq!(message.from().as_deref(), Some("a@b"));
        assert!(message.root().parts.is_empty());
        assert_eq!(message.text_part().unwrap().body_text(), "Hello, World!\r\n");
    }

    #[test]
    fn test_nested_multipart() {
        let message = Message::parse(ALTERNATIVE);
        let root = message.root();
        assert_eq!(root.parts.len(), 2);
        assert_eq!(root.parts[0].parts.len(), 2);
        assert_eq!(root.leaves().len(), 3);

        let plain = message.text_part().unwrap();
        assert_eq!(plain.body_text(), "Plain body");

        let html = message.html_part().unwrap();
        assert_eq!(html.body_text(), "<p>Café</p>");
    }

    #[test]
    fn test_attachment_is_skipped() {
        let message = Message::parse(ALTERNATIVE);
        let attachment = &message.root().parts[1];
        assert!(attachment.is_attachment());
        assert_ne!(
            message.html_part().unwrap().body,
            attachment.body,
            "the inline part must win over the attachment"
        );
    }

    #[test]
    fn test_base64_body() {
        let message = Message::parse(
            b"Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
SMOpbGxv\r\n",
        );
        assert_eq!(message.root().body_text(), "Héllo");
    }

    #[test]
    fn test_unterminated_multipart() {
        let message = Message::parse(
            b"Content-Type: multipart/mixed; boundary=b\n\n--b\nContent-Type: text/plain\n\nonly part\n",
        );
        assert_eq!(message.root().parts.len(), 1);
        assert_eq!(message.text_part().unwrap().body_text(), "only part\n");
    }

    #[test]
    fn test_invalid_content_type_falls_back() {
        let part = Part::new(
            Headers::parse("Content-Type: garbage\r\n"),
            b"x".to_vec(),
        );
        assert!(part.content_type().is("text", "plain"));
    }
}
