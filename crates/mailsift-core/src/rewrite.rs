//! Header edits on raw message bytes.
//!
//! Only the header block is touched; everything else is copied through
//! byte for byte.

use crate::classifier::Label;
use crate::config::FilterConfig;
use mailsift_mime::encoding::encode_rfc2047;
use mailsift_mime::find_header_boundary;

/// Peer value used when the sender connected over a unix socket.
pub const UNIX_SOCKET_PEER: &str = "unix-socket";

/// Subject prefixing and diagnostic headers.
#[derive(Debug, Clone)]
pub struct ContentRewriter {
    header_prefix: String,
    subject_prefix: Option<String>,
}

impl ContentRewriter {
    /// Creates a rewriter. An empty subject prefix disables subject
    /// rewriting.
    #[must_use]
    pub fn new(header_prefix: impl Into<String>, subject_prefix: Option<String>) -> Self {
        let subject_prefix = subject_prefix
            .map(|prefix| prefix.trim().to_string())
            .filter(|prefix| !prefix.is_empty())
            .map(|prefix| encode_rfc2047(&prefix, "utf-8"));
        Self {
            header_prefix: header_prefix.into(),
            subject_prefix,
        }
    }

    /// Creates a rewriter from the filter configuration.
    #[must_use]
    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(&config.header_prefix, config.subject_prefix.clone())
    }

    /// Name of the classification result header.
    #[must_use]
    pub fn result_header(&self) -> String {
        format!("{}-Result", self.header_prefix)
    }

    /// Name of the peer header.
    #[must_use]
    pub fn peer_header(&self) -> String {
        format!("{}-Peer", self.header_prefix)
    }

    /// Applies a classification result.
    ///
    /// Spam gets the subject prefix (a Subject header is created if there is
    /// none). Every message gets the result header. Not idempotent.
    #[must_use]
    pub fn rewrite(&self, message: &[u8], label: Label) -> Vec<u8> {
        let message = match (&self.subject_prefix, label) {
            (Some(prefix), Label::Spam) => prefix_subject(message, prefix),
            _ => message.to_vec(),
        };
        insert_header(&message, &self.result_header(), label.as_str())
    }

    /// Adds the peer header. `None` stands for a unix-socket peer.
    #[must_use]
    pub fn insert_peer(&self, message: &[u8], peer: Option<&str>) -> Vec<u8> {
        insert_header(
            message,
            &self.peer_header(),
            peer.unwrap_or(UNIX_SOCKET_PEER),
        )
    }
}

/// Inserts a header line right before the blank line ending the header
/// block, using the block's line ending. A message without a blank line is
/// all headers and the line is appended with CRLF.
fn insert_header(message: &[u8], name: &str, value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + name.len() + value.len() + 4);

    if let Some(boundary) = find_header_boundary(message) {
        out.extend_from_slice(&message[..boundary.offset]);
        push_header(&mut out, name, value, boundary.line_ending);
        out.extend_from_slice(&message[boundary.offset..]);
    } else {
        out.extend_from_slice(message);
        if !message.is_empty() && !message.ends_with(b"\n") {
            out.extend_from_slice(b"\r\n");
        }
        push_header(&mut out, name, value, b"\r\n");
    }

    out
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str, line_ending: &[u8]) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(line_ending);
}

/// Puts `prefix` in front of the first Subject value, or adds a Subject
/// header holding only the prefix.
fn prefix_subject(message: &[u8], prefix: &str) -> Vec<u8> {
    let header_end = find_header_boundary(message).map_or(message.len(), |b| b.offset);

    let mut offset = 0;
    for line in message[..header_end].split_inclusive(|&b| b == b'\n') {
        if let Some(colon) = subject_colon(line) {
            let value_start = offset
                + colon
                + 1
                + line[colon + 1..]
                    .iter()
                    .take_while(|&&b| b == b' ' || b == b'\t')
                    .count();
            let value_is_empty = message[value_start..offset + line.len()]
                .iter()
                .all(u8::is_ascii_whitespace);

            let mut out = Vec::with_capacity(message.len() + prefix.len() + 2);
            out.extend_from_slice(&message[..offset + colon + 1]);
            out.push(b' ');
            out.extend_from_slice(prefix.as_bytes());
            if !value_is_empty {
                out.push(b' ');
            }
            out.extend_from_slice(&message[value_start..]);
            return out;
        }
        offset += line.len();
    }

    insert_header(message, "Subject", prefix)
}

/// Returns the colon position if the line starts a Subject field.
fn subject_colon(line: &[u8]) -> Option<usize> {
    let colon = line.iter().position(|&b| b == b':')?;
    let name = line[..colon].trim_ascii_end();
    name.eq_ignore_ascii_case(b"subject").then_some(colon)
}
