//! Decoding of transfer encodings, charsets and encoded words.
//!
//! Everything here is lenient: spam is routinely malformed, and a message
//! that cannot be decoded perfectly should still yield usable text.

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use std::sync::LazyLock;

use crate::error::Result;

/// Base64 engine that accepts missing padding and stray trailing bits.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[allow(clippy::expect_used)]
static ENCODED_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"=\?([^?\s]+)\?([bBqQ])\?([^?\s]*)\?=").expect("encoded-word pattern is valid")
});

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data, ignoring whitespace and padding problems.
///
/// # Errors
///
/// Returns an error if the input contains characters outside the alphabet.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    LENIENT_BASE64.decode(cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Soft line breaks are removed. Malformed escapes are kept literally.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            out.push(byte);
            i += 1;
            continue;
        }

        match (data.get(i + 1), data.get(i + 2)) {
            (Some(b'\r'), Some(b'\n')) => i += 3,
            (Some(b'\n'), _) => i += 2,
            (Some(&hi), Some(&lo)) => match (hex_value(hi), hex_value(lo)) {
                (Some(hi), Some(lo)) => {
                    out.push((hi << 4) | lo);
                    i += 3;
                }
                _ => {
                    out.push(b'=');
                    i += 1;
                }
            },
            _ => {
                out.push(b'=');
                i += 1;
            }
        }
    }

    out
}

const fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decodes bytes in the named charset, falling back to lossy UTF-8 for
/// missing or unknown labels.
#[must_use]
pub fn decode_charset(bytes: &[u8], charset: Option<&str>) -> String {
    let encoding = charset
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// Encodes a header value using RFC 2047 if it is not plain ASCII.
///
/// Format: `=?charset?B?encoded-text?=`
#[must_use]
pub fn encode_rfc2047(text: &str, charset: &str) -> String {
    if text.is_ascii() && !text.contains("=?") {
        return text.to_string();
    }
    format!("=?{charset}?B?{}?=", encode_base64(text.as_bytes()))
}

/// Decodes every RFC 2047 encoded word in a header value.
///
/// Whitespace between two adjacent encoded words is dropped, as the RFC
/// requires. Words that fail to decode are left as they are.
#[must_use]
pub fn decode_rfc2047(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_end = 0;
    let mut previous_was_word = false;

    for caps in ENCODED_WORD.captures_iter(value) {
        let Some(whole) = caps.get(0) else { continue };
        let gap = &value[last_end..whole.start()];
        let decoded = decode_encoded_word(&caps[1], &caps[2], &caps[3]);

        if !(previous_was_word && gap.trim().is_empty() && decoded.is_some()) {
            out.push_str(gap);
        }
        match decoded {
            Some(text) => {
                out.push_str(&text);
                previous_was_word = true;
            }
            None => {
                out.push_str(whole.as_str());
                previous_was_word = false;
            }
        }
        last_end = whole.end();
    }

    out.push_str(&value[last_end..]);
    out
}

fn decode_encoded_word(charset: &str, encoding: &str, text: &str) -> Option<String> {
    // RFC 2231 language suffix: utf-8*en
    let charset = charset.split('*').next().unwrap_or(charset);
    let bytes = if encoding.eq_ignore_ascii_case("B") {
        decode_base64(text.as_bytes()).ok()?
    } else {
        decode_quoted_printable(text.replace('_', " ").as_bytes())
    };
    Some(decode_charset(&bytes, Some(charset)))
}
