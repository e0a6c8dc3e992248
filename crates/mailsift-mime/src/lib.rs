//! # mailsift-mime
//!
//! Just enough MIME to turn a raw message into what the classifier reads: a
//! normalized sender, a subject with earlier spam tags removed, and a
//! plain-text body.
//!
//! ## Features
//!
//! - **Header parsing**: folded headers, case-insensitive lookup, original order
//! - **Encoded words**: RFC 2047 `B` and `Q` decoding in any charset `encoding_rs` knows
//! - **Transfer encodings**: Base64 and Quoted-Printable bodies
//! - **Multipart**: nested multipart trees, attachments skipped
//! - **Body preference**: HTML rendered to text, plain text otherwise
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailsift_mime::ContentExtractor;
//!
//! let raw = b"From: Shop <deals@example.com>\r\n\
//!             Subject: *** SPAM *** Cheap watches\r\n\
//!             \r\n\
//!             Buy now!\r\n";
//!
//! let extractor = ContentExtractor::default();
//! let content = extractor.extract(raw);
//! assert_eq!(content.subject, "Cheap watches");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod content;
mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use content::{ContentExtractor, DEFAULT_MAX_BODY_CHARS, DEFAULT_SPAM_SUBJECT_PATTERNS, MailContent};
pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::{HeaderBoundary, Headers, find_header_boundary, split_header_block};
pub use message::{Message, Part, TransferEncoding};
