//! # mailsift-smtp
//!
//! The SMTP client half of the mailsift relay. It carries a filtered message
//! to the next-hop transport and reports, per recipient, what the peer
//! refused.
//!
//! ## Features
//!
//! - **Type-state sessions**: greeting, envelope and data phases are separate
//!   types, so a message cannot be sent before a recipient was accepted
//! - **Transports**: TCP, unix-domain sockets, and STARTTLS upgrades over TCP
//! - **Partial refusals**: `RCPT TO` rejections are collected instead of
//!   aborting the transaction
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailsift_smtp::{Address, Client, RecipientOutcome};
//! use mailsift_smtp::connection::connect_unix;
//!
//! # async fn relay() -> mailsift_smtp::Result<()> {
//! let stream = connect_unix("/run/postfix/reinject.sock").await?;
//! let client = Client::from_stream(stream).await?.greet("filter.local").await?;
//!
//! let from = Address::new("sender@example.com")?;
//! let rcpts = [Address::new("a@example.com")?, Address::new("b@example.com")?];
//!
//! let client = client.mail_from(&from, None, false).await?;
//! match client.rcpt_to_all(&rcpts).await? {
//!     RecipientOutcome::Accepted { client, refused } => {
//!         let client = client.data().await?;
//!         let client = client.send_message(b"Subject: hi\r\n\r\nbody\r\n").await?;
//!         client.quit().await?;
//!         println!("refused: {refused:?}");
//!     }
//!     RecipientOutcome::AllRefused { client, refused } => {
//!         client.quit().await?;
//!         println!("nobody accepted: {refused:?}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Session States
//!
//! ```text
//! ┌──────────────┐
//! │  Connected   │ ─── greet() / starttls()
//! └──────────────┘
//!        │
//!        └─── mail_from() ───→ MailTransaction ─── rcpt_to_all() ───→ RecipientAdded ───→ Data
//! ```
//!
//! ## Modules
//!
//! - [`command`]: SMTP command serialization
//! - [`connection`]: Transports and the type-state client
//! - [`parser`]: Reply parser
//! - [`types`]: Addresses, extensions and replies

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use connection::{
    Client, Connected, Data, MailTransaction, RecipientAdded, RecipientOutcome, ServerInfo,
    SmtpConnection, SmtpStream,
};
pub use error::{Error, Result};
pub use types::{Address, Extension, Reply, ReplyCode};
