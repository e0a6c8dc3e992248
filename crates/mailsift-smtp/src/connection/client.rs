//! Type-state SMTP client.

use super::{ServerInfo, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, Extension, Reply, ReplyCode};
use std::collections::HashSet;
use std::marker::PhantomData;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Longest reply line accepted before the peer is considered broken.
const MAX_REPLY_LINE: usize = 4096;

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for at least one recipient accepted.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern, generic over the transport.
#[derive(Debug)]
pub struct Client<S, State> {
    stream: BufReader<S>,
    server_info: ServerInfo,
    _state: PhantomData<State>,
}

/// Result of offering every envelope recipient to the server.
#[derive(Debug)]
pub enum RecipientOutcome<S> {
    /// At least one recipient was accepted; the transaction can continue.
    Accepted {
        /// Client ready for `DATA`.
        client: Client<S, RecipientAdded>,
        /// Recipients the server rejected, with its reply.
        refused: Vec<(Address, Reply)>,
    },
    /// Every recipient was rejected.
    AllRefused {
        /// Client still inside the transaction.
        client: Client<S, MailTransaction>,
        /// Every recipient with the server's reply.
        refused: Vec<(Address, Reply)>,
    },
}

/// Connection trait for all states.
pub trait SmtpConnection {
    /// Returns the server information.
    fn server_info(&self) -> &ServerInfo;
}

impl<S, State> SmtpConnection for Client<S, State> {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }
}

impl<S> Client<S, Connected>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server returns an error.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut stream = BufReader::new(stream);
        let greeting = read_reply(&mut stream).await?;
        if !greeting.is_success() {
            return Err(Error::smtp_error(
                greeting.code.as_u16(),
                greeting.message_text(),
            ));
        }

        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        debug!(server = %hostname, "connected to next hop");

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                extensions: HashSet::new(),
            },
            _state: PhantomData,
        })
    }

    /// Sends EHLO, falling back to HELO if the server rejects it.
    ///
    /// Extensions are only known after a successful EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if both greetings fail.
    pub async fn greet(mut self, client_hostname: &str) -> Result<Self> {
        let reply = self
            .send_command(Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?;

        if reply.is_success() {
            self.server_info.extensions = parse_extensions(&reply);
            return Ok(self);
        }

        debug!(code = %reply.code, "EHLO rejected, falling back to HELO");
        let reply = self
            .send_command(Command::Helo {
                hostname: client_hostname.to_string(),
            })
            .await?;
        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        self.server_info.extensions.clear();
        Ok(self)
    }

    /// Starts a mail transaction.
    ///
    /// `size` is announced only when the server advertised SIZE; `BODY=8BITMIME`
    /// is announced when `eight_bit` is set and the server supports it.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(
        mut self,
        from: &Address,
        size: Option<usize>,
        eight_bit: bool,
    ) -> Result<Client<S, MailTransaction>> {
        let size = size.filter(|_| self.server_info.supports_size());
        let body = (eight_bit && self.server_info.supports(&Extension::EightBitMime))
            .then_some("8BITMIME");
        let reply = self
            .send_command(Command::MailFrom {
                from: from.clone(),
                body,
                size,
            })
            .await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(self.transition())
    }
}

impl Client<SmtpStream, Connected> {
    /// Upgrades the connection to TLS using STARTTLS and greets again.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not supported or if the upgrade fails.
    pub async fn starttls(mut self, hostname: &str, client_hostname: &str) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        let reply = self.send_command(Command::StartTls).await?;
        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        let stream = self.stream.into_inner().upgrade_to_tls(hostname).await?;
        let upgraded = Self {
            stream: BufReader::new(stream),
            server_info: ServerInfo {
                hostname: self.server_info.hostname,
                extensions: HashSet::new(),
            },
            _state: PhantomData,
        };
        upgraded.greet(client_hostname).await
    }
}

impl<S> Client<S, MailTransaction>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Offers each recipient in order, collecting refusals instead of failing.
    ///
    /// # Errors
    ///
    /// Returns an error only for transport or protocol failures; rejected
    /// recipients are reported in the outcome.
    pub async fn rcpt_to_all(mut self, recipients: &[Address]) -> Result<RecipientOutcome<S>> {
        let mut refused = Vec::new();
        let mut accepted = 0usize;

        for to in recipients {
            let reply = self.send_command(Command::RcptTo { to: to.clone() }).await?;
            if reply.is_success() {
                accepted += 1;
            } else {
                debug!(recipient = %to, code = %reply.code, "recipient refused");
                refused.push((to.clone(), reply));
            }
        }

        if accepted == 0 {
            return Ok(RecipientOutcome::AllRefused {
                client: self,
                refused,
            });
        }

        Ok(RecipientOutcome::Accepted {
            client: self.transition(),
            refused,
        })
    }
}

impl<S> Client<S, RecipientAdded>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error if the DATA command fails.
    pub async fn data(mut self) -> Result<Client<S, Data>> {
        let reply = self.send_command(Command::Data).await?;
        if reply.code != ReplyCode::START_DATA {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }
        Ok(self.transition())
    }
}

impl<S> Client<S, Data>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Sends the message content and completes the transaction.
    ///
    /// Line endings are normalized to CRLF, lines starting with `.` are
    /// dot-stuffed, and the terminating `.` line is appended.
    ///
    /// # Errors
    ///
    /// Returns an error if sending the message fails or server rejects it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<S, Connected>> {
        let payload = encode_data(message);
        self.stream.get_mut().write_all(&payload).await?;
        self.stream.get_mut().flush().await?;

        let reply = read_reply(&mut self.stream).await?;
        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }
        debug!(bytes = message.len(), reply = %reply.message_text(), "message accepted");

        Ok(self.transition())
    }
}

// Common implementation for all states
impl<S, State> Client<S, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn send_command(&mut self, cmd: Command) -> Result<Reply> {
        debug!(verb = cmd.verb(), "sending command");
        let data = cmd.serialize();
        self.stream.get_mut().write_all(&data).await?;
        self.stream.get_mut().flush().await?;
        read_reply(&mut self.stream).await
    }

    fn transition<Next>(self) -> Client<S, Next> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        }
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(Command::Quit).await?;
        if !reply.is_success() && reply.code != ReplyCode::CLOSING {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }
        let _ = self.stream.get_mut().shutdown().await;
        Ok(())
    }
}

async fn read_reply<S>(stream: &mut BufReader<S>) -> Result<Reply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut lines = Vec::new();
    let mut raw = Vec::new();
    loop {
        raw.clear();
        // One byte past the limit tells an overlong line from a full one.
        let n = (&mut *stream)
            .take(MAX_REPLY_LINE as u64 + 1)
            .read_until(b'\n', &mut raw)
            .await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        if raw.len() > MAX_REPLY_LINE {
            return Err(Error::Protocol(format!(
                "Reply line exceeds {MAX_REPLY_LINE} bytes"
            )));
        }

        let line = String::from_utf8_lossy(&raw).trim_end().to_string();
        if line.is_empty() {
            continue;
        }

        let is_last = is_last_reply_line(&line);
        lines.push(line);
        if is_last {
            break;
        }
    }

    parse_reply(&lines)
}

fn parse_extensions(reply: &Reply) -> HashSet<Extension> {
    // The first line is the server's greeting text
    reply
        .message
        .iter()
        .skip(1)
        .map(String::as_str)
        .map(Extension::parse)
        .collect()
}

/// Encodes a message for the DATA phase: CRLF line endings, dot-stuffing and
/// the terminating `.` line.
#[must_use]
pub fn encode_data(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 32 + 5);
    let body = message.strip_suffix(b"\n").unwrap_or(message);

    if !body.is_empty() {
        for line in body.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
    }

    out.extend_from_slice(b".\r\n");
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::similar_names)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    #[test]
    fn test_encode_data_normalizes_and_stuffs() {
        let encoded = encode_data(b"Subject: x\n\n.hidden\r\nlast\n");
        assert_eq!(encoded, b"Subject: x\r\n\r\n..hidden\r\nlast\r\n.\r\n");
    }

    #[test]
    fn test_encode_data_without_trailing_newline() {
        assert_eq!(encode_data(b"a\r\nb"), b"a\r\nb\r\n.\r\n");
        assert_eq!(encode_data(b""), b".\r\n");
    }

    #[tokio::test]
    async fn test_greet_collects_extensions() {
        let mock = Builder::new()
            .read(b"220 mx.example.com ESMTP\r\n")
            .write(b"EHLO filter.local\r\n")
            .read(b"250-mx.example.com\r\n250-SIZE 1000\r\n250 8BITMIME\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        assert_eq!(client.server_info().hostname, "mx.example.com");

        let client = client.greet("filter.local").await.unwrap();
        assert!(client.server_info().supports(&Extension::EightBitMime));
        assert_eq!(client.server_info().max_message_size(), Some(1000));
    }

    #[tokio::test]
    async fn test_greet_falls_back_to_helo() {
        let mock = Builder::new()
            .read(b"220 old.example.com SMTP\r\n")
            .write(b"EHLO filter.local\r\n")
            .read(b"502 command not implemented\r\n")
            .write(b"HELO filter.local\r\n")
            .read(b"250 old.example.com\r\n")
            .build();

        let client = Client::from_stream(mock).await.unwrap();
        let client = client.greet("filter.local").await.unwrap();
        assert!(client.server_info().extensions.is_empty());
    }

    #[tokio::test]
    async fn test_greeting_rejected() {
        let mock = Builder::new().read(b"554 go away\r\n").build();
        let err = Client::from_stream(mock).await.unwrap_err();
        assert_eq!(err.reply_code(), Some(554));
    }

    #[tokio::test]
    async fn test_closed_connection_is_an_error() {
        let mock = Builder::new().build();
        let err = Client::from_stream(mock).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_reply_line_without_newline_is_bounded() {
        let mut line = b"220 ".to_vec();
        line.resize(MAX_REPLY_LINE * 2, b'x');
        let mock = Builder::new().read(&line).build();

        let err = Client::from_stream(mock).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_partial_refusal_transaction() {
        let mock = Builder::new()
            .read(b"220 mx ESMTP\r\n")
            .write(b"EHLO filter.local\r\n")
            .read(b"250 mx\r\n")
            .write(b"MAIL FROM:<s@x>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<a@x>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<b@x>\r\n")
            .read(b"550 5.1.1 no such user\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"Subject: hi\r\n\r\nbody\r\n.\r\n")
            .read(b"250 queued\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();

        let client = Client::from_stream(mock)
            .await
            .unwrap()
            .greet("filter.local")
            .await
            .unwrap();
        let client = client.mail_from(&addr("s@x"), Some(10), false).await.unwrap();
        let RecipientOutcome::Accepted { client, refused } = client
            .rcpt_to_all(&[addr("a@x"), addr("b@x")])
            .await
            .unwrap()
        else {
            panic!("expected an accepted recipient");
        };
        assert_eq!(refused.len(), 1);
        assert_eq!(refused[0].0, addr("b@x"));
        assert_eq!(refused[0].1.code, ReplyCode::MAILBOX_UNAVAILABLE);

        let client = client.data().await.unwrap();
        let client = client.send_message(b"Subject: hi\r\n\r\nbody\r\n").await.unwrap();
        client.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_all_recipients_refused() {
        let mock = Builder::new()
            .read(b"220 mx ESMTP\r\n")
            .write(b"EHLO filter.local\r\n")
            .read(b"250-mx\r\n250 SIZE\r\n")
            .write(b"MAIL FROM:<> SIZE=42\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<a@x>\r\n")
            .read(b"450 try later\r\n")
            .build();

        let client = Client::from_stream(mock)
            .await
            .unwrap()
            .greet("filter.local")
            .await
            .unwrap();
        let client = client
            .mail_from(&Address::null(), Some(42), true)
            .await
            .unwrap();
        let outcome = client.rcpt_to_all(&[addr("a@x")]).await.unwrap();
        let RecipientOutcome::AllRefused { refused, .. } = outcome else {
            panic!("expected every recipient refused");
        };
        assert_eq!(refused[0].1.code.as_u16(), 450);
    }

    #[tokio::test]
    async fn test_data_rejected_after_content() {
        let mock = Builder::new()
            .read(b"220 mx ESMTP\r\n")
            .write(b"EHLO filter.local\r\n")
            .read(b"250 mx\r\n")
            .write(b"MAIL FROM:<s@x>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<a@x>\r\n")
            .read(b"250 ok\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"x\r\n.\r\n")
            .read(b"554 5.7.1 content rejected\r\n")
            .build();

        let client = Client::from_stream(mock)
            .await
            .unwrap()
            .greet("filter.local")
            .await
            .unwrap();
        let client = client.mail_from(&addr("s@x"), None, false).await.unwrap();
        let RecipientOutcome::Accepted { client, .. } =
            client.rcpt_to_all(&[addr("a@x")]).await.unwrap()
        else {
            panic!("expected an accepted recipient");
        };
        let client = client.data().await.unwrap();
        let err = client.send_message(b"x").await.unwrap_err();
        assert_eq!(err.reply_code(), Some(554));
    }
}
