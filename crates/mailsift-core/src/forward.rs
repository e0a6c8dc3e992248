//! Store-and-forward delivery to the next hop.

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use mailsift_smtp::connection::{connect, connect_unix, encode_data};
use mailsift_smtp::{Address, Client, Connected, RecipientOutcome, Reply, SmtpConnection};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Port used when a TCP next hop names none.
pub const DEFAULT_NEXT_HOP_PORT: u16 = 10026;

/// Code reported for failures that produced no server reply.
pub const TRANSPORT_FAILURE_CODE: i32 = -1;

/// Why one recipient was not delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refusal {
    /// Server reply code, or [`TRANSPORT_FAILURE_CODE`].
    pub code: i32,
    /// Server reply text or error description.
    pub message: String,
}

impl Refusal {
    /// Creates a refusal.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn from_reply(reply: &Reply) -> Self {
        Self::new(i32::from(reply.code.as_u16()), reply.message_text())
    }

    fn from_error(error: &mailsift_smtp::Error) -> Self {
        match error {
            mailsift_smtp::Error::SmtpError { code, message } => {
                Self::new(i32::from(*code), message.clone())
            }
            other => Self::new(TRANSPORT_FAILURE_CODE, other.to_string()),
        }
    }
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

/// Refused recipients of one delivery, ordered by address.
pub type RefusalMap = BTreeMap<String, Refusal>;

/// Where delivered mail goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextHop {
    /// TCP host and port.
    Tcp {
        /// Host name or address literal.
        host: String,
        /// Port.
        port: u16,
    },
    /// Unix-domain socket path.
    Unix(PathBuf),
}

impl NextHop {
    /// Parses `host[:port]`, `[v6-literal][:port]`, or a socket path
    /// (anything containing `/`).
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty host or invalid port.
    pub fn parse(address: &str) -> Result<Self> {
        let address = address.trim();
        if address.contains('/') {
            return Ok(Self::Unix(PathBuf::from(address)));
        }

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| Error::Config(format!("unterminated address literal {address:?}")))?;
            (host, after.strip_prefix(':'))
        } else {
            match address.rsplit_once(':') {
                Some((host, port)) if !host.contains(':') => (host, Some(port)),
                _ => (address, None),
            }
        };

        if host.is_empty() {
            return Err(Error::Config(format!("missing host in {address:?}")));
        }
        let port = match port {
            Some(port) => port
                .parse()
                .map_err(|_| Error::Config(format!("invalid port in {address:?}")))?,
            None => DEFAULT_NEXT_HOP_PORT,
        };

        Ok(Self::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Relays one message per call to the next hop.
#[derive(Debug, Clone)]
pub struct DeliveryForwarder {
    next_hop: NextHop,
    hostname: String,
    timeout: Duration,
    starttls: bool,
}

impl DeliveryForwarder {
    /// Creates a forwarder. `hostname` is what we announce in EHLO.
    #[must_use]
    pub fn new(next_hop: NextHop, hostname: impl Into<String>, timeout: Duration) -> Self {
        Self {
            next_hop,
            hostname: hostname.into(),
            timeout,
            starttls: false,
        }
    }

    /// Upgrades TCP sessions with STARTTLS when the next hop offers it.
    #[must_use]
    pub const fn with_starttls(mut self, starttls: bool) -> Self {
        self.starttls = starttls;
        self
    }

    /// Creates a forwarder from the server configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the next-hop address is invalid.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Ok(
            Self::new(NextHop::parse(&config.next_hop)?, &config.hostname, config.timeout())
                .with_starttls(config.starttls),
        )
    }

    /// Delivers `content` to every recipient in one transaction.
    ///
    /// Returns the refused recipients; an empty map means full success.
    /// When the transaction fails as a whole, every recipient is refused
    /// with the server's reply, or with [`TRANSPORT_FAILURE_CODE`] when there
    /// was none.
    pub async fn deliver(&self, sender: &str, recipients: &[String], content: &[u8]) -> RefusalMap {
        if recipients.is_empty() {
            return RefusalMap::new();
        }

        let mut refusals = RefusalMap::new();
        let from = match Address::sender(sender) {
            Ok(from) => from,
            Err(err) => return refuse_all(recipients, &Refusal::from_error(&err)),
        };
        let mut to = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            match Address::new(recipient.as_str()) {
                Ok(address) => to.push(address),
                Err(err) => {
                    refusals.insert(recipient.clone(), Refusal::from_error(&err));
                }
            }
        }
        if to.is_empty() {
            return refusals;
        }

        let outcome = tokio::time::timeout(self.timeout, self.session(&from, &to, content)).await;
        match outcome {
            Ok(Ok(refused)) => {
                info!(
                    next_hop = %self.next_hop,
                    accepted = to.len().saturating_sub(refused.len()),
                    refused = refused.len(),
                    "message relayed"
                );
                for (address, reply) in refused {
                    refusals.insert(address.as_str().to_string(), Refusal::from_reply(&reply));
                }
            }
            Ok(Err(err)) => {
                warn!(
                    next_hop = %self.next_hop,
                    error = %err,
                    permanent = err.is_permanent(),
                    "delivery failed"
                );
                let refusal = Refusal::from_error(&err);
                for address in &to {
                    refusals.insert(address.as_str().to_string(), refusal.clone());
                }
            }
            Err(_) => {
                let err = Error::Transport(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                ));
                warn!(next_hop = %self.next_hop, error = %err, "delivery failed");
                let refusal = Refusal::new(TRANSPORT_FAILURE_CODE, err.to_string());
                for address in &to {
                    refusals.insert(address.as_str().to_string(), refusal.clone());
                }
            }
        }

        refusals
    }

    async fn session(
        &self,
        from: &Address,
        to: &[Address],
        content: &[u8],
    ) -> mailsift_smtp::Result<Vec<(Address, Reply)>> {
        match &self.next_hop {
            NextHop::Unix(path) => {
                let client = Client::from_stream(connect_unix(path).await?)
                    .await?
                    .greet(&self.hostname)
                    .await?;
                transfer(client, from, to, content).await
            }
            NextHop::Tcp { host, port } => {
                let mut client = Client::from_stream(connect(host, *port).await?)
                    .await?
                    .greet(&self.hostname)
                    .await?;
                if self.starttls {
                    if client.server_info().supports_starttls() {
                        client = client.starttls(host, &self.hostname).await?;
                    } else {
                        debug!(next_hop = %self.next_hop, "STARTTLS not offered, staying plain");
                    }
                }
                transfer(client, from, to, content).await
            }
        }
    }
}

/// Runs one MAIL/RCPT/DATA transaction and returns the refused recipients.
async fn transfer<S>(
    client: Client<S, Connected>,
    from: &Address,
    to: &[Address],
    content: &[u8],
) -> mailsift_smtp::Result<Vec<(Address, Reply)>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let eight_bit = content.iter().any(|&b| b > 127);
    // SIZE counts the bytes sent, after CRLF conversion and dot-stuffing.
    let size = encode_data(content).len();
    let client = client.mail_from(from, Some(size), eight_bit).await?;

    match client.rcpt_to_all(to).await? {
        RecipientOutcome::Accepted { client, refused } => {
            let client = client.data().await?.send_message(content).await?;
            if let Err(err) = client.quit().await {
                debug!(error = %err, "QUIT failed after delivery");
            }
            Ok(refused)
        }
        RecipientOutcome::AllRefused { client, refused } => {
            if let Err(err) = client.quit().await {
                debug!(error = %err, "QUIT failed after refusals");
            }
            Ok(refused)
        }
    }
}

fn refuse_all(recipients: &[String], refusal: &Refusal) -> RefusalMap {
    recipients
        .iter()
        .map(|recipient| (recipient.clone(), refusal.clone()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_next_hop_parse() {
        assert_eq!(
            NextHop::parse("127.0.0.1:2525").unwrap(),
            NextHop::Tcp {
                host: "127.0.0.1".into(),
                port: 2525
            }
        );
        assert_eq!(
            NextHop::parse("mx.internal").unwrap(),
            NextHop::Tcp {
                host: "mx.internal".into(),
                port: DEFAULT_NEXT_HOP_PORT
            }
        );
        assert_eq!(
            NextHop::parse("[::1]:25").unwrap(),
            NextHop::Tcp {
                host: "::1".into(),
                port: 25
            }
        );
        assert_eq!(
            NextHop::parse("::1").unwrap(),
            NextHop::Tcp {
                host: "::1".into(),
                port: DEFAULT_NEXT_HOP_PORT
            }
        );
        assert_eq!(
            NextHop::parse("/run/postfix/in.sock").unwrap(),
            NextHop::Unix(PathBuf::from("/run/postfix/in.sock"))
        );
    }

    #[test]
    fn test_next_hop_parse_errors() {
        assert!(NextHop::parse(":25").is_err());
        assert!(NextHop::parse("host:notaport").is_err());
        assert!(NextHop::parse("[::1").is_err());
    }

    #[test]
    fn test_next_hop_display() {
        assert_eq!(NextHop::parse("[::1]:25").unwrap().to_string(), "[::1]:25");
        assert_eq!(NextHop::parse("mx").unwrap().to_string(), "mx:10026");
    }

    #[test]
    fn test_refusal_from_error() {
        let reply = Refusal::from_error(&mailsift_smtp::Error::smtp_error(554, "no thanks"));
        assert_eq!(reply, Refusal::new(554, "no thanks"));

        let transport = Refusal::from_error(&mailsift_smtp::Error::ConnectionClosed);
        assert_eq!(transport.code, TRANSPORT_FAILURE_CODE);
        assert_eq!(transport.to_string(), "-1 Connection closed by peer");
    }

    #[tokio::test]
    async fn test_no_recipients_means_no_session() {
        let forwarder = DeliveryForwarder::new(
            NextHop::Unix(PathBuf::from("/nonexistent/socket")),
            "localhost",
            Duration::from_secs(1),
        );
        assert!(forwarder.deliver("a@b", &[], b"x").await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_next_hop_refuses_everyone() {
        let dir = tempfile::tempdir().unwrap();
        let forwarder = DeliveryForwarder::new(
            NextHop::Unix(dir.path().join("missing.sock")),
            "localhost",
            Duration::from_secs(5),
        );
        let recipients = vec!["a@x".to_string(), "b@x".to_string()];
        let refusals = forwarder.deliver("s@x", &recipients, b"Subject: x\r\n\r\n").await;

        assert_eq!(refusals.len(), 2);
        assert!(refusals.values().all(|r| r.code == TRANSPORT_FAILURE_CODE));
    }

    #[tokio::test]
    async fn test_size_counts_encoded_bytes() {
        let mock = Builder::new()
            .read(b"220 mx ESMTP\r\n")
            .write(b"EHLO filter.local\r\n")
            .read(b"250-mx\r\n250 SIZE 1000\r\n")
            .write(b"MAIL FROM:<s@x> SIZE=24\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<a@x>\r\n")
            .read(b"250 ok\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"Subject: x\r\n\r\n..dot\r\n.\r\n")
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
        let refused = transfer(
            client,
            &Address::new("s@x").unwrap(),
            &[Address::new("a@x").unwrap()],
            b"Subject: x\n\n.dot\n",
        )
        .await
        .unwrap();
        assert!(refused.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_refused_alone() {
        let dir = tempfile::tempdir().unwrap();
        let forwarder = DeliveryForwarder::new(
            NextHop::Unix(dir.path().join("missing.sock")),
            "localhost",
            Duration::from_secs(5),
        );
        let refusals = forwarder
            .deliver("s@x", &["bad address".to_string()], b"x")
            .await;
        assert_eq!(refusals.len(), 1);
        assert_eq!(refusals["bad address"].code, TRANSPORT_FAILURE_CODE);
    }
}
