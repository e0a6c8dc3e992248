//! Inbound SMTP session.
//!
//! Accepts one envelope at a time from the upstream MTA and hands it to the
//! pipeline on DATA. The pipeline's reply is sent back verbatim.

use std::io;

use mailsift_core::{Envelope, Pipeline};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::framed::{FramedStream, MAX_COMMAND_LENGTH};

/// Per-listener session settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Name used in the greeting and EHLO reply.
    pub hostname: String,
    /// Largest accepted message in bytes.
    pub max_message_size: usize,
}

/// Envelope under construction.
#[derive(Debug, Default)]
struct Transaction {
    sender: Option<String>,
    recipients: Vec<String>,
}

/// Runs one session to completion.
///
/// `peer` is the client IP, or `None` for unix-socket clients.
pub async fn run<S>(
    stream: S,
    peer: Option<String>,
    pipeline: &Pipeline,
    settings: &SessionSettings,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = FramedStream::new(stream);
    let mut transaction = Transaction::default();

    framed
        .write_reply(&format!("220 {} ESMTP mailsift", settings.hostname))
        .await?;

    while let Some(line) = framed.read_line(MAX_COMMAND_LENGTH).await? {
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, argument) = line.split_once(' ').unwrap_or((line, ""));
        debug!(peer = peer.as_deref().unwrap_or("unix"), verb, "command received");

        let reply = match verb.to_ascii_uppercase().as_str() {
            "HELO" => {
                transaction = Transaction::default();
                format!("250 {}", settings.hostname)
            }
            "EHLO" => {
                transaction = Transaction::default();
                format!(
                    "250-{}\r\n250-SIZE {}\r\n250-8BITMIME\r\n250 PIPELINING",
                    settings.hostname, settings.max_message_size
                )
            }
            "MAIL" => mail(&mut transaction, argument, settings),
            "RCPT" => rcpt(&mut transaction, argument),
            "DATA" => {
                if transaction.recipients.is_empty() {
                    "503 5.5.1 Error: need RCPT command".to_string()
                } else {
                    framed
                        .write_reply("354 End data with <CR><LF>.<CR><LF>")
                        .await?;
                    let reply = match framed.read_data(settings.max_message_size).await? {
                        Some(content) => {
                            let envelope = Envelope {
                                sender: transaction.sender.take().unwrap_or_default(),
                                recipients: std::mem::take(&mut transaction.recipients),
                                content,
                                peer: peer.clone(),
                            };
                            let reply = pipeline.process(&envelope).await;
                            info!(
                                sender = %envelope.sender,
                                recipients = envelope.recipients.len(),
                                size = envelope.content.len(),
                                reply = reply.lines().next_back().unwrap_or_default(),
                                "envelope processed"
                            );
                            reply
                        }
                        None => "552 5.3.4 Error: message too big".to_string(),
                    };
                    transaction = Transaction::default();
                    reply
                }
            }
            "RSET" => {
                transaction = Transaction::default();
                "250 2.0.0 OK".to_string()
            }
            "NOOP" => "250 2.0.0 OK".to_string(),
            "QUIT" => {
                framed.write_reply("221 2.0.0 Bye").await?;
                return Ok(());
            }
            "" => "500 5.5.2 Error: bad syntax".to_string(),
            _ => "500 5.5.2 Error: command not recognized".to_string(),
        };

        framed.write_reply(&reply).await?;
    }

    Ok(())
}

fn mail(transaction: &mut Transaction, argument: &str, settings: &SessionSettings) -> String {
    if transaction.sender.is_some() {
        return "503 5.5.1 Error: nested MAIL command".to_string();
    }
    let Some((address, parameters)) = parse_path(argument, "FROM") else {
        return "501 5.5.4 Syntax: MAIL FROM:<address>".to_string();
    };
    if declared_size(parameters).is_some_and(|size| size > settings.max_message_size) {
        return "552 5.3.4 Error: message too big".to_string();
    }
    transaction.sender = Some(address.to_string());
    "250 2.1.0 OK".to_string()
}

fn rcpt(transaction: &mut Transaction, argument: &str) -> String {
    if transaction.sender.is_none() {
        return "503 5.5.1 Error: need MAIL command".to_string();
    }
    match parse_path(argument, "TO") {
        Some((address, _)) if !address.is_empty() => {
            transaction.recipients.push(address.to_string());
            "250 2.1.5 OK".to_string()
        }
        _ => "501 5.5.4 Syntax: RCPT TO:<address>".to_string(),
    }
}

/// Splits `FROM:<addr> PARAMS` into the address and its parameters.
fn parse_path<'a>(argument: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let (head, tail) = argument.split_once(':')?;
    if !head.trim().eq_ignore_ascii_case(keyword) {
        return None;
    }
    let tail = tail.trim_start();
    let (address, parameters) = match tail.strip_prefix('<') {
        Some(rest) => rest.split_once('>')?,
        None => tail.split_once(' ').unwrap_or((tail, "")),
    };
    Some((address.trim(), parameters.trim()))
}

fn declared_size(parameters: &str) -> Option<usize> {
    parameters.split_whitespace().find_map(|parameter| {
        let (key, value) = parameter.split_once('=')?;
        key.eq_ignore_ascii_case("SIZE")
            .then(|| value.parse().ok())
            .flatten()
    })
}
