//! In-process SMTP sink standing in for the next hop.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One message accepted by the sink.
#[derive(Debug, Clone, Default)]
pub struct Received {
    pub sender: String,
    pub recipients: Vec<String>,
    pub content: Vec<u8>,
}

impl Received {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// A minimal ESMTP server on loopback that records what it accepts.
pub struct SmtpSink {
    address: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
    task: JoinHandle<()>,
}

impl SmtpSink {
    /// Starts a sink that answers `550` for the listed recipients.
    pub async fn start(refused: &[&str]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let refused: Arc<HashSet<String>> =
            Arc::new(refused.iter().map(|r| r.to_string()).collect());

        let sink = Arc::clone(&received);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let sink = Arc::clone(&sink);
                let refused = Arc::clone(&refused);
                tokio::spawn(async move {
                    let _ = session(stream, &sink, &refused).await;
                });
            }
        });

        Self {
            address,
            received,
            task,
        }
    }

    /// Next-hop address of the sink.
    pub fn address(&self) -> String {
        self.address.to_string()
    }

    /// Messages accepted so far.
    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for SmtpSink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Returns a loopback address nothing listens on.
pub async fn unreachable_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);
    address.to_string()
}

async fn session(
    stream: TcpStream,
    sink: &Mutex<Vec<Received>>,
    refused: &HashSet<String>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut current = Received::default();

    writer.write_all(b"220 sink.test ESMTP\r\n").await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end();
        let upper = command.to_ascii_uppercase();

        if upper.starts_with("EHLO") {
            writer
                .write_all(b"250-sink.test\r\n250-8BITMIME\r\n250 SIZE 10485760\r\n")
                .await?;
        } else if upper.starts_with("HELO") {
            writer.write_all(b"250 sink.test\r\n").await?;
        } else if upper.starts_with("MAIL FROM:") {
            current = Received {
                sender: angle_address(command),
                ..Received::default()
            };
            writer.write_all(b"250 2.1.0 OK\r\n").await?;
        } else if upper.starts_with("RCPT TO:") {
            let recipient = angle_address(command);
            if refused.contains(&recipient) {
                writer.write_all(b"550 5.1.1 no such user\r\n").await?;
            } else {
                current.recipients.push(recipient);
                writer.write_all(b"250 2.1.5 OK\r\n").await?;
            }
        } else if upper == "DATA" {
            writer.write_all(b"354 go ahead\r\n").await?;
            let mut data = Vec::new();
            loop {
                let mut raw = Vec::new();
                if reader.read_until(b'\n', &mut raw).await? == 0 {
                    return Ok(());
                }
                if raw == b".\r\n" {
                    break;
                }
                let unstuffed = raw.strip_prefix(b".").unwrap_or(&raw);
                data.extend_from_slice(unstuffed);
            }
            current.content = data;
            sink.lock().unwrap().push(std::mem::take(&mut current));
            writer.write_all(b"250 2.0.0 queued\r\n").await?;
        } else if upper == "RSET" {
            current = Received::default();
            writer.write_all(b"250 OK\r\n").await?;
        } else if upper == "QUIT" {
            writer.write_all(b"221 bye\r\n").await?;
            return Ok(());
        } else {
            writer.write_all(b"502 unknown command\r\n").await?;
        }
    }
}

fn angle_address(command: &str) -> String {
    let start = command.find('<').map_or(0, |i| i + 1);
    let end = command[start..].find('>').map_or(command.len(), |i| start + i);
    command[start..end].to_string()
}
