//! Line framing for the inbound SMTP session.
//!
//! Commands and DATA lines end in CRLF; a bare LF is accepted as well.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Longest accepted command line.
pub const MAX_COMMAND_LENGTH: usize = 4096;

/// Buffered line reader and reply writer over one client stream.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Reads one line including its terminator.
    ///
    /// Returns `None` on a clean end of stream between lines.
    pub async fn read_line(&mut self, max_length: usize) -> io::Result<Option<Vec<u8>>> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                if line.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-line",
                ));
            }

            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&buf[..=pos]);
                self.reader.consume(pos + 1);
                return Ok(Some(line));
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);

            if line.len() > max_length {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
            }
        }
    }

    /// Reads the DATA section up to the terminating `.` line, removing
    /// dot-stuffing.
    ///
    /// Returns `None` if the content exceeded `max_size`; the section is
    /// still consumed so the session can continue.
    pub async fn read_data(&mut self, max_size: usize) -> io::Result<Option<Vec<u8>>> {
        let mut content = Vec::new();
        let mut oversized = false;
        let max_line = max_size.saturating_add(MAX_COMMAND_LENGTH);

        loop {
            let Some(line) = self.read_line(max_line).await? else {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed during DATA",
                ));
            };

            if line == b".\r\n" || line == b".\n" {
                break;
            }
            if oversized {
                continue;
            }

            let line = line.strip_prefix(b".").unwrap_or(&line);
            if content.len() + line.len() > max_size {
                oversized = true;
                content = Vec::new();
            } else {
                content.extend_from_slice(line);
            }
        }

        Ok((!oversized).then_some(content))
    }

    /// Writes a reply, appending the final CRLF.
    pub async fn write_reply(&mut self, reply: &str) -> io::Result<()> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(reply.as_bytes());
        self.write_buffer.extend_from_slice(b"\r\n");

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await
    }
}
