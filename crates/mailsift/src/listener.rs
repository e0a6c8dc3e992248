//! Inbound socket: TCP `host:port` or a unix socket path.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mailsift_core::Pipeline;
use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, info, warn};

use crate::session::{self, SessionSettings};

/// A bound inbound socket.
pub enum Listener {
    /// TCP listener.
    Tcp(TcpListener),
    /// Unix listener and its socket file.
    Unix(UnixListener, PathBuf),
}

impl Listener {
    /// Binds `address`. An address containing `/` is a unix socket path; a
    /// stale socket file at that path is removed first.
    pub async fn bind(address: &str) -> io::Result<Self> {
        if address.contains('/') {
            let path = PathBuf::from(address);
            remove_stale_socket(&path)?;
            let listener = UnixListener::bind(&path)?;
            info!(path = %path.display(), "listening on unix socket");
            Ok(Self::Unix(listener, path))
        } else {
            let listener = TcpListener::bind(address).await?;
            info!(address = %listener.local_addr()?, "listening");
            Ok(Self::Tcp(listener))
        }
    }

    /// Accepts connections forever, one task per session.
    pub async fn run(&self, pipeline: Arc<Pipeline>, settings: Arc<SessionSettings>) {
        loop {
            let accepted = match self {
                Self::Tcp(listener) => listener.accept().await.map(|(stream, addr)| {
                    let peer = addr.ip().to_string();
                    spawn_session(stream, Some(peer), &pipeline, &settings);
                }),
                Self::Unix(listener, _) => listener.accept().await.map(|(stream, _)| {
                    spawn_session(stream, None, &pipeline, &settings);
                }),
            };
            if let Err(err) = accepted {
                warn!(error = %err, "accept failed");
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Self::Unix(_, path) = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn spawn_session<S>(
    stream: S,
    peer: Option<String>,
    pipeline: &Arc<Pipeline>,
    settings: &Arc<SessionSettings>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pipeline = Arc::clone(pipeline);
    let settings = Arc::clone(settings);
    tokio::spawn(async move {
        debug!(peer = peer.as_deref().unwrap_or("unix"), "session opened");
        if let Err(err) = session::run(stream, peer, &pipeline, &settings).await {
            debug!(error = %err, "session ended with error");
        }
    });
}

fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale socket");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
