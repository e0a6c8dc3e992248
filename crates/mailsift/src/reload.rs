//! SIGHUP-driven classifier reload.
//!
//! The signal handler only queues a request. A single reload task drains
//! the queue and does the file I/O on a blocking worker, so requests that
//! arrive while one is pending collapse into it.

use std::io;
use std::sync::Arc;

use mailsift_core::ClassifierService;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle for requesting a reload.
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    sender: mpsc::Sender<()>,
}

impl ReloadTrigger {
    /// Queues a reload. Returns false if one is already pending or the
    /// reload task has stopped.
    pub fn request(&self) -> bool {
        match self.sender.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                debug!("reload already pending");
                false
            }
            Err(TrySendError::Closed(())) => {
                warn!("reload task is not running");
                false
            }
        }
    }
}

/// Starts the reload task.
pub fn start(classifier: Arc<ClassifierService>) -> (ReloadTrigger, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel(1);

    let task = tokio::spawn(async move {
        while receiver.recv().await.is_some() {
            let classifier = Arc::clone(&classifier);
            match tokio::task::spawn_blocking(move || classifier.reload()).await {
                Ok(Ok(true)) => info!("classifier reload complete"),
                Ok(Ok(false)) => debug!("classifier reload skipped"),
                Ok(Err(err)) => {
                    error!(error = %err, "classifier reload failed, keeping current snapshot");
                }
                Err(err) => error!(error = %err, "classifier reload task panicked"),
            }
        }
    });

    (ReloadTrigger { sender }, task)
}

/// Forwards SIGHUP to the trigger.
pub fn watch_hangup(trigger: ReloadTrigger) -> io::Result<JoinHandle<()>> {
    let mut hangup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, reloading classifier");
            trigger.request();
        }
    }))
}
