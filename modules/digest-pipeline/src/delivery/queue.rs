// Bounded relay queue. Callers enqueue without waiting; one dispatch task
// posts messages in order with a minimum spacing between sends.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::collaborators::MessageRelay;

pub const DEFAULT_CAPACITY: usize = 64;
pub const DEFAULT_SPACING: Duration = Duration::from_secs(1);

enum Command {
    Post { channel: String, text: String },
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct RelayQueue {
    tx: mpsc::Sender<Command>,
}

impl RelayQueue {
    /// Start a queue with the default capacity and spacing. Must be called
    /// inside a tokio runtime.
    pub fn start(relay: Arc<dyn MessageRelay>) -> Self {
        Self::with_limits(relay, DEFAULT_CAPACITY, DEFAULT_SPACING)
    }

    pub fn with_limits(relay: Arc<dyn MessageRelay>, capacity: usize, spacing: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(dispatch(relay, rx, spacing));
        Self { tx }
    }

    /// Queue a message. Returns `false` (and logs) when the queue is full or
    /// the dispatcher is gone.
    pub fn enqueue(&self, channel: &str, text: impl Into<String>) -> bool {
        let command = Command::Post {
            channel: channel.to_string(),
            text: text.into(),
        };
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(channel, "Relay queue full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(channel, "Relay dispatcher stopped, message dropped");
                false
            }
        }
    }

    /// Resolve once every message enqueued before this call has been
    /// attempted.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

async fn dispatch(relay: Arc<dyn MessageRelay>, mut rx: mpsc::Receiver<Command>, spacing: Duration) {
    let mut last_sent: Option<Instant> = None;

    while let Some(command) = rx.recv().await {
        match command {
            Command::Post { channel, text } => {
                if let Some(last) = last_sent {
                    tokio::time::sleep_until(last + spacing).await;
                }
                match relay.post_message(&channel, &text).await {
                    Ok(()) => debug!(channel = channel.as_str(), "Relay message posted"),
                    Err(e) => warn!(channel = channel.as_str(), error = %e, "Relay message failed"),
                }
                last_sent = Some(Instant::now());
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
