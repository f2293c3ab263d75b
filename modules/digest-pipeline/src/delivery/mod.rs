//! Delivery: render the digest into an external document, then queue a
//! summary for the messaging relay. Both steps are best-effort.

pub mod queue;
pub mod render;

pub use queue::RelayQueue;
pub use render::{document_title, render_document, summary_message, TOP_N};

use std::sync::Arc;

use tracing::{info, warn};

use digest_common::{Digest, DigestSettings, Recommendation};

use crate::collaborators::DocumentExporter;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    pub document_url: Option<String>,
    pub message_queued: bool,
}

pub struct Delivery {
    documents: Arc<dyn DocumentExporter>,
    relay: RelayQueue,
    folder_id: Option<String>,
    channel_id: Option<String>,
}

impl Delivery {
    pub fn new(documents: Arc<dyn DocumentExporter>, relay: RelayQueue, settings: &DigestSettings) -> Self {
        Self {
            documents,
            relay,
            folder_id: settings.docs_folder_id.clone(),
            channel_id: settings.relay_channel_id.clone(),
        }
    }

    /// Never fails: each sub-step logs its own failure.
    pub async fn deliver(&self, digest: &Digest, recommendations: &[Recommendation]) -> DeliveryReport {
        let document = render_document(digest, recommendations);
        let document_url = match self
            .documents
            .create_document(&document, self.folder_id.as_deref())
            .await
        {
            Ok(created) => {
                info!(digest_id = %digest.id, url = created.url.as_str(), "Digest document created");
                Some(created.url)
            }
            Err(e) => {
                warn!(digest_id = %digest.id, error = %e, "Digest document export failed");
                None
            }
        };

        let message_queued = match &self.channel_id {
            Some(channel) => {
                let text = summary_message(digest, recommendations, document_url.as_deref());
                self.relay.enqueue(channel, text)
            }
            None => false,
        };

        DeliveryReport {
            document_url,
            message_queued,
        }
    }

    /// Wait for queued summaries to be attempted.
    pub async fn flush(&self) {
        self.relay.flush().await;
    }
}
