use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::{
    CreatedDocument, DocumentExporter, MessageRelay, NewTask, RenderedDocument, SopAssociation,
    TaskStore, TemplateStore,
};

/// Bail with the status and body of a non-success response.
async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    warn!(status = %status, body = %body, "{what} returned non-success");
    anyhow::bail!("{what} returned {status}")
}

fn base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

// ---------------------------------------------------------------------------
// HttpTaskStore
// ---------------------------------------------------------------------------

pub struct HttpTaskStore {
    base_url: String,
    http: reqwest::Client,
}

impl HttpTaskStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base(base_url),
            http: super::http_client(timeout)?,
        })
    }
}

#[derive(Deserialize)]
struct CreatedTask {
    id: String,
}

#[async_trait]
impl TaskStore for HttpTaskStore {
    async fn create_task(&self, task: &NewTask) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/tasks", self.base_url))
            .json(task)
            .send()
            .await
            .context("Task store request failed")?;
        let created: CreatedTask = check(resp, "Task store")
            .await?
            .json()
            .await
            .context("Task store returned an unexpected body")?;
        Ok(created.id)
    }
}

// ---------------------------------------------------------------------------
// HttpTemplateStore
// ---------------------------------------------------------------------------

pub struct HttpTemplateStore {
    base_url: String,
    http: reqwest::Client,
}

impl HttpTemplateStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base(base_url),
            http: super::http_client(timeout)?,
        })
    }
}

#[async_trait]
impl TemplateStore for HttpTemplateStore {
    async fn sop_for_category(&self, category: &str) -> Result<Option<SopAssociation>> {
        let resp = self
            .http
            .get(format!("{}/sop-associations", self.base_url))
            .query(&[("category", category)])
            .send()
            .await
            .context("Template store request failed")?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let found: Vec<SopAssociation> = check(resp, "Template store")
            .await?
            .json()
            .await
            .context("Template store returned an unexpected body")?;
        Ok(found.into_iter().next())
    }
}

// ---------------------------------------------------------------------------
// HttpDocumentExporter
// ---------------------------------------------------------------------------

pub struct HttpDocumentExporter {
    base_url: String,
    http: reqwest::Client,
}

impl HttpDocumentExporter {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: base(base_url),
            http: super::http_client(timeout)?,
        })
    }
}

#[async_trait]
impl DocumentExporter for HttpDocumentExporter {
    async fn create_document(
        &self,
        document: &RenderedDocument,
        folder_id: Option<&str>,
    ) -> Result<CreatedDocument> {
        let payload = json!({
            "title": document.title,
            "sections": document.sections,
            "folderId": folder_id,
        });
        let resp = self
            .http
            .post(format!("{}/documents", self.base_url))
            .json(&payload)
            .send()
            .await
            .context("Document export request failed")?;
        check(resp, "Document export")
            .await?
            .json()
            .await
            .context("Document export returned an unexpected body")
    }

    async fn append_to_document(&self, document_id: &str, text: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/documents/{}/append", self.base_url, document_id))
            .json(&json!({ "text": text }))
            .send()
            .await
            .context("Document append request failed")?;
        check(resp, "Document append").await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WebhookRelay
// ---------------------------------------------------------------------------

/// Messaging relay reached through an incoming webhook.
pub struct WebhookRelay {
    webhook_url: String,
    http: reqwest::Client,
}

impl WebhookRelay {
    pub fn new(webhook_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            webhook_url: webhook_url.to_string(),
            http: super::http_client(timeout)?,
        })
    }
}

#[async_trait]
impl MessageRelay for WebhookRelay {
    async fn post_message(&self, channel_id: &str, text: &str) -> Result<()> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&json!({ "channel": channel_id, "text": text }))
            .send()
            .await
            .context("Relay request failed")?;
        check(resp, "Relay webhook").await?;
        Ok(())
    }
}
