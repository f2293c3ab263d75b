// External collaborators the pipeline calls but does not own: the task
// store, the template store, the document export service and the messaging
// relay. Each sits behind a trait; `http` holds the production clients.

mod http;

pub use http::{HttpDocumentExporter, HttpTaskStore, HttpTemplateStore, WebhookRelay};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use digest_common::{Config, DigestError, SopDraft, SopDraftType, TaskDraft, TaskPriority};

/// Upper bound on an approved task's due offset.
pub const MAX_DUE_IN_DAYS: i32 = 3650;

// ---------------------------------------------------------------------------
// Task store
// ---------------------------------------------------------------------------

/// Operator input when approving a task draft. Unset fields fall back to the
/// draft's suggestions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveTask {
    pub project_id: Option<String>,
    pub title: Option<String>,
    pub priority: Option<TaskPriority>,
    pub due_in_days: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub due_date: NaiveDate,
}

impl NewTask {
    /// Merge a draft with the operator's overrides.
    pub fn from_draft(
        draft: &TaskDraft,
        approve: &ApproveTask,
        today: NaiveDate,
    ) -> digest_common::Result<Self> {
        let project_id = approve
            .project_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| DigestError::Validation("projectId is required".into()))?;

        let title = approve
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&draft.title);

        let due_in_days = approve.due_in_days.unwrap_or(draft.suggested_due_in_days);
        if !(0..=MAX_DUE_IN_DAYS).contains(&due_in_days) {
            return Err(DigestError::Validation(format!(
                "dueInDays must be between 0 and {MAX_DUE_IN_DAYS}, got {due_in_days}"
            )));
        }
        let due_date = today
            .checked_add_signed(chrono::Duration::days(i64::from(due_in_days)))
            .ok_or_else(|| DigestError::Validation("dueInDays is out of range".into()))?;

        Ok(Self {
            project_id: project_id.to_string(),
            title: title.to_string(),
            description: draft.description.clone(),
            priority: approve.priority.unwrap_or(draft.suggested_priority),
            due_date,
        })
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a work item; returns the external task id.
    async fn create_task(&self, task: &NewTask) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Template store
// ---------------------------------------------------------------------------

/// An existing SOP document linked to a category through a template set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SopAssociation {
    pub template_set_id: String,
    pub sop_doc_id: String,
    pub sop_title: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn sop_for_category(&self, category: &str) -> Result<Option<SopAssociation>>;
}

// ---------------------------------------------------------------------------
// Document export
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSection {
    pub heading: String,
    pub body: String,
}

/// Structured content handed to the export service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedDocument {
    pub title: String,
    pub sections: Vec<DocumentSection>,
}

impl RenderedDocument {
    pub fn single(title: impl Into<String>, body: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            sections: vec![DocumentSection {
                heading: title.clone(),
                body: body.into(),
            }],
            title,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedDocument {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait DocumentExporter: Send + Sync {
    async fn create_document(
        &self,
        document: &RenderedDocument,
        folder_id: Option<&str>,
    ) -> Result<CreatedDocument>;

    async fn append_to_document(&self, document_id: &str, text: &str) -> Result<()>;
}

/// Push a SOP draft's proposed content to the document service: `new` drafts
/// create a document (its id is returned), `edit` drafts append to theirs.
pub async fn publish_sop_draft(
    draft: &SopDraft,
    documents: &dyn DocumentExporter,
    folder_id: Option<&str>,
) -> digest_common::Result<Option<String>> {
    match draft.draft_type {
        SopDraftType::New => {
            let title = draft.sop_title.as_deref().unwrap_or("Untitled procedure");
            let document = RenderedDocument::single(title, draft.after_content.as_str());
            let created = documents
                .create_document(&document, folder_id)
                .await
                .map_err(|e| {
                    warn!(draft_id = %draft.id, error = %e, "SOP document creation failed");
                    DigestError::Delivery(format!("creating SOP document: {e:#}"))
                })?;
            Ok(Some(created.id))
        }
        SopDraftType::Edit => {
            let Some(doc_id) = draft.sop_doc_id.as_deref() else {
                return Err(DigestError::Validation(format!(
                    "sop draft {} has no document to edit",
                    draft.id
                )));
            };
            documents
                .append_to_document(doc_id, &draft.after_content)
                .await
                .map_err(|e| {
                    warn!(draft_id = %draft.id, sop_doc_id = doc_id, error = %e, "SOP document append failed");
                    DigestError::Delivery(format!("appending to SOP document {doc_id}: {e:#}"))
                })?;
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Messaging relay
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MessageRelay: Send + Sync {
    async fn post_message(&self, channel_id: &str, text: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Unconfigured
// ---------------------------------------------------------------------------

/// Stand-in for a collaborator whose endpoint is not configured. Writes fail
/// with a clear message; the template store simply knows no associations.
pub struct Unconfigured(pub &'static str);

#[async_trait]
impl TaskStore for Unconfigured {
    async fn create_task(&self, _task: &NewTask) -> Result<String> {
        anyhow::bail!("{} is not configured", self.0)
    }
}

#[async_trait]
impl TemplateStore for Unconfigured {
    async fn sop_for_category(&self, _category: &str) -> Result<Option<SopAssociation>> {
        Ok(None)
    }
}

#[async_trait]
impl DocumentExporter for Unconfigured {
    async fn create_document(
        &self,
        _document: &RenderedDocument,
        _folder_id: Option<&str>,
    ) -> Result<CreatedDocument> {
        anyhow::bail!("{} is not configured", self.0)
    }

    async fn append_to_document(&self, _document_id: &str, _text: &str) -> Result<()> {
        anyhow::bail!("{} is not configured", self.0)
    }
}

#[async_trait]
impl MessageRelay for Unconfigured {
    async fn post_message(&self, channel_id: &str, _text: &str) -> Result<()> {
        debug!(channel_id, "{} not configured, message discarded", self.0);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// The full set of collaborator handles, shared by the orchestrator and the
/// review service.
#[derive(Clone)]
pub struct Collaborators {
    pub tasks: Arc<dyn TaskStore>,
    pub templates: Arc<dyn TemplateStore>,
    pub documents: Arc<dyn DocumentExporter>,
    pub relay: Arc<dyn MessageRelay>,
}

impl Collaborators {
    /// HTTP clients for every configured endpoint, `Unconfigured` otherwise.
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = config.settings.delivery_timeout;
        Ok(Self {
            tasks: match &config.tasks_api_url {
                Some(url) => Arc::new(HttpTaskStore::new(url, timeout)?),
                None => Arc::new(Unconfigured("task store")),
            },
            templates: match &config.templates_api_url {
                Some(url) => Arc::new(HttpTemplateStore::new(url, timeout)?),
                None => Arc::new(Unconfigured("template store")),
            },
            documents: match &config.docs_export_url {
                Some(url) => Arc::new(HttpDocumentExporter::new(url, timeout)?),
                None => Arc::new(Unconfigured("document export")),
            },
            relay: match &config.relay_webhook_url {
                Some(url) => Arc::new(WebhookRelay::new(url, timeout)?),
                None => Arc::new(Unconfigured("relay")),
            },
        })
    }
}

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    use anyhow::Context;
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build collaborator HTTP client")
}
