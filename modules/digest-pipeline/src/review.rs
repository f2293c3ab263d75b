//! Operator review of generated drafts.
//!
//! Every action is pending-only. Rejections surface as `InvalidState` with no
//! partial mutation; collaborator failures surface as `Delivery` and leave the
//! draft pending.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use digest_common::{DigestError, Result, SopDraft, SopDraftEdit, TaskDraft, TaskDraftStatus};

use crate::collaborators::{ApproveTask, DocumentExporter, TaskStore};
use crate::store::DigestStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<BulkFailure>,
}

pub struct ReviewService {
    store: Arc<dyn DigestStore>,
    tasks: Arc<dyn TaskStore>,
    documents: Arc<dyn DocumentExporter>,
    folder_id: Option<String>,
}

impl ReviewService {
    pub fn new(
        store: Arc<dyn DigestStore>,
        tasks: Arc<dyn TaskStore>,
        documents: Arc<dyn DocumentExporter>,
        folder_id: Option<String>,
    ) -> Self {
        Self {
            store,
            tasks,
            documents,
            folder_id,
        }
    }

    // -----------------------------------------------------------------------
    // Task drafts
    // -----------------------------------------------------------------------

    pub async fn task_drafts(&self, digest_id: Uuid) -> Result<Vec<TaskDraft>> {
        self.store.get_digest(digest_id).await?;
        self.store.task_drafts(digest_id).await
    }

    pub async fn approve_task_draft(&self, id: Uuid, approve: &ApproveTask) -> Result<TaskDraft> {
        let draft = self
            .store
            .approve_task_draft(id, approve, self.tasks.as_ref())
            .await?;
        info!(
            draft_id = %id,
            task_id = draft.task_id.as_deref().unwrap_or_default(),
            "Task draft approved"
        );
        Ok(draft)
    }

    pub async fn reject_task_draft(&self, id: Uuid) -> Result<TaskDraft> {
        let draft = self.store.reject_task_draft(id).await?;
        info!(draft_id = %id, "Task draft rejected");
        Ok(draft)
    }

    /// Approve `ids`, or every pending draft of the digest when `None`. Each
    /// draft succeeds or fails on its own.
    pub async fn bulk_approve(
        &self,
        digest_id: Uuid,
        ids: Option<Vec<Uuid>>,
        approve: &ApproveTask,
    ) -> Result<BulkOutcome> {
        let ids = self.bulk_targets(digest_id, ids).await?;
        let mut outcome = BulkOutcome::default();
        for id in ids {
            let result = match self.belongs_to(digest_id, id).await {
                Ok(()) => self.approve_task_draft(id, approve).await.map(|_| ()),
                Err(e) => Err(e),
            };
            record(&mut outcome, id, result);
        }
        info!(
            digest_id = %digest_id,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "Bulk approve finished"
        );
        Ok(outcome)
    }

    pub async fn bulk_reject(&self, digest_id: Uuid, ids: Option<Vec<Uuid>>) -> Result<BulkOutcome> {
        let ids = self.bulk_targets(digest_id, ids).await?;
        let mut outcome = BulkOutcome::default();
        for id in ids {
            let result = match self.belongs_to(digest_id, id).await {
                Ok(()) => self.reject_task_draft(id).await.map(|_| ()),
                Err(e) => Err(e),
            };
            record(&mut outcome, id, result);
        }
        info!(
            digest_id = %digest_id,
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "Bulk reject finished"
        );
        Ok(outcome)
    }

    async fn bulk_targets(&self, digest_id: Uuid, ids: Option<Vec<Uuid>>) -> Result<Vec<Uuid>> {
        self.store.get_digest(digest_id).await?;
        match ids {
            Some(ids) => Ok(ids),
            None => Ok(self
                .store
                .task_drafts(digest_id)
                .await?
                .into_iter()
                .filter(|d| d.status == TaskDraftStatus::Pending)
                .map(|d| d.id)
                .collect()),
        }
    }

    async fn belongs_to(&self, digest_id: Uuid, id: Uuid) -> Result<()> {
        let draft = self.store.get_task_draft(id).await?;
        if draft.digest_id != digest_id {
            return Err(DigestError::Validation(format!(
                "task draft {id} does not belong to digest {digest_id}"
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // SOP drafts
    // -----------------------------------------------------------------------

    pub async fn sop_drafts(&self, digest_id: Uuid) -> Result<Vec<SopDraft>> {
        self.store.get_digest(digest_id).await?;
        self.store.sop_drafts(digest_id).await
    }

    /// Push the proposed content to the document service and mark the draft
    /// applied. A `new` draft records the created document's id.
    pub async fn apply_sop_draft(&self, id: Uuid) -> Result<SopDraft> {
        let applied = self
            .store
            .apply_sop_draft(id, self.documents.as_ref(), self.folder_id.as_deref())
            .await?;
        info!(
            draft_id = %id,
            draft_type = %applied.draft_type,
            sop_doc_id = applied.sop_doc_id.as_deref().unwrap_or_default(),
            "SOP draft applied"
        );
        Ok(applied)
    }

    pub async fn dismiss_sop_draft(&self, id: Uuid) -> Result<SopDraft> {
        let draft = self.store.dismiss_sop_draft(id).await?;
        info!(draft_id = %id, "SOP draft dismissed");
        Ok(draft)
    }

    pub async fn edit_sop_draft(&self, id: Uuid, edit: &SopDraftEdit) -> Result<SopDraft> {
        if edit.after_content.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(DigestError::Validation(
                "afterContent cannot be empty".to_string(),
            ));
        }
        self.store.edit_sop_draft(id, edit).await
    }
}

fn record(outcome: &mut BulkOutcome, id: Uuid, result: Result<()>) {
    match result {
        Ok(()) => outcome.succeeded.push(id),
        Err(e) => {
            warn!(draft_id = %id, error = %e, "Bulk action skipped draft");
            outcome.failed.push(BulkFailure {
                id,
                reason: e.to_string(),
            });
        }
    }
}
