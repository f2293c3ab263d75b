// Persistence boundary for the pipeline. `PgDigestStore` is the production
// implementation; `testing::MemoryStore` mirrors its semantics in memory.

mod postgres;

pub use postgres::PgDigestStore;

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use digest_common::{
    Article, Digest, DigestError, DigestStatus, ExtractedRecommendation, FetchResult, JobRun,
    JobStatus, NewSopDraft, NewTaskDraft, PageRequest, Paged, Recommendation, Result, SopDraft,
    SopDraftEdit, Source, TaskDraft,
};

use crate::collaborators::{ApproveTask, DocumentExporter, TaskStore};

/// Partial update of a digest's counters and document link. `None` leaves
/// the column unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DigestUpdate {
    pub sources_fetched: Option<i32>,
    pub recommendations_generated: Option<i32>,
    pub task_drafts_created: Option<i32>,
    pub sop_drafts_created: Option<i32>,
    pub google_doc_url: Option<String>,
}

#[async_trait]
pub trait DigestStore: Send + Sync {
    // --- Sources ---

    async fn list_sources(&self) -> Result<Vec<Source>>;
    async fn active_sources(&self) -> Result<Vec<Source>>;
    async fn get_source(&self, id: Uuid) -> Result<Source>;
    async fn insert_source(&self, source: &Source) -> Result<Source>;
    async fn update_source(&self, source: &Source) -> Result<Source>;
    async fn delete_source(&self, id: Uuid) -> Result<()>;

    // --- Digests ---

    /// Insert a `pending` digest for `period`.
    async fn create_digest(&self, period: &str) -> Result<Digest>;
    async fn get_digest(&self, id: Uuid) -> Result<Digest>;
    /// Most recently created digest for a period, if any.
    async fn latest_digest_for_period(&self, period: &str) -> Result<Option<Digest>>;
    /// Digests not yet `completed` or `failed`, oldest first.
    async fn unfinished_digests(&self) -> Result<Vec<Digest>>;
    /// Newest first.
    async fn list_digests(&self, page: PageRequest) -> Result<Paged<Digest>>;
    /// Move a digest to `to`, rejecting moves its current status does not
    /// allow. Entering `failed` records `error`; entering `pending` clears it;
    /// entering `completed` stamps `completed_at`.
    async fn transition(&self, id: Uuid, to: DigestStatus, error: Option<String>) -> Result<Digest>;
    async fn update_digest(&self, id: Uuid, update: DigestUpdate) -> Result<Digest>;

    // --- Fetch results ---

    async fn clear_fetch_results(&self, digest_id: Uuid) -> Result<u64>;
    async fn insert_fetch_results(
        &self,
        digest_id: Uuid,
        source: &Source,
        articles: &[Article],
    ) -> Result<usize>;
    async fn fetch_results(&self, digest_id: Uuid) -> Result<Vec<FetchResult>>;

    // --- Recommendations ---

    /// Delete recommendations, their citations and every draft of the digest.
    async fn clear_recommendations(&self, digest_id: Uuid) -> Result<u64>;
    async fn insert_recommendations(
        &self,
        digest_id: Uuid,
        recommendations: &[ExtractedRecommendation],
    ) -> Result<Vec<Recommendation>>;
    /// With citations, ordered by creation.
    async fn recommendations(&self, digest_id: Uuid) -> Result<Vec<Recommendation>>;

    // --- Drafts ---

    /// Ids of recommendations in the digest that already own a task or SOP draft.
    async fn drafted_recommendations(&self, digest_id: Uuid) -> Result<HashSet<Uuid>>;
    /// Insert task and SOP drafts in one transaction; either all rows land or
    /// none do.
    async fn insert_drafts(
        &self,
        digest_id: Uuid,
        tasks: &[NewTaskDraft],
        sops: &[NewSopDraft],
    ) -> Result<(Vec<TaskDraft>, Vec<SopDraft>)>;

    async fn insert_task_drafts(
        &self,
        digest_id: Uuid,
        drafts: &[NewTaskDraft],
    ) -> Result<Vec<TaskDraft>> {
        Ok(self.insert_drafts(digest_id, drafts, &[]).await?.0)
    }

    async fn insert_sop_drafts(
        &self,
        digest_id: Uuid,
        drafts: &[NewSopDraft],
    ) -> Result<Vec<SopDraft>> {
        Ok(self.insert_drafts(digest_id, &[], drafts).await?.1)
    }
    async fn task_drafts(&self, digest_id: Uuid) -> Result<Vec<TaskDraft>>;
    async fn sop_drafts(&self, digest_id: Uuid) -> Result<Vec<SopDraft>>;
    async fn get_task_draft(&self, id: Uuid) -> Result<TaskDraft>;
    async fn get_sop_draft(&self, id: Uuid) -> Result<SopDraft>;

    /// Lock the draft, require `pending`, create the external task and mark
    /// the draft `approved` with its task id, all-or-nothing.
    async fn approve_task_draft(
        &self,
        id: Uuid,
        approve: &ApproveTask,
        tasks: &dyn TaskStore,
    ) -> Result<TaskDraft>;
    async fn reject_task_draft(&self, id: Uuid) -> Result<TaskDraft>;

    /// Lock the draft, require `pending`, push its content to the document
    /// service and mark it `applied`, all-or-nothing. A `new` draft records
    /// the created document's id.
    async fn apply_sop_draft(
        &self,
        id: Uuid,
        documents: &dyn DocumentExporter,
        folder_id: Option<&str>,
    ) -> Result<SopDraft>;
    async fn dismiss_sop_draft(&self, id: Uuid) -> Result<SopDraft>;
    async fn edit_sop_draft(&self, id: Uuid, edit: &SopDraftEdit) -> Result<SopDraft>;

    // --- Job history ---

    async fn start_job(&self, job_name: &str) -> Result<JobRun>;
    async fn finish_job(
        &self,
        id: Uuid,
        status: JobStatus,
        details: serde_json::Value,
    ) -> Result<JobRun>;
    /// Newest first.
    async fn recent_jobs(&self, job_name: &str, limit: u32) -> Result<Vec<JobRun>>;
}

/// Error for a move the state machine forbids.
pub(crate) fn invalid_transition(id: Uuid, from: DigestStatus, to: DigestStatus) -> DigestError {
    DigestError::InvalidState(format!("digest {id} cannot move from {from} to {to}"))
}

pub(crate) fn not_pending(entity: &str, id: Uuid, status: impl std::fmt::Display) -> DigestError {
    DigestError::InvalidState(format!("{entity} {id} is already {status}"))
}
