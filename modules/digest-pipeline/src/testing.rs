// Test doubles for the digest pipeline.
//
// One double per trait boundary:
// - MemoryStore (DigestStore): in-memory tables with the Postgres store's
//   transition, cascade and pending-only rules
// - MockFetcher (SourceFetcher): URL → articles, failure, or delay
// - MockModel (CompletionModel): scripted responses, records requests
// - MockTaskStore / MockTemplateStore / MockDocuments / MockRelay
//
// Plus fixture builders for sources, articles and recommendations.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use ai_client::{Completion, CompletionModel, CompletionRequest, TokenUsage};
use digest_common::{
    Article, Citation, Confidence, Digest, DigestError, DigestSettings, DigestStatus,
    ExtractedRecommendation, FetchMethod, FetchResult, Impact, JobRun, JobStatus, NewSopDraft,
    NewTaskDraft, PageRequest, Paged, Recommendation, Result, SopDraft, SopDraftEdit,
    SopDraftStatus, Source, SourceTier, TaskDraft, TaskDraftStatus,
};
use digest_sources::SourceFetcher;

use crate::collaborators::{
    publish_sop_draft, today, ApproveTask, CreatedDocument, DocumentExporter, MessageRelay, NewTask,
    RenderedDocument, SopAssociation, TaskStore, TemplateStore,
};
use crate::store::{invalid_transition, not_pending, DigestStore, DigestUpdate};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    sources: Vec<Source>,
    digests: Vec<Digest>,
    fetch_results: Vec<FetchResult>,
    recommendations: Vec<Recommendation>,
    task_drafts: Vec<TaskDraft>,
    sop_drafts: Vec<SopDraft>,
    jobs: Vec<JobRun>,
}

impl Tables {
    fn digest_mut(&mut self, id: Uuid) -> Result<&mut Digest> {
        self.digests
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| DigestError::not_found("digest", id))
    }

    fn task_draft_mut(&mut self, id: Uuid) -> Result<&mut TaskDraft> {
        self.task_drafts
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| DigestError::not_found("task draft", id))
    }

    fn pending_sop_draft_mut(&mut self, id: Uuid) -> Result<&mut SopDraft> {
        let draft = self
            .sop_drafts
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| DigestError::not_found("sop draft", id))?;
        if draft.status != SopDraftStatus::Pending {
            return Err(not_pending("sop draft", id, draft.status));
        }
        Ok(draft)
    }
}

/// In-memory `DigestStore`. The table lock is a tokio mutex so approval can
/// hold it across the task store call, like the Postgres row lock.
#[derive(Default)]
pub struct MemoryStore {
    tables: tokio::sync::Mutex<Tables>,
    /// `Some(n)`: `insert_drafts` succeeds `n` more times, then fails once.
    draft_insert_failure: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(sources: Vec<Source>) -> Self {
        Self {
            tables: tokio::sync::Mutex::new(Tables {
                sources,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Fail the draft insert that follows `after` successful ones, once.
    pub fn fail_draft_insert(self, after: usize) -> Self {
        *self.draft_insert_failure.lock().unwrap() = Some(after);
        self
    }

    fn take_draft_insert_failure(&self) -> bool {
        let mut pending = self.draft_insert_failure.lock().unwrap();
        match *pending {
            Some(0) => {
                *pending = None;
                true
            }
            Some(n) => {
                *pending = Some(n - 1);
                false
            }
            None => false,
        }
    }
}

#[async_trait]
impl DigestStore for MemoryStore {
    async fn list_sources(&self) -> Result<Vec<Source>> {
        let mut sources = self.tables.lock().await.sources.clone();
        sources.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.name.cmp(&b.name)));
        Ok(sources)
    }

    async fn active_sources(&self) -> Result<Vec<Source>> {
        Ok(self
            .list_sources()
            .await?
            .into_iter()
            .filter(|s| s.active)
            .collect())
    }

    async fn get_source(&self, id: Uuid) -> Result<Source> {
        self.tables
            .lock()
            .await
            .sources
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| DigestError::not_found("source", id))
    }

    async fn insert_source(&self, source: &Source) -> Result<Source> {
        self.tables.lock().await.sources.push(source.clone());
        Ok(source.clone())
    }

    async fn update_source(&self, source: &Source) -> Result<Source> {
        let mut tables = self.tables.lock().await;
        let existing = tables
            .sources
            .iter_mut()
            .find(|s| s.id == source.id)
            .ok_or_else(|| DigestError::not_found("source", source.id))?;
        *existing = Source {
            created_at: existing.created_at,
            updated_at: Utc::now(),
            ..source.clone()
        };
        Ok(existing.clone())
    }

    async fn delete_source(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let before = tables.sources.len();
        tables.sources.retain(|s| s.id != id);
        if tables.sources.len() == before {
            return Err(DigestError::not_found("source", id));
        }
        Ok(())
    }

    async fn create_digest(&self, period: &str) -> Result<Digest> {
        let digest = Digest {
            id: Uuid::new_v4(),
            period: period.to_string(),
            status: DigestStatus::Pending,
            sources_fetched: 0,
            recommendations_generated: 0,
            task_drafts_created: 0,
            sop_drafts_created: 0,
            error_message: None,
            google_doc_url: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.tables.lock().await.digests.push(digest.clone());
        Ok(digest)
    }

    async fn get_digest(&self, id: Uuid) -> Result<Digest> {
        self.tables
            .lock()
            .await
            .digest_mut(id)
            .map(|d| d.clone())
    }

    async fn latest_digest_for_period(&self, period: &str) -> Result<Option<Digest>> {
        Ok(self
            .tables
            .lock()
            .await
            .digests
            .iter()
            .rev()
            .find(|d| d.period == period)
            .cloned())
    }

    async fn unfinished_digests(&self) -> Result<Vec<Digest>> {
        Ok(self
            .tables
            .lock()
            .await
            .digests
            .iter()
            .filter(|d| !d.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_digests(&self, page: PageRequest) -> Result<Paged<Digest>> {
        let tables = self.tables.lock().await;
        let items = tables
            .digests
            .iter()
            .rev()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.per_page as usize)
            .cloned()
            .collect();
        Ok(Paged {
            items,
            total: tables.digests.len() as u64,
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn transition(&self, id: Uuid, to: DigestStatus, error: Option<String>) -> Result<Digest> {
        let mut tables = self.tables.lock().await;
        let digest = tables.digest_mut(id)?;
        if !digest.status.can_transition_to(to) {
            return Err(invalid_transition(id, digest.status, to));
        }
        digest.status = to;
        match to {
            DigestStatus::Failed => digest.error_message = error,
            DigestStatus::Pending => {
                digest.error_message = None;
                digest.completed_at = None;
            }
            DigestStatus::Completed => digest.completed_at = Some(Utc::now()),
            _ => {}
        }
        Ok(digest.clone())
    }

    async fn update_digest(&self, id: Uuid, update: DigestUpdate) -> Result<Digest> {
        let mut tables = self.tables.lock().await;
        let digest = tables.digest_mut(id)?;
        if let Some(n) = update.sources_fetched {
            digest.sources_fetched = n;
        }
        if let Some(n) = update.recommendations_generated {
            digest.recommendations_generated = n;
        }
        if let Some(n) = update.task_drafts_created {
            digest.task_drafts_created = n;
        }
        if let Some(n) = update.sop_drafts_created {
            digest.sop_drafts_created = n;
        }
        if let Some(url) = update.google_doc_url {
            digest.google_doc_url = Some(url);
        }
        Ok(digest.clone())
    }

    async fn clear_fetch_results(&self, digest_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.fetch_results.len();
        tables.fetch_results.retain(|r| r.digest_id != digest_id);
        Ok((before - tables.fetch_results.len()) as u64)
    }

    async fn insert_fetch_results(
        &self,
        digest_id: Uuid,
        source: &Source,
        articles: &[Article],
    ) -> Result<usize> {
        let mut tables = self.tables.lock().await;
        for article in articles {
            tables.fetch_results.push(FetchResult {
                id: Uuid::new_v4(),
                digest_id,
                source_id: source.id,
                source_name: source.name.clone(),
                source_tier: source.tier,
                url: article.url.clone(),
                title: article.title.clone(),
                content: article.content.clone(),
                published_at: article.published_at,
                fetched_at: Utc::now(),
            });
        }
        Ok(articles.len())
    }

    async fn fetch_results(&self, digest_id: Uuid) -> Result<Vec<FetchResult>> {
        Ok(self
            .tables
            .lock()
            .await
            .fetch_results
            .iter()
            .filter(|r| r.digest_id == digest_id)
            .cloned()
            .collect())
    }

    async fn clear_recommendations(&self, digest_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.recommendations.len();
        tables.recommendations.retain(|r| r.digest_id != digest_id);
        tables.task_drafts.retain(|d| d.digest_id != digest_id);
        tables.sop_drafts.retain(|d| d.digest_id != digest_id);
        Ok((before - tables.recommendations.len()) as u64)
    }

    async fn insert_recommendations(
        &self,
        digest_id: Uuid,
        recommendations: &[ExtractedRecommendation],
    ) -> Result<Vec<Recommendation>> {
        let stored: Vec<Recommendation> = recommendations
            .iter()
            .map(|rec| {
                let id = Uuid::new_v4();
                Recommendation {
                    id,
                    digest_id,
                    category: rec.category.clone(),
                    title: rec.title.clone(),
                    summary: rec.summary.clone(),
                    details: rec.details.clone(),
                    impact: rec.impact,
                    confidence: rec.confidence,
                    source_count: rec.source_count(),
                    citations: rec
                        .citations
                        .iter()
                        .map(|c| Citation {
                            id: Uuid::new_v4(),
                            recommendation_id: id,
                            source_name: c.source_name.clone(),
                            source_url: c.source_url.clone(),
                            excerpt: c.excerpt.clone(),
                        })
                        .collect(),
                    created_at: Utc::now(),
                }
            })
            .collect();
        self.tables
            .lock()
            .await
            .recommendations
            .extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn recommendations(&self, digest_id: Uuid) -> Result<Vec<Recommendation>> {
        Ok(self
            .tables
            .lock()
            .await
            .recommendations
            .iter()
            .filter(|r| r.digest_id == digest_id)
            .cloned()
            .collect())
    }

    async fn drafted_recommendations(&self, digest_id: Uuid) -> Result<HashSet<Uuid>> {
        let tables = self.tables.lock().await;
        let tasks = tables
            .task_drafts
            .iter()
            .filter(|d| d.digest_id == digest_id)
            .map(|d| d.recommendation_id);
        let sops = tables
            .sop_drafts
            .iter()
            .filter(|d| d.digest_id == digest_id)
            .map(|d| d.recommendation_id);
        Ok(tasks.chain(sops).collect())
    }

    async fn insert_drafts(
        &self,
        digest_id: Uuid,
        tasks: &[NewTaskDraft],
        sops: &[NewSopDraft],
    ) -> Result<(Vec<TaskDraft>, Vec<SopDraft>)> {
        let mut tables = self.tables.lock().await;
        if self.take_draft_insert_failure() {
            return Err(DigestError::Database("draft insert failed".into()));
        }

        let mut seen: HashSet<Uuid> = tables
            .sop_drafts
            .iter()
            .filter(|s| s.digest_id == digest_id)
            .map(|s| s.recommendation_id)
            .collect();
        for d in sops {
            if !seen.insert(d.recommendation_id) {
                return Err(DigestError::Database(format!(
                    "duplicate sop draft for recommendation {}",
                    d.recommendation_id
                )));
            }
        }

        let stored_tasks: Vec<TaskDraft> = tasks
            .iter()
            .map(|d| TaskDraft {
                id: Uuid::new_v4(),
                digest_id,
                recommendation_id: d.recommendation_id,
                title: d.title.clone(),
                description: d.description.clone(),
                suggested_priority: d.suggested_priority,
                suggested_due_in_days: d.suggested_due_in_days,
                status: TaskDraftStatus::Pending,
                task_id: None,
                reviewed_at: None,
                created_at: Utc::now(),
            })
            .collect();
        let stored_sops: Vec<SopDraft> = sops
            .iter()
            .map(|d| SopDraft {
                id: Uuid::new_v4(),
                digest_id,
                recommendation_id: d.recommendation_id,
                draft_type: d.draft_type,
                sop_title: d.sop_title.clone(),
                sop_doc_id: d.sop_doc_id.clone(),
                template_set_id: d.template_set_id.clone(),
                before_content: d.before_content.clone(),
                after_content: d.after_content.clone(),
                description: d.description.clone(),
                status: SopDraftStatus::Pending,
                applied_at: None,
                created_at: Utc::now(),
            })
            .collect();

        tables.task_drafts.extend(stored_tasks.iter().cloned());
        tables.sop_drafts.extend(stored_sops.iter().cloned());
        Ok((stored_tasks, stored_sops))
    }

    async fn task_drafts(&self, digest_id: Uuid) -> Result<Vec<TaskDraft>> {
        Ok(self
            .tables
            .lock()
            .await
            .task_drafts
            .iter()
            .filter(|d| d.digest_id == digest_id)
            .cloned()
            .collect())
    }

    async fn sop_drafts(&self, digest_id: Uuid) -> Result<Vec<SopDraft>> {
        Ok(self
            .tables
            .lock()
            .await
            .sop_drafts
            .iter()
            .filter(|d| d.digest_id == digest_id)
            .cloned()
            .collect())
    }

    async fn get_task_draft(&self, id: Uuid) -> Result<TaskDraft> {
        self.tables
            .lock()
            .await
            .task_draft_mut(id)
            .map(|d| d.clone())
    }

    async fn get_sop_draft(&self, id: Uuid) -> Result<SopDraft> {
        self.tables
            .lock()
            .await
            .sop_drafts
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| DigestError::not_found("sop draft", id))
    }

    async fn approve_task_draft(
        &self,
        id: Uuid,
        approve: &ApproveTask,
        tasks: &dyn TaskStore,
    ) -> Result<TaskDraft> {
        let mut tables = self.tables.lock().await;
        let draft = tables.task_draft_mut(id)?;
        if draft.status != TaskDraftStatus::Pending {
            return Err(not_pending("task draft", id, draft.status));
        }

        let task = NewTask::from_draft(draft, approve, today())?;
        let task_id = tasks
            .create_task(&task)
            .await
            .map_err(|e| DigestError::Delivery(format!("task creation failed: {e:#}")))?;

        draft.status = TaskDraftStatus::Approved;
        draft.task_id = Some(task_id);
        draft.reviewed_at = Some(Utc::now());
        Ok(draft.clone())
    }

    async fn reject_task_draft(&self, id: Uuid) -> Result<TaskDraft> {
        let mut tables = self.tables.lock().await;
        let draft = tables.task_draft_mut(id)?;
        if draft.status != TaskDraftStatus::Pending {
            return Err(not_pending("task draft", id, draft.status));
        }
        draft.status = TaskDraftStatus::Rejected;
        draft.reviewed_at = Some(Utc::now());
        Ok(draft.clone())
    }

    async fn apply_sop_draft(
        &self,
        id: Uuid,
        documents: &dyn DocumentExporter,
        folder_id: Option<&str>,
    ) -> Result<SopDraft> {
        let mut tables = self.tables.lock().await;
        let draft = tables.pending_sop_draft_mut(id)?;
        let sop_doc_id = publish_sop_draft(draft, documents, folder_id).await?;
        draft.status = SopDraftStatus::Applied;
        draft.applied_at = Some(Utc::now());
        if sop_doc_id.is_some() {
            draft.sop_doc_id = sop_doc_id;
        }
        Ok(draft.clone())
    }

    async fn dismiss_sop_draft(&self, id: Uuid) -> Result<SopDraft> {
        let mut tables = self.tables.lock().await;
        let draft = tables.pending_sop_draft_mut(id)?;
        draft.status = SopDraftStatus::Dismissed;
        Ok(draft.clone())
    }

    async fn edit_sop_draft(&self, id: Uuid, edit: &SopDraftEdit) -> Result<SopDraft> {
        let mut tables = self.tables.lock().await;
        let draft = tables.pending_sop_draft_mut(id)?;
        if let Some(title) = &edit.sop_title {
            draft.sop_title = Some(title.clone());
        }
        if let Some(content) = &edit.after_content {
            draft.after_content = content.clone();
        }
        if let Some(description) = &edit.description {
            draft.description = description.clone();
        }
        Ok(draft.clone())
    }

    async fn start_job(&self, job_name: &str) -> Result<JobRun> {
        let job = JobRun {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            status: JobStatus::Running,
            details: None,
        };
        self.tables.lock().await.jobs.push(job.clone());
        Ok(job)
    }

    async fn finish_job(
        &self,
        id: Uuid,
        status: JobStatus,
        details: serde_json::Value,
    ) -> Result<JobRun> {
        let mut tables = self.tables.lock().await;
        let job = tables
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| DigestError::not_found("job run", id))?;
        job.status = status;
        job.details = Some(details);
        job.completed_at = Some(Utc::now());
        Ok(job.clone())
    }

    async fn recent_jobs(&self, job_name: &str, limit: u32) -> Result<Vec<JobRun>> {
        Ok(self
            .tables
            .lock()
            .await
            .jobs
            .iter()
            .rev()
            .filter(|j| j.job_name == job_name)
            .take(limit.min(100) as usize)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

enum Scripted {
    Articles(Vec<Article>),
    Fail(String),
    Slow(Duration, Vec<Article>),
}

/// URL-keyed fetcher. Unregistered URLs fail.
#[derive(Default)]
pub struct MockFetcher {
    responses: HashMap<String, Scripted>,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_source(mut self, url: &str, articles: Vec<Article>) -> Self {
        self.responses
            .insert(url.to_string(), Scripted::Articles(articles));
        self
    }

    pub fn failing(mut self, url: &str, message: &str) -> Self {
        self.responses
            .insert(url.to_string(), Scripted::Fail(message.to_string()));
        self
    }

    pub fn slow(mut self, url: &str, delay: Duration, articles: Vec<Article>) -> Self {
        self.responses
            .insert(url.to_string(), Scripted::Slow(delay, articles));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for MockFetcher {
    async fn fetch(&self, source: &Source) -> anyhow::Result<Vec<Article>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.get(&source.url) {
            Some(Scripted::Articles(articles)) => Ok(articles.clone()),
            Some(Scripted::Fail(message)) => bail!("{message}"),
            Some(Scripted::Slow(delay, articles)) => {
                tokio::time::sleep(*delay).await;
                Ok(articles.clone())
            }
            None => Err(anyhow!("MockFetcher: nothing registered for {}", source.url)),
        }
    }
}

// ---------------------------------------------------------------------------
// MockModel
// ---------------------------------------------------------------------------

/// Returns scripted responses in order. Running out is an error.
#[derive(Default)]
pub struct MockModel {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, text: impl Into<String>) -> Self {
        self.script.lock().unwrap().push_back(Ok(text.into()));
        self
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        self.script.lock().unwrap().push_back(Err(message.into()));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionModel for MockModel {
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<Completion> {
        let input_tokens = ((request.system.len() + request.user.len()) / 4) as u32;
        self.requests.lock().unwrap().push(request);
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(Completion {
                usage: Some(TokenUsage {
                    input_tokens,
                    output_tokens: (text.len() / 4) as u32,
                }),
                text,
                stop_reason: Some("end_turn".to_string()),
            }),
            Some(Err(message)) => bail!("{message}"),
            None => bail!("MockModel: no scripted response left"),
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Records created tasks and hands out sequential ids.
#[derive(Default)]
pub struct MockTaskStore {
    created: Mutex<Vec<NewTask>>,
    failing: bool,
}

impl MockTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn created(&self) -> Vec<NewTask> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskStore for MockTaskStore {
    async fn create_task(&self, task: &NewTask) -> anyhow::Result<String> {
        if self.failing {
            bail!("task store unavailable");
        }
        let mut created = self.created.lock().unwrap();
        created.push(task.clone());
        Ok(format!("task-{}", created.len()))
    }
}

/// Category → SOP association. Unknown categories have none.
#[derive(Default)]
pub struct MockTemplateStore {
    associations: HashMap<String, SopAssociation>,
    failing: bool,
}

impl MockTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn with(mut self, category: &str, association: SopAssociation) -> Self {
        self.associations.insert(category.to_string(), association);
        self
    }
}

#[async_trait]
impl TemplateStore for MockTemplateStore {
    async fn sop_for_category(&self, category: &str) -> anyhow::Result<Option<SopAssociation>> {
        if self.failing {
            bail!("template store unavailable");
        }
        Ok(self.associations.get(category).cloned())
    }
}

/// Records created documents and appends, optionally after a delay.
#[derive(Default)]
pub struct MockDocuments {
    created: Mutex<Vec<(RenderedDocument, Option<String>)>>,
    appended: Mutex<Vec<(String, String)>>,
    failing: bool,
    delay: Option<Duration>,
}

impl MockDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn created(&self) -> Vec<(RenderedDocument, Option<String>)> {
        self.created.lock().unwrap().clone()
    }

    pub fn appended(&self) -> Vec<(String, String)> {
        self.appended.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentExporter for MockDocuments {
    async fn create_document(
        &self,
        document: &RenderedDocument,
        folder_id: Option<&str>,
    ) -> anyhow::Result<CreatedDocument> {
        self.pause().await;
        if self.failing {
            bail!("document service unavailable");
        }
        let mut created = self.created.lock().unwrap();
        created.push((document.clone(), folder_id.map(str::to_string)));
        let id = format!("doc-{}", created.len());
        Ok(CreatedDocument {
            url: format!("https://docs.example/{id}"),
            id,
        })
    }

    async fn append_to_document(&self, document_id: &str, text: &str) -> anyhow::Result<()> {
        self.pause().await;
        if self.failing {
            bail!("document service unavailable");
        }
        self.appended
            .lock()
            .unwrap()
            .push((document_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Records posted messages. `failing_first(n)` fails the first `n` posts.
#[derive(Default)]
pub struct MockRelay {
    messages: Mutex<Vec<(String, String)>>,
    failures_left: AtomicUsize,
}

impl MockRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(n: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(n),
            ..Default::default()
        }
    }

    /// Successfully posted `(channel, text)` pairs.
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageRelay for MockRelay {
    async fn post_message(&self, channel_id: &str, text: &str) -> anyhow::Result<()> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            bail!("relay unavailable");
        }
        self.messages
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn source(name: &str, url: &str, method: FetchMethod) -> Source {
    Source {
        id: Uuid::new_v4(),
        name: name.to_string(),
        url: url.to_string(),
        tier: SourceTier::Tier2,
        category: "industry".to_string(),
        fetch_method: method,
        fetch_config: serde_json::json!({}),
        active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// `count` dated articles under `base_url`, newest first.
pub fn articles(base_url: &str, count: usize) -> Vec<Article> {
    (0..count)
        .map(|i| Article {
            url: format!("{base_url}/{i}"),
            title: format!("Article {i}"),
            content: format!("Body of article {i} from {base_url}."),
            published_at: Some(Utc::now() - ChronoDuration::days(i as i64)),
        })
        .collect()
}

pub fn extracted(title: &str, category: &str, impact: Impact) -> ExtractedRecommendation {
    ExtractedRecommendation {
        category: category.to_string(),
        title: title.to_string(),
        summary: format!("Summary of {title}."),
        details: "- First step\n- Second step".to_string(),
        impact,
        confidence: Confidence::Estimated,
        citations: Vec::new(),
    }
}

/// Settings for tests: enabled, scheduled on the 1st, short timeouts.
pub fn settings() -> DigestSettings {
    DigestSettings::builder()
        .fetch_timeout(Duration::from_millis(500))
        .model_timeout(Duration::from_secs(5))
        .delivery_timeout(Duration::from_secs(5))
        .relay_channel_id("ops")
        .build()
}

/// A model response with one recommendation per `(title, category, impact)`,
/// each citing article `A1`.
pub fn model_response(recs: &[(&str, &str, &str)]) -> String {
    let items: Vec<serde_json::Value> = recs
        .iter()
        .map(|(title, category, impact)| {
            serde_json::json!({
                "category": category,
                "title": title,
                "summary": format!("Summary of {title}."),
                "details": "- First step\n- Second step",
                "impact": impact,
                "citations": [{"article": "A1", "excerpt": "supporting quote"}],
            })
        })
        .collect();
    serde_json::json!({ "recommendations": items }).to_string()
}
