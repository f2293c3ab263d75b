use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use digest_common::{
    Article, Citation, Digest, DigestError, DigestStatus, ExtractedRecommendation, FetchResult,
    JobRun, JobStatus, NewSopDraft, NewTaskDraft, PageRequest, Paged, Recommendation, Result,
    SopDraft, SopDraftEdit, SopDraftStatus, Source, TaskDraft, TaskDraftStatus,
};

use super::{invalid_transition, not_pending, DigestStore, DigestUpdate};
use crate::collaborators::{
    publish_sop_draft, today, ApproveTask, DocumentExporter, NewTask, TaskStore,
};

/// Postgres-backed store. Enums are stored as their snake_case text.
#[derive(Clone)]
pub struct PgDigestStore {
    pool: PgPool,
}

impl PgDigestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DigestError::Database(e.to_string()))?;
        info!("Digest migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn task_draft_miss(&self, id: Uuid) -> DigestError {
        match self.get_task_draft(id).await {
            Ok(draft) => not_pending("task draft", id, draft.status),
            Err(e) => e,
        }
    }

    async fn sop_draft_miss(&self, id: Uuid) -> DigestError {
        match self.get_sop_draft(id).await {
            Ok(draft) => not_pending("sop draft", id, draft.status),
            Err(e) => e,
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn text<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: FromStr<Err = DigestError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
}

fn row_to_source(row: &PgRow) -> Result<Source> {
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        tier: text(row, "tier")?,
        category: row.try_get("category")?,
        fetch_method: text(row, "fetch_method")?,
        fetch_config: row.try_get("fetch_config")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_digest(row: &PgRow) -> Result<Digest> {
    Ok(Digest {
        id: row.try_get("id")?,
        period: row.try_get("period")?,
        status: text(row, "status")?,
        sources_fetched: row.try_get("sources_fetched")?,
        recommendations_generated: row.try_get("recommendations_generated")?,
        task_drafts_created: row.try_get("task_drafts_created")?,
        sop_drafts_created: row.try_get("sop_drafts_created")?,
        error_message: row.try_get("error_message")?,
        google_doc_url: row.try_get("google_doc_url")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn row_to_fetch_result(row: &PgRow) -> Result<FetchResult> {
    Ok(FetchResult {
        id: row.try_get("id")?,
        digest_id: row.try_get("digest_id")?,
        source_id: row.try_get("source_id")?,
        source_name: row.try_get("source_name")?,
        source_tier: text(row, "source_tier")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        published_at: row.try_get("published_at")?,
        fetched_at: row.try_get("fetched_at")?,
    })
}

fn row_to_citation(row: &PgRow) -> Result<Citation> {
    Ok(Citation {
        id: row.try_get("id")?,
        recommendation_id: row.try_get("recommendation_id")?,
        source_name: row.try_get("source_name")?,
        source_url: row.try_get("source_url")?,
        excerpt: row.try_get("excerpt")?,
    })
}

fn row_to_recommendation(row: &PgRow, citations: Vec<Citation>) -> Result<Recommendation> {
    Ok(Recommendation {
        id: row.try_get("id")?,
        digest_id: row.try_get("digest_id")?,
        category: row.try_get("category")?,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        details: row.try_get("details")?,
        impact: text(row, "impact")?,
        confidence: text(row, "confidence")?,
        source_count: row.try_get("source_count")?,
        citations,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_task_draft(row: &PgRow) -> Result<TaskDraft> {
    Ok(TaskDraft {
        id: row.try_get("id")?,
        digest_id: row.try_get("digest_id")?,
        recommendation_id: row.try_get("recommendation_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        suggested_priority: text(row, "suggested_priority")?,
        suggested_due_in_days: row.try_get("suggested_due_in_days")?,
        status: text(row, "status")?,
        task_id: row.try_get("task_id")?,
        reviewed_at: row.try_get("reviewed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_sop_draft(row: &PgRow) -> Result<SopDraft> {
    Ok(SopDraft {
        id: row.try_get("id")?,
        digest_id: row.try_get("digest_id")?,
        recommendation_id: row.try_get("recommendation_id")?,
        draft_type: text(row, "draft_type")?,
        sop_title: row.try_get("sop_title")?,
        sop_doc_id: row.try_get("sop_doc_id")?,
        template_set_id: row.try_get("template_set_id")?,
        before_content: row.try_get("before_content")?,
        after_content: row.try_get("after_content")?,
        description: row.try_get("description")?,
        status: text(row, "status")?,
        applied_at: row.try_get("applied_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_job_run(row: &PgRow) -> Result<JobRun> {
    Ok(JobRun {
        id: row.try_get("id")?,
        job_name: row.try_get("job_name")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        status: text(row, "status")?,
        details: row.try_get("details")?,
    })
}

// ---------------------------------------------------------------------------
// DigestStore
// ---------------------------------------------------------------------------

#[async_trait]
impl DigestStore for PgDigestStore {
    // --- Sources ---

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT * FROM digest_sources ORDER BY tier, name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_source).collect()
    }

    async fn active_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT * FROM digest_sources WHERE active ORDER BY tier, name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_source).collect()
    }

    async fn get_source(&self, id: Uuid) -> Result<Source> {
        sqlx::query("SELECT * FROM digest_sources WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DigestError::not_found("source", id))
            .and_then(|row| row_to_source(&row))
    }

    async fn insert_source(&self, source: &Source) -> Result<Source> {
        let row = sqlx::query(
            r#"
            INSERT INTO digest_sources
                (id, name, url, tier, category, fetch_method, fetch_config, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(source.id)
        .bind(&source.name)
        .bind(&source.url)
        .bind(source.tier.as_str())
        .bind(&source.category)
        .bind(source.fetch_method.as_str())
        .bind(&source.fetch_config)
        .bind(source.active)
        .bind(source.created_at)
        .bind(source.updated_at)
        .fetch_one(&self.pool)
        .await?;
        row_to_source(&row)
    }

    async fn update_source(&self, source: &Source) -> Result<Source> {
        sqlx::query(
            r#"
            UPDATE digest_sources
            SET name = $2, url = $3, tier = $4, category = $5, fetch_method = $6,
                fetch_config = $7, active = $8, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(source.id)
        .bind(&source.name)
        .bind(&source.url)
        .bind(source.tier.as_str())
        .bind(&source.category)
        .bind(source.fetch_method.as_str())
        .bind(&source.fetch_config)
        .bind(source.active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DigestError::not_found("source", source.id))
        .and_then(|row| row_to_source(&row))
    }

    async fn delete_source(&self, id: Uuid) -> Result<()> {
        let done = sqlx::query("DELETE FROM digest_sources WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(DigestError::not_found("source", id));
        }
        Ok(())
    }

    // --- Digests ---

    async fn create_digest(&self, period: &str) -> Result<Digest> {
        let row = sqlx::query(
            "INSERT INTO digests (id, period, status) VALUES ($1, $2, 'pending') RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(period)
        .fetch_one(&self.pool)
        .await?;
        row_to_digest(&row)
    }

    async fn get_digest(&self, id: Uuid) -> Result<Digest> {
        sqlx::query("SELECT * FROM digests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DigestError::not_found("digest", id))
            .and_then(|row| row_to_digest(&row))
    }

    async fn latest_digest_for_period(&self, period: &str) -> Result<Option<Digest>> {
        sqlx::query("SELECT * FROM digests WHERE period = $1 ORDER BY created_at DESC LIMIT 1")
            .bind(period)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_digest(&row))
            .transpose()
    }

    async fn unfinished_digests(&self) -> Result<Vec<Digest>> {
        let rows = sqlx::query(
            "SELECT * FROM digests WHERE status NOT IN ('completed', 'failed') ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_digest).collect()
    }

    async fn list_digests(&self, page: PageRequest) -> Result<Paged<Digest>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM digests")
            .fetch_one(&self.pool)
            .await?;
        let rows = sqlx::query("SELECT * FROM digests ORDER BY created_at DESC LIMIT $1 OFFSET $2")
            .bind(page.per_page as i64)
            .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok(Paged {
            items: rows.iter().map(row_to_digest).collect::<Result<_>>()?,
            total: total.max(0) as u64,
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn transition(&self, id: Uuid, to: DigestStatus, error: Option<String>) -> Result<Digest> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM digests WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DigestError::not_found("digest", id))?;
        let from: DigestStatus = text(&row, "status")?;
        if !from.can_transition_to(to) {
            return Err(invalid_transition(id, from, to));
        }

        let row = sqlx::query(
            r#"
            UPDATE digests
            SET status = $2::text,
                error_message = CASE
                    WHEN $2::text = 'failed' THEN $3
                    WHEN $2::text = 'pending' THEN NULL
                    ELSE error_message END,
                completed_at = CASE
                    WHEN $2::text = 'completed' THEN now()
                    WHEN $2::text = 'pending' THEN NULL
                    ELSE completed_at END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(error)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row_to_digest(&row)
    }

    async fn update_digest(&self, id: Uuid, update: DigestUpdate) -> Result<Digest> {
        sqlx::query(
            r#"
            UPDATE digests
            SET sources_fetched = COALESCE($2, sources_fetched),
                recommendations_generated = COALESCE($3, recommendations_generated),
                task_drafts_created = COALESCE($4, task_drafts_created),
                sop_drafts_created = COALESCE($5, sop_drafts_created),
                google_doc_url = COALESCE($6, google_doc_url)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.sources_fetched)
        .bind(update.recommendations_generated)
        .bind(update.task_drafts_created)
        .bind(update.sop_drafts_created)
        .bind(update.google_doc_url)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DigestError::not_found("digest", id))
        .and_then(|row| row_to_digest(&row))
    }

    // --- Fetch results ---

    async fn clear_fetch_results(&self, digest_id: Uuid) -> Result<u64> {
        let done = sqlx::query("DELETE FROM digest_fetch_results WHERE digest_id = $1")
            .bind(digest_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn insert_fetch_results(
        &self,
        digest_id: Uuid,
        source: &Source,
        articles: &[Article],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for article in articles {
            sqlx::query(
                r#"
                INSERT INTO digest_fetch_results
                    (id, digest_id, source_id, source_name, source_tier, url, title, content, published_at, fetched_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(digest_id)
            .bind(source.id)
            .bind(&source.name)
            .bind(source.tier.as_str())
            .bind(&article.url)
            .bind(&article.title)
            .bind(&article.content)
            .bind(article.published_at)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(articles.len())
    }

    async fn fetch_results(&self, digest_id: Uuid) -> Result<Vec<FetchResult>> {
        let rows = sqlx::query(
            "SELECT * FROM digest_fetch_results WHERE digest_id = $1 ORDER BY fetched_at, url",
        )
        .bind(digest_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_fetch_result).collect()
    }

    // --- Recommendations ---

    async fn clear_recommendations(&self, digest_id: Uuid) -> Result<u64> {
        // Citations and drafts cascade.
        let done = sqlx::query("DELETE FROM digest_recommendations WHERE digest_id = $1")
            .bind(digest_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn insert_recommendations(
        &self,
        digest_id: Uuid,
        recommendations: &[ExtractedRecommendation],
    ) -> Result<Vec<Recommendation>> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(recommendations.len());

        for (position, rec) in recommendations.iter().enumerate() {
            let rec_row = sqlx::query(
                r#"
                INSERT INTO digest_recommendations
                    (id, digest_id, position, category, title, summary, details, impact, confidence, source_count)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(digest_id)
            .bind(position as i32)
            .bind(&rec.category)
            .bind(&rec.title)
            .bind(&rec.summary)
            .bind(&rec.details)
            .bind(rec.impact.as_str())
            .bind(rec.confidence.as_str())
            .bind(rec.source_count())
            .fetch_one(&mut *tx)
            .await?;
            let rec_id: Uuid = rec_row.try_get("id")?;

            let mut citations = Vec::with_capacity(rec.citations.len());
            for (cpos, citation) in rec.citations.iter().enumerate() {
                let row = sqlx::query(
                    r#"
                    INSERT INTO digest_citations
                        (id, digest_id, recommendation_id, position, source_name, source_url, excerpt)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    RETURNING *
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(digest_id)
                .bind(rec_id)
                .bind(cpos as i32)
                .bind(&citation.source_name)
                .bind(&citation.source_url)
                .bind(&citation.excerpt)
                .fetch_one(&mut *tx)
                .await?;
                citations.push(row_to_citation(&row)?);
            }

            stored.push(row_to_recommendation(&rec_row, citations)?);
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn recommendations(&self, digest_id: Uuid) -> Result<Vec<Recommendation>> {
        let citation_rows = sqlx::query(
            "SELECT * FROM digest_citations WHERE digest_id = $1 ORDER BY recommendation_id, position",
        )
        .bind(digest_id)
        .fetch_all(&self.pool)
        .await?;

        let mut by_rec: HashMap<Uuid, Vec<Citation>> = HashMap::new();
        for row in &citation_rows {
            let citation = row_to_citation(row)?;
            by_rec
                .entry(citation.recommendation_id)
                .or_default()
                .push(citation);
        }

        let rows = sqlx::query(
            "SELECT * FROM digest_recommendations WHERE digest_id = $1 ORDER BY position",
        )
        .bind(digest_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id")?;
                row_to_recommendation(row, by_rec.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    // --- Drafts ---

    async fn drafted_recommendations(&self, digest_id: Uuid) -> Result<HashSet<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT recommendation_id FROM digest_task_drafts WHERE digest_id = $1
            UNION
            SELECT recommendation_id FROM digest_sop_drafts WHERE digest_id = $1
            "#,
        )
        .bind(digest_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn insert_drafts(
        &self,
        digest_id: Uuid,
        tasks: &[NewTaskDraft],
        sops: &[NewSopDraft],
    ) -> Result<(Vec<TaskDraft>, Vec<SopDraft>)> {
        let mut tx = self.pool.begin().await?;

        let mut stored_tasks = Vec::with_capacity(tasks.len());
        for draft in tasks {
            let row = sqlx::query(
                r#"
                INSERT INTO digest_task_drafts
                    (id, digest_id, recommendation_id, title, description,
                     suggested_priority, suggested_due_in_days, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(digest_id)
            .bind(draft.recommendation_id)
            .bind(&draft.title)
            .bind(&draft.description)
            .bind(draft.suggested_priority.as_str())
            .bind(draft.suggested_due_in_days)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;
            stored_tasks.push(row_to_task_draft(&row)?);
        }

        let mut stored_sops = Vec::with_capacity(sops.len());
        for draft in sops {
            let row = sqlx::query(
                r#"
                INSERT INTO digest_sop_drafts
                    (id, digest_id, recommendation_id, draft_type, sop_title, sop_doc_id,
                     template_set_id, before_content, after_content, description, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', $11)
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(digest_id)
            .bind(draft.recommendation_id)
            .bind(draft.draft_type.as_str())
            .bind(&draft.sop_title)
            .bind(&draft.sop_doc_id)
            .bind(&draft.template_set_id)
            .bind(&draft.before_content)
            .bind(&draft.after_content)
            .bind(&draft.description)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;
            stored_sops.push(row_to_sop_draft(&row)?);
        }

        tx.commit().await?;
        Ok((stored_tasks, stored_sops))
    }

    async fn task_drafts(&self, digest_id: Uuid) -> Result<Vec<TaskDraft>> {
        let rows = sqlx::query(
            "SELECT * FROM digest_task_drafts WHERE digest_id = $1 ORDER BY created_at, id",
        )
        .bind(digest_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task_draft).collect()
    }

    async fn sop_drafts(&self, digest_id: Uuid) -> Result<Vec<SopDraft>> {
        let rows = sqlx::query(
            "SELECT * FROM digest_sop_drafts WHERE digest_id = $1 ORDER BY created_at, id",
        )
        .bind(digest_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_sop_draft).collect()
    }

    async fn get_task_draft(&self, id: Uuid) -> Result<TaskDraft> {
        sqlx::query("SELECT * FROM digest_task_drafts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DigestError::not_found("task draft", id))
            .and_then(|row| row_to_task_draft(&row))
    }

    async fn get_sop_draft(&self, id: Uuid) -> Result<SopDraft> {
        sqlx::query("SELECT * FROM digest_sop_drafts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DigestError::not_found("sop draft", id))
            .and_then(|row| row_to_sop_draft(&row))
    }

    async fn approve_task_draft(
        &self,
        id: Uuid,
        approve: &ApproveTask,
        tasks: &dyn TaskStore,
    ) -> Result<TaskDraft> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM digest_task_drafts WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DigestError::not_found("task draft", id))?;
        let draft = row_to_task_draft(&row)?;
        if draft.status != TaskDraftStatus::Pending {
            return Err(not_pending("task draft", id, draft.status));
        }

        // The row lock is held across the external call so a concurrent
        // approval waits and then sees `approved`.
        let task = NewTask::from_draft(&draft, approve, today())?;
        let task_id = tasks
            .create_task(&task)
            .await
            .map_err(|e| DigestError::Delivery(format!("task creation failed: {e:#}")))?;

        let row = sqlx::query(
            r#"
            UPDATE digest_task_drafts
            SET status = 'approved', task_id = $2, reviewed_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&task_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row_to_task_draft(&row)
    }

    async fn reject_task_draft(&self, id: Uuid) -> Result<TaskDraft> {
        let row = sqlx::query(
            r#"
            UPDATE digest_task_drafts
            SET status = 'rejected', reviewed_at = now()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row_to_task_draft(&row),
            None => Err(self.task_draft_miss(id).await),
        }
    }

    async fn apply_sop_draft(
        &self,
        id: Uuid,
        documents: &dyn DocumentExporter,
        folder_id: Option<&str>,
    ) -> Result<SopDraft> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM digest_sop_drafts WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DigestError::not_found("sop draft", id))?;
        let draft = row_to_sop_draft(&row)?;
        if draft.status != SopDraftStatus::Pending {
            return Err(not_pending("sop draft", id, draft.status));
        }

        // Same locking as task approval: a concurrent apply waits here.
        let sop_doc_id = publish_sop_draft(&draft, documents, folder_id).await?;

        let row = sqlx::query(
            r#"
            UPDATE digest_sop_drafts
            SET status = 'applied', applied_at = now(), sop_doc_id = COALESCE($2, sop_doc_id)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(sop_doc_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row_to_sop_draft(&row)
    }

    async fn dismiss_sop_draft(&self, id: Uuid) -> Result<SopDraft> {
        let row = sqlx::query(
            "UPDATE digest_sop_drafts SET status = 'dismissed' WHERE id = $1 AND status = 'pending' RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row_to_sop_draft(&row),
            None => Err(self.sop_draft_miss(id).await),
        }
    }

    async fn edit_sop_draft(&self, id: Uuid, edit: &SopDraftEdit) -> Result<SopDraft> {
        let row = sqlx::query(
            r#"
            UPDATE digest_sop_drafts
            SET sop_title = COALESCE($2, sop_title),
                after_content = COALESCE($3, after_content),
                description = COALESCE($4, description)
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&edit.sop_title)
        .bind(&edit.after_content)
        .bind(&edit.description)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row_to_sop_draft(&row),
            None => Err(self.sop_draft_miss(id).await),
        }
    }

    // --- Job history ---

    async fn start_job(&self, job_name: &str) -> Result<JobRun> {
        let row = sqlx::query(
            "INSERT INTO job_runs (id, job_name, status) VALUES ($1, $2, 'running') RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(job_name)
        .fetch_one(&self.pool)
        .await?;
        row_to_job_run(&row)
    }

    async fn finish_job(
        &self,
        id: Uuid,
        status: JobStatus,
        details: serde_json::Value,
    ) -> Result<JobRun> {
        sqlx::query(
            r#"
            UPDATE job_runs
            SET status = $2, details = $3, completed_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(details)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DigestError::not_found("job run", id))
        .and_then(|row| row_to_job_run(&row))
    }

    async fn recent_jobs(&self, job_name: &str, limit: u32) -> Result<Vec<JobRun>> {
        let rows = sqlx::query(
            "SELECT * FROM job_runs WHERE job_name = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(job_name)
        .bind(limit.min(100) as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job_run).collect()
    }
}
