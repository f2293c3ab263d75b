//! The digest run state machine.
//!
//! Each stage is entered through a persisted status transition and starts by
//! clearing its own outputs and everything downstream, so re-entering a stage
//! (on retry) never duplicates rows. A failure in fetching, analyzing or
//! generating moves the digest to `failed`; delivery problems are logged and
//! the digest still completes.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use ai_client::CompletionModel;
use digest_common::{
    Digest, DigestError, DigestSettings, DigestStatus, JobRun, JobStatus, Result, Source,
};
use digest_sources::SourceFetcher;

use crate::analyzer::Analyzer;
use crate::collaborators::Collaborators;
use crate::delivery::{Delivery, RelayQueue};
use crate::drafts::DraftGenerator;
use crate::store::{DigestStore, DigestUpdate};

/// Job history name for digest runs.
pub const JOB_NAME: &str = "content_digest";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunOptions {
    /// Bypass the enabled flag, the day-of-month gate and the
    /// once-per-period rule.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    NotScheduledToday,
    #[serde(rename_all = "camelCase")]
    AlreadyInFlight { digest_id: Uuid },
    #[serde(rename_all = "camelCase")]
    AlreadyCompleted { digest_id: Uuid },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Skipped(SkipReason),
    Completed(Digest),
    Failed(Digest),
}

/// A digest and job run ready to be driven by [`Orchestrator::execute`].
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub digest: Digest,
    pub job: JobRun,
    pub retry: bool,
}

#[derive(Debug, Clone)]
pub enum RunStart {
    Started(PreparedRun),
    Skipped(SkipReason),
}

/// Period label for a run date: `YYYY-MM` in UTC.
pub fn period_label(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

pub struct Orchestrator {
    store: Arc<dyn DigestStore>,
    fetcher: Arc<dyn SourceFetcher>,
    analyzer: Analyzer,
    drafts: DraftGenerator,
    delivery: Delivery,
    settings: DigestSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DigestStore>,
        fetcher: Arc<dyn SourceFetcher>,
        model: Arc<dyn CompletionModel>,
        collaborators: &Collaborators,
        relay: RelayQueue,
        settings: DigestSettings,
    ) -> Self {
        Self {
            analyzer: Analyzer::new(model, settings.clone()),
            drafts: DraftGenerator::new(collaborators.templates.clone(), settings.min_impact),
            delivery: Delivery::new(collaborators.documents.clone(), relay, &settings),
            store,
            fetcher,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn DigestStore> {
        &self.store
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    pub async fn run(&self, options: RunOptions) -> Result<RunOutcome> {
        self.run_at(options, Utc::now()).await
    }

    /// `run` with an explicit clock, for the day-of-month gate and period.
    pub async fn run_at(&self, options: RunOptions, now: DateTime<Utc>) -> Result<RunOutcome> {
        match self.begin_run(options, now).await? {
            RunStart::Started(prepared) => Ok(self.execute(prepared).await),
            RunStart::Skipped(reason) => Ok(RunOutcome::Skipped(reason)),
        }
    }

    /// Apply the trigger gates and, if the run goes ahead, create its digest
    /// and job run. Split from `execute` so callers can return immediately.
    pub async fn begin_run(&self, options: RunOptions, now: DateTime<Utc>) -> Result<RunStart> {
        if !options.force {
            if !self.settings.enabled {
                info!("Digest disabled, skipping run");
                return Ok(RunStart::Skipped(SkipReason::Disabled));
            }
            if now.day() != self.settings.day_of_month {
                return Ok(RunStart::Skipped(SkipReason::NotScheduledToday));
            }
        }

        let period = period_label(now);
        if let Some(existing) = self.store.latest_digest_for_period(&period).await? {
            if !existing.status.is_terminal() {
                info!(digest_id = %existing.id, status = %existing.status, "Digest already in flight, skipping run");
                return Ok(RunStart::Skipped(SkipReason::AlreadyInFlight {
                    digest_id: existing.id,
                }));
            }
            if existing.status == DigestStatus::Completed && !options.force {
                return Ok(RunStart::Skipped(SkipReason::AlreadyCompleted {
                    digest_id: existing.id,
                }));
            }
        }

        let digest = self.store.create_digest(&period).await?;
        let job = self.store.start_job(JOB_NAME).await?;
        info!(
            digest_id = %digest.id,
            period = period.as_str(),
            forced = options.force,
            "Digest run started"
        );
        Ok(RunStart::Started(PreparedRun {
            digest,
            job,
            retry: false,
        }))
    }

    pub async fn retry(&self, digest_id: Uuid) -> Result<RunOutcome> {
        let prepared = self.begin_retry(digest_id).await?;
        Ok(self.execute(prepared).await)
    }

    /// Validate and reset a failed digest to `pending` under a new job run.
    pub async fn begin_retry(&self, digest_id: Uuid) -> Result<PreparedRun> {
        let digest = self.store.get_digest(digest_id).await?;
        if digest.status != DigestStatus::Failed {
            return Err(DigestError::InvalidState(format!(
                "digest {digest_id} is {}; only failed digests can be retried",
                digest.status
            )));
        }

        let digest = self
            .store
            .transition(digest_id, DigestStatus::Pending, None)
            .await?;
        info!(digest_id = %digest_id, from = "failed", to = "pending", "Digest retry requested");

        let job = self.store.start_job(JOB_NAME).await?;
        Ok(PreparedRun {
            digest,
            job,
            retry: true,
        })
    }

    /// Mark digests left mid-run by a crashed process as failed so they can
    /// be retried.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let unfinished = self.store.unfinished_digests().await?;
        for digest in &unfinished {
            warn!(digest_id = %digest.id, status = %digest.status, "Marking interrupted digest as failed");
            self.store
                .transition(
                    digest.id,
                    DigestStatus::Failed,
                    Some(format!("interrupted while {}", digest.status)),
                )
                .await?;
        }
        Ok(unfinished.len())
    }

    /// Job history for digest runs, newest first.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<JobRun>> {
        self.store.recent_jobs(JOB_NAME, limit).await
    }

    /// Drive a prepared digest to `completed` or `failed` and close its job
    /// run.
    pub async fn execute(&self, prepared: PreparedRun) -> RunOutcome {
        let PreparedRun { digest, job, retry } = prepared;
        let digest_id = digest.id;

        match self.advance(digest.clone()).await {
            Ok(done) => {
                info!(
                    digest_id = %digest_id,
                    sources_fetched = done.sources_fetched,
                    recommendations = done.recommendations_generated,
                    task_drafts = done.task_drafts_created,
                    sop_drafts = done.sop_drafts_created,
                    "Digest completed"
                );
                self.finish_job(&job, JobStatus::Completed, &done, None, retry)
                    .await;
                RunOutcome::Completed(done)
            }
            Err(e) => {
                let message = e.to_string();
                error!(digest_id = %digest_id, error = %message, "Digest run failed");

                let failed = match self
                    .store
                    .transition(digest_id, DigestStatus::Failed, Some(message.clone()))
                    .await
                {
                    Ok(failed) => failed,
                    Err(te) => {
                        error!(digest_id = %digest_id, error = %te, "Could not record digest failure");
                        Digest {
                            status: DigestStatus::Failed,
                            error_message: Some(message.clone()),
                            ..digest
                        }
                    }
                };
                self.finish_job(&job, JobStatus::Failed, &failed, Some(&message), retry)
                    .await;
                RunOutcome::Failed(failed)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    async fn advance(&self, digest: Digest) -> Result<Digest> {
        let digest = self.enter(&digest, DigestStatus::Fetching).await?;
        let digest = self.fetch_stage(&digest).await?;

        let digest = self.enter(&digest, DigestStatus::Analyzing).await?;
        let digest = self.analyze_stage(&digest).await?;

        let digest = self.enter(&digest, DigestStatus::Generating).await?;
        let digest = self.generate_stage(&digest).await?;

        let digest = self.enter(&digest, DigestStatus::Delivering).await?;
        let digest = self.deliver_stage(&digest).await;

        self.enter(&digest, DigestStatus::Completed).await
    }

    async fn enter(&self, digest: &Digest, to: DigestStatus) -> Result<Digest> {
        let next = self.store.transition(digest.id, to, None).await?;
        info!(digest_id = %digest.id, from = %digest.status, to = %to, "Digest stage transition");
        Ok(next)
    }

    async fn fetch_stage(&self, digest: &Digest) -> Result<Digest> {
        let digest_id = digest.id;
        let cleared_recs = self.store.clear_recommendations(digest_id).await?;
        let cleared = self.store.clear_fetch_results(digest_id).await?;
        if cleared > 0 || cleared_recs > 0 {
            info!(
                digest_id = %digest_id,
                fetch_results = cleared,
                recommendations = cleared_recs,
                "Cleared rows from a previous attempt"
            );
        }

        let sources = self.store.active_sources().await?;
        let source_count = sources.len();
        let timeout = self.settings.fetch_timeout;

        let counts: Vec<usize> = stream::iter(sources)
            .map(|source| async move { self.fetch_source(digest_id, &source, timeout).await })
            .buffer_unordered(self.settings.fetch_concurrency.max(1))
            .try_collect()
            .await?;

        let sources_fetched = counts.iter().filter(|n| **n > 0).count();
        let articles: usize = counts.iter().sum();
        info!(
            digest_id = %digest_id,
            sources = source_count,
            sources_fetched,
            articles,
            "Fetch stage complete"
        );

        self.store
            .update_digest(
                digest_id,
                DigestUpdate {
                    sources_fetched: Some(sources_fetched as i32),
                    ..Default::default()
                },
            )
            .await
    }

    /// Fetch one source and persist its articles. Fetch failures and timeouts
    /// count as zero articles; store failures are errors.
    async fn fetch_source(
        &self,
        digest_id: Uuid,
        source: &Source,
        timeout: std::time::Duration,
    ) -> Result<usize> {
        let articles = match tokio::time::timeout(timeout, self.fetcher.fetch(source)).await {
            Ok(Ok(articles)) => articles,
            Ok(Err(e)) => {
                warn!(digest_id = %digest_id, source = source.name.as_str(), error = %e, "Source fetch failed, skipping");
                return Ok(0);
            }
            Err(_) => {
                warn!(
                    digest_id = %digest_id,
                    source = source.name.as_str(),
                    timeout_secs = timeout.as_secs(),
                    "Source fetch timed out, skipping"
                );
                return Ok(0);
            }
        };
        if articles.is_empty() {
            return Ok(0);
        }
        self.store
            .insert_fetch_results(digest_id, source, &articles)
            .await
    }

    async fn analyze_stage(&self, digest: &Digest) -> Result<Digest> {
        let digest_id = digest.id;
        self.store.clear_recommendations(digest_id).await?;

        let results = self.store.fetch_results(digest_id).await?;
        let analysis = self.analyzer.analyze(digest_id, &results).await?;
        let stored = self
            .store
            .insert_recommendations(digest_id, &analysis.recommendations)
            .await?;

        info!(
            digest_id = %digest_id,
            recommendations = stored.len(),
            rejected = analysis.rejected,
            "Analysis stage complete"
        );

        self.store
            .update_digest(
                digest_id,
                DigestUpdate {
                    recommendations_generated: Some(stored.len() as i32),
                    ..Default::default()
                },
            )
            .await
    }

    /// Draft every recommendation that does not own drafts yet.
    pub async fn generate_stage(&self, digest: &Digest) -> Result<Digest> {
        let digest_id = digest.id;
        let drafted = self.store.drafted_recommendations(digest_id).await?;
        let recommendations = self.store.recommendations(digest_id).await?;

        for rec in recommendations.iter().filter(|r| !drafted.contains(&r.id)) {
            let drafts = self.drafts.generate(rec).await;
            let sops: Vec<_> = drafts.sop.into_iter().collect();
            if !drafts.tasks.is_empty() || !sops.is_empty() {
                self.store.insert_drafts(digest_id, &drafts.tasks, &sops).await?;
            }
        }

        let task_drafts = self.store.task_drafts(digest_id).await?.len();
        let sop_drafts = self.store.sop_drafts(digest_id).await?.len();
        info!(
            digest_id = %digest_id,
            skipped = drafted.len(),
            task_drafts,
            sop_drafts,
            "Generation stage complete"
        );

        self.store
            .update_digest(
                digest_id,
                DigestUpdate {
                    task_drafts_created: Some(task_drafts as i32),
                    sop_drafts_created: Some(sop_drafts as i32),
                    ..Default::default()
                },
            )
            .await
    }

    async fn deliver_stage(&self, digest: &Digest) -> Digest {
        let recommendations = match self.store.recommendations(digest.id).await {
            Ok(recs) => recs,
            Err(e) => {
                warn!(digest_id = %digest.id, error = %e, "Could not load recommendations for delivery");
                return digest.clone();
            }
        };

        let delivered = tokio::time::timeout(
            self.settings.delivery_timeout,
            self.delivery.deliver(digest, &recommendations),
        )
        .await;

        let report = match delivered {
            Ok(report) => report,
            Err(_) => {
                warn!(
                    digest_id = %digest.id,
                    timeout_secs = self.settings.delivery_timeout.as_secs(),
                    "Delivery timed out"
                );
                return digest.clone();
            }
        };

        let Some(url) = report.document_url else {
            return digest.clone();
        };
        let update = DigestUpdate {
            google_doc_url: Some(url),
            ..Default::default()
        };
        match self.store.update_digest(digest.id, update).await {
            Ok(updated) => updated,
            Err(e) => {
                warn!(digest_id = %digest.id, error = %e, "Could not record document link");
                digest.clone()
            }
        }
    }

    async fn finish_job(
        &self,
        job: &JobRun,
        status: JobStatus,
        digest: &Digest,
        error: Option<&str>,
        retry: bool,
    ) {
        let details = json!({
            "digestId": digest.id,
            "period": digest.period,
            "status": digest.status,
            "retry": retry,
            "sourcesFetched": digest.sources_fetched,
            "recommendations": digest.recommendations_generated,
            "taskDrafts": digest.task_drafts_created,
            "sopDrafts": digest.sop_drafts_created,
            "error": error,
        });
        if let Err(e) = self.store.finish_job(job.id, status, details).await {
            warn!(job_id = %job.id, error = %e, "Could not close job run");
        }
    }
}
