//! Postgres store tests. Run only when `DATABASE_TEST_URL` points at a
//! disposable database; otherwise each test returns early.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use digest_common::{
    DigestError, DigestStatus, FetchMethod, Impact, JobStatus, PageRequest, SopDraftStatus,
    TaskDraftStatus,
};
use digest_pipeline::drafts::{sop_draft, task_drafts};
use digest_pipeline::testing::{articles, extracted, source, MockDocuments, MockTaskStore};
use digest_pipeline::{ApproveTask, DigestStore, DigestUpdate, PgDigestStore};

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("connect to DATABASE_TEST_URL");
    Some(pool)
}

async fn test_store() -> Option<PgDigestStore> {
    let store = PgDigestStore::new(test_pool().await?);
    store.migrate().await.expect("migrations apply");
    Some(store)
}

fn unique_period() -> String {
    format!("test-{}", uuid::Uuid::new_v4())
}

#[tokio::test]
async fn digest_transitions_follow_the_state_machine() {
    let Some(store) = test_store().await else {
        return;
    };
    let digest = store.create_digest(&unique_period()).await.unwrap();
    assert_eq!(digest.status, DigestStatus::Pending);

    let err = store
        .transition(digest.id, DigestStatus::Analyzing, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DigestError::InvalidState(_)));

    store
        .transition(digest.id, DigestStatus::Fetching, None)
        .await
        .unwrap();
    let failed = store
        .transition(digest.id, DigestStatus::Failed, Some("boom".into()))
        .await
        .unwrap();
    assert_eq!(failed.error_message.as_deref(), Some("boom"));

    let reset = store
        .transition(digest.id, DigestStatus::Pending, None)
        .await
        .unwrap();
    assert!(reset.error_message.is_none());

    let updated = store
        .update_digest(
            digest.id,
            DigestUpdate {
                sources_fetched: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.sources_fetched, 3);
    assert_eq!(updated.recommendations_generated, 0);

    let page = store.list_digests(PageRequest::new(None, Some(5))).await.unwrap();
    assert!(page.total >= 1);
}

#[tokio::test]
async fn clearing_recommendations_cascades_to_drafts() {
    let Some(store) = test_store().await else {
        return;
    };
    let src = store
        .insert_source(&source("Trade Weekly", "https://feeds.example/a.xml", FetchMethod::Rss))
        .await
        .unwrap();
    let digest = store.create_digest(&unique_period()).await.unwrap();

    let n = store
        .insert_fetch_results(digest.id, &src, &articles(&src.url, 3))
        .await
        .unwrap();
    assert_eq!(n, 3);
    assert_eq!(store.fetch_results(digest.id).await.unwrap().len(), 3);

    let recs = store
        .insert_recommendations(
            digest.id,
            &[extracted("Adopt a shared shift board", "operations", Impact::High)],
        )
        .await
        .unwrap();
    store
        .insert_task_drafts(digest.id, &task_drafts(&recs[0]))
        .await
        .unwrap();
    store
        .insert_sop_drafts(digest.id, &[sop_draft(&recs[0], None).unwrap()])
        .await
        .unwrap();
    assert!(store
        .drafted_recommendations(digest.id)
        .await
        .unwrap()
        .contains(&recs[0].id));

    assert_eq!(store.clear_recommendations(digest.id).await.unwrap(), 1);
    assert!(store.task_drafts(digest.id).await.unwrap().is_empty());
    assert!(store.sop_drafts(digest.id).await.unwrap().is_empty());
    assert_eq!(store.clear_fetch_results(digest.id).await.unwrap(), 3);

    store.delete_source(src.id).await.unwrap();
}

#[tokio::test]
async fn approval_and_sop_actions_are_pending_only() {
    let Some(store) = test_store().await else {
        return;
    };
    let digest = store.create_digest(&unique_period()).await.unwrap();
    let recs = store
        .insert_recommendations(
            digest.id,
            &[extracted("Adopt a shared shift board", "operations", Impact::High)],
        )
        .await
        .unwrap();
    let drafts = store
        .insert_task_drafts(digest.id, &task_drafts(&recs[0]))
        .await
        .unwrap();
    let sops = store
        .insert_sop_drafts(digest.id, &[sop_draft(&recs[0], None).unwrap()])
        .await
        .unwrap();

    let tasks = MockTaskStore::new();
    let approve = ApproveTask {
        project_id: Some("proj-1".into()),
        ..Default::default()
    };
    let approved = store
        .approve_task_draft(drafts[0].id, &approve, &tasks)
        .await
        .unwrap();
    assert_eq!(approved.status, TaskDraftStatus::Approved);
    assert_eq!(approved.task_id.as_deref(), Some("task-1"));

    let err = store
        .approve_task_draft(drafts[0].id, &approve, &tasks)
        .await
        .unwrap_err();
    assert!(matches!(err, DigestError::InvalidState(_)));
    assert_eq!(tasks.created().len(), 1);

    let documents = MockDocuments::new();
    let applied = store
        .apply_sop_draft(sops[0].id, &documents, Some("folder-1"))
        .await
        .unwrap();
    assert_eq!(applied.status, SopDraftStatus::Applied);
    assert_eq!(applied.sop_doc_id.as_deref(), Some("doc-1"));

    let err = store
        .apply_sop_draft(sops[0].id, &documents, Some("folder-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, DigestError::InvalidState(_)));
    assert_eq!(documents.created().len(), 1);
    assert!(matches!(
        store.dismiss_sop_draft(sops[0].id).await.unwrap_err(),
        DigestError::InvalidState(_)
    ));
}

#[tokio::test]
async fn job_history_is_newest_first() {
    let Some(store) = test_store().await else {
        return;
    };
    let name = format!("test_job_{}", uuid::Uuid::new_v4().simple());
    let first = store.start_job(&name).await.unwrap();
    store
        .finish_job(first.id, JobStatus::Failed, serde_json::json!({"error": "boom"}))
        .await
        .unwrap();
    let second = store.start_job(&name).await.unwrap();

    let jobs = store.recent_jobs(&name, 10).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].id, second.id);
    assert_eq!(jobs[0].status, JobStatus::Running);
    assert_eq!(jobs[1].status, JobStatus::Failed);
    assert_eq!(jobs[1].details.as_ref().unwrap()["error"], "boom");
}
