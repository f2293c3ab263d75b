//! End-to-end runs of the digest state machine against in-memory doubles.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use digest_common::{DigestError, DigestSettings, DigestStatus, FetchMethod, JobStatus, Source};
use digest_pipeline::testing::{
    articles, model_response, settings, source, MemoryStore, MockDocuments, MockFetcher,
    MockModel, MockRelay, MockTaskStore, MockTemplateStore,
};
use digest_pipeline::{
    Collaborators, DigestStore, Orchestrator, RelayQueue, RunOptions, RunOutcome, SkipReason,
};

const RSS: &str = "https://feeds.example/trade.xml";
const FORUM: &str = "https://www.reddit.com/r/smallbusiness";
const PAGE: &str = "https://blog.example/news";

struct Harness {
    store: Arc<MemoryStore>,
    model: Arc<MockModel>,
    documents: Arc<MockDocuments>,
    relay: Arc<MockRelay>,
    orchestrator: Orchestrator,
}

fn harness_with(
    sources: Vec<Source>,
    fetcher: MockFetcher,
    model: MockModel,
    documents: MockDocuments,
    settings: DigestSettings,
) -> Harness {
    harness_on(
        MemoryStore::with_sources(sources),
        fetcher,
        model,
        documents,
        settings,
    )
}

fn harness_on(
    store: MemoryStore,
    fetcher: MockFetcher,
    model: MockModel,
    documents: MockDocuments,
    settings: DigestSettings,
) -> Harness {
    let store = Arc::new(store);
    let model = Arc::new(model);
    let documents = Arc::new(documents);
    let relay = Arc::new(MockRelay::new());
    let collaborators = Collaborators {
        tasks: Arc::new(MockTaskStore::new()),
        templates: Arc::new(MockTemplateStore::new()),
        documents: documents.clone(),
        relay: relay.clone(),
    };
    let queue = RelayQueue::with_limits(relay.clone(), 8, Duration::from_millis(1));
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(fetcher),
        model.clone(),
        &collaborators,
        queue,
        settings,
    );
    Harness {
        store,
        model,
        documents,
        relay,
        orchestrator,
    }
}

fn harness(sources: Vec<Source>, fetcher: MockFetcher, model: MockModel) -> Harness {
    harness_with(sources, fetcher, model, MockDocuments::new(), settings())
}

fn three_sources() -> Vec<Source> {
    vec![
        source("Trade Weekly", RSS, FetchMethod::Rss),
        source("r/smallbusiness", FORUM, FetchMethod::Reddit),
        source("Company Blog", PAGE, FetchMethod::Web),
    ]
}

fn three_fetchers() -> MockFetcher {
    MockFetcher::new()
        .on_source(RSS, articles(RSS, 5))
        .failing(FORUM, "HTTP 503 Service Unavailable")
        .on_source(PAGE, articles(PAGE, 2))
}

fn first_of_month() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

fn completed(outcome: RunOutcome) -> digest_common::Digest {
    match outcome {
        RunOutcome::Completed(digest) => digest,
        other => panic!("expected a completed run, got {other:?}"),
    }
}

#[tokio::test]
async fn failing_source_does_not_fail_the_run() {
    let model = MockModel::new().respond(model_response(&[(
        "Adopt a shared shift board",
        "operations",
        "high",
    )]));
    let h = harness(three_sources(), three_fetchers(), model);

    let digest = completed(
        h.orchestrator
            .run_at(RunOptions::default(), first_of_month())
            .await
            .unwrap(),
    );

    assert_eq!(digest.status, DigestStatus::Completed);
    assert_eq!(digest.period, "2025-06");
    assert_eq!(digest.sources_fetched, 2);
    assert_eq!(h.store.fetch_results(digest.id).await.unwrap().len(), 7);
    assert_eq!(digest.recommendations_generated, 1);
    assert!(digest.completed_at.is_some());
}

#[tokio::test]
async fn salvages_valid_recommendations_from_a_truncated_response() {
    let raw = r#"{"recommendations": [
        {"category": "marketing", "title": "Post weekly specials", "summary": "Regulars check on Mondays.", "impact": "medium",
         "citations": [{"article": "A1"}]},
        {"category": "operations", "title": "Batch supplier orders", "summary": "Fewer deliveries cut fees.", "impact": "high",
         "citations": [{"article": "A2"}]},
        {"category": "operations", "title": "Cross-train the"#;
    let h = harness(three_sources(), three_fetchers(), MockModel::new().respond(raw));

    let digest = completed(
        h.orchestrator
            .run_at(RunOptions::default(), first_of_month())
            .await
            .unwrap(),
    );

    assert_eq!(digest.recommendations_generated, 2);
    let recs = h.store.recommendations(digest.id).await.unwrap();
    let titles: Vec<_> = recs.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Post weekly specials", "Batch supplier orders"]);
}

#[tokio::test]
async fn retry_after_analysis_failure_leaves_one_set_of_rows() {
    let model = MockModel::new()
        .fail("upstream overloaded")
        .respond(model_response(&[
            ("Adopt a shared shift board", "operations", "high"),
            ("Refresh the menu photos", "marketing", "medium"),
        ]));
    let h = harness(three_sources(), three_fetchers(), model);

    let failed = match h
        .orchestrator
        .run_at(RunOptions::default(), first_of_month())
        .await
        .unwrap()
    {
        RunOutcome::Failed(digest) => digest,
        other => panic!("expected a failed run, got {other:?}"),
    };
    assert_eq!(failed.status, DigestStatus::Failed);
    assert!(failed
        .error_message
        .as_deref()
        .unwrap()
        .contains("upstream overloaded"));

    let runs = h.orchestrator.recent_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, JobStatus::Failed);

    let digest = completed(h.orchestrator.retry(failed.id).await.unwrap());
    assert_eq!(digest.id, failed.id);
    assert!(digest.error_message.is_none());

    // Fetched twice, stored once.
    assert_eq!(h.store.fetch_results(digest.id).await.unwrap().len(), 7);
    assert_eq!(h.store.recommendations(digest.id).await.unwrap().len(), 2);
    let task_drafts = h.store.task_drafts(digest.id).await.unwrap();
    assert_eq!(task_drafts.len() as i32, digest.task_drafts_created);

    let runs = h.orchestrator.recent_runs(10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].status, JobStatus::Completed);
    let details = runs[0].details.as_ref().unwrap();
    assert_eq!(details["digestId"], digest.id.to_string());
    assert_eq!(details["retry"], true);
    assert_eq!(details["recommendations"], 2);
}

#[tokio::test]
async fn retry_after_generation_failure_leaves_one_set_of_drafts() {
    let recs = [
        ("Refresh the menu photos", "marketing", "medium"),
        ("Adopt a shared shift board", "operations", "high"),
    ];
    let model = MockModel::new()
        .respond(model_response(&recs))
        .respond(model_response(&recs));
    // The second recommendation's drafts fail to insert on the first run.
    let h = harness_on(
        MemoryStore::with_sources(three_sources()).fail_draft_insert(1),
        three_fetchers(),
        model,
        MockDocuments::new(),
        settings(),
    );

    let failed = match h
        .orchestrator
        .run_at(RunOptions::default(), first_of_month())
        .await
        .unwrap()
    {
        RunOutcome::Failed(digest) => digest,
        other => panic!("expected a failed run, got {other:?}"),
    };
    assert!(failed
        .error_message
        .as_deref()
        .unwrap()
        .contains("draft insert failed"));

    // Nothing half-written for the recommendation whose insert failed.
    let stored = h.store.recommendations(failed.id).await.unwrap();
    let shift_board = stored
        .iter()
        .find(|r| r.category == "operations")
        .unwrap()
        .id;
    let task_drafts = h.store.task_drafts(failed.id).await.unwrap();
    assert_eq!(task_drafts.len(), 2);
    assert!(task_drafts.iter().all(|d| d.recommendation_id != shift_board));
    assert!(h.store.sop_drafts(failed.id).await.unwrap().is_empty());

    let digest = completed(h.orchestrator.retry(failed.id).await.unwrap());
    assert_eq!(digest.id, failed.id);
    assert_eq!(digest.recommendations_generated, 2);
    assert_eq!(digest.task_drafts_created, 4);
    assert_eq!(digest.sop_drafts_created, 1);

    let recs = h.store.recommendations(digest.id).await.unwrap();
    assert_eq!(recs.len(), 2);
    let task_drafts = h.store.task_drafts(digest.id).await.unwrap();
    assert_eq!(task_drafts.len(), 4);
    for rec in &recs {
        let owned = task_drafts
            .iter()
            .filter(|d| d.recommendation_id == rec.id)
            .count();
        assert_eq!(owned, 2, "{}", rec.title);
    }
    let sop_drafts = h.store.sop_drafts(digest.id).await.unwrap();
    assert_eq!(sop_drafts.len(), 1);
    assert_eq!(sop_drafts[0].sop_title.as_deref(), Some("Adopt a shared shift board"));
}

#[tokio::test]
async fn only_failed_digests_can_be_retried() {
    let model = MockModel::new().respond(model_response(&[("Plan", "operations", "high")]));
    let h = harness(three_sources(), three_fetchers(), model);
    let digest = completed(
        h.orchestrator
            .run_at(RunOptions::default(), first_of_month())
            .await
            .unwrap(),
    );

    let err = h.orchestrator.retry(digest.id).await.unwrap_err();
    assert!(matches!(err, DigestError::InvalidState(_)));
    assert_eq!(h.orchestrator.recent_runs(10).await.unwrap().len(), 1);

    let err = h.orchestrator.retry(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, DigestError::NotFound { .. }));
}

#[tokio::test]
async fn trigger_gates() {
    let disabled = DigestSettings::builder().enabled(false).build();
    let h = harness_with(
        three_sources(),
        three_fetchers(),
        MockModel::new(),
        MockDocuments::new(),
        disabled,
    );
    assert_eq!(
        h.orchestrator
            .run_at(RunOptions::default(), first_of_month())
            .await
            .unwrap(),
        RunOutcome::Skipped(SkipReason::Disabled)
    );

    let model = MockModel::new()
        .respond(model_response(&[("Plan", "operations", "high")]))
        .respond(model_response(&[("Plan again", "operations", "high")]));
    let h = harness(three_sources(), three_fetchers(), model);

    let second_of_month = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
    assert_eq!(
        h.orchestrator
            .run_at(RunOptions::default(), second_of_month)
            .await
            .unwrap(),
        RunOutcome::Skipped(SkipReason::NotScheduledToday)
    );

    let first = completed(
        h.orchestrator
            .run_at(RunOptions::default(), first_of_month())
            .await
            .unwrap(),
    );
    assert_eq!(
        h.orchestrator
            .run_at(RunOptions::default(), first_of_month())
            .await
            .unwrap(),
        RunOutcome::Skipped(SkipReason::AlreadyCompleted {
            digest_id: first.id
        })
    );

    // Forcing bypasses the day gate and the once-per-period rule.
    let forced = completed(
        h.orchestrator
            .run_at(RunOptions { force: true }, second_of_month)
            .await
            .unwrap(),
    );
    assert_ne!(forced.id, first.id);
    assert_eq!(forced.period, "2025-06");
}

#[tokio::test]
async fn in_flight_digest_blocks_even_forced_runs() {
    let h = harness(three_sources(), three_fetchers(), MockModel::new());
    let stuck = h.store.create_digest("2025-06").await.unwrap();
    h.store
        .transition(stuck.id, DigestStatus::Fetching, None)
        .await
        .unwrap();

    assert_eq!(
        h.orchestrator
            .run_at(RunOptions { force: true }, first_of_month())
            .await
            .unwrap(),
        RunOutcome::Skipped(SkipReason::AlreadyInFlight {
            digest_id: stuck.id
        })
    );

    // After a restart the stuck digest becomes retryable.
    assert_eq!(h.orchestrator.recover_interrupted().await.unwrap(), 1);
    let digest = h.store.get_digest(stuck.id).await.unwrap();
    assert_eq!(digest.status, DigestStatus::Failed);
    assert_eq!(digest.error_message.as_deref(), Some("interrupted while fetching"));
}

#[tokio::test]
async fn no_articles_means_no_model_call() {
    let h = harness(Vec::new(), MockFetcher::new(), MockModel::new());

    let digest = completed(
        h.orchestrator
            .run_at(RunOptions::default(), first_of_month())
            .await
            .unwrap(),
    );

    assert_eq!(digest.sources_fetched, 0);
    assert_eq!(digest.recommendations_generated, 0);
    assert!(h.model.requests().is_empty());
}

#[tokio::test]
async fn slow_source_is_cut_off_by_the_fetch_timeout() {
    let sources = vec![
        source("Trade Weekly", RSS, FetchMethod::Rss),
        source("Company Blog", PAGE, FetchMethod::Web),
    ];
    let fetcher = MockFetcher::new()
        .on_source(RSS, articles(RSS, 3))
        .slow(PAGE, Duration::from_secs(5), articles(PAGE, 2));
    let model = MockModel::new().respond(model_response(&[("Plan", "operations", "high")]));
    let h = harness(sources, fetcher, model);

    let digest = completed(
        h.orchestrator
            .run_at(RunOptions::default(), first_of_month())
            .await
            .unwrap(),
    );

    assert_eq!(digest.sources_fetched, 1);
    assert_eq!(h.store.fetch_results(digest.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn drafts_are_generated_once_per_recommendation() {
    let model = MockModel::new().respond(model_response(&[
        ("Adopt a shared shift board", "operations", "high"),
        ("Refresh the menu photos", "marketing", "medium"),
        ("Try a new font", "branding", "low"),
    ]));
    let h = harness(three_sources(), three_fetchers(), model);

    let digest = completed(
        h.orchestrator
            .run_at(RunOptions::default(), first_of_month())
            .await
            .unwrap(),
    );

    // Two action items each for the two recommendations at or above medium
    // impact; only the procedural category gets a new SOP draft.
    assert_eq!(digest.task_drafts_created, 4);
    assert_eq!(digest.sop_drafts_created, 1);

    let again = h.orchestrator.generate_stage(&digest).await.unwrap();
    assert_eq!(again.task_drafts_created, 4);
    assert_eq!(again.sop_drafts_created, 1);
    assert_eq!(h.store.task_drafts(digest.id).await.unwrap().len(), 4);
    assert_eq!(h.store.sop_drafts(digest.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn delivery_creates_a_document_and_posts_a_summary() {
    let model = MockModel::new().respond(model_response(&[(
        "Adopt a shared shift board",
        "operations",
        "high",
    )]));
    let h = harness(three_sources(), three_fetchers(), model);

    let digest = completed(
        h.orchestrator
            .run_at(RunOptions::default(), first_of_month())
            .await
            .unwrap(),
    );
    h.orchestrator.delivery().flush().await;

    assert_eq!(digest.google_doc_url.as_deref(), Some("https://docs.example/doc-1"));
    let created = h.documents.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0.title, "Content Intelligence Digest — 2025-06");

    let messages = h.relay.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "ops");
    assert!(messages[0].1.contains("Adopt a shared shift board"));
    assert!(messages[0].1.contains("Full report: https://docs.example/doc-1"));
}

#[tokio::test]
async fn delivery_failure_still_completes() {
    let model = MockModel::new().respond(model_response(&[("Plan", "operations", "high")]));
    let h = harness_with(
        three_sources(),
        three_fetchers(),
        model,
        MockDocuments::failing(),
        settings(),
    );

    let digest = completed(
        h.orchestrator
            .run_at(RunOptions::default(), first_of_month())
            .await
            .unwrap(),
    );
    h.orchestrator.delivery().flush().await;

    assert!(digest.google_doc_url.is_none());
    let messages = h.relay.messages();
    assert_eq!(messages.len(), 1);
    assert!(!messages[0].1.contains("Full report"));
}

#[tokio::test]
async fn prompt_stays_within_the_token_budget() {
    let long: Vec<_> = articles(RSS, 10)
        .into_iter()
        .map(|mut a| {
            a.content = "word ".repeat(2_000);
            a
        })
        .collect();
    let sources = vec![source("Trade Weekly", RSS, FetchMethod::Rss)];
    let fetcher = MockFetcher::new().on_source(RSS, long);
    let model = MockModel::new().respond(model_response(&[("Plan", "operations", "high")]));
    let budget = 6_000;
    let tight = DigestSettings::builder()
        .token_budget(budget)
        .fetch_timeout(Duration::from_millis(500))
        .build();
    let h = harness_with(sources, fetcher, model, MockDocuments::new(), tight);

    completed(
        h.orchestrator
            .run_at(RunOptions::default(), first_of_month())
            .await
            .unwrap(),
    );

    let requests = h.model.requests();
    assert_eq!(requests.len(), 1);
    let chars = requests[0].system.chars().count() + requests[0].user.chars().count();
    assert!(chars.div_ceil(4) <= budget);
    assert!(requests[0].user.contains("dropped to fit the length limit"));
}
