use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use digest_api::{router, AppState};
use digest_common::{DigestSettings, FetchMethod, Impact};
use digest_pipeline::drafts::task_drafts;
use digest_pipeline::testing::{
    articles, extracted, model_response, settings, source, MemoryStore, MockDocuments,
    MockFetcher, MockModel, MockRelay, MockTaskStore, MockTemplateStore,
};
use digest_pipeline::{
    Collaborators, DigestStore, Orchestrator, RelayQueue, ReviewService, SourceAdmin,
};
use digest_sources::FetcherRegistry;

const FEED_URL: &str = "https://news.example/feed";

struct TestApp {
    app: Router,
    store: Arc<MemoryStore>,
}

fn test_app(settings: DigestSettings) -> TestApp {
    let store = Arc::new(MemoryStore::with_sources(vec![source(
        "Industry news",
        FEED_URL,
        FetchMethod::Rss,
    )]));
    let fetcher = MockFetcher::new().on_source(FEED_URL, articles(FEED_URL, 3));
    let registry = Arc::new(
        FetcherRegistry::new(Duration::from_secs(1))
            .unwrap()
            .with(FetchMethod::Rss, Arc::new(fetcher)),
    );
    let model = Arc::new(
        MockModel::new().respond(model_response(&[("Adopt a shift board", "operations", "high")])),
    );
    let collaborators = Collaborators {
        tasks: Arc::new(MockTaskStore::new()),
        templates: Arc::new(MockTemplateStore::new()),
        documents: Arc::new(MockDocuments::new()),
        relay: Arc::new(MockRelay::new()),
    };
    let relay = RelayQueue::start(collaborators.relay.clone());
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        registry.clone(),
        model,
        &collaborators,
        relay,
        settings.clone(),
    ));

    let state = Arc::new(AppState {
        store: store.clone(),
        review: ReviewService::new(
            store.clone(),
            collaborators.tasks.clone(),
            collaborators.documents.clone(),
            None,
        ),
        sources: SourceAdmin::new(store.clone(), registry, settings.fetch_timeout),
        orchestrator,
    });
    TestApp {
        app: router(state),
        store,
    }
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
    };
    (status, value)
}

/// A digest holding the two task drafts of one recommendation.
async fn seeded_drafts(store: &MemoryStore) -> (Uuid, Vec<Uuid>) {
    let digest = store.create_digest("2025-06").await.unwrap();
    let recs = store
        .insert_recommendations(
            digest.id,
            &[extracted("Adopt a shift board", "operations", Impact::High)],
        )
        .await
        .unwrap();
    let drafts = store
        .insert_task_drafts(digest.id, &task_drafts(&recs[0]))
        .await
        .unwrap();
    (digest.id, drafts.iter().map(|d| d.id).collect())
}

#[tokio::test]
async fn health_is_ok() {
    let t = test_app(settings());
    let (status, body) = send(&t.app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));
}

#[tokio::test]
async fn unknown_digest_is_a_json_404() {
    let t = test_app(settings());
    let uri = format!("/api/digests/{}", Uuid::new_v4());
    let (status, body) = send(&t.app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn last_possible_page_is_empty() {
    let t = test_app(settings());
    t.store.create_digest("2025-06").await.unwrap();
    let (status, body) = send(
        &t.app,
        Method::GET,
        "/api/digests?page=4294967295&perPage=100",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"], json!([]));
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn forced_run_is_accepted_and_completes_in_background() {
    let t = test_app(settings());
    let (status, body) = send(
        &t.app,
        Method::POST,
        "/api/digests/run",
        Some(json!({ "force": true })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "started");
    let id = body["digest"]["id"].as_str().unwrap().to_string();

    let uri = format!("/api/digests/{id}");
    let mut detail = Value::Null;
    for _ in 0..100 {
        let (_, body) = send(&t.app, Method::GET, &uri, None).await;
        if body["status"] == "completed" || body["status"] == "failed" {
            detail = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(detail["status"], "completed");
    assert_eq!(detail["sourcesFetched"], 1);
    assert_eq!(detail["recommendations"].as_array().unwrap().len(), 1);

    // the job row is closed just after the digest reaches completed
    let mut jobs = Value::Null;
    for _ in 0..100 {
        let (status, body) = send(&t.app, Method::GET, "/api/jobs?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        if body[0]["status"] != "running" {
            jobs = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(jobs.as_array().unwrap().len(), 1);
    assert_eq!(jobs[0]["status"], "completed");
    assert_eq!(jobs[0]["details"]["digestId"], json!(id));
}

#[tokio::test]
async fn disabled_run_reports_skip() {
    let t = test_app(DigestSettings::builder().enabled(false).build());
    let (status, body) = send(&t.app, Method::POST, "/api/digests/run", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "skipped");
    assert_eq!(body["skip"]["reason"], "disabled");

    let (_, page) = send(&t.app, Method::GET, "/api/digests", None).await;
    assert_eq!(page["total"], 0);
}

#[tokio::test]
async fn retrying_a_digest_that_has_not_failed_conflicts() {
    let t = test_app(settings());
    let digest = t.store.create_digest("2025-06").await.unwrap();
    let uri = format!("/api/digests/{}/retry", digest.id);
    let (status, body) = send(&t.app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn approving_twice_conflicts() {
    let t = test_app(settings());
    let (_, drafts) = seeded_drafts(&t.store).await;
    let uri = format!("/api/task-drafts/{}/approve", drafts[0]);

    let (status, body) = send(
        &t.app,
        Method::POST,
        &uri,
        Some(json!({ "projectId": "proj-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");
    assert_eq!(body["taskId"], "task-1");

    let (status, _) = send(
        &t.app,
        Method::POST,
        &uri,
        Some(json!({ "projectId": "proj-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn approving_without_project_is_unprocessable() {
    let t = test_app(settings());
    let (_, drafts) = seeded_drafts(&t.store).await;
    let uri = format!("/api/task-drafts/{}/approve", drafts[0]);
    let (status, _) = send(&t.app, Method::POST, &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let draft = t.store.get_task_draft(drafts[0]).await.unwrap();
    assert_eq!(draft.status, digest_common::TaskDraftStatus::Pending);
}

#[tokio::test]
async fn bulk_reject_without_ids_takes_every_pending_draft() {
    let t = test_app(settings());
    let (digest_id, _) = seeded_drafts(&t.store).await;
    let uri = format!("/api/digests/{digest_id}/task-drafts/reject");
    let (status, body) = send(&t.app, Method::POST, &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["succeeded"].as_array().unwrap().len(), 2);
    assert!(body["failed"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn source_crud_validates_input() {
    let t = test_app(settings());

    let (status, _) = send(
        &t.app,
        Method::POST,
        "/api/sources",
        Some(json!({ "name": "Bad", "url": "ftp://files.example", "fetchMethod": "rss" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, created) = send(
        &t.app,
        Method::POST,
        "/api/sources",
        Some(json!({ "name": "Trade blog", "url": "https://blog.example", "fetchMethod": "web" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["fetchConfig"], json!({}));
    let uri = format!("/api/sources/{}", created["id"].as_str().unwrap());

    let (status, _) = send(&t.app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&t.app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn source_test_reports_articles_without_persisting() {
    let t = test_app(settings());
    let id = t.store.list_sources().await.unwrap()[0].id;
    let uri = format!("/api/sources/{id}/test");
    let (status, body) = send(&t.app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["articles"].as_array().unwrap().len(), 3);
    assert!(body["error"].is_null());

    let (_, page) = send(&t.app, Method::GET, "/api/digests", None).await;
    assert_eq!(page["total"], 0);
}
