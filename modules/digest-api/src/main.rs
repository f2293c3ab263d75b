use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ai_client::Claude;
use digest_api::{router, AppState};
use digest_common::Config;
use digest_pipeline::{
    Collaborators, DigestStore, Orchestrator, PgDigestStore, RelayQueue, ReviewService,
    RunOptions, RunOutcome, SourceAdmin,
};
use digest_sources::FetcherRegistry;

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("digest=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

/// Re-check on every tick whether a scheduled run is due.
fn spawn_trigger(orchestrator: Arc<Orchestrator>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match orchestrator.run(RunOptions::default()).await {
                Ok(RunOutcome::Skipped(reason)) => {
                    tracing::debug!(?reason, "Scheduled digest skipped")
                }
                Ok(RunOutcome::Completed(digest)) => info!(
                    digest_id = %digest.id,
                    period = %digest.period,
                    "Scheduled digest completed"
                ),
                Ok(RunOutcome::Failed(digest)) => warn!(
                    digest_id = %digest.id,
                    error = digest.error_message.as_deref().unwrap_or_default(),
                    "Scheduled digest failed"
                ),
                Err(e) => error!(error = %e, "Scheduled digest could not start"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let config = Config::from_env()?;
    config.log_redacted();
    let settings = config.settings.clone();

    // Database
    let pg = PgDigestStore::connect(&config.database_url).await?;
    pg.migrate().await?;
    let store: Arc<dyn DigestStore> = Arc::new(pg);

    // Fetching, analysis and delivery
    let collaborators = Collaborators::from_config(&config)?;
    let registry = Arc::new(FetcherRegistry::new(settings.fetch_timeout)?);
    let model = Arc::new(
        Claude::new(config.anthropic_api_key.as_str(), config.model.as_str())
            .with_timeout(settings.model_timeout),
    );
    let relay = RelayQueue::start(collaborators.relay.clone());

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        registry.clone(),
        model,
        &collaborators,
        relay,
        settings.clone(),
    ));

    let recovered = orchestrator.recover_interrupted().await?;
    if recovered > 0 {
        warn!(count = recovered, "Marked interrupted digests as failed");
    }

    spawn_trigger(orchestrator.clone(), config.trigger_interval);

    let state = Arc::new(AppState {
        review: ReviewService::new(
            store.clone(),
            collaborators.tasks.clone(),
            collaborators.documents.clone(),
            settings.docs_folder_id.clone(),
        ),
        sources: SourceAdmin::new(store.clone(), registry, settings.fetch_timeout),
        orchestrator,
        store,
    });

    let addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Digest API listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
