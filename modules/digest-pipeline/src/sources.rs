//! Source registry administration and single-source dry runs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use digest_common::{Article, DigestError, NewSource, Result, Source, SourcePatch};
use digest_sources::FetcherRegistry;

use crate::store::DigestStore;

/// Result of fetching one source without persisting anything.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceTestReport {
    pub source: Source,
    pub articles: Vec<Article>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

pub struct SourceAdmin {
    store: Arc<dyn DigestStore>,
    registry: Arc<FetcherRegistry>,
    timeout: Duration,
}

impl SourceAdmin {
    pub fn new(store: Arc<dyn DigestStore>, registry: Arc<FetcherRegistry>, timeout: Duration) -> Self {
        Self {
            store,
            registry,
            timeout,
        }
    }

    pub async fn list(&self) -> Result<Vec<Source>> {
        self.store.list_sources().await
    }

    pub async fn get(&self, id: Uuid) -> Result<Source> {
        self.store.get_source(id).await
    }

    pub async fn create(&self, new: NewSource) -> Result<Source> {
        let now = Utc::now();
        let source = Source {
            id: Uuid::new_v4(),
            name: new.name.trim().to_string(),
            url: new.url.trim().to_string(),
            tier: new.tier,
            category: new.category.trim().to_string(),
            fetch_method: new.fetch_method,
            fetch_config: fetch_config(new.fetch_config)?,
            active: new.active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };
        validate(&source)?;

        let created = self.store.insert_source(&source).await?;
        info!(source_id = %created.id, source = created.name.as_str(), method = %created.fetch_method, "Source created");
        Ok(created)
    }

    pub async fn update(&self, id: Uuid, patch: SourcePatch) -> Result<Source> {
        let mut source = self.store.get_source(id).await?;
        if let Some(name) = patch.name {
            source.name = name.trim().to_string();
        }
        if let Some(url) = patch.url {
            source.url = url.trim().to_string();
        }
        if let Some(tier) = patch.tier {
            source.tier = tier;
        }
        if let Some(category) = patch.category {
            source.category = category.trim().to_string();
        }
        if let Some(method) = patch.fetch_method {
            source.fetch_method = method;
        }
        if patch.fetch_config.is_some() {
            source.fetch_config = fetch_config(patch.fetch_config)?;
        }
        if let Some(active) = patch.active {
            source.active = active;
        }
        source.updated_at = Utc::now();
        validate(&source)?;

        let updated = self.store.update_source(&source).await?;
        info!(source_id = %id, active = updated.active, "Source updated");
        Ok(updated)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.store.delete_source(id).await?;
        info!(source_id = %id, "Source deleted");
        Ok(())
    }

    /// Run the source's fetcher once with the per-source timeout. The fetch
    /// error, if any, is reported rather than returned.
    pub async fn test(&self, id: Uuid) -> Result<SourceTestReport> {
        let source = self.store.get_source(id).await?;
        let started = Instant::now();

        let (articles, error) = match tokio::time::timeout(self.timeout, self.registry.probe(&source)).await {
            Ok(Ok(articles)) => (articles, None),
            Ok(Err(e)) => (Vec::new(), Some(format!("{e:#}"))),
            Err(_) => (
                Vec::new(),
                Some(format!("timed out after {}s", self.timeout.as_secs())),
            ),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &error {
            Some(e) => warn!(source_id = %id, source = source.name.as_str(), error = e.as_str(), "Source test failed"),
            None => info!(source_id = %id, source = source.name.as_str(), articles = articles.len(), elapsed_ms, "Source test fetched"),
        }

        Ok(SourceTestReport {
            source,
            articles,
            elapsed_ms,
            error,
        })
    }
}

/// `null` or absent becomes `{}`; anything but an object is rejected.
fn fetch_config(value: Option<Value>) -> Result<Value> {
    match value {
        None | Some(Value::Null) => Ok(Value::Object(Default::default())),
        Some(Value::Object(map)) => Ok(Value::Object(map)),
        Some(other) => Err(DigestError::Validation(format!(
            "fetchConfig must be a JSON object, got {other}"
        ))),
    }
}

fn validate(source: &Source) -> Result<()> {
    if source.name.is_empty() {
        return Err(DigestError::Validation("name is required".to_string()));
    }
    let url = Url::parse(&source.url)
        .map_err(|e| DigestError::Validation(format!("url {:?} is invalid: {e}", source.url)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DigestError::Validation(format!(
            "url must be http or https, got {}",
            url.scheme()
        )));
    }
    Ok(())
}
