use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use digest_common::text::truncate_chars;
use digest_common::{Article, FetchMethod, Source};

use crate::{FeedFetcher, ForumFetcher, PageFetcher, VideoChannelFetcher, MAX_CONTENT_CHARS};

/// Default number of articles kept per source.
pub const MAX_ARTICLES_PER_SOURCE: usize = 10;
const MAX_ARTICLES_CEILING: usize = 25;
const DEFAULT_MAX_AGE_DAYS: i64 = 45;

// ---------------------------------------------------------------------------
// SourceFetcher
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch the most recent articles for `source`.
    async fn fetch(&self, source: &Source) -> Result<Vec<Article>>;
}

// ---------------------------------------------------------------------------
// FetchLimits
// ---------------------------------------------------------------------------

/// Per-source bounds, read from `fetchConfig.limit` and `fetchConfig.maxAgeDays`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub max_items: usize,
    pub max_age_days: i64,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_items: MAX_ARTICLES_PER_SOURCE,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }
}

impl FetchLimits {
    pub fn for_source(source: &Source) -> Self {
        let max_items = source
            .config_i64("limit")
            .map(|n| n.clamp(1, MAX_ARTICLES_CEILING as i64) as usize)
            .unwrap_or(MAX_ARTICLES_PER_SOURCE);
        let max_age_days = source
            .config_i64("maxAgeDays")
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_MAX_AGE_DAYS);
        Self {
            max_items,
            max_age_days,
        }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(self.max_age_days)
    }

    /// Normalize a fetcher's raw output: drop stale and duplicate items, fill
    /// empty titles, cap content, keep the newest `max_items` (undated last).
    pub fn apply(&self, articles: Vec<Article>, now: DateTime<Utc>) -> Vec<Article> {
        let cutoff = self.cutoff(now);
        let mut seen = HashSet::new();

        let mut kept: Vec<Article> = articles
            .into_iter()
            .filter(|a| !a.url.is_empty())
            .filter(|a| a.published_at.map_or(true, |d| d >= cutoff))
            .filter(|a| seen.insert(a.url.clone()))
            .map(|mut a| {
                if a.title.trim().is_empty() {
                    a.title = a.url.clone();
                }
                if a.content.chars().count() > MAX_CONTENT_CHARS {
                    a.content = truncate_chars(&a.content, MAX_CONTENT_CHARS).to_string();
                }
                a
            })
            .collect();

        // Newest first; `None` sorts below every date.
        kept.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        kept.truncate(self.max_items);
        kept
    }
}

// ---------------------------------------------------------------------------
// FetcherRegistry
// ---------------------------------------------------------------------------

/// Dispatches to the fetcher registered for a source's `FetchMethod`.
///
/// `fetch` never fails for ordinary network or parse problems: the error is
/// logged and the source contributes nothing. Use `probe` to see the error.
pub struct FetcherRegistry {
    rss: Arc<dyn SourceFetcher>,
    youtube: Arc<dyn SourceFetcher>,
    reddit: Arc<dyn SourceFetcher>,
    web: Arc<dyn SourceFetcher>,
}

impl FetcherRegistry {
    /// Production fetchers, each with its own HTTP timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            rss: Arc::new(FeedFetcher::new(timeout)?),
            youtube: Arc::new(VideoChannelFetcher::new(timeout)?),
            reddit: Arc::new(ForumFetcher::new(timeout)?),
            web: Arc::new(PageFetcher::new(timeout)?),
        })
    }

    /// Swap the strategy for one method.
    pub fn with(mut self, method: FetchMethod, fetcher: Arc<dyn SourceFetcher>) -> Self {
        match method {
            FetchMethod::Rss => self.rss = fetcher,
            FetchMethod::Youtube => self.youtube = fetcher,
            FetchMethod::Reddit => self.reddit = fetcher,
            FetchMethod::Web => self.web = fetcher,
        }
        self
    }

    fn strategy(&self, method: FetchMethod) -> &Arc<dyn SourceFetcher> {
        match method {
            FetchMethod::Rss => &self.rss,
            FetchMethod::Youtube => &self.youtube,
            FetchMethod::Reddit => &self.reddit,
            FetchMethod::Web => &self.web,
        }
    }

    /// Run the matching strategy and surface its error. Used for dry runs.
    pub async fn probe(&self, source: &Source) -> Result<Vec<Article>> {
        let raw = self.strategy(source.fetch_method).fetch(source).await?;
        Ok(FetchLimits::for_source(source).apply(raw, Utc::now()))
    }
}

#[async_trait]
impl SourceFetcher for FetcherRegistry {
    async fn fetch(&self, source: &Source) -> Result<Vec<Article>> {
        match self.probe(source).await {
            Ok(articles) => {
                info!(
                    source = source.name.as_str(),
                    method = %source.fetch_method,
                    articles = articles.len(),
                    "Source fetched"
                );
                Ok(articles)
            }
            Err(e) => {
                warn!(
                    source = source.name.as_str(),
                    method = %source.fetch_method,
                    error = %e,
                    "Source fetch failed, skipping"
                );
                Ok(Vec::new())
            }
        }
    }
}
