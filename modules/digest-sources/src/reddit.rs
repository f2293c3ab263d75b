// Forum fetcher: subreddit listings through the public JSON endpoint.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use digest_common::{Article, Source};

use crate::readability::fragment_to_text;
use crate::registry::{FetchLimits, SourceFetcher};

const REDDIT_BASE: &str = "https://www.reddit.com";
const DEFAULT_SORT: &str = "top";
const DEFAULT_WINDOW: &str = "month";

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Deserialize)]
struct Child {
    data: Post,
}

#[derive(Deserialize)]
struct Post {
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    created_utc: Option<f64>,
    #[serde(default)]
    stickied: bool,
    #[serde(default)]
    score: i64,
}

pub struct ForumFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl ForumFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: crate::http_client(timeout)?,
            base_url: REDDIT_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn listing_url(&self, source: &Source) -> Result<String> {
        let subreddit = source
            .config_str("subreddit")
            .map(|s| s.trim_start_matches("r/").to_string())
            .or_else(|| subreddit_from_url(&source.url))
            .ok_or_else(|| anyhow!("No subreddit in {} or fetchConfig", source.url))?;
        let sort = source.config_str("sort").unwrap_or(DEFAULT_SORT);
        let window = source.config_str("timeWindow").unwrap_or(DEFAULT_WINDOW);
        let limit = FetchLimits::for_source(source).max_items;

        Ok(format!(
            "{}/r/{}/{}.json?limit={}&t={}",
            self.base_url, subreddit, sort, limit, window
        ))
    }
}

#[async_trait]
impl SourceFetcher for ForumFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<Article>> {
        let listing_url = self.listing_url(source)?;
        let min_score = source.config_i64("minScore");

        let listing: Listing = self
            .client
            .get(&listing_url)
            .send()
            .await
            .context("Listing fetch failed")?
            .error_for_status()
            .context("Listing returned an error status")?
            .json()
            .await
            .context("Failed to parse listing JSON")?;

        let articles: Vec<Article> = listing
            .data
            .children
            .into_iter()
            .map(|c| c.data)
            .filter(|p| !p.stickied)
            .filter(|p| min_score.map_or(true, |min| p.score >= min))
            .map(|p| self.to_article(p))
            .collect();

        debug!(listing_url, posts = articles.len(), "reddit: parsed listing");
        Ok(articles)
    }
}

impl ForumFetcher {
    fn to_article(&self, post: Post) -> Article {
        let url = if post.permalink.is_empty() {
            post.url.unwrap_or_default()
        } else {
            format!("{}{}", self.base_url, post.permalink)
        };
        let published_at = post
            .created_utc
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts as i64, 0));

        Article {
            url,
            title: post.title.trim().to_string(),
            content: fragment_to_text(&post.selftext),
            published_at,
        }
    }
}

fn subreddit_from_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let mut segments = parsed.path_segments()?;
    while let Some(segment) = segments.next() {
        if segment == "r" {
            return segments.next().filter(|s| !s.is_empty()).map(str::to_string);
        }
    }
    None
}
