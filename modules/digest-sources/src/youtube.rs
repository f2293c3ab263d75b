// Video channel fetcher: resolves a channel id and reads the channel's
// public Atom listing.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use digest_common::{Article, Source};

use crate::feed::fetch_feed;
use crate::registry::SourceFetcher;

const FEED_BASE: &str = "https://www.youtube.com/feeds/videos.xml";

pub struct VideoChannelFetcher {
    client: reqwest::Client,
    feed_base: String,
}

impl VideoChannelFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: crate::http_client(timeout)?,
            feed_base: FEED_BASE.to_string(),
        })
    }

    /// Point the listing endpoint elsewhere (tests, mirrors).
    pub fn with_feed_base(mut self, base: impl Into<String>) -> Self {
        self.feed_base = base.into();
        self
    }

    async fn resolve_channel_id(&self, source: &Source) -> Result<String> {
        if let Some(id) = source.config_str("channelId") {
            return Ok(id.to_string());
        }
        if let Some(id) = channel_id_from_url(&source.url) {
            return Ok(id);
        }

        // Handle-style URLs (`/@name`) need the channel page to find the id.
        debug!(url = source.url.as_str(), "youtube: resolving channel id from page");
        let html = self
            .client
            .get(&source.url)
            .send()
            .await
            .context("Channel page fetch failed")?
            .error_for_status()?
            .text()
            .await
            .context("Failed to read channel page")?;

        channel_id_from_html(&html)
            .ok_or_else(|| anyhow!("No channel id found for {}", source.url))
    }
}

#[async_trait]
impl SourceFetcher for VideoChannelFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<Article>> {
        let channel_id = self.resolve_channel_id(source).await?;
        let feed_url = format!("{}?channel_id={}", self.feed_base, channel_id);
        fetch_feed(&self.client, &feed_url).await
    }
}

fn channel_id_from_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    if let Some((_, id)) = parsed.query_pairs().find(|(k, _)| k == "channel_id") {
        return Some(id.into_owned());
    }
    let mut segments = parsed.path_segments()?;
    while let Some(segment) = segments.next() {
        if segment == "channel" {
            return segments.next().filter(|s| !s.is_empty()).map(str::to_string);
        }
    }
    None
}

fn channel_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""(?:externalId|channelId)"\s*:\s*"(UC[\w-]{22})""#)
            .expect("valid channel id regex")
    })
}

fn channel_id_from_html(html: &str) -> Option<String> {
    channel_id_re()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
