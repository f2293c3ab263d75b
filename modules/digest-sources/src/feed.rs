// RSS / Atom / JSON Feed fetcher.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use digest_common::{Article, Source};

use crate::readability::fragment_to_text;
use crate::registry::SourceFetcher;

pub struct FeedFetcher {
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: crate::http_client(timeout)?,
        })
    }
}

#[async_trait]
impl SourceFetcher for FeedFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<Article>> {
        fetch_feed(&self.client, &source.url).await
    }
}

/// Download and parse a feed. Shared with the video channel fetcher, whose
/// listings are Atom feeds.
pub(crate) async fn fetch_feed(client: &reqwest::Client, feed_url: &str) -> Result<Vec<Article>> {
    let resp = client
        .get(feed_url)
        .send()
        .await
        .context("Feed fetch failed")?
        .error_for_status()
        .context("Feed returned an error status")?;

    let bytes = resp.bytes().await.context("Failed to read feed body")?;
    let articles = parse_feed(&bytes)?;

    debug!(feed_url, items = articles.len(), "feed: parsed");
    Ok(articles)
}

/// Parse feed bytes into articles. Entries without a link are skipped.
/// Content prefers the full body, then the summary, then the media
/// description (video feeds carry the text there).
pub(crate) fn parse_feed(bytes: &[u8]) -> Result<Vec<Article>> {
    let feed = feed_rs::parser::parse(bytes).context("Failed to parse RSS/Atom feed")?;

    let articles = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;

            let published_at = entry.published.or(entry.updated);

            let body = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .or_else(|| {
                    entry
                        .media
                        .iter()
                        .find_map(|m| m.description.as_ref().map(|d| d.content.clone()))
                })
                .unwrap_or_default();

            Some(Article {
                url,
                title: entry.title.map(|t| t.content.trim().to_string()).unwrap_or_default(),
                content: fragment_to_text(&body),
                published_at,
            })
        })
        .collect();

    Ok(articles)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Ops Weekly</title>
  <item>
    <title>Scheduling tools compared</title>
    <link>https://ops.example/scheduling</link>
    <description>Plain summary text</description>
    <pubDate>Tue, 07 Oct 2025 09:00:00 GMT</pubDate>
  </item>
  <item>
    <title>No link here</title>
    <guid isPermaLink="false">abc-123</guid>
  </item>
</channel></rss>"#;

    #[test]
    fn parses_rss_items_with_links() {
        let articles = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Scheduling tools compared");
        assert_eq!(articles[0].url, "https://ops.example/scheduling");
        assert_eq!(articles[0].content, "Plain summary text");
        assert!(articles[0].published_at.is_some());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_feed(b"definitely not xml").is_err());
    }
}
