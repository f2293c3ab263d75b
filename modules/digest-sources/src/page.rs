// Web page fetcher: a single article, or an index page whose matching links
// are each fetched as an article.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use digest_common::{Article, Source};

use crate::links::extract_links_by_pattern;
use crate::readability::{extract_published_at, extract_title, html_to_markdown};
use crate::registry::{FetchLimits, SourceFetcher};

const LINK_CONCURRENCY: usize = 3;

pub struct PageFetcher {
    client: reqwest::Client,
}

impl PageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: crate::http_client(timeout)?,
        })
    }

    async fn get_html(&self, url: &str) -> Result<String> {
        self.client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Page fetch failed: {url}"))?
            .error_for_status()?
            .text()
            .await
            .context("Failed to read page body")
    }

    async fn fetch_article(&self, url: &str) -> Result<Article> {
        let html = self.get_html(url).await?;
        Ok(page_to_article(url, &html))
    }
}

fn page_to_article(url: &str, html: &str) -> Article {
    Article {
        url: url.to_string(),
        title: extract_title(html).unwrap_or_default(),
        content: html_to_markdown(html.as_bytes(), Some(url)),
        published_at: extract_published_at(html),
    }
}

#[async_trait]
impl SourceFetcher for PageFetcher {
    async fn fetch(&self, source: &Source) -> Result<Vec<Article>> {
        let Some(pattern) = source.config_str("linkPattern") else {
            return Ok(vec![self.fetch_article(&source.url).await?]);
        };

        let index = self.get_html(&source.url).await?;
        let limit = FetchLimits::for_source(source).max_items;
        let links = extract_links_by_pattern(&index, &source.url, pattern, limit);
        debug!(url = source.url.as_str(), pattern, links = links.len(), "web: following links");

        let articles: Vec<Article> = stream::iter(links)
            .map(|link| async move {
                match self.fetch_article(&link).await {
                    Ok(article) => Some(article),
                    Err(e) => {
                        warn!(url = link.as_str(), error = %e, "web: linked page failed");
                        None
                    }
                }
            })
            .buffered(LINK_CONCURRENCY)
            .filter_map(|a| async move { a })
            .collect()
            .await;

        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_from_page_metadata() {
        let html = r#"<html><head><title>Quarterly staffing notes</title>
<meta property="article:published_time" content="2025-09-30T12:00:00Z"></head>
<body><article><p>Staffing levels rose across the region.</p></article></body></html>"#;
        let article = page_to_article("https://news.example/staffing", html);
        assert_eq!(article.title, "Quarterly staffing notes");
        assert!(article.published_at.is_some());
        assert_eq!(article.url, "https://news.example/staffing");
    }
}
