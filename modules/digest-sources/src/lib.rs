//! Content fetchers for the digest pipeline.
//!
//! One strategy per `FetchMethod`, all behind `SourceFetcher`. The
//! `FetcherRegistry` dispatches by method, applies the per-source limits and
//! turns ordinary failures into an empty result so one bad source never
//! interrupts a run.

mod feed;
mod links;
mod page;
mod readability;
mod reddit;
mod registry;
mod youtube;

pub use feed::FeedFetcher;
pub use links::extract_links_by_pattern;
pub use page::PageFetcher;
pub use reddit::ForumFetcher;
pub use registry::{FetchLimits, FetcherRegistry, SourceFetcher};
pub use youtube::VideoChannelFetcher;

use std::time::Duration;

pub(crate) const USER_AGENT: &str = "content-digest/0.1 (+digest pipeline)";
/// Hard cap on normalized article content.
pub const MAX_CONTENT_CHARS: usize = 20_000;

/// Shared HTTP client settings for every fetcher.
pub(crate) fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    use anyhow::Context;
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build fetcher HTTP client")
}
