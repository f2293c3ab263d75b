use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::debug;

use super::types::{MessagesRequest, MessagesResponse};

pub(crate) const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
pub(crate) const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

pub(crate) struct ClaudeClient {
    http: reqwest::Client,
    messages_url: String,
}

impl ClaudeClient {
    pub fn new(api_key: &str, base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(api_key).context("API key is not a valid header")?;
        key.set_sensitive(true);
        headers.insert("x-api-key", key);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("Failed to build Claude HTTP client")?;

        let base = base_url.unwrap_or(ANTHROPIC_API_URL).trim_end_matches('/');
        Ok(Self {
            http,
            messages_url: format!("{base}/messages"),
        })
    }

    pub async fn send(&self, request: &MessagesRequest<'_>) -> Result<MessagesResponse> {
        debug!(
            model = request.model,
            max_tokens = request.max_tokens,
            prompt_chars = request.system.len() + request.messages[0].content.len(),
            "Claude messages request"
        );

        let response = self
            .http
            .post(&self.messages_url)
            .json(request)
            .send()
            .await
            .context("Claude request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            bail!("Claude API error ({status}): {body}");
        }

        response
            .json()
            .await
            .context("Failed to decode Claude response")
    }
}
