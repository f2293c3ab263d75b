mod client;
pub(crate) mod types;

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::traits::{Completion, CompletionModel, CompletionRequest, TokenUsage};
use client::ClaudeClient;
use types::MessagesRequest;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

// =============================================================================
// Claude
// =============================================================================

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    pub(crate) model: String,
    base_url: Option<String>,
    timeout: Duration,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Hard cap on a single request, including reading the body.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn client(&self) -> Result<ClaudeClient> {
        ClaudeClient::new(&self.api_key, self.base_url.as_deref(), self.timeout)
    }
}

#[async_trait]
impl CompletionModel for Claude {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let wire = MessagesRequest::one_shot(
            &self.model,
            &request.system,
            &request.user,
            request.max_tokens,
            request.temperature,
        );

        let response = self.client()?.send(&wire).await?;

        let text = response
            .joined_text()
            .ok_or_else(|| anyhow!("No text in Claude response"))?;

        Ok(Completion {
            text,
            usage: response.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
            stop_reason: response.stop_reason,
        })
    }
}
