use anyhow::Result;
use async_trait::async_trait;

// =============================================================================
// Request / Response
// =============================================================================

/// One system + user exchange. The digest analyzer never needs multi-turn.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 4096,
            temperature: 0.0,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
    /// Provider stop reason, e.g. `end_turn` or `max_tokens`.
    pub stop_reason: Option<String>,
}

impl Completion {
    /// Whether the provider cut the response off at the output limit.
    pub fn truncated(&self) -> bool {
        self.stop_reason.as_deref() == Some("max_tokens")
    }
}

// =============================================================================
// CompletionModel Trait
// =============================================================================

#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}
