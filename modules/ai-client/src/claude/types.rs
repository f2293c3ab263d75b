use serde::{Deserialize, Serialize};

// =============================================================================
// Messages request
// =============================================================================

/// One-shot request: a system prompt plus a single user turn.
#[derive(Debug, Serialize)]
pub(crate) struct MessagesRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    pub system: &'a str,
    pub messages: [UserTurn<'a>; 1],
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub(crate) struct UserTurn<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

impl<'a> MessagesRequest<'a> {
    pub fn one_shot(
        model: &'a str,
        system: &'a str,
        user: &'a str,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            model,
            max_tokens,
            system,
            messages: [UserTurn {
                role: "user",
                content: user,
            }],
            temperature,
        }
    }
}

// =============================================================================
// Messages response
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ResponseBlock {
    Text { text: String },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesResponse {
    #[serde(default)]
    pub content: Vec<ResponseBlock>,
    pub stop_reason: Option<String>,
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct WireUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl MessagesResponse {
    /// Long answers can arrive split across several text blocks.
    pub fn joined_text(&self) -> Option<String> {
        let mut out: Option<String> = None;
        for block in &self.content {
            if let ResponseBlock::Text { text } = block {
                out.get_or_insert_with(String::new).push_str(text);
            }
        }
        out
    }
}
