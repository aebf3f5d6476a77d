use serde::{Deserialize, Serialize};

// Inbound chat request from the site widget
#[derive(Deserialize, Debug, Default, Clone)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Custom,
    Api,
    Error,
}

// Reply sent back to the browser
#[derive(Serialize, Debug, Clone)]
pub struct ChatReply {
    pub reply: String,
    pub source: ReplySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_response_finished: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Serialize, Debug, Clone)]
pub struct HealthResponse {
    pub status: &'static str,
    pub msg: &'static str,
    pub keys_available: usize,
    pub api_url: String,
    pub timestamp: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

// Completion API request format
#[derive(Serialize, Debug)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub max_tokens: u32,
    pub temperature: f32,
}

// Completion API response format
#[derive(Deserialize, Debug, Default)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Deserialize, Debug, Default)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl CompletionResponse {
    /// First choice's content; if that is blank, every choice joined by newlines.
    pub fn reply(&self) -> Option<String> {
        let first = self
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(reply) = first {
            return Some(reply.to_string());
        }

        let joined = self
            .choices
            .iter()
            .map(|c| {
                c.message
                    .as_ref()
                    .and_then(|m| m.content.as_deref())
                    .filter(|s| !s.is_empty())
                    .or(c.text.as_deref())
                    .unwrap_or("")
            })
            .collect::<Vec<_>>()
            .join("\n");
        let joined = joined.trim();
        (!joined.is_empty()).then(|| joined.to_string())
    }
}

// Row written to the conversation store
#[derive(Serialize, Debug, Clone)]
pub struct ConversationRecord {
    pub user_id: String,
    pub message: String,
    pub reply: String,
    pub voice: String,
    pub created_at: String,
}
