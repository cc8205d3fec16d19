use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Role label expected by the remote model for history turns.
    pub fn wire_label(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "model",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Role {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// One conversation turn. User turns may carry an uploaded `image`,
/// assistant turns may carry a watermarked `generated_image`; a message
/// never carries both. Both are stored as `data:` URIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_image: Option<String>,
}

impl ChatMessage {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
            image: None,
            generated_image: None,
        }
    }

    pub fn user(content: String, image: Option<String>) -> Self {
        Self { image, ..Self::new(Role::User, content) }
    }

    pub fn assistant(content: String) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_with_image(content: String, generated_image: String) -> Self {
        Self {
            generated_image: Some(generated_image),
            ..Self::new(Role::Assistant, content)
        }
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// A single `{role, content}` pair of the bounded history window sent as
/// model context. Attachments are never projected into the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

impl From<&ChatMessage> for HistoryTurn {
    fn from(message: &ChatMessage) -> Self {
        Self { role: message.role, content: message.content.clone() }
    }
}

/// What the shell hands to the orchestrator: typed text and/or an attached
/// image as a `data:` URI (voice transcripts arrive as plain text).
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub text: String,
    pub image: Option<String>,
}

impl Submission {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), image: None }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.image.is_none()
    }
}

/// Result of one accepted submission: the appended user message and the
/// assistant message, if any was produced.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub user_message: ChatMessage,
    pub assistant_message: Option<ChatMessage>,
}
