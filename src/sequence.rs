use serde::{Deserialize, Serialize};

/// Server-assigned identifier of a chat sequence.
pub type SequenceId = i64;

/// Server-assigned identifier of a single message.
pub type MessageId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<MessageId>,
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            server_id: None,
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            server_id: None,
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// An ordered thread of messages. `server_id` is `None` until the backend saves it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatSequence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<SequenceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_desc: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl ChatSequence {
    pub fn draft() -> Self {
        ChatSequence::default()
    }

    pub fn saved(server_id: SequenceId, messages: Vec<ChatMessage>) -> Self {
        ChatSequence {
            server_id: Some(server_id),
            human_desc: None,
            messages,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.server_id.is_none()
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn display_name(&self) -> String {
        match (&self.human_desc, self.server_id) {
            (Some(desc), _) if !desc.trim().is_empty() => desc.clone(),
            (_, Some(id)) => format!("Sequence #{}", id),
            (_, None) => "New sequence".to_string(),
        }
    }
}
