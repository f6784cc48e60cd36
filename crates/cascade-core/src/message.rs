use serde::{Deserialize, Serialize};

/// The role of the participant that authored a [`Message`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system-level instruction or prompt.
    System,
    /// A human end-user.
    User,
    /// The AI assistant.
    Assistant,
}

/// Reference to a media object carried inside a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    /// URL or `data:` URI of the media object.
    pub url: String,
    /// Optional vendor detail hint (`low`, `high`, `auto`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One typed fragment of multi-part message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// A text fragment.
    Text {
        /// The text itself.
        text: String,
    },
    /// An image reference.
    ImageUrl {
        /// Where the image lives.
        image_url: MediaRef,
    },
}

impl ContentPart {
    /// Returns true for non-text parts.
    pub fn is_media(&self) -> bool {
        matches!(self, Self::ImageUrl { .. })
    }
}

/// Message content: either a plain string or an ordered list of parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// Ordered typed parts.
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Returns true if any part is a media reference.
    pub fn has_media(&self) -> bool {
        match self {
            Self::Text(_) => false,
            Self::Parts(parts) => parts.iter().any(ContentPart::is_media),
        }
    }

    /// Returns true if there is nothing to send (empty text or no parts).
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(t) => t.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// The message content.
    pub content: MessageContent,
}

impl Message {
    /// Creates a new message with the given role and content.
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a new message with [`Role::System`].
    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a new message with [`Role::User`].
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates a new message with [`Role::Assistant`].
    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Whether a request carries embedded media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Text-only request.
    Text,
    /// At least one message carries a media part.
    Media,
}

/// Inbound "create chat completion" request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    /// Requested role id. Unknown or missing values fall back to the default role.
    #[serde(default)]
    pub model: Option<String>,
    /// Conversation, oldest first.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Output token limit override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Whether the caller wants incremental output.
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    /// Creates a non-streaming request with default sampling.
    pub fn new(model: Option<&str>, messages: Vec<Message>) -> Self {
        Self {
            model: model.map(str::to_string),
            messages,
            temperature: None,
            max_tokens: None,
            stream: false,
        }
    }

    /// Classifies the request by the content it carries.
    pub fn modality(&self) -> Modality {
        if self.messages.iter().any(|m| m.content.has_media()) {
            Modality::Media
        } else {
            Modality::Text
        }
    }
}
