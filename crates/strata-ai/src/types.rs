//! Core types for LLM requests

use serde::{Deserialize, Serialize};

/// Conversation roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Get the role as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Label used when a transcript is rendered for summarization
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// How long the provider keeps a cached prefix alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CacheTtl {
    /// Five minutes, the provider default
    #[default]
    #[serde(rename = "5m")]
    FiveMinutes,
    /// One hour, at a higher write premium
    #[serde(rename = "1h")]
    OneHour,
}

impl CacheTtl {
    /// Wire value of the TTL
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTtl::FiveMinutes => "5m",
            CacheTtl::OneHour => "1h",
        }
    }

    /// Parse a TTL from its wire value
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "5m" | "short" => Some(CacheTtl::FiveMinutes),
            "1h" | "long" => Some(CacheTtl::OneHour),
            _ => None,
        }
    }
}

impl std::fmt::Display for CacheTtl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache marker on a request segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "ttl", rename_all = "snake_case")]
pub enum CacheFlag {
    /// Sent as-is, no cache breakpoint
    #[default]
    Uncached,
    /// Cache breakpoint after this segment
    Cached(CacheTtl),
}

impl CacheFlag {
    /// Whether this segment ends a cached prefix
    pub fn is_cached(&self) -> bool {
        matches!(self, CacheFlag::Cached(_))
    }

    /// TTL of the breakpoint, if any
    pub fn ttl(&self) -> Option<CacheTtl> {
        match self {
            CacheFlag::Cached(ttl) => Some(*ttl),
            CacheFlag::Uncached => None,
        }
    }
}

/// A text segment of the system prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemBlock {
    pub text: String,
    #[serde(default)]
    pub cache: CacheFlag,
}

impl SystemBlock {
    /// Create an uncached block
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache: CacheFlag::Uncached,
        }
    }

    /// Create a block that ends a cached prefix
    pub fn cached(text: impl Into<String>, ttl: CacheTtl) -> Self {
        Self {
            text: text.into(),
            cache: CacheFlag::Cached(ttl),
        }
    }
}

/// Content types in a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content
    Text { text: String },
    /// Image content (base64 encoded)
    Image { media_type: String, data: String },
    /// Document content such as a PDF (base64 encoded)
    Document { media_type: String, data: String },
}

impl ContentPart {
    /// Create text content
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Get text if this is text content
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Kind of file attached to a user message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Document,
}

impl AttachmentKind {
    /// Media type assumed when the attachment does not name one
    pub fn default_media_type(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "image/png",
            AttachmentKind::Document => "application/pdf",
        }
    }
}

/// A base64-encoded file attached to a user message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub data: String,
}

impl Attachment {
    /// Create an image attachment
    pub fn image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Image,
            media_type: Some(media_type.into()),
            data: data.into(),
        }
    }

    /// Create a document attachment
    pub fn document(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Document,
            media_type: Some(media_type.into()),
            data: data.into(),
        }
    }

    /// Convert into a request content part
    pub fn to_content_part(&self) -> ContentPart {
        let media_type = self
            .media_type
            .clone()
            .unwrap_or_else(|| self.kind.default_media_type().to_string());
        match self.kind {
            AttachmentKind::Image => ContentPart::Image {
                media_type,
                data: self.data.clone(),
            },
            AttachmentKind::Document => ContentPart::Document {
                media_type,
                data: self.data.clone(),
            },
        }
    }
}

/// Body of a turn: plain text, or a list of parts when attachments are present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl TurnContent {
    /// Concatenated text of the turn, ignoring binary parts
    pub fn text(&self) -> String {
        match self {
            TurnContent::Text(text) => text.clone(),
            TurnContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.as_text())
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// One conversation turn sent to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
}

impl Turn {
    /// Create a user turn with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Text(text.into()),
        }
    }

    /// Create an assistant turn with text content
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::Text(text.into()),
        }
    }

    /// Create a user turn with multiple content parts
    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Parts(parts),
        }
    }

    /// Get combined text content
    pub fn text(&self) -> String {
        self.content.text()
    }
}

/// Token usage reported by the provider for one request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_creation_tokens: u32,
    pub cache_read_tokens: u32,
}

impl UsageReport {
    /// All input tokens, cached or not
    pub fn total_input(&self) -> u32 {
        self.input_tokens
            .saturating_add(self.cache_creation_tokens)
            .saturating_add(self.cache_read_tokens)
    }

    /// Add another report into this one
    pub fn accumulate(&mut self, other: &UsageReport) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_creation_tokens = self
            .cache_creation_tokens
            .saturating_add(other.cache_creation_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(other.cache_read_tokens);
    }
}

/// Provider-side compaction that kicks in when input grows past a trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCompaction {
    /// Beta flag the provider expects
    pub beta: String,
    /// Input token count that triggers compaction
    pub trigger_tokens: u32,
}

/// Everything needed to stream one completion
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    /// System prompt segments, in order
    pub system: Vec<SystemBlock>,
    /// Conversation turns, starting with a user turn
    pub messages: Vec<Turn>,
    /// Target model
    pub model_id: String,
    /// Maximum tokens to generate
    pub max_output_tokens: u32,
    /// Extended thinking budget
    pub thinking_budget: Option<u32>,
    /// Server-side compaction fallback
    pub compaction: Option<ServerCompaction>,
}

impl StreamRequest {
    /// A single-prompt request with a plain system text
    pub fn simple(
        system: impl Into<String>,
        prompt: impl Into<String>,
        model_id: impl Into<String>,
        max_output_tokens: u32,
    ) -> Self {
        Self {
            system: vec![SystemBlock::text(system)],
            messages: vec![Turn::user(prompt)],
            model_id: model_id.into(),
            max_output_tokens,
            thinking_budget: None,
            compaction: None,
        }
    }
}
