//! Conversation records, messages and the store interfaces the core reads from

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strata_ai::{Attachment, Role, UsageReport};

use crate::error::{Error, Result};

/// A conversation and its compression state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub title: String,
    /// Digest of every message up to and including `last_compressed_message_id`
    #[serde(default)]
    pub rolling_summary: String,
    /// Last message represented by the rolling summary
    #[serde(default)]
    pub last_compressed_message_id: Option<String>,
    /// Token estimate of `rolling_summary`
    #[serde(default)]
    pub summary_token_count: u32,
    /// Per-conversation compression trigger; the config default applies when unset
    #[serde(default)]
    pub compress_after_turns: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create an empty conversation with a fresh id
    pub fn new(project_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            title: String::new(),
            rolling_summary: String::new(),
            last_compressed_message_id: None,
            summary_token_count: 0,
            compress_after_turns: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Compression trigger for this conversation
    pub fn compress_threshold(&self, default: u32) -> u32 {
        match self.compress_after_turns {
            Some(turns) if turns > 0 => turns,
            _ => default,
        }
    }
}

/// One stored message. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Model that produced an assistant message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    /// Usage reported for the request that produced an assistant message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message with a fresh id
    pub fn new(conversation_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            attachments: Vec::new(),
            model_used: None,
            usage: None,
            cost_usd: None,
            created_at: Utc::now(),
        }
    }

    /// Create a user message
    pub fn user(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::Assistant, content)
    }

    /// Attach files
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Record which model answered and what it cost
    pub fn with_telemetry(mut self, model_id: impl Into<String>, usage: UsageReport, cost_usd: f64) -> Self {
        self.model_used = Some(model_id.into());
        self.usage = Some(usage);
        self.cost_usd = Some(cost_usd);
        self
    }
}

/// Messages strictly after `pointer`.
///
/// Returns the whole list when the pointer is unset or names a message that
/// no longer exists; the flag reports whether the pointer was found.
pub fn split_uncompressed(messages: Vec<Message>, pointer: Option<&str>) -> (Vec<Message>, bool) {
    let Some(pointer) = pointer else {
        return (messages, true);
    };
    match messages.iter().position(|m| m.id == pointer) {
        Some(index) => (messages.into_iter().skip(index + 1).collect(), true),
        None => (messages, false),
    }
}

/// Append-only message persistence plus the conversation summary fields
pub trait MessageStore: Send + Sync {
    /// All messages of a conversation, oldest first
    fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// The conversation record, if it exists
    fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>>;

    /// Replace the rolling summary and advance the compression pointer
    fn update_summary(
        &self,
        conversation_id: &str,
        summary: &str,
        last_message_id: &str,
        token_count: u32,
    ) -> Result<()>;

    /// Messages not yet represented by the rolling summary
    fn uncompressed_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let pointer = self
            .get_conversation(conversation_id)?
            .and_then(|c| c.last_compressed_message_id);
        let messages = self.get_messages(conversation_id)?;
        let (tail, found) = split_uncompressed(messages, pointer.as_deref());
        if !found {
            tracing::warn!(
                "Compression pointer of {} not found, treating all messages as uncompressed",
                conversation_id
            );
        }
        Ok(tail)
    }
}

/// Pre-extracted project knowledge
pub trait DocumentStore: Send + Sync {
    /// Concatenated document text for a project; empty when there is none
    fn get_project_context(&self, project_id: &str) -> Result<String>;
}

/// Message store held in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    conversations: RwLock<HashMap<String, Conversation>>,
    messages: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new conversation
    pub fn create_conversation(&self, project_id: &str) -> Conversation {
        let conversation = Conversation::new(project_id);
        self.insert_conversation(conversation.clone());
        conversation
    }

    /// Register (or replace) a conversation record
    pub fn insert_conversation(&self, conversation: Conversation) {
        self.messages
            .write()
            .entry(conversation.id.clone())
            .or_default();
        self.conversations
            .write()
            .insert(conversation.id.clone(), conversation);
    }

    /// Append a message to its conversation
    pub fn append_message(&self, message: Message) -> Result<()> {
        if !self.conversations.read().contains_key(&message.conversation_id) {
            return Err(Error::ConversationNotFound(message.conversation_id));
        }
        self.messages
            .write()
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    /// Remove a message; returns whether it existed
    pub fn delete_message(&self, conversation_id: &str, message_id: &str) -> bool {
        let mut messages = self.messages.write();
        let Some(list) = messages.get_mut(conversation_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|m| m.id != message_id);
        list.len() != before
    }
}

impl MessageStore for InMemoryStore {
    fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .read()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().get(conversation_id).cloned())
    }

    fn update_summary(
        &self,
        conversation_id: &str,
        summary: &str,
        last_message_id: &str,
        token_count: u32,
    ) -> Result<()> {
        let mut conversations = self.conversations.write();
        let conversation = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_string()))?;
        conversation.rolling_summary = summary.to_string();
        conversation.last_compressed_message_id = Some(last_message_id.to_string());
        conversation.summary_token_count = token_count;
        conversation.updated_at = Utc::now();
        Ok(())
    }
}

/// Document store held in memory
#[derive(Debug, Default)]
pub struct InMemoryDocuments {
    projects: RwLock<HashMap<String, String>>,
}

impl InMemoryDocuments {
    /// Create an empty document store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the knowledge text for a project
    pub fn set(&self, project_id: &str, text: impl Into<String>) {
        self.projects.write().insert(project_id.to_string(), text.into());
    }
}

impl DocumentStore for InMemoryDocuments {
    fn get_project_context(&self, project_id: &str) -> Result<String> {
        Ok(self
            .projects
            .read()
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }
}
