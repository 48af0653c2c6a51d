//! On-disk conversation and document storage
//!
//! Each conversation is one JSON file under `<data_dir>/conversations`.
//! Project documents are the text files under `<data_dir>/projects/<project>`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strata_context::{Conversation, DocumentStore, Error, Message, MessageStore, Result};

/// File extensions read as project documents
const DOCUMENT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "rst", "csv", "json", "toml"];

/// Ids become file and directory names, so only `[A-Za-z0-9_-]` is allowed
fn check_id(kind: &str, id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::store(format!("invalid {} id '{}'", kind, id)))
    }
}

/// A conversation record together with its messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationFile {
    pub conversation: Conversation,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ConversationFile {
    /// Read a conversation file from any path
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }
}

/// JSON-file backed message and document store
pub struct JsonStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles on conversation files
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// Open (and create) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        for dir in ["conversations", "projects"] {
            let path = root.join(dir);
            fs::create_dir_all(&path).with_context(|| format!("creating {}", path.display()))?;
        }
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding a project's documents
    pub fn project_dir(&self, project_id: &str) -> Result<PathBuf> {
        check_id("project", project_id)?;
        Ok(self.root.join("projects").join(project_id))
    }

    fn conversation_path(&self, conversation_id: &str) -> Result<PathBuf> {
        check_id("conversation", conversation_id)?;
        Ok(self
            .root
            .join("conversations")
            .join(format!("{}.json", conversation_id)))
    }

    fn read(&self, conversation_id: &str) -> Result<Option<ConversationFile>> {
        let path = self.conversation_path(conversation_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(Error::store)?;
        serde_json::from_str(&content).map(Some).map_err(Error::store)
    }

    fn write(&self, file: &ConversationFile) -> Result<()> {
        let path = self.conversation_path(&file.conversation.id)?;
        let content = serde_json::to_string_pretty(file).map_err(Error::store)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(Error::store)?;
        fs::rename(&tmp, &path).map_err(Error::store)
    }

    /// Create and persist a new conversation
    pub fn create_conversation(&self, project_id: &str) -> Result<Conversation> {
        check_id("project", project_id)?;
        let conversation = Conversation::new(project_id);
        let _guard = self.write_lock.lock();
        self.write(&ConversationFile {
            conversation: conversation.clone(),
            messages: Vec::new(),
        })?;
        Ok(conversation)
    }

    /// Append a message to its conversation
    pub fn append_message(&self, message: Message) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut file = self
            .read(&message.conversation_id)?
            .ok_or_else(|| Error::ConversationNotFound(message.conversation_id.clone()))?;
        file.conversation.updated_at = message.created_at;
        file.messages.push(message);
        self.write(&file)
    }

    /// All conversations, most recently updated first
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let dir = self.root.join("conversations");
        let mut conversations = Vec::new();
        for entry in fs::read_dir(&dir).map_err(Error::store)? {
            let path = entry.map_err(Error::store)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match ConversationFile::load(&path) {
                Ok(file) => conversations.push(file.conversation),
                Err(e) => tracing::warn!("Skipping {}: {:#}", path.display(), e),
            }
        }
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }
}

impl MessageStore for JsonStore {
    fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .read(conversation_id)?
            .map(|f| f.messages)
            .unwrap_or_default())
    }

    fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self.read(conversation_id)?.map(|f| f.conversation))
    }

    fn update_summary(
        &self,
        conversation_id: &str,
        summary: &str,
        last_message_id: &str,
        token_count: u32,
    ) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut file = self
            .read(conversation_id)?
            .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_string()))?;
        file.conversation.rolling_summary = summary.to_string();
        file.conversation.last_compressed_message_id = Some(last_message_id.to_string());
        file.conversation.summary_token_count = token_count;
        file.conversation.updated_at = chrono::Utc::now();
        self.write(&file)
    }
}

impl DocumentStore for JsonStore {
    fn get_project_context(&self, project_id: &str) -> Result<String> {
        let dir = self.project_dir(project_id)?;
        if !dir.is_dir() {
            return Ok(String::new());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(Error::store)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| DOCUMENT_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            })
            .collect();
        paths.sort();

        let mut parts = Vec::with_capacity(paths.len());
        for path in paths {
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Skipping document {}: {}", path.display(), e);
                    continue;
                }
            };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            parts.push(format!("<document name=\"{}\">\n{}\n</document>", name, text));
        }
        Ok(parts.join("\n\n"))
    }
}
