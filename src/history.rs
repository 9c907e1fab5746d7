//! Conversation history persisted as one JSON file per conversation.
//!
//! Files live in `storage.conversations_dir` as `<id>.json`. Concurrent saves
//! to the same id are not coordinated; the last write wins.

use crate::messages::{Message, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const TITLE_MAX_CHARS: usize = 60;
const DEFAULT_TITLE: &str = "New conversation";

/// Errors from the flat-file stores
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid id '{0}': only letters, digits, '-' and '_' are allowed")]
    InvalidId(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("'{0}' is read-only")]
    ReadOnly(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Ids become file names, so they are restricted to a safe alphabet
pub fn validate_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

/// A stored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a client sends to create or overwrite a conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// Listing entry without the message bodies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Conversation> for ConversationSummary {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            message_count: conversation.messages.len(),
            agent_id: conversation.agent_id.clone(),
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

/// Title derived from the first user message
pub fn derive_title(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.text())
        .map(|text| text.trim().to_string())
        .find(|text| !text.is_empty())
        .map(|text| {
            let first_line = text.lines().next().unwrap_or_default();
            first_line.chars().take(TITLE_MAX_CHARS).collect()
        })
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

/// Directory-backed conversation store
#[derive(Debug, Clone)]
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Create or overwrite a conversation, returning what was stored
    pub fn save(&self, draft: ConversationDraft) -> Result<Conversation, StoreError> {
        let id = match draft.id {
            Some(id) => {
                validate_id(&id)?;
                id
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        let existing = self.load(&id)?;
        let now = Utc::now();
        let title = draft
            .title
            .filter(|t| !t.trim().is_empty())
            .or_else(|| existing.as_ref().map(|c| c.title.clone()))
            .unwrap_or_else(|| derive_title(&draft.messages));

        let conversation = Conversation {
            id: id.clone(),
            title,
            messages: draft.messages,
            agent_id: draft
                .agent_id
                .or_else(|| existing.as_ref().and_then(|c| c.agent_id.clone())),
            created_at: existing.as_ref().map(|c| c.created_at).unwrap_or(now),
            updated_at: now,
        };

        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&id);
        fs::write(&path, serde_json::to_string_pretty(&conversation)?)?;
        debug!(path = ?path, messages = conversation.messages.len(), "Saved conversation");
        if existing.is_none() {
            info!(conversation_id = %id, "Created conversation");
        }

        Ok(conversation)
    }

    /// Load a conversation; `None` when it does not exist
    pub fn load(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        validate_id(id)?;
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Summaries of all readable conversations, most recently updated first
    pub fn list(&self) -> Vec<ConversationSummary> {
        let mut summaries = Vec::new();

        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.extension().map(|e| e == "json").unwrap_or(false) {
                    continue;
                }
                match fs::read_to_string(&path)
                    .map_err(StoreError::from)
                    .and_then(|json| Ok(serde_json::from_str::<Conversation>(&json)?))
                {
                    Ok(conversation) => summaries.push(ConversationSummary::from(&conversation)),
                    Err(e) => warn!(error = %e, path = ?path, "Skipping unreadable conversation file"),
                }
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// Delete a conversation; false when it did not exist
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        validate_id(id)?;
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        info!(conversation_id = %id, "Deleted conversation");
        Ok(true)
    }
}
