use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::sanitizer::{self, Sanitized};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

/// A validated prior turn supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
    pub timestamp: String,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub message: String,
    pub condominio_id: Uuid,
    pub user_id: Uuid,
    pub history: Vec<HistoryEntry>,
}

/// Identity attached as a request extension by an upstream auth layer.
/// Takes precedence over network origin when keying the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedCaller {
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of the prompt sent to the completion provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub document_type: String,
    #[serde(default)]
    pub document_name: String,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub chunk_index: u32,
    /// Owning tenant, when the search RPC reports it.
    #[serde(default)]
    pub condominio_id: Option<Uuid>,
}

/// A chunk returned by the vector search. `content` is untrusted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub content: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub similarity: f32,
}

impl DocumentChunk {
    /// False only when the chunk names a tenant other than `tenant`.
    pub fn belongs_to(&self, tenant: Uuid) -> bool {
        self.metadata.condominio_id.is_none_or(|owner| owner == tenant)
    }
}

/// Prompt-safe view of a [`DocumentChunk`].
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedChunk {
    pub metadata: DocumentMetadata,
    pub content: String,
    pub suspicious: bool,
}

impl From<DocumentChunk> for SanitizedChunk {
    fn from(chunk: DocumentChunk) -> Self {
        let Sanitized {
            content,
            suspicious,
        } = sanitizer::sanitize(&chunk.content);

        Self {
            metadata: chunk.metadata,
            content,
            suspicious,
        }
    }
}

// Non-string content is treated as empty rather than failing the whole batch.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        _ => String::new(),
    })
}
