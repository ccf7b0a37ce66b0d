use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type DocumentId = Uuid;
pub type ChunkId = Uuid;
pub type SessionId = Uuid;
pub type TurnId = Uuid;
pub type TenantId = Uuid;

/// Lifecycle of a document inside the ingestion pipeline. Query-time
/// components never move a document between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Chunked,
    Indexed,
    Failed,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentStatus::Pending => write!(f, "pending"),
            DocumentStatus::Chunked => write!(f, "chunked"),
            DocumentStatus::Indexed => write!(f, "indexed"),
            DocumentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Provenance rank of a document. Official course material outranks student
/// notes at equal similarity during re-ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Official,
    Reference,
    UserNote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub tenant_id: TenantId,
    pub title: String,
    pub raw_text: String,
    pub tier: SourceTier,
    pub upload_time: DateTime<Utc>,
    pub status: DocumentStatus,
}

impl Document {
    pub fn new(
        id: DocumentId,
        tenant_id: TenantId,
        title: impl Into<String>,
        raw_text: impl Into<String>,
        tier: SourceTier,
    ) -> Self {
        Self {
            id,
            tenant_id,
            title: title.into(),
            raw_text: raw_text.into(),
            tier,
            upload_time: Utc::now(),
            status: DocumentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Char offset of the chunk's first character in the document text.
    pub start_char: usize,
    /// Char offset one past the chunk's last character.
    pub end_char: usize,
    pub tier: SourceTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub sequence_index: usize,
    pub text: String,
    pub token_count: usize,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_id: ChunkId,
    pub vector: Vec<f32>,
    pub model_version: String,
}

/// Unit persisted by the vector index: the embedding plus the metadata needed
/// to filter, re-rank, and cite without a join back to the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub tenant_id: TenantId,
    pub sequence_index: usize,
    pub tier: SourceTier,
    pub text: String,
    pub vector: Vec<f32>,
    pub model_version: String,
}

/// Restricts a search to a tenant and/or document subset. Applied while
/// scanning, never as a post-hoc truncation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    pub tenant_id: Option<TenantId>,
    pub document_id: Option<DocumentId>,
}

impl SearchFilter {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            document_id: None,
        }
    }

    pub fn for_document(document_id: DocumentId) -> Self {
        Self {
            tenant_id: None,
            document_id: Some(document_id),
        }
    }

    pub fn matches(&self, tenant_id: TenantId, document_id: DocumentId) -> bool {
        if let Some(required) = self.tenant_id {
            if required != tenant_id {
                return false;
            }
        }
        if let Some(required) = self.document_id {
            if required != document_id {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: ChunkId,
    pub score: f32,
}

/// A chunk as handed from the retriever to the orchestrator: resolved text
/// plus the combined relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub sequence_index: usize,
    pub tier: SourceTier,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub role: TurnRole,
    pub content: String,
    pub retrieved_chunk_ids: Vec<ChunkId>,
    pub failed: bool,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: TurnRole::User,
            content: content.into(),
            retrieved_chunk_ids: Vec::new(),
            failed: false,
            timestamp: Utc::now(),
        }
    }

    pub fn agent(content: impl Into<String>, retrieved_chunk_ids: Vec<ChunkId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: TurnRole::Agent,
            content: content.into(),
            retrieved_chunk_ids,
            failed: false,
            timestamp: Utc::now(),
        }
    }

    pub fn failed_agent(diagnostic: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: TurnRole::Agent,
            content: diagnostic.into(),
            retrieved_chunk_ids: Vec::new(),
            failed: true,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only conversation log. Turns are never rewritten once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: TenantId,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, user_id: TenantId) -> Self {
        Self {
            id,
            user_id,
            turns: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Reference from a generated answer back to a supporting chunk. The order of
/// citations matches the bracketed numbers in the answer text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub sequence_index: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskOutcome {
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub turn_id: TurnId,
}
