use crate::{
    Chunk, ChunkId, Document, DocumentId, DocumentStatus, IndexEntry, Result, SearchFilter,
    SearchHit, Session, SessionId, TenantId, Turn, TurnRole,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Model boundary for text embeddings. Implementations own their retry and
/// timeout budgets; callers see either vectors or an exhausted failure.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns exactly one vector of `dimension()` length per input text.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    /// Identifies the embedding space. Entries indexed under a different
    /// version are stale and belong to a reindex pass.
    fn model_version(&self) -> String;

    fn provider_name(&self) -> &str;
}

/// Structured prompt handed to a language model: system framing, numbered
/// context excerpts, prior conversation, and the user's question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub context_blocks: Vec<String>,
    pub history: Vec<PromptMessage>,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: TurnRole,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: Some(1024),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    /// Self-assessment signal in [0, 1] when the model supports one.
    pub confidence: Option<f32>,
    pub model: String,
}

/// Model boundary for answer generation. Retries belong to the gateway that
/// wraps this trait, never to the orchestrator's state machine.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &Prompt, options: &GenerationOptions) -> Result<ModelResponse>;

    async fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str;
}

/// Abstract nearest-neighbor search contract. Any implementation must
/// preserve descending-score order with insertion-order tie-breaks, fused
/// filtering, and whole-entry visibility under concurrent mutation.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces entries incrementally; no full rebuild.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Removes an entry. Returns whether it existed. Concurrent readers keep
    /// searching; they see the entry either present or gone, never torn.
    async fn delete(&self, chunk_id: ChunkId) -> Result<bool>;

    /// Returns up to `k` hits by descending similarity. Entries excluded by
    /// `filter` are skipped before scoring, so a filtered search still fills
    /// `k` whenever enough matching entries exist.
    async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>>;

    async fn entry(&self, chunk_id: ChunkId) -> Result<Option<IndexEntry>>;

    async fn len(&self) -> Result<usize>;
}

/// Persistence boundary for documents and chunks. The core needs atomic
/// create/replace and consistent reads, not a particular storage engine.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put_document(&self, document: Document) -> Result<()>;

    async fn document(&self, id: DocumentId) -> Result<Option<Document>>;

    async fn set_status(&self, id: DocumentId, status: DocumentStatus) -> Result<()>;

    /// Replaces the chunk set for a document in one step.
    async fn put_chunks(&self, document_id: DocumentId, chunks: Vec<Chunk>) -> Result<()>;

    async fn chunks(&self, document_id: DocumentId) -> Result<Vec<Chunk>>;

    async fn documents_with_status(&self, status: DocumentStatus) -> Result<Vec<Document>>;
}

/// Persistence boundary for conversation logs. Appends are atomic per call:
/// a reader sees a session before or after an append, never between the
/// turns of one pair.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_or_create(&self, session_id: SessionId, user_id: TenantId) -> Result<Session>;

    async fn append_turns(&self, session_id: SessionId, turns: Vec<Turn>) -> Result<()>;

    async fn session(&self, session_id: SessionId) -> Result<Option<Session>>;

    /// Most recent `limit` turns, oldest first, for prompt history.
    async fn recent_turns(&self, session_id: SessionId, limit: usize) -> Result<Vec<Turn>>;
}
