use crate::gateway::GenerationGateway;
use crate::model::ExtractiveModel;
use crate::orchestrator::Orchestrator;
use crate::session::MemorySessionStore;
use dashmap::DashMap;
use medrag_core::{
    AskOutcome, DocumentId, DocumentStatus, DocumentStore, EmbeddingProvider, LanguageModel,
    MedRagConfig, MedRagError, Result, Session, SessionId, SessionStore, SourceTier, TenantId,
    VectorIndex,
};
use medrag_ingest::{IngestionPipeline, MemoryDocumentStore};
use medrag_vector::{CachedEmbedder, HashEmbedder, InMemoryVectorIndex, RestEmbedder, Retriever};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Facade over the whole stack: ingestion pipeline, retriever, orchestrator,
/// and the per-session locks that serialize concurrent questions on the same
/// session. Different sessions proceed in parallel.
pub struct Assistant {
    pipeline: IngestionPipeline,
    orchestrator: Orchestrator,
    sessions: Arc<dyn SessionStore>,
    session_locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl Assistant {
    /// Wires the default in-memory stack from configuration.
    pub fn new(config: MedRagConfig) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        let index: Arc<dyn VectorIndex> =
            Arc::new(InMemoryVectorIndex::new(config.embedding.dimension));
        let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let model: Arc<dyn LanguageModel> = Arc::new(ExtractiveModel);
        Self::with_components(config, store, index, sessions, model)
    }

    /// Wires the stack around caller-provided stores, index, and model.
    pub fn with_components(
        config: MedRagConfig,
        store: Arc<dyn DocumentStore>,
        index: Arc<dyn VectorIndex>,
        sessions: Arc<dyn SessionStore>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| MedRagError::Orchestration(e.to_string()))?;

        let embedder = build_embedder(&config)?;
        let pipeline = IngestionPipeline::new(&config, store, embedder.clone(), index.clone());
        let retriever = Arc::new(Retriever::new(config.retrieval.clone(), embedder, index));
        let gateway = Arc::new(GenerationGateway::new(config.generation.clone(), model));
        let orchestrator = Orchestrator::new(
            config.agent.clone(),
            retriever,
            gateway,
            sessions.clone(),
        );

        Ok(Self {
            pipeline,
            orchestrator,
            sessions,
            session_locks: DashMap::new(),
        })
    }

    pub async fn ingest(
        &self,
        document_id: DocumentId,
        title: &str,
        raw_text: &str,
        tenant_id: TenantId,
        tier: SourceTier,
    ) -> Result<DocumentStatus> {
        self.pipeline
            .ingest(document_id, title, raw_text, tenant_id, tier)
            .await
    }

    /// Re-embeds every indexed document with the current embedding model.
    pub async fn reindex(&self) -> Result<usize> {
        self.pipeline.reindex().await
    }

    pub async fn ask(
        &self,
        session_id: SessionId,
        user_id: TenantId,
        question: &str,
    ) -> Result<AskOutcome> {
        self.ask_with_cancellation(session_id, user_id, question, &CancellationToken::new())
            .await
    }

    #[instrument(skip(self, question, cancel), fields(session_id = %session_id))]
    pub async fn ask_with_cancellation(
        &self,
        session_id: SessionId,
        user_id: TenantId,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<AskOutcome> {
        // Clone the lock out of the map so no map guard is held across await.
        let lock = {
            let slot = self
                .session_locks
                .entry(session_id)
                .or_insert_with(|| Arc::new(Mutex::new(())));
            slot.value().clone()
        };
        let outcome = {
            let _serialized = lock.lock().await;
            self.orchestrator
                .run_turn(session_id, user_id, question, cancel)
                .await
        };
        drop(lock);
        // Drop the map entry once no turn holds it. The shard lock held by
        // remove_if keeps a concurrent ask from cloning the Arc between the
        // count check and the removal.
        self.session_locks
            .remove_if(&session_id, |_, slot| Arc::strong_count(slot) == 1);
        outcome
    }

    pub async fn session(&self, session_id: SessionId) -> Result<Option<Session>> {
        self.sessions.session(session_id).await
    }
}

fn build_embedder(config: &MedRagConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let base: Arc<dyn EmbeddingProvider> = match config.embedding.provider.as_str() {
        "hash" => Arc::new(HashEmbedder::new(config.embedding.dimension)),
        "rest" => Arc::new(RestEmbedder::new(config.embedding.clone())?),
        other => {
            return Err(MedRagError::Orchestration(format!(
                "unknown embedding provider {:?}",
                other
            )))
        }
    };
    if config.embedding.cache_capacity == 0 {
        return Ok(base);
    }
    Ok(Arc::new(CachedEmbedder::new(
        base,
        config.embedding.cache_capacity,
        Duration::from_secs(config.embedding.cache_ttl_secs),
    )))
}
