use crate::chunker::Chunker;
use futures::future::try_join_all;
use medrag_core::{
    Chunk, ChunkId, Document, DocumentId, DocumentStatus, DocumentStore, EmbeddingProvider,
    IndexEntry, MedRagConfig, MedRagError, Result, SourceTier, TenantId, VectorIndex,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Drives a document from raw text to searchable index entries:
/// validate, chunk, embed in batches, then replace the document's entries in
/// the vector index. Status moves Pending -> Chunked -> Indexed, or Failed.
pub struct IngestionPipeline {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    chunker: Chunker,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(
        config: &MedRagConfig,
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            chunker: Chunker::new(&config.chunking),
            batch_size: config.embedding.batch_size,
            store,
            embedder,
            index,
        }
    }

    #[instrument(skip(self, title, raw_text), fields(document_id = %document_id))]
    pub async fn ingest(
        &self,
        document_id: DocumentId,
        title: &str,
        raw_text: &str,
        tenant_id: TenantId,
        tier: SourceTier,
    ) -> Result<DocumentStatus> {
        let started = Instant::now();

        // Chunks from a prior ingest of this document, kept for stale-entry
        // cleanup once the replacement set is known.
        let prior_chunks = self.store.chunks(document_id).await?;

        // Step 1: register the document and cut it into chunks
        self.store
            .put_document(Document::new(document_id, tenant_id, title, raw_text, tier))
            .await?;
        let chunks = match self.chunker.chunk(document_id, tier, raw_text) {
            Ok(chunks) => chunks,
            Err(e) => {
                self.store
                    .set_status(document_id, DocumentStatus::Failed)
                    .await?;
                return Err(e);
            }
        };
        self.store.put_chunks(document_id, chunks.clone()).await?;
        self.store
            .set_status(document_id, DocumentStatus::Chunked)
            .await?;
        debug!("chunked into {} pieces", chunks.len());

        // Step 2: embed every chunk
        let vectors = match self.embed_chunks(&chunks).await {
            Ok(vectors) => vectors,
            Err(e) => {
                self.store
                    .set_status(document_id, DocumentStatus::Failed)
                    .await?;
                return Err(e);
            }
        };

        // Step 3: replace this document's entries in the index. Unchanged
        // chunks keep their content-derived ids, so upsert overwrites them;
        // only ids that vanished need an explicit delete.
        let current_ids: HashSet<ChunkId> = chunks.iter().map(|c| c.id).collect();
        for stale in prior_chunks.iter().filter(|c| !current_ids.contains(&c.id)) {
            self.index.delete(stale.id).await?;
        }
        let entries = build_entries(&chunks, tenant_id, &vectors, &self.embedder.model_version());
        if let Err(e) = self.index.upsert(entries).await {
            self.store
                .set_status(document_id, DocumentStatus::Failed)
                .await?;
            return Err(e);
        }
        self.store
            .set_status(document_id, DocumentStatus::Indexed)
            .await?;

        info!(
            chunks = chunks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "document indexed"
        );
        Ok(DocumentStatus::Indexed)
    }

    /// Re-embeds every indexed document with the current embedding model and
    /// replaces its index entries. A failure marks only the affected document
    /// Failed; the rest keep going. Returns how many documents refreshed.
    #[instrument(skip(self))]
    pub async fn reindex(&self) -> Result<usize> {
        let documents = self
            .store
            .documents_with_status(DocumentStatus::Indexed)
            .await?;
        let model_version = self.embedder.model_version();
        let mut refreshed = 0;

        for document in documents {
            let chunks = self.store.chunks(document.id).await?;
            if chunks.is_empty() {
                continue;
            }
            // An embed or upsert failure marks only this document Failed;
            // the walk keeps going.
            let outcome = match self.embed_chunks(&chunks).await {
                Ok(vectors) => {
                    let entries =
                        build_entries(&chunks, document.tenant_id, &vectors, &model_version);
                    self.index.upsert(entries).await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => refreshed += 1,
                Err(e) => {
                    warn!(document_id = %document.id, "reindex failed: {}", e);
                    self.store
                        .set_status(document.id, DocumentStatus::Failed)
                        .await?;
                }
            }
        }

        info!(refreshed, model_version = %model_version, "reindex complete");
        Ok(refreshed)
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let batches: Vec<Vec<String>> = chunks
            .chunks(self.batch_size)
            .map(|batch| batch.iter().map(|c| c.text.clone()).collect())
            .collect();

        let pending = batches.iter().map(|batch| self.embedder.embed(batch));
        let results = try_join_all(pending).await?;

        let mut vectors = Vec::with_capacity(chunks.len());
        for (batch, mut embedded) in batches.iter().zip(results) {
            if embedded.len() != batch.len() {
                return Err(MedRagError::Embedding(format!(
                    "provider returned {} embeddings for {} inputs",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.append(&mut embedded);
        }
        Ok(vectors)
    }
}

fn build_entries(
    chunks: &[Chunk],
    tenant_id: TenantId,
    vectors: &[Vec<f32>],
    model_version: &str,
) -> Vec<IndexEntry> {
    chunks
        .iter()
        .zip(vectors.iter())
        .map(|(chunk, vector)| IndexEntry {
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            tenant_id,
            sequence_index: chunk.sequence_index,
            tier: chunk.metadata.tier,
            text: chunk.text.clone(),
            vector: vector.clone(),
            model_version: model_version.to_string(),
        })
        .collect()
}
