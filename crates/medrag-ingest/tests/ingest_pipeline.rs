use async_trait::async_trait;
use medrag_core::{
    ChunkId, DocumentStatus, DocumentStore, EmbeddingProvider, IndexEntry, MedRagConfig,
    MedRagError, Result, SearchFilter, SearchHit, SourceTier, VectorIndex,
};
use medrag_ingest::{IngestionPipeline, MemoryDocumentStore};
use medrag_vector::{HashEmbedder, InMemoryVectorIndex};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const DIMENSION: usize = 8;

fn test_config() -> MedRagConfig {
    let mut config = MedRagConfig::default();
    // 100-char windows with a 20-char overlap keep the fixtures small.
    config.chunking.max_tokens = 25;
    config.chunking.overlap_tokens = 5;
    config.chunking.chars_per_token = 4;
    config.embedding.dimension = DIMENSION;
    config.embedding.batch_size = 2;
    config
}

fn lecture_text(chars: usize) -> String {
    "the cardiac cycle consists of systole and diastole "
        .chars()
        .cycle()
        .take(chars)
        .collect()
}

#[tokio::test]
async fn ingest_marks_document_indexed_and_populates_index() {
    let store = Arc::new(MemoryDocumentStore::new());
    let index = Arc::new(InMemoryVectorIndex::new(DIMENSION));
    let pipeline = IngestionPipeline::new(
        &test_config(),
        store.clone(),
        Arc::new(HashEmbedder::new(DIMENSION)),
        index.clone(),
    );

    let document_id = Uuid::new_v4();
    let tenant = Uuid::new_v4();
    let status = pipeline
        .ingest(
            document_id,
            "Cardiology I",
            &lecture_text(250),
            tenant,
            SourceTier::Official,
        )
        .await
        .unwrap();
    assert_eq!(status, DocumentStatus::Indexed);

    let stored = store.document(document_id).await.unwrap().unwrap();
    assert_eq!(stored.status, DocumentStatus::Indexed);

    let chunks = store.chunks(document_id).await.unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(index.len().await.unwrap(), 3);

    let entry = index.entry(chunks[0].id).await.unwrap().unwrap();
    assert_eq!(entry.text, chunks[0].text);
    assert_eq!(entry.tenant_id, tenant);
    assert_eq!(entry.sequence_index, 0);
    assert_eq!(entry.model_version, "hash-v1");
}

#[tokio::test]
async fn reingesting_identical_text_is_idempotent() {
    let store = Arc::new(MemoryDocumentStore::new());
    let index = Arc::new(InMemoryVectorIndex::new(DIMENSION));
    let pipeline = IngestionPipeline::new(
        &test_config(),
        store.clone(),
        Arc::new(HashEmbedder::new(DIMENSION)),
        index.clone(),
    );

    let document_id = Uuid::new_v4();
    let tenant = Uuid::new_v4();
    let text = lecture_text(250);

    pipeline
        .ingest(document_id, "Cardiology I", &text, tenant, SourceTier::Official)
        .await
        .unwrap();
    let first_ids: HashSet<Uuid> = store
        .chunks(document_id)
        .await
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();

    pipeline
        .ingest(document_id, "Cardiology I", &text, tenant, SourceTier::Official)
        .await
        .unwrap();
    let second_ids: HashSet<Uuid> = store
        .chunks(document_id)
        .await
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();

    assert_eq!(first_ids, second_ids);
    assert_eq!(index.len().await.unwrap(), 3);
}

#[tokio::test]
async fn reingest_with_changed_text_drops_stale_entries() {
    let store = Arc::new(MemoryDocumentStore::new());
    let index = Arc::new(InMemoryVectorIndex::new(DIMENSION));
    let pipeline = IngestionPipeline::new(
        &test_config(),
        store.clone(),
        Arc::new(HashEmbedder::new(DIMENSION)),
        index.clone(),
    );

    let document_id = Uuid::new_v4();
    let tenant = Uuid::new_v4();

    pipeline
        .ingest(
            document_id,
            "Cardiology I",
            &lecture_text(250),
            tenant,
            SourceTier::Official,
        )
        .await
        .unwrap();
    let old_ids: Vec<Uuid> = store
        .chunks(document_id)
        .await
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(old_ids.len(), 3);

    pipeline
        .ingest(
            document_id,
            "Cardiology I (revised)",
            &lecture_text(90),
            tenant,
            SourceTier::Official,
        )
        .await
        .unwrap();

    assert_eq!(index.len().await.unwrap(), 1);
    for old_id in old_ids {
        assert!(index.entry(old_id).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn empty_document_is_rejected_and_marked_failed() {
    let store = Arc::new(MemoryDocumentStore::new());
    let index = Arc::new(InMemoryVectorIndex::new(DIMENSION));
    let pipeline = IngestionPipeline::new(
        &test_config(),
        store.clone(),
        Arc::new(HashEmbedder::new(DIMENSION)),
        index.clone(),
    );

    let document_id = Uuid::new_v4();
    let result = pipeline
        .ingest(
            document_id,
            "Empty upload",
            "   \n\t  ",
            Uuid::new_v4(),
            SourceTier::UserNote,
        )
        .await;
    assert!(matches!(result, Err(MedRagError::Ingestion(_))));

    let stored = store.document(document_id).await.unwrap().unwrap();
    assert_eq!(stored.status, DocumentStatus::Failed);
    assert_eq!(index.len().await.unwrap(), 0);
}

#[tokio::test]
async fn batched_embedding_preserves_chunk_order() {
    let store = Arc::new(MemoryDocumentStore::new());
    let index = Arc::new(InMemoryVectorIndex::new(DIMENSION));
    let embedder = Arc::new(HashEmbedder::new(DIMENSION));
    // batch_size 2 over three chunks forces an uneven final batch.
    let pipeline = IngestionPipeline::new(
        &test_config(),
        store.clone(),
        embedder.clone(),
        index.clone(),
    );

    let document_id = Uuid::new_v4();
    pipeline
        .ingest(
            document_id,
            "Cardiology I",
            &lecture_text(250),
            Uuid::new_v4(),
            SourceTier::Official,
        )
        .await
        .unwrap();

    let chunks = store.chunks(document_id).await.unwrap();
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let expected = embedder.embed(&texts).await.unwrap();

    for (chunk, expected_vector) in chunks.iter().zip(expected) {
        let entry = index.entry(chunk.id).await.unwrap().unwrap();
        assert_eq!(entry.vector.len(), expected_vector.len());
        for (got, want) in entry.vector.iter().zip(expected_vector.iter()) {
            assert!((got - want).abs() < 1e-5);
        }
    }
}

/// Index wrapper whose upserts can be shut off mid-test.
struct GatedIndex {
    inner: InMemoryVectorIndex,
    reject_upserts: AtomicBool,
}

impl GatedIndex {
    fn new(dimension: usize) -> Self {
        Self {
            inner: InMemoryVectorIndex::new(dimension),
            reject_upserts: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl VectorIndex for GatedIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if self.reject_upserts.load(Ordering::SeqCst) {
            return Err(MedRagError::Index("shard read-only".to_string()));
        }
        self.inner.upsert(entries).await
    }

    async fn delete(&self, chunk_id: ChunkId) -> Result<bool> {
        self.inner.delete(chunk_id).await
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        self.inner.search(query, k, filter).await
    }

    async fn entry(&self, chunk_id: ChunkId) -> Result<Option<IndexEntry>> {
        self.inner.entry(chunk_id).await
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }
}

#[tokio::test]
async fn reindex_upsert_failures_mark_only_the_affected_documents() {
    let store = Arc::new(MemoryDocumentStore::new());
    let index = Arc::new(GatedIndex::new(DIMENSION));

    let pipeline = IngestionPipeline::new(
        &test_config(),
        store.clone(),
        Arc::new(HashEmbedder::new(DIMENSION)),
        index.clone(),
    );
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    for document_id in [first, second] {
        pipeline
            .ingest(
                document_id,
                "Cardiology I",
                &lecture_text(250),
                Uuid::new_v4(),
                SourceTier::Official,
            )
            .await
            .unwrap();
    }

    index.reject_upserts.store(true, Ordering::SeqCst);
    let pipeline_v2 = IngestionPipeline::new(
        &test_config(),
        store.clone(),
        Arc::new(HashEmbedder::with_version(DIMENSION, "hash-v2")),
        index.clone(),
    );
    // The walk must survive the first document's failure and reach the
    // second, so both end up Failed instead of the run aborting.
    let refreshed = pipeline_v2.reindex().await.unwrap();
    assert_eq!(refreshed, 0);
    for document_id in [first, second] {
        let stored = store.document(document_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
    }
}

#[tokio::test]
async fn reindex_refreshes_entries_with_current_model() {
    let store = Arc::new(MemoryDocumentStore::new());
    let index = Arc::new(InMemoryVectorIndex::new(DIMENSION));

    let pipeline_v1 = IngestionPipeline::new(
        &test_config(),
        store.clone(),
        Arc::new(HashEmbedder::new(DIMENSION)),
        index.clone(),
    );
    let document_id = Uuid::new_v4();
    pipeline_v1
        .ingest(
            document_id,
            "Cardiology I",
            &lecture_text(250),
            Uuid::new_v4(),
            SourceTier::Official,
        )
        .await
        .unwrap();

    let pipeline_v2 = IngestionPipeline::new(
        &test_config(),
        store.clone(),
        Arc::new(HashEmbedder::with_version(DIMENSION, "hash-v2")),
        index.clone(),
    );
    let refreshed = pipeline_v2.reindex().await.unwrap();
    assert_eq!(refreshed, 1);

    let chunks = store.chunks(document_id).await.unwrap();
    for chunk in &chunks {
        let entry = index.entry(chunk.id).await.unwrap().unwrap();
        assert_eq!(entry.model_version, "hash-v2");
    }
    assert_eq!(index.len().await.unwrap(), chunks.len());
}
