use crate::expansion::QueryExpander;
use medrag_core::{
    EmbeddingProvider, MedRagError, Result, RetrievalConfig, RetrievedChunk, SearchFilter,
    SearchHit, SourceTier, VectorIndex,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Embeds the query, pulls nearest neighbours from the index, then re-ranks
/// with a lexical overlap term and a source-tier boost before truncating to k.
/// The semantic score comes from the (possibly expanded) query; the lexical
/// term always uses the student's original words.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    expander: QueryExpander,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        config: RetrievalConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            expander: QueryExpander::new(),
            config,
            embedder,
            index,
        }
    }

    /// How many chunks a caller gets when it does not ask for a specific k.
    pub fn default_k(&self) -> usize {
        self.config.max_results
    }

    #[instrument(skip(self, query, filter))]
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<RetrievedChunk>> {
        if query.trim().is_empty() {
            return Err(MedRagError::Retrieval("query is empty".to_string()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let search_text = if self.config.expand_queries {
            self.expander.expand(query)
        } else {
            query.to_string()
        };
        let vectors = self.embedder.embed(&[search_text]).await?;
        let query_vector = match vectors.into_iter().next() {
            Some(vector) => vector,
            None => {
                return Err(MedRagError::Retrieval(
                    "embedding provider returned no vector for the query".to_string(),
                ))
            }
        };

        // Over-fetch so re-ranking has candidates to promote past the raw
        // similarity order.
        let prefetch_k = (k * 4).max(k + 25);
        let hits = self
            .search_with_retry(&query_vector, prefetch_k, filter)
            .await?;

        let query_terms = keyword_terms(query);
        let mut candidates = Vec::with_capacity(hits.len());
        for hit in &hits {
            let entry = match self.index.entry(hit.chunk_id).await? {
                Some(entry) => entry,
                // Deleted between search and resolution.
                None => continue,
            };
            let lexical = lexical_overlap(&query_terms, &entry.text);
            let combined = (self.config.semantic_weight * hit.score
                + self.config.lexical_weight * lexical)
                * self.tier_boost(entry.tier);
            if combined < self.config.relevance_threshold {
                continue;
            }
            candidates.push(RetrievedChunk {
                chunk_id: entry.chunk_id,
                document_id: entry.document_id,
                sequence_index: entry.sequence_index,
                tier: entry.tier,
                text: entry.text,
                score: combined,
            });
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut seen = HashSet::new();
        candidates.retain(|candidate| seen.insert(candidate.chunk_id));
        candidates.truncate(k);

        debug!(returned = candidates.len(), "retrieval complete");
        Ok(candidates)
    }

    fn tier_boost(&self, tier: SourceTier) -> f32 {
        match tier {
            SourceTier::Official => self.config.official_boost,
            SourceTier::Reference => self.config.reference_boost,
            SourceTier::UserNote => self.config.user_note_boost,
        }
    }

    async fn search_with_retry(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                warn!(
                    "retrying index search in {:?} (attempt {}/{})",
                    delay,
                    attempt + 1,
                    self.config.max_retries + 1
                );
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(timeout, self.index.search(query_vector, k, filter)).await {
                Ok(Ok(hits)) => return Ok(hits),
                Ok(Err(e)) if e.is_transient() => last_error = Some(e),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    last_error = Some(MedRagError::Timeout {
                        component: "vector index",
                        elapsed_ms: timeout.as_millis() as u64,
                    })
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| MedRagError::Retrieval("index search retries exhausted".to_string())))
    }
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "what", "when", "where", "which", "how", "why", "does", "are",
    "was", "can", "about", "between", "into", "this", "that",
];

/// Lowercased query terms worth matching. Stop words and tokens shorter than
/// three characters carry no signal.
fn keyword_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| term.len() > 2 && !STOP_WORDS.contains(term))
        .map(|term| term.to_string())
        .collect()
}

/// Fraction of query terms present in the chunk text.
fn lexical_overlap(terms: &[String], text: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = text.to_lowercase();
    let matched = terms
        .iter()
        .filter(|term| haystack.contains(term.as_str()))
        .count();
    matched as f32 / terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemoryVectorIndex;
    use approx::assert_abs_diff_eq;
    use async_trait::async_trait;
    use medrag_core::{ChunkId, IndexEntry};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct StubEmbedder {
        vectors: HashMap<String, Vec<f32>>,
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            texts
                .iter()
                .map(|text| {
                    self.vectors.get(text).cloned().ok_or_else(|| {
                        MedRagError::Embedding(format!("no stub vector for {:?}", text))
                    })
                })
                .collect()
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_version(&self) -> String {
            "stub-v1".to_string()
        }

        fn provider_name(&self) -> &str {
            "stub"
        }
    }

    struct SlowIndex;

    #[async_trait]
    impl VectorIndex for SlowIndex {
        async fn upsert(&self, _entries: Vec<IndexEntry>) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _chunk_id: ChunkId) -> Result<bool> {
            Ok(false)
        }

        async fn search(
            &self,
            _query: &[f32],
            _k: usize,
            _filter: Option<&SearchFilter>,
        ) -> Result<Vec<SearchHit>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }

        async fn entry(&self, _chunk_id: ChunkId) -> Result<Option<IndexEntry>> {
            Ok(None)
        }

        async fn len(&self) -> Result<usize> {
            Ok(0)
        }
    }

    struct FlakyIndex {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl VectorIndex for FlakyIndex {
        async fn upsert(&self, _entries: Vec<IndexEntry>) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _chunk_id: ChunkId) -> Result<bool> {
            Ok(false)
        }

        async fn search(
            &self,
            _query: &[f32],
            _k: usize,
            _filter: Option<&SearchFilter>,
        ) -> Result<Vec<SearchHit>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(MedRagError::Index("shard offline".to_string()));
            }
            Ok(Vec::new())
        }

        async fn entry(&self, _chunk_id: ChunkId) -> Result<Option<IndexEntry>> {
            Ok(None)
        }

        async fn len(&self) -> Result<usize> {
            Ok(0)
        }
    }

    fn flat_config() -> RetrievalConfig {
        RetrievalConfig {
            max_results: 10,
            relevance_threshold: 0.0,
            semantic_weight: 0.7,
            lexical_weight: 0.3,
            official_boost: 1.0,
            reference_boost: 1.0,
            user_note_boost: 1.0,
            expand_queries: false,
            timeout_secs: 5,
            max_retries: 0,
        }
    }

    fn entry_with(
        chunk_id: Uuid,
        tenant_id: Uuid,
        tier: SourceTier,
        text: &str,
        vector: Vec<f32>,
    ) -> IndexEntry {
        IndexEntry {
            chunk_id,
            document_id: Uuid::new_v4(),
            tenant_id,
            sequence_index: 0,
            tier,
            text: text.to_string(),
            vector,
            model_version: "stub-v1".to_string(),
        }
    }

    fn stub_embedder(query: &str, vector: Vec<f32>) -> Arc<StubEmbedder> {
        let mut vectors = HashMap::new();
        let dimension = vector.len();
        vectors.insert(query.to_string(), vector);
        Arc::new(StubEmbedder { vectors, dimension })
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let retriever = Retriever::new(
            flat_config(),
            stub_embedder("unused", vec![1.0, 0.0, 0.0, 0.0]),
            Arc::new(InMemoryVectorIndex::new(4)),
        );
        let result = retriever.retrieve("   ", 5, None).await;
        assert!(matches!(result, Err(MedRagError::Retrieval(_))));
    }

    #[tokio::test]
    async fn lexical_overlap_promotes_matching_text() {
        let index = Arc::new(InMemoryVectorIndex::new(4));
        let tenant = Uuid::new_v4();
        let semantic_only = Uuid::new_v4();
        let lexical_match = Uuid::new_v4();
        index
            .upsert(vec![
                entry_with(
                    semantic_only,
                    tenant,
                    SourceTier::UserNote,
                    "notes on vitamins",
                    vec![1.0, 0.0, 0.0, 0.0],
                ),
                entry_with(
                    lexical_match,
                    tenant,
                    SourceTier::UserNote,
                    "anemia causes include iron deficiency",
                    vec![0.6, 0.8, 0.0, 0.0],
                ),
            ])
            .await
            .unwrap();

        let retriever = Retriever::new(
            flat_config(),
            stub_embedder("anemia causes", vec![1.0, 0.0, 0.0, 0.0]),
            index,
        );
        let results = retriever.retrieve("anemia causes", 5, None).await.unwrap();
        assert_eq!(results.len(), 2);
        // 0.7 * 0.6 + 0.3 * 1.0 beats 0.7 * 1.0 + 0.3 * 0.0.
        assert_eq!(results[0].chunk_id, lexical_match);
        assert_eq!(results[1].chunk_id, semantic_only);
    }

    #[tokio::test]
    async fn official_sources_outrank_user_notes_at_equal_similarity() {
        let index = Arc::new(InMemoryVectorIndex::new(4));
        let tenant = Uuid::new_v4();
        let official = Uuid::new_v4();
        let note = Uuid::new_v4();
        index
            .upsert(vec![
                entry_with(
                    note,
                    tenant,
                    SourceTier::UserNote,
                    "cardiac cycle overview",
                    vec![1.0, 0.0, 0.0, 0.0],
                ),
                entry_with(
                    official,
                    tenant,
                    SourceTier::Official,
                    "cardiac cycle overview",
                    vec![1.0, 0.0, 0.0, 0.0],
                ),
            ])
            .await
            .unwrap();

        let mut config = flat_config();
        config.official_boost = 1.15;
        let retriever = Retriever::new(
            config,
            stub_embedder("cardiac cycle", vec![1.0, 0.0, 0.0, 0.0]),
            index,
        );
        let results = retriever.retrieve("cardiac cycle", 5, None).await.unwrap();
        assert_eq!(results[0].chunk_id, official);
        assert_eq!(results[1].chunk_id, note);
    }

    #[tokio::test]
    async fn weak_matches_fall_below_the_threshold() {
        let index = Arc::new(InMemoryVectorIndex::new(4));
        let tenant = Uuid::new_v4();
        let strong = Uuid::new_v4();
        index
            .upsert(vec![
                entry_with(
                    strong,
                    tenant,
                    SourceTier::Official,
                    "sepsis management bundle",
                    vec![1.0, 0.0, 0.0, 0.0],
                ),
                entry_with(
                    Uuid::new_v4(),
                    tenant,
                    SourceTier::Official,
                    "unrelated lecture",
                    vec![0.0, 1.0, 0.0, 0.0],
                ),
            ])
            .await
            .unwrap();

        let mut config = flat_config();
        config.relevance_threshold = 0.5;
        let retriever = Retriever::new(
            config,
            stub_embedder("sepsis management", vec![1.0, 0.0, 0.0, 0.0]),
            index,
        );
        let results = retriever
            .retrieve("sepsis management", 5, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, strong);
    }

    #[tokio::test]
    async fn results_are_truncated_to_k() {
        let index = Arc::new(InMemoryVectorIndex::new(4));
        let tenant = Uuid::new_v4();
        for i in 0..5 {
            let mut vector = vec![1.0, 0.0, 0.0, 0.0];
            vector[1] = i as f32 * 0.1;
            index
                .upsert(vec![entry_with(
                    Uuid::new_v4(),
                    tenant,
                    SourceTier::Reference,
                    "glycolysis regulation",
                    vector,
                )])
                .await
                .unwrap();
        }

        let retriever = Retriever::new(
            flat_config(),
            stub_embedder("glycolysis", vec![1.0, 0.0, 0.0, 0.0]),
            index,
        );
        let results = retriever.retrieve("glycolysis", 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn tenant_filter_excludes_other_tenants() {
        let index = Arc::new(InMemoryVectorIndex::new(4));
        let mine = Uuid::new_v4();
        let theirs = Uuid::new_v4();
        let my_chunk = Uuid::new_v4();
        index
            .upsert(vec![
                entry_with(
                    Uuid::new_v4(),
                    theirs,
                    SourceTier::Official,
                    "pharmacology of beta blockers",
                    vec![1.0, 0.0, 0.0, 0.0],
                ),
                entry_with(
                    my_chunk,
                    mine,
                    SourceTier::Official,
                    "pharmacology of beta blockers",
                    vec![1.0, 0.0, 0.0, 0.0],
                ),
            ])
            .await
            .unwrap();

        let retriever = Retriever::new(
            flat_config(),
            stub_embedder("beta blockers", vec![1.0, 0.0, 0.0, 0.0]),
            index,
        );
        let filter = SearchFilter::for_tenant(mine);
        let results = retriever
            .retrieve("beta blockers", 5, Some(&filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, my_chunk);
    }

    #[tokio::test]
    async fn expanded_query_is_what_gets_embedded() {
        let expander = QueryExpander::new();
        let expanded = expander.expand("acute mi");
        let mut config = flat_config();
        config.expand_queries = true;
        // The stub only knows the expanded form, so retrieval succeeding at
        // all proves expansion ran before embedding.
        let retriever = Retriever::new(
            config,
            stub_embedder(&expanded, vec![1.0, 0.0, 0.0, 0.0]),
            Arc::new(InMemoryVectorIndex::new(4)),
        );
        let results = retriever.retrieve("acute mi", 5, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_index_surfaces_a_timeout_error() {
        let mut config = flat_config();
        config.timeout_secs = 1;
        config.max_retries = 1;
        let retriever = Retriever::new(
            config,
            stub_embedder("sepsis", vec![1.0, 0.0, 0.0, 0.0]),
            Arc::new(SlowIndex),
        );
        let result = retriever.retrieve("sepsis", 5, None).await;
        assert!(matches!(result, Err(MedRagError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_index_failures_are_retried() {
        let index = Arc::new(FlakyIndex {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        });
        let mut config = flat_config();
        config.max_retries = 2;
        let retriever = Retriever::new(
            config,
            stub_embedder("sepsis", vec![1.0, 0.0, 0.0, 0.0]),
            index.clone(),
        );

        let results = retriever.retrieve("sepsis", 5, None).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(index.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn keyword_terms_drop_stop_words_and_short_tokens() {
        let terms = keyword_terms("What is the role of ADH in the kidney?");
        assert_eq!(terms, vec!["role".to_string(), "adh".to_string(), "kidney".to_string()]);
    }

    #[test]
    fn lexical_overlap_counts_matched_terms() {
        let terms = keyword_terms("anemia causes");
        let full = lexical_overlap(&terms, "Anemia causes fatigue");
        let half = lexical_overlap(&terms, "anemia workup");
        let none = lexical_overlap(&terms, "renal physiology");
        assert_abs_diff_eq!(full, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(half, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(none, 0.0, epsilon = 1e-6);
    }
}
