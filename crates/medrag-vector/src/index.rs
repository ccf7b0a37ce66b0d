use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use medrag_core::{ChunkId, IndexEntry, MedRagError, Result, SearchFilter, SearchHit, VectorIndex};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// An index entry plus its insertion sequence. The sequence breaks score ties
/// so equal scores rank in arrival order, and it survives re-upserts of the
/// same chunk.
struct StoredEntry {
    entry: IndexEntry,
    seq: u64,
}

/// Brute-force cosine index over a concurrent map. Vectors are L2-normalized
/// on the way in, so scoring is a plain dot product. Filters are applied while
/// scanning, which means a filtered search ranks among eligible entries only
/// instead of truncating a global top-k.
pub struct InMemoryVectorIndex {
    dimension: usize,
    entries: DashMap<ChunkId, StoredEntry>,
    insert_seq: AtomicU64,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: DashMap::new(),
            insert_seq: AtomicU64::new(0),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        for mut entry in entries {
            if entry.vector.len() != self.dimension {
                return Err(MedRagError::Index(format!(
                    "entry {} has dimension {}, index expects {}",
                    entry.chunk_id,
                    entry.vector.len(),
                    self.dimension
                )));
            }
            l2_normalize(&mut entry.vector);
            match self.entries.entry(entry.chunk_id) {
                Entry::Occupied(mut slot) => {
                    let seq = slot.get().seq;
                    slot.insert(StoredEntry { entry, seq });
                }
                Entry::Vacant(slot) => {
                    let seq = self.insert_seq.fetch_add(1, Ordering::Relaxed);
                    slot.insert(StoredEntry { entry, seq });
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, chunk_id: ChunkId) -> Result<bool> {
        Ok(self.entries.remove(&chunk_id).is_some())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(MedRagError::Index(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.dimension
            )));
        }
        let mut query = query.to_vec();
        l2_normalize(&mut query);

        let mut scored: Vec<(f32, u64, ChunkId)> = Vec::new();
        for item in self.entries.iter() {
            let stored = item.value();
            if let Some(filter) = filter {
                if !filter.matches(stored.entry.tenant_id, stored.entry.document_id) {
                    continue;
                }
            }
            let score = dot(&query, &stored.entry.vector);
            scored.push((score, stored.seq, stored.entry.chunk_id));
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        scored.truncate(k);
        trace!(candidates = scored.len(), "index scan complete");

        Ok(scored
            .into_iter()
            .map(|(score, _, chunk_id)| SearchHit { chunk_id, score })
            .collect())
    }

    async fn entry(&self, chunk_id: ChunkId) -> Result<Option<IndexEntry>> {
        Ok(self
            .entries
            .get(&chunk_id)
            .map(|item| item.value().entry.clone()))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
