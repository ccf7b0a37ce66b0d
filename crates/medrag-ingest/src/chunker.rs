use medrag_core::{
    Chunk, ChunkId, ChunkMetadata, ChunkingConfig, DocumentId, MedRagError, Result, SourceTier,
};
use uuid::Uuid;

/// Cuts document text into overlapping fixed-size windows.
///
/// The policy arrives in tokens and is converted to character windows with
/// the configured chars-per-token estimate; consecutive windows overlap by
/// the overlap amount, so the stride between chunk starts is
/// `window - overlap`. Boundaries are char offsets, which keeps slicing
/// valid for multi-byte text. Identical input and policy always reproduce
/// identical boundaries and ids.
pub struct Chunker {
    window_chars: usize,
    overlap_chars: usize,
    chars_per_token: usize,
    max_document_chars: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            window_chars: config.max_tokens * config.chars_per_token,
            overlap_chars: config.overlap_tokens * config.chars_per_token,
            chars_per_token: config.chars_per_token,
            max_document_chars: config.max_document_chars,
        }
    }

    pub fn chunk(
        &self,
        document_id: DocumentId,
        tier: SourceTier,
        raw_text: &str,
    ) -> Result<Vec<Chunk>> {
        if raw_text.trim().is_empty() {
            return Err(MedRagError::Ingestion(
                "document text is empty".to_string(),
            ));
        }

        let stride = self.window_chars.saturating_sub(self.overlap_chars);
        if stride == 0 {
            return Err(MedRagError::Ingestion(
                "chunk overlap must be smaller than the chunk window".to_string(),
            ));
        }

        // Byte offset of every char boundary, plus the end of the text.
        let mut boundaries: Vec<usize> = raw_text
            .char_indices()
            .map(|(offset, _)| offset)
            .collect();
        boundaries.push(raw_text.len());
        let char_count = boundaries.len() - 1;

        if char_count > self.max_document_chars {
            return Err(MedRagError::Ingestion(format!(
                "document has {} chars, limit is {}",
                char_count, self.max_document_chars
            )));
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let end = (start + self.window_chars).min(char_count);
            let text = &raw_text[boundaries[start]..boundaries[end]];
            let sequence_index = chunks.len();
            chunks.push(Chunk {
                id: chunk_id_for(document_id, sequence_index, text),
                document_id,
                sequence_index,
                text: text.to_string(),
                token_count: (end - start + self.chars_per_token - 1) / self.chars_per_token,
                metadata: ChunkMetadata {
                    start_char: start,
                    end_char: end,
                    tier,
                },
            });

            if end == char_count {
                break;
            }
            start += stride;
        }

        Ok(chunks)
    }
}

/// Content-derived chunk id: re-ingesting unchanged text yields the same id
/// without any stored mapping.
pub fn chunk_id_for(document_id: DocumentId, sequence_index: usize, text: &str) -> ChunkId {
    let name = format!("{}:{}:{}", document_id, sequence_index, text);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}
