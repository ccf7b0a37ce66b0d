use async_trait::async_trait;
use dashmap::DashMap;
use medrag_core::{
    Chunk, Document, DocumentId, DocumentStatus, DocumentStore, MedRagError, Result,
};

/// In-memory reference implementation of the document persistence boundary.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<DocumentId, Document>,
    chunks: DashMap<DocumentId, Vec<Chunk>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn put_document(&self, document: Document) -> Result<()> {
        self.documents.insert(document.id, document);
        Ok(())
    }

    async fn document(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.documents.get(&id).map(|d| d.clone()))
    }

    async fn set_status(&self, id: DocumentId, status: DocumentStatus) -> Result<()> {
        match self.documents.get_mut(&id) {
            Some(mut document) => {
                document.status = status;
                Ok(())
            }
            None => Err(MedRagError::Ingestion(format!("unknown document {}", id))),
        }
    }

    async fn put_chunks(&self, document_id: DocumentId, chunks: Vec<Chunk>) -> Result<()> {
        self.chunks.insert(document_id, chunks);
        Ok(())
    }

    async fn chunks(&self, document_id: DocumentId) -> Result<Vec<Chunk>> {
        Ok(self
            .chunks
            .get(&document_id)
            .map(|c| c.clone())
            .unwrap_or_default())
    }

    async fn documents_with_status(&self, status: DocumentStatus) -> Result<Vec<Document>> {
        Ok(self
            .documents
            .iter()
            .filter(|d| d.status == status)
            .map(|d| d.clone())
            .collect())
    }
}
