use thiserror::Error;

#[derive(Error, Debug)]
pub enum MedRagError {
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Orchestration error: {0}")]
    Orchestration(String),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("{component} timed out after {elapsed_ms}ms")]
    Timeout {
        component: &'static str,
        elapsed_ms: u64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MedRagError {
    /// Whether a retry loop should try again after this error. Ingestion and
    /// orchestration failures are final; the upstream-facing variants are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MedRagError::Embedding(_)
                | MedRagError::Retrieval(_)
                | MedRagError::Generation(_)
                | MedRagError::Index(_)
                | MedRagError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MedRagError>;
