use medrag_core::{ChunkId, ModelResponse, RetrievedChunk};
use std::collections::HashSet;
use std::fmt;

/// Phases of a single question's lifecycle. Transitions only move forward,
/// except Evaluate, which may loop back to Retrieve until the retrieval
/// ceiling is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Start,
    Retrieve,
    Generate,
    Evaluate,
    Done,
    Failed,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentPhase::Start => write!(f, "start"),
            AgentPhase::Retrieve => write!(f, "retrieve"),
            AgentPhase::Generate => write!(f, "generate"),
            AgentPhase::Evaluate => write!(f, "evaluate"),
            AgentPhase::Done => write!(f, "done"),
            AgentPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Working set for one question as it moves through the phases. `query` is
/// what retrieval runs on and gets reformulated between rounds;
/// `original_query` is what the student asked and what generation answers.
pub struct AgentState {
    pub query: String,
    pub original_query: String,
    pub retrieved_chunks: Vec<RetrievedChunk>,
    pub retrieval_attempts: u32,
    pub answer_draft: Option<ModelResponse>,
}

impl AgentState {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            original_query: query.to_string(),
            retrieved_chunks: Vec::new(),
            retrieval_attempts: 0,
            answer_draft: None,
        }
    }

    /// Merges a retrieval round into the working set, dropping chunks already
    /// held, then re-sorts by score so the best evidence leads regardless of
    /// which round found it. Returns how many chunks were new.
    pub fn absorb_chunks(&mut self, chunks: Vec<RetrievedChunk>) -> usize {
        let mut held: HashSet<ChunkId> =
            self.retrieved_chunks.iter().map(|c| c.chunk_id).collect();
        let mut added = 0;
        for chunk in chunks {
            if held.insert(chunk.chunk_id) {
                self.retrieved_chunks.push(chunk);
                added += 1;
            }
        }
        if added > 0 {
            self.retrieved_chunks.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        added
    }

    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        self.retrieved_chunks.iter().map(|c| c.chunk_id).collect()
    }
}
