use crate::gateway::GenerationGateway;
use crate::state::{AgentPhase, AgentState};
use medrag_core::{
    AgentConfig, AskOutcome, ChunkId, Citation, MedRagError, Result, RetrievedChunk, SearchFilter,
    SessionId, SessionStore, TenantId, Turn,
};
use medrag_vector::{QueryExpander, Retriever};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Drives one question through the retrieve, generate, evaluate loop. The
/// cancellation token is checked before every phase, at most
/// `retrieval_ceiling` retrieval rounds run, and a finished turn always leaves
/// the session log with one user turn and one agent turn, failed or not. A
/// cancelled turn leaves no trace in the log.
pub struct Orchestrator {
    retriever: Arc<Retriever>,
    gateway: Arc<GenerationGateway>,
    sessions: Arc<dyn SessionStore>,
    expander: QueryExpander,
    config: AgentConfig,
}

impl Orchestrator {
    pub fn new(
        config: AgentConfig,
        retriever: Arc<Retriever>,
        gateway: Arc<GenerationGateway>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            expander: QueryExpander::new(),
            config,
            retriever,
            gateway,
            sessions,
        }
    }

    #[instrument(skip(self, query, cancel), fields(session_id = %session_id))]
    pub async fn run_turn(
        &self,
        session_id: SessionId,
        user_id: TenantId,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<AskOutcome> {
        if query.trim().is_empty() {
            return Err(MedRagError::Orchestration("question is empty".to_string()));
        }
        if self.config.retrieval_ceiling == 0 {
            return Err(MedRagError::Orchestration(
                "retrieval ceiling must be at least 1".to_string(),
            ));
        }

        self.sessions.get_or_create(session_id, user_id).await?;
        // History is captured once so prompts within this turn agree on what
        // came before it.
        let history = self
            .sessions
            .recent_turns(session_id, self.config.history_turns)
            .await?;
        let filter = SearchFilter::for_tenant(user_id);

        let mut state = AgentState::new(query);
        let mut phase = AgentPhase::Start;
        let mut last_added = 0usize;

        loop {
            if cancel.is_cancelled() {
                debug!("turn cancelled during {}", phase);
                return Err(MedRagError::Cancelled);
            }

            match phase {
                AgentPhase::Start => phase = AgentPhase::Retrieve,
                AgentPhase::Retrieve => {
                    let outcome = self
                        .retriever
                        .retrieve(&state.query, self.retriever.default_k(), Some(&filter))
                        .await;
                    state.retrieval_attempts += 1;
                    match outcome {
                        Ok(chunks) => {
                            last_added = state.absorb_chunks(chunks);
                            debug!(
                                round = state.retrieval_attempts,
                                added = last_added,
                                held = state.retrieved_chunks.len(),
                                "retrieval round complete"
                            );
                            phase = AgentPhase::Generate;
                        }
                        Err(e) => return self.fail_turn(session_id, query, e).await,
                    }
                }
                AgentPhase::Generate => {
                    match self
                        .gateway
                        .generate(&state.original_query, &state.retrieved_chunks, &history)
                        .await
                    {
                        Ok(response) => {
                            state.answer_draft = Some(response);
                            phase = AgentPhase::Evaluate;
                        }
                        Err(e) => return self.fail_turn(session_id, query, e).await,
                    }
                }
                AgentPhase::Evaluate => {
                    if self.accept_draft(&state, last_added) {
                        phase = AgentPhase::Done;
                    } else {
                        state.query = self
                            .expander
                            .reformulate(&state.original_query, state.retrieval_attempts);
                        debug!(
                            round = state.retrieval_attempts,
                            "draft rejected, reformulating"
                        );
                        phase = AgentPhase::Retrieve;
                    }
                }
                AgentPhase::Done => {
                    return self.complete_turn(session_id, query, state).await;
                }
                AgentPhase::Failed => {
                    return Err(MedRagError::Orchestration(
                        "turn reached the failed phase without an error".to_string(),
                    ));
                }
            }
        }
    }

    /// A draft is accepted when another retrieval round could not help: the
    /// ceiling is reached, the last round added nothing new, the model gave no
    /// confidence signal, or the confidence clears the floor.
    fn accept_draft(&self, state: &AgentState, last_added: usize) -> bool {
        if state.retrieval_attempts >= self.config.retrieval_ceiling {
            return true;
        }
        if last_added == 0 {
            return true;
        }
        match state
            .answer_draft
            .as_ref()
            .and_then(|draft| draft.confidence)
        {
            Some(confidence) => confidence >= self.config.min_confidence,
            None => true,
        }
    }

    async fn complete_turn(
        &self,
        session_id: SessionId,
        query: &str,
        state: AgentState,
    ) -> Result<AskOutcome> {
        let draft = match state.answer_draft {
            Some(draft) => draft,
            None => {
                return Err(MedRagError::Orchestration(
                    "turn finished without an answer draft".to_string(),
                ))
            }
        };

        // Citations cover the same chunk prefix the prompt carried, in the
        // same order, so "[1]" in the answer is citations[0].
        let cited: Vec<&RetrievedChunk> = state
            .retrieved_chunks
            .iter()
            .take(self.gateway.context_cap())
            .collect();
        let citations: Vec<Citation> = cited
            .iter()
            .map(|chunk| Citation {
                chunk_id: chunk.chunk_id,
                document_id: chunk.document_id,
                sequence_index: chunk.sequence_index,
                score: chunk.score,
            })
            .collect();
        let cited_ids: Vec<ChunkId> = cited.iter().map(|chunk| chunk.chunk_id).collect();

        // The user turn is stamped before the agent turn so the appended
        // pair stays ordered by timestamp.
        let user_turn = Turn::user(query);
        let agent_turn = Turn::agent(draft.text.clone(), cited_ids);
        let turn_id = agent_turn.id;
        self.sessions
            .append_turns(session_id, vec![user_turn, agent_turn])
            .await?;

        info!(
            phase = %AgentPhase::Done,
            rounds = state.retrieval_attempts,
            citations = citations.len(),
            "turn complete"
        );
        Ok(AskOutcome {
            answer_text: draft.text,
            citations,
            turn_id,
        })
    }

    /// Records the failure in the session log, then propagates the error. The
    /// diagnostic turn is best-effort; a second failure while persisting it is
    /// only logged.
    async fn fail_turn(
        &self,
        session_id: SessionId,
        query: &str,
        error: MedRagError,
    ) -> Result<AskOutcome> {
        warn!(phase = %AgentPhase::Failed, "turn failed: {}", error);
        let diagnostic = format!("query failed: {}", error);
        if let Err(persist_error) = self
            .sessions
            .append_turns(
                session_id,
                vec![Turn::user(query), Turn::failed_agent(diagnostic)],
            )
            .await
        {
            warn!("could not record failed turn: {}", persist_error);
        }
        Err(error)
    }
}
