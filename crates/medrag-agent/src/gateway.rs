use medrag_core::{
    GenerationConfig, GenerationOptions, LanguageModel, MedRagError, ModelResponse, Prompt,
    PromptMessage, Result, RetrievedChunk, Turn,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const SYSTEM_PROMPT: &str = "You are a study assistant for medical students. \
Answer strictly from the numbered source excerpts provided. Cite the excerpts \
you use with their bracketed numbers, like [1] or [2]. If the excerpts do not \
cover the question, say so plainly instead of guessing. You provide exam \
preparation support, not medical advice.";

const SYSTEM_PROMPT_NO_CONTEXT: &str = "You are a study assistant for medical \
students. No source excerpts matched this question. Say that the indexed \
course material does not cover it and suggest uploading the relevant notes. \
Do not answer from general knowledge.";

/// Assembles prompts and calls the language model with retry and a per-call
/// timeout. Prompts are built nowhere else, so the "[n]" numbering produced
/// here is the numbering citations refer to.
pub struct GenerationGateway {
    model: Arc<dyn LanguageModel>,
    config: GenerationConfig,
}

impl GenerationGateway {
    pub fn new(config: GenerationConfig, model: Arc<dyn LanguageModel>) -> Self {
        Self { model, config }
    }

    /// How many retrieved chunks make it into a prompt. Citations on a
    /// completed turn cover exactly this prefix of the evidence.
    pub fn context_cap(&self) -> usize {
        self.config.max_context_chunks
    }

    #[instrument(skip_all)]
    pub async fn generate(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        history: &[Turn],
    ) -> Result<ModelResponse> {
        if !self.model.is_available().await {
            return Err(MedRagError::Generation(format!(
                "language model {} reports unavailable",
                self.model.model_name()
            )));
        }

        let prompt = self.build_prompt(question, chunks, history);
        let options = GenerationOptions {
            temperature: self.config.temperature,
            max_tokens: Some(self.config.max_tokens),
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                warn!(
                    "retrying generation in {:?} (attempt {}/{})",
                    delay,
                    attempt + 1,
                    self.config.max_retries + 1
                );
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(timeout, self.model.generate(&prompt, &options)).await {
                Ok(Ok(response)) => {
                    debug!(model = %response.model, "generation complete");
                    return Ok(response);
                }
                Ok(Err(e)) if e.is_transient() => last_error = Some(e),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    last_error = Some(MedRagError::Timeout {
                        component: "language model",
                        elapsed_ms: timeout.as_millis() as u64,
                    })
                }
            }
        }

        Err(match last_error {
            Some(e) => MedRagError::Generation(format!(
                "language model failed after {} attempts: {}",
                self.config.max_retries + 1,
                e
            )),
            None => MedRagError::Generation("language model retries exhausted".to_string()),
        })
    }

    fn build_prompt(&self, question: &str, chunks: &[RetrievedChunk], history: &[Turn]) -> Prompt {
        let context_blocks: Vec<String> = chunks
            .iter()
            .take(self.config.max_context_chunks)
            .enumerate()
            .map(|(position, chunk)| {
                format!(
                    "[{}] {}",
                    position + 1,
                    snippet(&chunk.text, self.config.snippet_chars)
                )
            })
            .collect();

        let system = if context_blocks.is_empty() {
            SYSTEM_PROMPT_NO_CONTEXT
        } else {
            SYSTEM_PROMPT
        };

        let history: Vec<PromptMessage> = history
            .iter()
            .filter(|turn| !turn.failed)
            .map(|turn| PromptMessage {
                role: turn.role,
                content: turn.content.clone(),
            })
            .collect();

        Prompt {
            system: system.to_string(),
            context_blocks,
            history,
            user: question.to_string(),
        }
    }
}

/// First `max_chars` characters on a char boundary, with a trailing ellipsis
/// when the text was cut.
fn snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
