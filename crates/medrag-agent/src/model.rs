use async_trait::async_trait;
use medrag_core::{GenerationOptions, LanguageModel, ModelResponse, Prompt, Result};

/// Language model that needs no network: it stitches an answer out of the
/// context blocks themselves, one bullet per numbered block, so everything it
/// says is traceable to a source. Confidence grows with the amount of
/// supporting context.
pub struct ExtractiveModel;

#[async_trait]
impl LanguageModel for ExtractiveModel {
    async fn generate(
        &self,
        prompt: &Prompt,
        _options: &GenerationOptions,
    ) -> Result<ModelResponse> {
        if prompt.context_blocks.is_empty() {
            return Ok(ModelResponse {
                text: "I could not find any indexed course material covering this question. \
                       Try uploading the relevant lecture notes first."
                    .to_string(),
                confidence: Some(0.1),
                model: self.model_name().to_string(),
            });
        }

        let mut text = String::from("Based on the indexed course material:\n");
        for block in &prompt.context_blocks {
            text.push_str("- ");
            text.push_str(lead_sentence(block));
            text.push('\n');
        }

        let confidence = match prompt.context_blocks.len() {
            1..=2 => 0.55,
            3..=4 => 0.7,
            _ => 0.8,
        };
        Ok(ModelResponse {
            text,
            confidence: Some(confidence),
            model: self.model_name().to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "extractive-v1"
    }
}

/// Everything up to and including the first sentence boundary. The block keeps
/// its "[n]" prefix so the bullet carries its own citation marker.
fn lead_sentence(block: &str) -> &str {
    match block.find(". ") {
        Some(position) => &block[..position + 1],
        None => block,
    }
}
