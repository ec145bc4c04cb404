//! Real `EmbeddingProvider` backed by the OpenAI Embeddings API. Feature-gated
//! behind `openai` so a plain `cargo build`/`cargo test` never needs an API
//! key or pulls in `async-openai`.

use async_openai::{
    config::OpenAIConfig,
    types::embeddings::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};
use async_trait::async_trait;

use crate::error::EmbeddingProviderError;
use crate::ports::EmbeddingProvider;

/// Generates embeddings via OpenAI's `/embeddings` endpoint. Requires
/// `OPENAI_API_KEY` in the process environment unless constructed with
/// [`OpenAiEmbeddingProvider::with_config`].
pub struct OpenAiEmbeddingProvider {
    config: OpenAIConfig,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbeddingProvider {
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        let dimensions = Self::model_dimensions(&model);
        Self { config: OpenAIConfig::new(), model, dimensions }
    }

    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimensions = Self::model_dimensions(&model);
        Self { config, model, dimensions }
    }

    fn model_dimensions(model: &str) -> usize {
        match model {
            "text-embedding-3-large" => 3072,
            "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
            _ => 1536,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
        let inputs: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        let input = if inputs.len() == 1 {
            EmbeddingInput::String(inputs[0].clone())
        } else {
            EmbeddingInput::StringArray(inputs)
        };

        let request = CreateEmbeddingRequest { input, model: self.model.clone(), ..Default::default() };

        let client = Client::with_config(self.config.clone());
        let response = client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| EmbeddingProviderError(format!("OpenAI API error: {e}")))?;

        Ok(response.data.into_iter().map(|e| e.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_dimensions_match_known_models() {
        assert_eq!(OpenAiEmbeddingProvider::model_dimensions("text-embedding-3-small"), 1536);
        assert_eq!(OpenAiEmbeddingProvider::model_dimensions("text-embedding-3-large"), 3072);
        assert_eq!(OpenAiEmbeddingProvider::model_dimensions("text-embedding-ada-002"), 1536);
        assert_eq!(OpenAiEmbeddingProvider::model_dimensions("unknown-model"), 1536);
    }

    #[test]
    fn constructors_set_dimension_from_model() {
        let provider = OpenAiEmbeddingProvider::new("text-embedding-3-large");
        assert_eq!(provider.dimension(), 3072);
    }
}
