use crate::error::LlmError;
use crate::hashing::HashingEmbedder;
#[cfg(feature = "mock")]
use crate::mock::MockProvider;
use crate::ollama::OllamaProvider;
use crate::provider::{Embedder, TextGenerator};

/// Generates a match over all `AnyProvider` variants, binding the inner provider
/// and evaluating the given expression for each arm.
macro_rules! delegate_provider {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyProvider::Ollama($p) => $expr,
            AnyProvider::Hashing($p) => $expr,
            #[cfg(feature = "mock")]
            AnyProvider::Mock($p) => $expr,
        }
    };
}

#[derive(Debug, Clone)]
pub enum AnyProvider {
    Ollama(OllamaProvider),
    Hashing(HashingEmbedder),
    #[cfg(feature = "mock")]
    Mock(MockProvider),
}

impl AnyProvider {
    /// Whether the backend can serve [`TextGenerator::generate`].
    #[must_use]
    pub fn supports_generation(&self) -> bool {
        !matches!(self, Self::Hashing(_))
    }
}

impl Embedder for AnyProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        delegate_provider!(self, |p| p.embed(text).await)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        delegate_provider!(self, |p| p.embed_batch(texts).await)
    }

    fn name(&self) -> &str {
        delegate_provider!(self, |p| p.name())
    }
}

impl TextGenerator for AnyProvider {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, LlmError> {
        match self {
            Self::Ollama(p) => p.generate(prompt, temperature).await,
            Self::Hashing(_) => Err(LlmError::GenerateUnsupported {
                provider: "hashing",
            }),
            #[cfg(feature = "mock")]
            Self::Mock(p) => p.generate(prompt, temperature).await,
        }
    }
}
