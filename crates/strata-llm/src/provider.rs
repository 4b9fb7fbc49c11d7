use crate::error::LlmError;

/// Text → vector capability.
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or does not embed.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    /// Embed several texts, preserving input order.
    ///
    /// The default implementation embeds one text at a time.
    ///
    /// # Errors
    ///
    /// Returns the first embedding error.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, LlmError>> + Send {
        async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }

    fn name(&self) -> &str;
}

/// Prompt → text capability.
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or returns nothing.
    fn generate(
        &self,
        prompt: &str,
        temperature: f32,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;
}

impl<T: Embedder> Embedder for std::sync::Arc<T> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        (**self).embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        (**self).embed_batch(texts).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: TextGenerator> TextGenerator for std::sync::Arc<T> {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, LlmError> {
        (**self).generate(prompt, temperature).await
    }
}
