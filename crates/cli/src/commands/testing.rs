use async_trait::async_trait;

use perch_core::retrieval::{Embedder, RetrievalError};

/// Embeds text as keyword counts for a picnic topic and a programming topic.
pub struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let text = text.to_lowercase();
        let count = |words: &[&str]| words.iter().map(|word| text.matches(word).count()).sum::<usize>() as f32;
        Ok(vec![count(&["picnic", "sandwich"]), count(&["compiler", "rust", "borrow"]), 1.0])
    }
}
