//! Semantic memory over conversation windows.
//!
//! Windows are embedded and stored in a vector index collection owned by
//! their channel. Queries return anchor ids only; expanding an anchor back
//! into messages is left to the caller, which reads the canonical store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::message::{GenericMessage, MessageId};
use crate::windowing::Segment;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum RetrievalError {
    #[error("embedding request failed: {0}")]
    Embedding(String),
    #[error("vector index request failed: {0}")]
    Index(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("record has no embeddable fields")]
    EmptyRecord,
    #[error("could not serialize document: {0}")]
    Serialize(String),
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub distance: Option<f32>,
    pub document: Option<String>,
}

/// Collection-scoped vector storage keyed by string ids.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts records, replacing any with the same id.
    async fn add(&self, collection: &str, records: Vec<VectorRecord>) -> Result<(), RetrievalError>;
    /// Returns up to `k` nearest records, nearest first.
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<VectorMatch>, RetrievalError>;
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<(), RetrievalError>;
    async fn count(&self, collection: &str) -> Result<usize, RetrievalError>;
    async fn drop_collection(&self, collection: &str) -> Result<(), RetrievalError>;
}

/// How per-field embeddings of one record are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAggregation {
    #[default]
    Sum,
    Mean,
}

impl FieldAggregation {
    pub fn combine(&self, vectors: Vec<Vec<f32>>) -> Result<Vec<f32>, RetrievalError> {
        let count = vectors.len();
        let mut iter = vectors.into_iter();
        let mut total = iter.next().ok_or(RetrievalError::EmptyRecord)?;

        for vector in iter {
            if vector.len() != total.len() {
                return Err(RetrievalError::DimensionMismatch {
                    expected: total.len(),
                    actual: vector.len(),
                });
            }
            for (acc, value) in total.iter_mut().zip(vector) {
                *acc += value;
            }
        }

        if matches!(self, Self::Mean) && count > 1 {
            let divisor = count as f32;
            total.iter_mut().for_each(|value| *value /= divisor);
        }
        Ok(total)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub id: MessageId,
    pub distance: Option<f32>,
}

/// Name of the vector collection that stores a channel's windows: the first
/// eight hex digits of the SHA-256 of the channel name.
pub fn collection_name(channel: &str) -> String {
    let digest = Sha256::digest(channel.as_bytes());
    format!("{digest:x}")[..8].to_string()
}

#[derive(Clone)]
pub struct RetrievalAdapter {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    aggregation: FieldAggregation,
}

impl RetrievalAdapter {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index, aggregation: FieldAggregation::default() }
    }

    pub fn with_aggregation(mut self, aggregation: FieldAggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Embeds every field of a JSON object except `id` and combines the
    /// results. Non-string values are embedded in their JSON form.
    pub async fn embed_record(&self, record: &serde_json::Value) -> Result<Vec<f32>, RetrievalError> {
        let fields: Vec<String> = match record {
            serde_json::Value::Object(map) => map
                .iter()
                .filter(|(key, _)| key.as_str() != "id")
                .map(|(_, value)| match value {
                    serde_json::Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect(),
            serde_json::Value::String(text) => vec![text.clone()],
            other => vec![other.to_string()],
        };

        let mut vectors = Vec::with_capacity(fields.len());
        for field in &fields {
            vectors.push(self.embedder.embed(field).await?);
        }
        self.aggregation.combine(vectors)
    }

    pub async fn index(
        &self,
        channel: &str,
        segment: &Segment<GenericMessage>,
    ) -> Result<(), RetrievalError> {
        let record = serde_json::json!({
            "id": segment.anchor_id.0,
            "content": segment.transcript(),
        });
        let embedding = self.embed_record(&record).await?;
        let document = serde_json::to_string(&record)
            .map_err(|error| RetrievalError::Serialize(error.to_string()))?;

        let collection = collection_name(channel);
        self.index
            .add(
                &collection,
                vec![VectorRecord {
                    id: segment.anchor_id.0.to_string(),
                    embedding,
                    document: Some(document),
                }],
            )
            .await?;

        debug!(
            event_name = "retrieval.segment.indexed",
            channel,
            collection = %collection,
            anchor_id = segment.anchor_id.0,
            messages = segment.items.len(),
            "indexed conversation window"
        );
        Ok(())
    }

    pub async fn query(
        &self,
        channel: &str,
        text: &str,
        k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embed_record(&serde_json::Value::String(text.to_string())).await?;
        let matches = self.index.query(&collection_name(channel), &embedding, k).await?;

        let results = matches
            .into_iter()
            .filter_map(|candidate| match candidate.id.parse::<i64>() {
                Ok(id) => Some(RetrievalResult { id: MessageId(id), distance: candidate.distance }),
                Err(_) => {
                    warn!(
                        event_name = "retrieval.match.invalid_id",
                        channel,
                        id = %candidate.id,
                        "ignoring vector match with a non-numeric anchor id"
                    );
                    None
                }
            })
            .collect();
        Ok(results)
    }

    pub async fn count(&self, channel: &str) -> Result<usize, RetrievalError> {
        self.index.count(&collection_name(channel)).await
    }

    /// Removes every indexed window of the channel.
    pub async fn reset(&self, channel: &str) -> Result<(), RetrievalError> {
        self.index.drop_collection(&collection_name(channel)).await
    }
}

/// Cosine similarity between two vectors; zero when either is empty or
/// their lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Process-local vector index using exhaustive cosine distance. Used by
/// tests and as a fallback when no external index is configured.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, HashMap<String, (Vec<f32>, Option<String>)>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn add(&self, collection: &str, records: Vec<VectorRecord>) -> Result<(), RetrievalError> {
        let mut collections = self.collections.write().await;
        let entries = collections.entry(collection.to_string()).or_default();
        for record in records {
            if let Some((existing, _)) = entries.values().next() {
                if existing.len() != record.embedding.len() {
                    return Err(RetrievalError::DimensionMismatch {
                        expected: existing.len(),
                        actual: record.embedding.len(),
                    });
                }
            }
            entries.insert(record.id, (record.embedding, record.document));
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<VectorMatch>, RetrievalError> {
        let collections = self.collections.read().await;
        let Some(entries) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<VectorMatch> = entries
            .iter()
            .map(|(id, (vector, document))| VectorMatch {
                id: id.clone(),
                distance: Some(1.0 - cosine_similarity(embedding, vector)),
                document: document.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            let left = a.distance.unwrap_or(f32::MAX);
            let right = b.distance.unwrap_or(f32::MAX);
            left.total_cmp(&right).then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<(), RetrievalError> {
        if let Some(entries) = self.collections.write().await.get_mut(collection) {
            for id in ids {
                entries.remove(id);
            }
        }
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, RetrievalError> {
        Ok(self.collections.read().await.get(collection).map_or(0, HashMap::len))
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), RetrievalError> {
        self.collections.write().await.remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::domain::message::{GenericMessage, MessageId};
    use crate::windowing::{segment, Segment};

    use super::{
        collection_name, Embedder, FieldAggregation, InMemoryVectorIndex, RetrievalAdapter,
        RetrievalError, VectorIndex,
    };

    const VOCABULARY: [&str; 8] = ["rust", "borrow", "coffee", "espresso", "rain", "umbrella", "cat", "dog"];

    /// Bag-of-words over a fixed vocabulary.
    struct VocabularyEmbedder;

    #[async_trait]
    impl Embedder for VocabularyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
            let lowered = text.to_lowercase();
            Ok(VOCABULARY.iter().map(|word| lowered.matches(word).count() as f32).collect())
        }
    }

    fn message(id: i64, sender: &str, content: &str) -> GenericMessage {
        GenericMessage {
            id: MessageId(id),
            sender: sender.to_string(),
            channel: "#perch".to_string(),
            content: content.to_string(),
        }
    }

    fn topical_history() -> Vec<GenericMessage> {
        let topics = [
            "rust borrow checker again",
            "coffee or espresso today",
            "rain again, grab an umbrella",
            "the cat chased the dog",
        ];
        let mut messages = Vec::new();
        let mut id = 1;
        for topic in topics {
            for speaker in ["alice", "bob", "carol"] {
                messages.push(message(id, speaker, topic));
                id += 1;
            }
        }
        messages
    }

    fn adapter(index: Arc<InMemoryVectorIndex>) -> RetrievalAdapter {
        RetrievalAdapter::new(Arc::new(VocabularyEmbedder), index)
    }

    #[test]
    fn collection_name_is_a_short_stable_hash() {
        let name = collection_name("#rust");
        assert_eq!(name.len(), 8);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(name, collection_name("#rust"));
        assert_ne!(name, collection_name("#Rust"));
        assert_eq!(collection_name("abc"), "ba7816bf");
    }

    #[tokio::test]
    async fn query_similar_to_third_segment_ranks_it_first() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let memory = adapter(index.clone());
        let segments = segment(&topical_history(), 3, 0).unwrap_or_default();
        assert_eq!(segments.len(), 4);

        for window in &segments {
            assert!(memory.index("#perch", window).await.is_ok());
        }
        assert_eq!(memory.count("#perch").await, Ok(4));

        let results = match memory.query("#perch", "is it going to rain? need an umbrella", 1).await {
            Ok(results) => results,
            Err(error) => panic!("query failed: {error}"),
        };
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, segments[2].anchor_id);

        let ranked = memory.query("#perch", "rain umbrella", 4).await.unwrap_or_default();
        assert_eq!(ranked[0].id, MessageId(7));
        let distances: Vec<f32> = ranked.iter().filter_map(|r| r.distance).collect();
        assert!(distances.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test]
    async fn collections_are_scoped_per_channel() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let memory = adapter(index.clone());
        let window = Segment { anchor_id: MessageId(1), items: vec![message(1, "alice", "rust")] };

        assert!(memory.index("#one", &window).await.is_ok());
        assert_eq!(memory.query("#two", "rust", 3).await, Ok(Vec::new()));
        assert_eq!(memory.query("#one", "rust", 3).await.map(|r| r.len()), Ok(1));

        assert!(memory.reset("#one").await.is_ok());
        assert_eq!(memory.count("#one").await, Ok(0));
    }

    #[tokio::test]
    async fn indexed_document_carries_serialized_window() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let memory = adapter(index.clone());
        let window = Segment {
            anchor_id: MessageId(42),
            items: vec![message(42, "alice", "coffee?"), message(43, "bob", "espresso")],
        };
        assert!(memory.index("#perch", &window).await.is_ok());

        let matches = index
            .query(&collection_name("#perch"), &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0], 1)
            .await
            .unwrap_or_default();
        let document = matches.first().and_then(|m| m.document.clone()).unwrap_or_default();
        let parsed: serde_json::Value = serde_json::from_str(&document).unwrap_or_default();
        assert_eq!(parsed["id"], 42);
        assert_eq!(parsed["content"], "alice: coffee?\nbob: espresso");
    }

    #[tokio::test]
    async fn record_embedding_sums_fields_and_skips_id() {
        let memory = adapter(Arc::new(InMemoryVectorIndex::new()));
        let record = serde_json::json!({"id": "rust", "topic": "rust", "mood": "rust cat"});
        let summed = memory.embed_record(&record).await.unwrap_or_default();
        assert_eq!(summed[0], 2.0);
        assert_eq!(summed[6], 1.0);

        let averaged = memory
            .clone()
            .with_aggregation(FieldAggregation::Mean)
            .embed_record(&record)
            .await
            .unwrap_or_default();
        assert_eq!(averaged[0], 1.0);
        assert_eq!(averaged[6], 0.5);
    }

    #[test]
    fn combining_mismatched_dimensions_fails() {
        let result = FieldAggregation::Sum.combine(vec![vec![1.0, 2.0], vec![1.0]]);
        assert_eq!(result, Err(RetrievalError::DimensionMismatch { expected: 2, actual: 1 }));
        assert_eq!(FieldAggregation::Sum.combine(Vec::new()), Err(RetrievalError::EmptyRecord));
    }
}
