use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use perch_core::retrieval::{RetrievalError, VectorIndex, VectorMatch, VectorRecord};

/// Client for a Chroma server's v1 REST API. Collections are created on
/// first use with cosine distance.
pub struct ChromaIndex {
    client: reqwest::Client,
    base_url: String,
    collection_ids: RwLock<HashMap<String, String>>,
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
}

fn index_error(error: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::Index(error.to_string())
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RetrievalError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RetrievalError::Index(format!("HTTP {status}: {body}")))
}

impl ChromaIndex {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(index_error)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection_ids: RwLock::new(HashMap::new()),
        })
    }

    async fn collection_id(&self, name: &str) -> Result<String, RetrievalError> {
        if let Some(id) = self.collection_ids.read().await.get(name) {
            return Ok(id.clone());
        }

        let response = self
            .client
            .post(format!("{}/api/v1/collections", self.base_url))
            .json(&json!({
                "name": name,
                "metadata": { "hnsw:space": "cosine" },
                "get_or_create": true,
            }))
            .send()
            .await
            .map_err(index_error)?;
        let collection: CollectionResponse =
            ensure_success(response).await?.json().await.map_err(index_error)?;

        debug!(event_name = "chroma.collection.resolved", collection = name, id = %collection.id, "resolved collection");
        self.collection_ids.write().await.insert(name.to_string(), collection.id.clone());
        Ok(collection.id)
    }

    async fn post(&self, collection: &str, action: &str, body: serde_json::Value) -> Result<reqwest::Response, RetrievalError> {
        let id = self.collection_id(collection).await?;
        let response = self
            .client
            .post(format!("{}/api/v1/collections/{id}/{action}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(index_error)?;
        ensure_success(response).await
    }
}

#[async_trait]
impl VectorIndex for ChromaIndex {
    async fn add(&self, collection: &str, records: Vec<VectorRecord>) -> Result<(), RetrievalError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut ids = Vec::with_capacity(records.len());
        let mut embeddings = Vec::with_capacity(records.len());
        let mut documents = Vec::with_capacity(records.len());
        for record in records {
            ids.push(record.id);
            embeddings.push(record.embedding);
            documents.push(record.document);
        }

        self.post(collection, "upsert", json!({ "ids": ids, "embeddings": embeddings, "documents": documents }))
            .await?;
        Ok(())
    }

    async fn query(&self, collection: &str, embedding: &[f32], k: usize) -> Result<Vec<VectorMatch>, RetrievalError> {
        let response = self
            .post(
                collection,
                "query",
                json!({
                    "query_embeddings": [embedding],
                    "n_results": k,
                    "include": ["documents", "distances"],
                }),
            )
            .await?;
        let parsed: QueryResponse = response.json().await.map_err(index_error)?;

        let ids = parsed.ids.into_iter().next().unwrap_or_default();
        let distances = parsed.distances.and_then(|rows| rows.into_iter().next()).unwrap_or_default();
        let documents = parsed.documents.and_then(|rows| rows.into_iter().next()).unwrap_or_default();

        Ok(ids
            .into_iter()
            .enumerate()
            .map(|(position, id)| VectorMatch {
                id,
                distance: distances.get(position).copied().flatten(),
                document: documents.get(position).cloned().flatten(),
            })
            .collect())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<(), RetrievalError> {
        self.post(collection, "delete", json!({ "ids": ids })).await?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, RetrievalError> {
        let id = self.collection_id(collection).await?;
        let response = self
            .client
            .get(format!("{}/api/v1/collections/{id}/count", self.base_url))
            .send()
            .await
            .map_err(index_error)?;
        ensure_success(response).await?.json::<usize>().await.map_err(index_error)
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), RetrievalError> {
        self.collection_ids.write().await.remove(collection);
        let response = self
            .client
            .delete(format!("{}/api/v1/collections/{collection}", self.base_url))
            .send()
            .await
            .map_err(index_error)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if body.contains("does not exist") {
            return Ok(());
        }
        Err(RetrievalError::Index(format!("HTTP {status}: {body}")))
    }
}
