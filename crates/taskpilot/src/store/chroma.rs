use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{Document, DocumentStore};
use crate::providers::base::Embedder;

pub const CHROMA_URL: &str = "http://localhost:8000";
pub const DEFAULT_COLLECTION: &str = "task2";

// Texts embedded per request when adding documents
const EMBED_BATCH: usize = 100;

/// Client for a Chroma server's REST API. Embeddings are computed on this side with the
/// configured [`Embedder`], so the server only stores and searches vectors.
pub struct ChromaStore {
    client: Client,
    base_url: String,
    collection: String,
    collection_id: Mutex<Option<String>>,
    embedder: Arc<dyn Embedder>,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    documents: Vec<Option<String>>,
}

impl ChromaStore {
    pub fn new<U: Into<String>, C: Into<String>>(
        base_url: U,
        collection: C,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            collection: collection.into(),
            collection_id: Mutex::new(None),
            embedder,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, payload: Value) -> Result<Value> {
        let response = self
            .client
            .post(self.url(path))
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(anyhow!("Chroma request to {} failed: {}\n{}", path, status, body))
            }
        }
    }

    /// Id of the collection, created on first use
    async fn collection_id(&self) -> Result<String> {
        let mut cached = self.collection_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let response = self
            .post(
                "collections",
                json!({"name": self.collection, "get_or_create": true}),
            )
            .await?;
        let collection: CollectionResponse = serde_json::from_value(response)?;
        tracing::debug!(collection = %self.collection, id = %collection.id, "opened collection");
        *cached = Some(collection.id.clone());
        Ok(collection.id)
    }
}

#[async_trait]
impl DocumentStore for ChromaStore {
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<String>> {
        let id = self.collection_id().await?;
        let embedding = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding returned for query"))?;

        let response = self
            .post(
                &format!("collections/{}/query", id),
                json!({
                    "query_embeddings": [embedding],
                    "n_results": top_k,
                    "include": ["distances"],
                }),
            )
            .await?;
        let result: QueryResponse = serde_json::from_value(response)?;
        Ok(result.ids.into_iter().next().unwrap_or_default())
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<String>> {
        let id = self.collection_id().await?;
        let response = self
            .post(
                &format!("collections/{}/get", id),
                json!({"ids": ids, "include": ["documents"]}),
            )
            .await?;
        let result: GetResponse = serde_json::from_value(response)?;

        // the server does not promise to answer in request order
        Ok(ids
            .iter()
            .filter_map(|wanted| {
                result
                    .ids
                    .iter()
                    .position(|id| id == wanted)
                    .and_then(|index| result.documents.get(index).cloned().flatten())
            })
            .collect())
    }

    async fn add(&self, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let id = self.collection_id().await?;

        for batch in documents.chunks(EMBED_BATCH) {
            let texts: Vec<String> = batch.iter().map(|doc| doc.text.clone()).collect();
            let embeddings = self.embedder.embed(&texts).await?;
            self.post(
                &format!("collections/{}/add", id),
                json!({
                    "ids": batch.iter().map(|doc| &doc.id).collect::<Vec<_>>(),
                    "embeddings": embeddings,
                    "documents": texts,
                    "metadatas": batch
                        .iter()
                        .map(|doc| json!({"source": doc.source}))
                        .collect::<Vec<_>>(),
                }),
            )
            .await?;
        }
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.post("reset", json!({})).await?;
        *self.collection_id.lock().await = None;
        Ok(())
    }
}
