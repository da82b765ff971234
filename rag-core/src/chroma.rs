//! ChromaDB vector index backend.
//!
//! Provides [`ChromaVectorIndex`], which implements [`VectorIndex`] against a
//! Chroma server's v1 REST API using `reqwest`. The collection is created
//! with `hnsw:space = cosine`, so reported distances are cosine distances.
//!
//! This module is only available when the `chroma` feature is enabled.
//!
//! # Example
//!
//! ```rust,ignore
//! use rag_core::chroma::ChromaVectorIndex;
//!
//! let index = ChromaVectorIndex::connect("http://localhost:8000", "documents", 768).await?;
//! index.add(record).await?;
//! let hits = index.query(&query_embedding, 5, None).await?;
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::document::{IndexedRecord, Metadata};
use crate::error::{RagError, Result};
use crate::vectorstore::{QueryHit, VectorIndex};

const BACKEND: &str = "chroma";

/// A [`VectorIndex`] backed by one [Chroma](https://www.trychroma.com/) collection.
pub struct ChromaVectorIndex {
    client: reqwest::Client,
    base_url: String,
    name: String,
    dimension: usize,
    /// Server-side collection id; changes when the collection is recreated.
    collection_id: RwLock<String>,
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Serialize)]
struct AddRequest<'a> {
    ids: Vec<&'a str>,
    embeddings: Vec<&'a [f32]>,
    documents: Vec<&'a str>,
    metadatas: Vec<Option<&'a Metadata>>,
}

#[derive(Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Metadata>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f32>>>,
}

fn map_err(e: reqwest::Error) -> RagError {
    error!(backend = BACKEND, error = %e, "request failed");
    RagError::index(BACKEND, format!("request failed: {e}"))
}

/// Flatten the single-query response into hits.
///
/// Distances are required: without them there is nothing to rank on.
fn query_hits(result: QueryResponse) -> Result<Vec<QueryHit>> {
    let ids = result.ids.into_iter().next().unwrap_or_default();
    let documents = result.documents.and_then(|d| d.into_iter().next()).unwrap_or_default();
    let metadatas = result.metadatas.and_then(|m| m.into_iter().next()).unwrap_or_default();
    let distances = result.distances.and_then(|d| d.into_iter().next()).unwrap_or_default();
    if distances.len() < ids.len() {
        error!(
            backend = BACKEND,
            ids = ids.len(),
            distances = distances.len(),
            "query response missing distances"
        );
        return Err(RagError::index(BACKEND, "query response missing distances"));
    }

    let hits = ids
        .into_iter()
        .zip(distances)
        .enumerate()
        .map(|(i, (id, distance))| QueryHit {
            id,
            text: documents.get(i).cloned().flatten().unwrap_or_default(),
            metadata: metadatas.get(i).cloned().flatten(),
            distance,
        })
        .collect();
    Ok(hits)
}

/// Translate an equality filter into a Chroma `where` clause.
fn where_clause(filter: &Metadata) -> Option<Value> {
    let mut clauses: Vec<Value> = filter.iter().map(|(k, v)| json!({ k: v })).collect();
    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(json!({ "$and": clauses })),
    }
}

impl ChromaVectorIndex {
    /// Connect to a Chroma server and get or create the named collection.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexFailure`] if the server cannot be reached or
    /// rejects the request.
    pub async fn connect(
        base_url: impl Into<String>,
        name: impl Into<String>,
        dimension: usize,
    ) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let name = name.into();
        let client = reqwest::Client::new();
        let collection_id = Self::get_or_create(&client, &base_url, &name).await?;
        debug!(collection = %name, %collection_id, "connected to chroma collection");
        Ok(Self { client, base_url, name, dimension, collection_id: RwLock::new(collection_id) })
    }

    async fn get_or_create(client: &reqwest::Client, base_url: &str, name: &str) -> Result<String> {
        let body = json!({
            "name": name,
            "metadata": { "hnsw:space": "cosine" },
            "get_or_create": true,
        });
        let response =
            client.post(format!("{base_url}/api/v1/collections")).json(&body).send().await;
        let collection: CollectionResponse = Self::decode(response.map_err(map_err)?).await?;
        Ok(collection.id)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(backend = BACKEND, %status, "API error");
            return Err(RagError::index(BACKEND, format!("API returned {status}: {body}")));
        }
        response.json().await.map_err(|e| {
            error!(backend = BACKEND, error = %e, "failed to parse response");
            RagError::index(BACKEND, format!("failed to parse response: {e}"))
        })
    }

    async fn collection_url(&self, op: &str) -> String {
        let id = self.collection_id.read().await;
        format!("{}/api/v1/collections/{}/{op}", self.base_url, *id)
    }

    fn check_dimension(&self, len: usize, what: &str) -> Result<()> {
        if len != self.dimension {
            return Err(RagError::index(
                BACKEND,
                format!("{what} has dimension {len}, collection expects {}", self.dimension),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for ChromaVectorIndex {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn collection_name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn add(&self, record: IndexedRecord) -> Result<String> {
        let mut ids = self.add_batch(vec![record]).await?;
        ids.pop().ok_or_else(|| RagError::index(BACKEND, "add produced no id"))
    }

    async fn add_batch(&self, records: Vec<IndexedRecord>) -> Result<Vec<String>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        for record in &records {
            self.check_dimension(record.vector.len(), &format!("record '{}'", record.id))?;
        }

        let request = AddRequest {
            ids: records.iter().map(|r| r.id.as_str()).collect(),
            embeddings: records.iter().map(|r| r.vector.as_slice()).collect(),
            documents: records.iter().map(|r| r.text.as_str()).collect(),
            metadatas: records.iter().map(|r| r.metadata.as_ref()).collect(),
        };
        let url = self.collection_url("add").await;
        let response = self.client.post(url).json(&request).send().await.map_err(map_err)?;
        let _: Value = Self::decode(response).await?;

        debug!(collection = %self.name, added = records.len(), "added records");
        Ok(records.into_iter().map(|r| r.id).collect())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<QueryHit>> {
        self.check_dimension(vector.len(), "query vector")?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut body = json!({
            "query_embeddings": [vector],
            "n_results": k,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(clause) = filter.and_then(where_clause) {
            body["where"] = clause;
        }

        let url = self.collection_url("query").await;
        let response = self.client.post(url).json(&body).send().await.map_err(map_err)?;
        let result: QueryResponse = Self::decode(response).await?;

        query_hits(result)
    }

    async fn delete(&self, ids: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let url = self.collection_url("delete").await;
        let response =
            self.client.post(url).json(&json!({ "ids": ids })).send().await.map_err(map_err)?;
        let _: Value = Self::decode(response).await?;
        Ok(())
    }

    /// Deletes and recreates the collection while holding the id lock, so no
    /// request observes the deleted id.
    async fn reset(&self) -> Result<()> {
        let mut id = self.collection_id.write().await;
        let url = format!("{}/api/v1/collections/{}", self.base_url, self.name);
        let response = self.client.delete(url).send().await.map_err(map_err)?;
        let _: Value = Self::decode(response).await?;

        *id = Self::get_or_create(&self.client, &self.base_url, &self.name).await?;
        debug!(collection = %self.name, collection_id = %*id, "reset collection");
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let url = self.collection_url("count").await;
        let response = self.client.get(url).send().await.map_err(map_err)?;
        Self::decode(response).await
    }
}
