//! Embeddings over an OpenAI-compatible HTTP endpoint.
//!
//! Besides the OpenAI API itself, any server exposing the same
//! `POST {api_base}/embeddings` contract works here, which is how self-hosted
//! Chinese models (text2vec, GTE, BGE) are usually served.
//!
//! Only compiled with the `openai` feature.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_DIMENSIONS: usize = 1536;
const API_KEY_VAR: &str = "OPENAI_API_KEY";

const PROVIDER: &str = "openai";

/// An [`EmbeddingProvider`] that calls an OpenAI-compatible `/embeddings`
/// endpoint.
///
/// Defaults to `text-embedding-3-small` (1536 dimensions) on
/// `https://api.openai.com/v1`. Setting [`with_dimensions`] also asks the
/// server to truncate its vectors to that size.
///
/// [`with_dimensions`]: OpenAIEmbeddingProvider::with_dimensions
///
/// ```rust,ignore
/// use rag_core::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::new("sk-...")?
///     .with_api_base("http://localhost:8080/v1")
///     .with_model("text2vec-base-chinese")
///     .with_dimensions(768);
/// let vector = provider.embed("你好").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    dimensions: usize,
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a provider for the public OpenAI API.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingFailure`] if `api_key` is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::embedding(PROVIDER, "API key must not be empty"));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint: embeddings_endpoint(DEFAULT_API_BASE),
            model: DEFAULT_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
        })
    }

    /// Create a provider with the key from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_VAR)
            .map_err(|_| RagError::embedding(PROVIDER, format!("{API_KEY_VAR} is not set")))?;
        Self::new(api_key)
    }

    /// Send requests to another OpenAI-compatible server.
    pub fn with_api_base(mut self, api_base: impl AsRef<str>) -> Self {
        self.endpoint = embeddings_endpoint(api_base.as_ref());
        self
    }

    /// Use another embedding model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Request vectors of `dims` components.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }

    /// The full URL requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn embeddings_endpoint(api_base: &str) -> String {
    format!("{}/embeddings", api_base.trim_end_matches('/'))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Put returned vectors back in input order and check one came back per input.
///
/// Items without an `index` keep their position after the indexed ones.
fn into_ordered(response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    let mut data = response.data;
    data.sort_by_key(|item| item.index.unwrap_or(usize::MAX));
    if data.len() != expected {
        return Err(RagError::embedding(
            PROVIDER,
            format!("expected {expected} embeddings, got {}", data.len()),
        ));
    }
    Ok(data.into_iter().map(|item| item.embedding).collect())
}

/// Prefer the server's `error.message`; fall back to the raw body.
fn api_failure(status: StatusCode, body: String) -> RagError {
    let detail = serde_json::from_str::<ApiError>(&body).map(|e| e.error.message).unwrap_or(body);
    RagError::embedding(PROVIDER, format!("API returned {status}: {detail}"))
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors.pop().ok_or_else(|| RagError::embedding(PROVIDER, "API returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            provider = PROVIDER,
            model = %self.model,
            batch_size = texts.len(),
            "embedding batch"
        );

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.request_dimensions,
        };
        let response = self
            .client
            .post(self.endpoint.as_str())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::embedding(PROVIDER, format!("request failed: {e}")))
            .inspect_err(|e| error!(provider = PROVIDER, error = %e, "embedding request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = api_failure(status, body);
            error!(provider = PROVIDER, %status, error = %err, "embedding API error");
            return Err(err);
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::embedding(PROVIDER, format!("failed to parse response: {e}")))
            .inspect_err(|e| error!(provider = PROVIDER, error = %e, "bad embedding response"))?;
        into_ordered(parsed, texts.len())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
