/// Azure OpenAI embeddings client.
///
/// One `embed_batch` call is one HTTP request carrying every input text.
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, EmbedderError};
use crate::config::EmbeddingConfig;

const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
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
    index: usize,
    embedding: Vec<f32>,
}

/// Embedder backed by an Azure OpenAI embedding deployment.
pub struct AzureOpenAiEmbedder {
    client: Client,
    url: String,
    api_key: String,
    dimensions: usize,
    request_dimensions: bool,
}

impl AzureOpenAiEmbedder {
    /// Build a client from the embedding section of the configuration.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedderError> {
        if config.endpoint.is_empty() {
            return Err(EmbedderError::RequestFailed(
                "embedding endpoint is not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("ragsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EmbedderError::RequestFailed(format!("HTTP client build failed: {e}")))?;

        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            config.endpoint.trim_end_matches('/'),
            config.model,
            config.api_version
        );

        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
            dimensions: config.dimensions,
            request_dimensions: config.request_dimensions,
        })
    }
}

impl Embedder for AzureOpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vectors = self.embed_batch(&[text])?;
        vectors.pop().ok_or(EmbedderError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Requesting {} embedding(s)", texts.len());
        let body = EmbeddingRequest {
            input: texts,
            dimensions: self.request_dimensions.then_some(self.dimensions),
        };

        let resp = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| EmbedderError::RequestFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(EmbedderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .map_err(|e| EmbedderError::InvalidResponse(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbedderError::CountMismatch {
                expected: texts.len(),
                actual: parsed.data.len(),
            });
        }

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        let mut vectors = Vec::with_capacity(data.len());
        for (i, item) in data.into_iter().enumerate() {
            if item.index != i {
                return Err(EmbedderError::InvalidResponse(format!(
                    "missing embedding for input {i}"
                )));
            }
            if item.embedding.len() != self.dimensions {
                return Err(EmbedderError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: item.embedding.len(),
                });
            }
            vectors.push(item.embedding);
        }

        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn config(endpoint: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            endpoint: endpoint.to_string(),
            api_key: "secret".to_string(),
            model: "text-embedding-3-large".to_string(),
            dimensions: 3,
            ..EmbeddingConfig::default()
        }
    }

    const PATH_RE: &str = r"^/openai/deployments/text-embedding-3-large/embeddings";

    #[test]
    fn test_embed_batch_orders_by_index() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", Matcher::Regex(PATH_RE.to_string()))
            .match_header("api-key", "secret")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "input": ["first", "second"]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data": [
                    {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                    {"index": 0, "embedding": [1.0, 0.0, 0.0]}
                ]}"#,
            )
            .create();

        let embedder = AzureOpenAiEmbedder::new(&config(&server.url())).unwrap();
        let vectors = embedder.embed_batch(&["first", "second"]).unwrap();

        mock.assert();
        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    }

    #[test]
    fn test_rate_limit_is_transient_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", Matcher::Regex(PATH_RE.to_string()))
            .with_status(429)
            .with_body("Too Many Requests")
            .create();

        let embedder = AzureOpenAiEmbedder::new(&config(&server.url())).unwrap();
        let err = embedder.embed("query").unwrap_err();
        assert!(matches!(err, EmbedderError::Status { status: 429, .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_count_mismatch() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", Matcher::Regex(PATH_RE.to_string()))
            .with_status(200)
            .with_body(r#"{"data": [{"index": 0, "embedding": [1.0, 0.0, 0.0]}]}"#)
            .create();

        let embedder = AzureOpenAiEmbedder::new(&config(&server.url())).unwrap();
        let err = embedder.embed_batch(&["a", "b"]).unwrap_err();
        assert!(matches!(
            err,
            EmbedderError::CountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", Matcher::Regex(PATH_RE.to_string()))
            .with_status(200)
            .with_body(r#"{"data": [{"index": 0, "embedding": [1.0, 0.0]}]}"#)
            .create();

        let embedder = AzureOpenAiEmbedder::new(&config(&server.url())).unwrap();
        let err = embedder.embed("a").unwrap_err();
        assert!(matches!(err, EmbedderError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_empty_batch_skips_request() {
        let embedder = AzureOpenAiEmbedder::new(&config("http://127.0.0.1:9")).unwrap();
        assert!(embedder.embed_batch(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_missing_endpoint() {
        assert!(AzureOpenAiEmbedder::new(&config("")).is_err());
    }
}
