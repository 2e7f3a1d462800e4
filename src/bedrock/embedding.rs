//! Titan text embeddings.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::BedrockError;
use super::invoker::ModelInvoker;
use super::monitoring::Monitor;
use super::retry::RetryHandler;
use crate::config::{BedrockConfig, MAX_CONCURRENT_REQUESTS};

/// Titan input limit, in characters.
pub const MAX_INPUT_CHARS: usize = 8000;

const BATCH_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TitanRequest<'a> {
    input_text: &'a str,
    dimensions: usize,
    normalize: bool,
}

#[derive(Clone)]
pub struct EmbeddingProvider {
    config: Arc<BedrockConfig>,
    invoker: ModelInvoker,
    retry: RetryHandler,
    permits: Arc<Semaphore>,
    monitor: Option<Arc<Monitor>>,
}

impl EmbeddingProvider {
    pub fn new(config: Arc<BedrockConfig>, invoker: ModelInvoker) -> Self {
        let retry = RetryHandler::new(config.retry_config());
        let permits = Arc::new(Semaphore::new(config.max_concurrent_requests.clamp(1, MAX_CONCURRENT_REQUESTS)));
        Self { config, invoker, retry, permits, monitor: None }
    }

    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn model_id(&self) -> &str {
        &self.config.titan_embedding_model_id
    }

    /// Configured dimension, else 1024 for Titan v2, else 1536.
    pub fn embedding_dimension(&self) -> usize {
        if let Some(d) = self.config.embedding_dimensions {
            return d as usize;
        }
        if self.config.titan_embedding_model_id.contains("titan-embed-text-v2") {
            1024
        } else {
            1536
        }
    }

    /// Embed `texts` in batches of `batch_size` (configured size when `None`).
    ///
    /// The output has one vector per input, in order. Blank texts and texts
    /// whose call fails get a zero vector.
    pub async fn embed_texts(&self, texts: &[String], batch_size: Option<usize>) -> Vec<Vec<f64>> {
        let batch_size = batch_size.unwrap_or(self.config.embedding_batch_size).max(1);
        let mut out = Vec::with_capacity(texts.len());
        let batches = texts.chunks(batch_size).count();

        for (i, batch) in texts.chunks(batch_size).enumerate() {
            debug!(batch = i + 1, of = batches, size = batch.len(), "embedding batch");
            for text in batch {
                out.push(self.embed_or_zero(text).await);
            }
            if i + 1 < batches {
                tokio::time::sleep(BATCH_PAUSE).await;
            }
        }
        info!(count = out.len(), "generated embeddings");
        out
    }

    /// First vector for `text`, or an empty one.
    pub async fn embed_single(&self, text: &str) -> Vec<f64> {
        self.embed_texts(&[text.to_string()], Some(1))
            .await
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    async fn embed_or_zero(&self, text: &str) -> Vec<f64> {
        if text.trim().is_empty() {
            warn!("empty text provided for embedding");
            return vec![0.0; self.embedding_dimension()];
        }
        match self.embed_one(text).await {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "embedding failed; substituting zero vector");
                vec![0.0; self.embedding_dimension()]
            }
        }
    }

    /// One Titan call for a non-blank `text`.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f64>, BedrockError> {
        let text = truncate(text);
        let body = serde_json::to_value(TitanRequest {
            input_text: text,
            dimensions: self.embedding_dimension(),
            normalize: true,
        })
        .map_err(|e| BedrockError::Embedding(format!("cannot encode request: {e}")))?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| BedrockError::service("request limiter closed", None))?;

        let model_id = self.model_id();
        let call = self.retry.execute(|| self.invoker.invoke(model_id, &body));
        let response = match &self.monitor {
            Some(m) => m.track("embed", model_id, &body, async { call.await.map(|r| (r.clone(), r)) }).await?,
            None => call.await?,
        };
        parse_embedding(&response)
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_INPUT_CHARS) {
        Some((idx, _)) => {
            warn!(chars = MAX_INPUT_CHARS, "text truncated for embedding");
            &text[..idx]
        }
        None => text,
    }
}

fn parse_embedding(response: &Value) -> Result<Vec<f64>, BedrockError> {
    let Some(arr) = response.get("embedding").and_then(Value::as_array) else {
        return Err(BedrockError::Embedding("No embedding found in response".into()));
    };
    arr.iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| BedrockError::Embedding("non-numeric embedding value".into()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(cfg: BedrockConfig) -> EmbeddingProvider {
        let cfg = Arc::new(cfg);
        EmbeddingProvider::new(cfg.clone(), ModelInvoker::dummy(&cfg))
    }

    #[test]
    fn dimension_rules() {
        assert_eq!(provider(BedrockConfig::default()).embedding_dimension(), 1024);
        let v1 = BedrockConfig {
            titan_embedding_model_id: "amazon.titan-embed-text-v1".into(),
            ..BedrockConfig::default()
        };
        assert_eq!(provider(v1).embedding_dimension(), 1536);
        let fixed = BedrockConfig { embedding_dimensions: Some(256), ..BedrockConfig::default() };
        assert_eq!(provider(fixed).embedding_dimension(), 256);
    }

    #[test]
    fn request_uses_titan_field_names() {
        let v = serde_json::to_value(TitanRequest { input_text: "x", dimensions: 8, normalize: true }).unwrap();
        assert_eq!(v, json!({"inputText": "x", "dimensions": 8, "normalize": true}));
    }

    #[test]
    fn truncates_on_char_boundary() {
        let long = "é".repeat(MAX_INPUT_CHARS + 10);
        assert_eq!(truncate(&long).chars().count(), MAX_INPUT_CHARS);
        assert_eq!(truncate("short"), "short");
    }

    #[tokio::test(start_paused = true)]
    async fn blank_texts_get_zero_vectors() {
        let p = provider(BedrockConfig { embedding_dimensions: Some(16), ..BedrockConfig::default() });
        let texts = vec!["hello".to_string(), "   ".to_string(), "world".to_string()];
        let out = p.embed_texts(&texts, Some(2)).await;
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|v| v.len() == 16));
        assert!(out[1].iter().all(|x| *x == 0.0));
        assert!(out[0].iter().any(|x| *x != 0.0));
        assert_ne!(out[0], out[2]);
    }

    #[tokio::test]
    async fn single_embedding() {
        let p = provider(BedrockConfig::default());
        assert_eq!(p.embed_single("abc").await.len(), 1024);
    }

    #[test]
    fn missing_embedding_field_is_error() {
        let err = parse_embedding(&json!({"other": 1})).unwrap_err();
        assert!(matches!(err, BedrockError::Embedding(_)));
    }
}
