//! Claude text completion over `invoke_model`.

use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::stream::{BoxStream, StreamExt};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use super::BedrockError;
use super::auth::ModelSummary;
use super::claude::{ANTHROPIC_VERSION, CompletionOptions, Message, MessagesRequest, chunk_text, extract_text};
use super::invoker::ModelInvoker;
use super::monitoring::Monitor;
use super::retry::RetryHandler;
use crate::config::{BedrockConfig, MAX_CONCURRENT_REQUESTS};

/// Text deltas from a streaming completion.
pub type TextStream = BoxStream<'static, Result<String, BedrockError>>;

#[derive(Clone)]
pub struct LlmProvider {
    config: Arc<BedrockConfig>,
    invoker: ModelInvoker,
    retry: RetryHandler,
    permits: Arc<Semaphore>,
    monitor: Option<Arc<Monitor>>,
}

impl LlmProvider {
    pub fn new(config: Arc<BedrockConfig>, invoker: ModelInvoker) -> Self {
        let retry = RetryHandler::new(config.retry_config());
        let permits = Arc::new(Semaphore::new(config.max_concurrent_requests.clamp(1, MAX_CONCURRENT_REQUESTS)));
        Self { config, invoker, retry, permits, monitor: None }
    }

    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn default_model(&self) -> &str {
        &self.config.claude_model_id
    }

    /// Request body for `prompt`, with `history` placed before it.
    pub fn build_request(
        &self,
        prompt: &str,
        system: Option<&str>,
        history: &[Message],
        opts: &CompletionOptions,
    ) -> MessagesRequest {
        let mut messages = history.to_vec();
        messages.push(Message::user(prompt));
        self.request_for(messages, system, opts)
    }

    pub(crate) fn request_for(
        &self,
        messages: Vec<Message>,
        system: Option<&str>,
        opts: &CompletionOptions,
    ) -> MessagesRequest {
        MessagesRequest {
            messages,
            max_tokens: opts.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: opts.temperature.unwrap_or(self.config.temperature),
            top_p: opts.top_p.unwrap_or(self.config.top_p),
            top_k: opts.top_k.unwrap_or(self.config.top_k),
            anthropic_version: ANTHROPIC_VERSION,
            system: system.filter(|s| !s.is_empty()).map(str::to_string),
            stop_sequences: opts.stop_sequences.clone(),
        }
    }

    pub async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        history: &[Message],
        opts: &CompletionOptions,
    ) -> Result<String, BedrockError> {
        let model_id = opts.model_id.as_deref().unwrap_or(&self.config.claude_model_id);
        let request = self.build_request(prompt, system, history, opts);
        self.send(model_id, &request, "complete").await
    }

    /// [`complete`](Self::complete) against the Haiku model.
    pub async fn complete_fast(
        &self,
        prompt: &str,
        system: Option<&str>,
        history: &[Message],
        opts: &CompletionOptions,
    ) -> Result<String, BedrockError> {
        let opts = CompletionOptions {
            model_id: Some(self.config.claude_haiku_model_id.clone()),
            ..opts.clone()
        };
        self.complete(prompt, system, history, &opts).await
    }

    /// Complete every prompt concurrently. A failed prompt yields `"Error: <msg>"`
    /// in its slot.
    pub async fn complete_batch(
        &self,
        prompts: &[String],
        system: Option<&str>,
        opts: &CompletionOptions,
    ) -> Vec<String> {
        let futures = prompts.iter().map(|p| self.complete(p, system, &[], opts));
        join_all(futures)
            .await
            .into_iter()
            .enumerate()
            .map(|(i, r)| match r {
                Ok(text) => text,
                Err(e) => {
                    error!(index = i, error = %e, "batch completion failed");
                    format!("Error: {e}")
                }
            })
            .collect()
    }

    pub async fn complete_streaming(
        &self,
        prompt: &str,
        system: Option<&str>,
        history: &[Message],
        opts: &CompletionOptions,
    ) -> Result<TextStream, BedrockError> {
        let model_id = opts.model_id.as_deref().unwrap_or(&self.config.claude_model_id);
        let request = self.build_request(prompt, system, history, opts);
        let body = encode(&request)?;
        // The permit lives inside the stream and is released when it is dropped.
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BedrockError::service("request limiter closed", None))?;
        let chunks = self.invoker.invoke_stream(model_id, &body).await?;
        let text = chunks
            .filter_map(|c| async move {
                match c {
                    Ok(v) => chunk_text(&v).filter(|t| !t.is_empty()).map(Ok),
                    Err(e) => Some(Err(e)),
                }
            })
            .map(move |item| {
                let _held = &permit;
                item
            });
        Ok(text.boxed())
    }

    /// Run an already-built request under the semaphore and retry handler.
    pub(crate) async fn send(
        &self,
        model_id: &str,
        request: &MessagesRequest,
        operation: &str,
    ) -> Result<String, BedrockError> {
        let body = encode(request)?;
        let _permit = self.acquire().await?;
        debug!(model_id, messages = request.messages.len(), operation, "sending completion");

        let call = self.retry.execute(|| self.invoker.invoke(model_id, &body));
        let response = match &self.monitor {
            Some(m) => {
                m.track(operation, model_id, &body, async { call.await.map(|r| (r.clone(), r)) })
                    .await?
            }
            None => call.await?,
        };
        Ok(extract_text(&response))
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, BedrockError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| BedrockError::service("request limiter closed", None))
    }

    /// Details for the configured model; `None` on any error.
    pub async fn model_info(&self) -> Option<ModelSummary> {
        match self.invoker.model_details(&self.config.claude_model_id).await {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(error = %e, "could not fetch model info");
                None
            }
        }
    }

    /// Foundation model ids; empty on any error.
    pub async fn list_available_models(&self) -> Vec<String> {
        match self.invoker.list_models().await {
            Ok(models) => models.into_iter().map(|m| m.model_id).collect(),
            Err(e) => {
                warn!(error = %e, "could not list models");
                Vec::new()
            }
        }
    }
}

fn encode(request: &MessagesRequest) -> Result<Value, BedrockError> {
    serde_json::to_value(request).map_err(|e| BedrockError::model(format!("cannot encode request: {e}")))
}
