//! Model backends.
//!
//! `ModelInvoker` is an enum over concrete backends, so providers call one
//! `async fn` without trait objects. `Dummy` answers locally and deterministically
//! and never touches AWS.

use std::sync::Arc;

use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types::ResponseStream;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::BedrockError;
use super::auth::{Authenticator, CallerIdentity, ModelSummary, missing_models};
use super::error::{AwsFailure, map_invoke_failure};
use crate::config::BedrockConfig;

/// Stream of decoded JSON chunks from a streaming invocation.
pub type ChunkStream = BoxStream<'static, Result<Value, BedrockError>>;

#[derive(Clone)]
pub enum ModelInvoker {
    Bedrock(Arc<Authenticator>),
    Dummy(DummyInvoker),
}

impl ModelInvoker {
    pub fn bedrock(config: Arc<BedrockConfig>) -> Self {
        Self::Bedrock(Arc::new(Authenticator::new(config)))
    }

    pub fn dummy(config: &BedrockConfig) -> Self {
        Self::Dummy(DummyInvoker::new(config))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bedrock(_) => "bedrock",
            Self::Dummy(_) => "dummy",
        }
    }

    /// `invoke_model` with a JSON body; returns the decoded JSON response.
    pub async fn invoke(&self, model_id: &str, body: &Value) -> Result<Value, BedrockError> {
        match self {
            Self::Bedrock(auth) => {
                let bytes = serde_json::to_vec(body)
                    .map_err(|e| BedrockError::model(format!("cannot encode request: {e}")))?;
                debug!(model_id, payload_bytes = bytes.len(), "invoking model");
                let runtime = auth.clients().await?.runtime;
                let out = runtime
                    .invoke_model()
                    .model_id(model_id)
                    .body(Blob::new(bytes))
                    .content_type("application/json")
                    .accept("application/json")
                    .send()
                    .await
                    .map_err(|e| map_invoke_failure(model_id, AwsFailure::from_sdk(&e)))?;
                let value: Value = serde_json::from_slice(out.body().as_ref()).map_err(|e| {
                    BedrockError::model(format!("Failed to parse response from model {model_id}: {e}"))
                })?;
                if let Some(usage) = value.get("usage") {
                    let (input_tokens, output_tokens) = usage_tokens(usage);
                    info!(model_id, input_tokens, output_tokens, "token usage");
                }
                Ok(value)
            }
            Self::Dummy(d) => d.invoke(model_id, body),
        }
    }

    /// `invoke_model_with_response_stream`; each item is one decoded chunk.
    pub async fn invoke_stream(&self, model_id: &str, body: &Value) -> Result<ChunkStream, BedrockError> {
        match self {
            Self::Bedrock(auth) => {
                let bytes = serde_json::to_vec(body)
                    .map_err(|e| BedrockError::model(format!("cannot encode request: {e}")))?;
                debug!(model_id, "invoking streaming model");
                let runtime = auth.clients().await?.runtime;
                let out = runtime
                    .invoke_model_with_response_stream()
                    .model_id(model_id)
                    .body(Blob::new(bytes))
                    .content_type("application/json")
                    .accept("application/json")
                    .send()
                    .await
                    .map_err(|e| {
                        let f = AwsFailure::from_sdk(&e);
                        BedrockError::Model {
                            message: format!(
                                "Streaming error for model {model_id} ({}): {}",
                                f.code_or_unknown(),
                                f.message
                            ),
                            code: f.code,
                        }
                    })?;
                let model = model_id.to_string();
                let chunks = stream::unfold(Some(out.body), move |state| {
                    let model = model.clone();
                    async move {
                        let mut rx = state?;
                        loop {
                            match rx.recv().await {
                                Ok(Some(ResponseStream::Chunk(part))) => {
                                    let Some(bytes) = part.bytes() else { continue };
                                    let item = serde_json::from_slice::<Value>(bytes.as_ref()).map_err(|e| {
                                        BedrockError::model(format!("bad stream chunk from {model}: {e}"))
                                    });
                                    return Some((item, Some(rx)));
                                }
                                Ok(Some(_)) => continue,
                                Ok(None) => return None,
                                Err(e) => {
                                    let f = AwsFailure::from_sdk(&e);
                                    let err = BedrockError::Model {
                                        message: format!(
                                            "Unexpected streaming error for model {model}: {}",
                                            f.message
                                        ),
                                        code: f.code,
                                    };
                                    return Some((Err(err), None));
                                }
                            }
                        }
                    }
                });
                Ok(chunks.boxed())
            }
            Self::Dummy(d) => {
                check_model_id(model_id)?;
                let items: Vec<Result<Value, BedrockError>> =
                    d.stream_chunks(body).into_iter().map(Ok).collect();
                Ok(stream::iter(items).boxed())
            }
        }
    }

    pub async fn list_models(&self) -> Result<Vec<ModelSummary>, BedrockError> {
        match self {
            Self::Bedrock(auth) => auth.list_models().await,
            Self::Dummy(d) => Ok(d.models.iter().map(|id| dummy_summary(id)).collect()),
        }
    }

    pub async fn model_details(&self, model_id: &str) -> Result<ModelSummary, BedrockError> {
        match self {
            Self::Bedrock(auth) => auth.model_details(model_id).await,
            Self::Dummy(d) => {
                if d.models.iter().any(|m| m == model_id) {
                    Ok(dummy_summary(model_id))
                } else {
                    Err(BedrockError::Authentication(format!(
                        "Model {model_id} not found or not available in region dummy"
                    )))
                }
            }
        }
    }

    /// List foundation models and fail naming any `required` id that is missing.
    pub async fn validate_permissions(&self, required: &[&str]) -> Result<(), BedrockError> {
        let available = self.list_models().await?;
        let missing = missing_models(&available, required);
        if !missing.is_empty() {
            let msg = format!("Required models not available or accessible: {missing:?}");
            tracing::error!("{msg}");
            return Err(BedrockError::Authentication(msg));
        }
        info!(backend = self.name(), "validated Bedrock permissions and model access");
        Ok(())
    }

    pub async fn test_model_access(&self, model_id: &str) -> Result<(), BedrockError> {
        let details = self.model_details(model_id).await?;
        info!(
            model_id,
            model_name = details.model_name.as_deref().unwrap_or("Unknown"),
            "model accessible"
        );
        Ok(())
    }

    pub async fn caller_identity(&self) -> CallerIdentity {
        match self {
            Self::Bedrock(auth) => auth.caller_identity().await,
            Self::Dummy(_) => CallerIdentity {
                account: Some("000000000000".into()),
                arn: Some("arn:aws:iam::000000000000:user/dummy".into()),
                user_id: Some("DUMMY".into()),
            },
        }
    }

    pub async fn refresh(&self) -> Result<(), BedrockError> {
        match self {
            Self::Bedrock(auth) => auth.refresh_clients().await,
            Self::Dummy(_) => Ok(()),
        }
    }
}

/// `(input_tokens, output_tokens)` from a Claude `usage` object; missing counts are 0.
fn usage_tokens(usage: &Value) -> (u64, u64) {
    let count = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
    (count("input_tokens"), count("output_tokens"))
}

// ── Dummy backend ────────────────────────────────────────────────────────────

/// Offline backend.
///
/// Claude-shaped requests get `[echo] <last user text>`; Titan-shaped requests
/// get a deterministic unit vector derived from the input text.
#[derive(Debug, Clone)]
pub struct DummyInvoker {
    models: Vec<String>,
}

impl DummyInvoker {
    pub fn new(config: &BedrockConfig) -> Self {
        Self {
            models: vec![
                config.claude_model_id.clone(),
                config.claude_haiku_model_id.clone(),
                config.titan_embedding_model_id.clone(),
            ],
        }
    }

    fn invoke(&self, model_id: &str, body: &Value) -> Result<Value, BedrockError> {
        check_model_id(model_id)?;
        if let Some(text) = body.get("inputText").and_then(Value::as_str) {
            let dims = body.get("dimensions").and_then(Value::as_u64).unwrap_or(1024) as usize;
            return Ok(json!({
                "embedding": pseudo_embedding(text, dims),
                "inputTextTokenCount": text.split_whitespace().count(),
            }));
        }
        let Some(messages) = body.get("messages").and_then(Value::as_array) else {
            return Err(BedrockError::Model {
                message: format!("Invalid request for model {model_id}: missing messages"),
                code: Some("ValidationException".into()),
            });
        };
        let reply = echo_reply(messages);
        let max_tokens = body.get("max_tokens").and_then(Value::as_u64).unwrap_or(u64::MAX) as usize;
        let reply: String = reply.split_inclusive(' ').take(max_tokens).collect();
        Ok(json!({
            "id": format!("msg_dummy_{}", uuid::Uuid::new_v4().simple()),
            "type": "message",
            "role": "assistant",
            "model": model_id,
            "content": [{"type": "text", "text": reply}],
            "stop_reason": "end_turn",
            "usage": {
                "input_tokens": count_input_words(messages),
                "output_tokens": reply.split_whitespace().count(),
            }
        }))
    }

    fn stream_chunks(&self, body: &Value) -> Vec<Value> {
        let messages = body.get("messages").and_then(Value::as_array).cloned().unwrap_or_default();
        let reply = echo_reply(&messages);
        let mut out = vec![json!({"type": "message_start"})];
        out.extend(
            reply
                .split_inclusive(' ')
                .map(|w| json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": w}})),
        );
        out.push(json!({"type": "message_stop"}));
        out
    }
}

/// Bedrock ids are `<provider>.<model>`; anything else gets the same
/// `ValidationException` the service returns.
fn check_model_id(model_id: &str) -> Result<(), BedrockError> {
    let well_formed = model_id
        .split_once('.')
        .is_some_and(|(provider, model)| !provider.is_empty() && !model.is_empty())
        && !model_id.contains(char::is_whitespace);
    if well_formed {
        Ok(())
    } else {
        Err(BedrockError::Model {
            message: format!("The provided model identifier is invalid: {model_id}"),
            code: Some("ValidationException".into()),
        })
    }
}

fn dummy_summary(id: &str) -> ModelSummary {
    ModelSummary {
        model_id: id.to_string(),
        model_name: Some(format!("dummy:{id}")),
        provider_name: Some("dummy".into()),
        input_modalities: vec!["TEXT".into()],
        output_modalities: vec!["TEXT".into()],
        streaming: Some(true),
    }
}

fn echo_reply(messages: &[Value]) -> String {
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("user"));
    let Some(content) = last_user.and_then(|m| m.get("content")) else {
        return "[echo] ".to_string();
    };
    match content {
        Value::String(s) => format!("[echo] {s}"),
        Value::Array(blocks) => {
            let text: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            let images = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("image"))
                .count();
            if images > 0 {
                format!("[echo] {} ({images} images)", text.join(" "))
            } else {
                format!("[echo] {}", text.join(" "))
            }
        }
        _ => "[echo] ".to_string(),
    }
}

fn count_input_words(messages: &[Value]) -> usize {
    messages
        .iter()
        .filter_map(|m| m.get("content"))
        .map(|c| match c {
            Value::String(s) => s.split_whitespace().count(),
            _ => 0,
        })
        .sum()
}

/// Unit vector seeded from SHA-256 of the text.
fn pseudo_embedding(text: &str, dims: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(dims);
    let mut seed = Sha256::digest(text.as_bytes()).to_vec();
    while out.len() < dims {
        for pair in seed.chunks(2) {
            if out.len() == dims {
                break;
            }
            let v = u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)]);
            out.push(v as f64 / u16::MAX as f64 - 0.5);
        }
        seed = Sha256::digest(&seed).to_vec();
    }
    let norm = out.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        out.iter_mut().for_each(|x| *x /= norm);
    }
    out
}
