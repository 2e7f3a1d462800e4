//! Entry point that wires the Bedrock providers into the three model
//! functions a RAG engine consumes: text completion, vision, embeddings.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use super::BedrockError;
use super::claude::{CompletionOptions, Message};
use super::embedding::EmbeddingProvider;
use super::invoker::ModelInvoker;
use super::llm::LlmProvider;
use super::monitoring::{MetricsSummary, Monitor};
use super::vision::VisionProvider;
use crate::config::{BedrockConfig, ProviderKind};

/// Token limit advertised alongside the embedding function.
pub const EMBEDDING_MAX_TOKEN_SIZE: usize = 8192;

/// What a vision call carries. Chat messages win over a single image, which
/// wins over plain text.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisionInput<'a> {
    pub image_base64: Option<&'a str>,
    pub messages: Option<&'a [Value]>,
}

/// Embedding function handed to the RAG engine.
#[derive(Clone)]
pub struct EmbeddingFunc {
    pub embedding_dim: usize,
    pub max_token_size: usize,
    provider: EmbeddingProvider,
}

impl EmbeddingFunc {
    pub async fn call(&self, texts: &[String]) -> Vec<Vec<f64>> {
        self.provider.embed_texts(texts, None).await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSettings {
    pub region: String,
    pub claude_model: String,
    pub claude_haiku_model: String,
    pub titan_embedding_model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderNames {
    pub backend: &'static str,
    pub llm: &'static str,
    pub vision: &'static str,
    pub embedding: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct BedrockInfo {
    pub bedrock_config: ModelSettings,
    pub embedding_dimension: usize,
    pub providers: ProviderNames,
}

pub struct BedrockRag {
    config: Arc<BedrockConfig>,
    invoker: ModelInvoker,
    monitor: Arc<Monitor>,
    llm: LlmProvider,
    vision: VisionProvider,
    embedding: EmbeddingProvider,
}

impl BedrockRag {
    /// Validate `config` and build the providers over the chosen backend.
    pub fn new(config: BedrockConfig, backend: ProviderKind) -> Result<Self, BedrockError> {
        config.validate()?;
        let config = Arc::new(config);
        let invoker = match backend {
            ProviderKind::Bedrock => ModelInvoker::bedrock(config.clone()),
            ProviderKind::Dummy => ModelInvoker::dummy(&config),
        };
        let monitor = Arc::new(Monitor::new());
        let llm = LlmProvider::new(config.clone(), invoker.clone()).with_monitor(monitor.clone());
        let vision = VisionProvider::new(llm.clone(), &config);
        let embedding = EmbeddingProvider::new(config.clone(), invoker.clone()).with_monitor(monitor.clone());
        info!(backend = invoker.name(), region = %config.aws_region, "initialised Bedrock providers");
        Ok(Self { config, invoker, monitor, llm, vision, embedding })
    }

    pub fn config(&self) -> &BedrockConfig {
        &self.config
    }

    pub fn llm(&self) -> &LlmProvider {
        &self.llm
    }

    pub fn vision(&self) -> &VisionProvider {
        &self.vision
    }

    pub fn embedding(&self) -> &EmbeddingProvider {
        &self.embedding
    }

    pub fn invoker(&self) -> &ModelInvoker {
        &self.invoker
    }

    /// Shared monitor; its buffered points feed the CloudWatch publisher.
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Claude, Haiku and Titan ids, in that order.
    pub fn model_ids(&self) -> [&str; 3] {
        [
            &self.config.claude_model_id,
            &self.config.claude_haiku_model_id,
            &self.config.titan_embedding_model_id,
        ]
    }

    /// Text completion. `opts.model_id` wins; otherwise `use_haiku` picks the
    /// Haiku model over the default one.
    pub async fn llm_func(
        &self,
        prompt: &str,
        system: Option<&str>,
        history: &[Message],
        use_haiku: bool,
        opts: &CompletionOptions,
    ) -> Result<String, BedrockError> {
        let mut opts = opts.clone();
        if opts.model_id.is_none() {
            opts.model_id = Some(if use_haiku {
                self.config.claude_haiku_model_id.clone()
            } else {
                self.config.claude_model_id.clone()
            });
        }
        self.llm
            .complete(prompt, system, history, &opts)
            .await
            .inspect_err(|e| error!(error = %e, "LLM function error"))
    }

    pub async fn vision_func(
        &self,
        prompt: &str,
        system: Option<&str>,
        history: &[Message],
        input: VisionInput<'_>,
        opts: &CompletionOptions,
    ) -> Result<String, BedrockError> {
        let result = if let Some(messages) = input.messages.filter(|m| !m.is_empty()) {
            self.vision.analyze_multimodal_messages(messages, opts).await
        } else if let Some(image) = input.image_base64.filter(|i| !i.is_empty()) {
            self.vision.analyze_image(prompt, image, system, opts).await
        } else {
            self.llm.complete(prompt, system, history, opts).await
        };
        result.inspect_err(|e| error!(error = %e, "vision function error"))
    }

    pub fn embedding_func(&self) -> EmbeddingFunc {
        EmbeddingFunc {
            embedding_dim: self.embedding.embedding_dimension(),
            max_token_size: EMBEDDING_MAX_TOKEN_SIZE,
            provider: self.embedding.clone(),
        }
    }

    /// Permissions for the three models, a short completion, one embedding.
    pub async fn validate_access(&self) -> Result<(), BedrockError> {
        info!("validating Bedrock access");
        let required = [
            self.config.claude_model_id.as_str(),
            self.config.claude_haiku_model_id.as_str(),
            self.config.titan_embedding_model_id.as_str(),
        ];
        self.invoker.validate_permissions(&required).await?;

        let reply = self
            .llm
            .complete("Hello, this is a test.", None, &[], &CompletionOptions::max_tokens(10))
            .await?;
        if reply.is_empty() {
            return Err(BedrockError::model("LLM test returned no text"));
        }

        let embedding = self.embedding.embed_one("test").await?;
        if embedding.is_empty() {
            return Err(BedrockError::Embedding("embedding test returned no vector".into()));
        }
        info!("Bedrock access validation successful");
        Ok(())
    }

    pub fn info(&self) -> BedrockInfo {
        BedrockInfo {
            bedrock_config: ModelSettings {
                region: self.config.aws_region.clone(),
                claude_model: self.config.claude_model_id.clone(),
                claude_haiku_model: self.config.claude_haiku_model_id.clone(),
                titan_embedding_model: self.config.titan_embedding_model_id.clone(),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            },
            embedding_dimension: self.embedding.embedding_dimension(),
            providers: ProviderNames {
                backend: self.invoker.name(),
                llm: "LlmProvider",
                vision: "VisionProvider",
                embedding: "EmbeddingProvider",
            },
        }
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.monitor.summary()
    }
}
