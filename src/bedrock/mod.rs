//! AWS Bedrock provider layer.
//!
//! [`BedrockRag`] is the usual entry point: it validates a [`BedrockConfig`](crate::config::BedrockConfig),
//! picks a [`ModelInvoker`] backend and builds the LLM, vision and embedding
//! providers over it. Providers are cheap to clone and share one semaphore,
//! retry policy and monitor.
//!
//! The supporting pieces (cache, rate limiter, batch processor, performance
//! monitor) are independent and can be composed around any provider call.

mod auth;
pub mod batch;
pub mod cache;
pub mod claude;
pub mod cloudwatch;
pub mod embedding;
pub(crate) mod error;
pub mod invoker;
pub mod llm;
pub mod monitoring;
pub mod rag;
pub mod rate_limit;
pub mod retry;
pub mod vision;

pub use auth::{Authenticator, CallerIdentity, ModelSummary, missing_models};
pub use batch::BatchProcessor;
pub use cache::{CacheStats, ResponseCache};
pub use claude::{CompletionOptions, ContentBlock, Message};
pub use cloudwatch::{MetricsApi, MetricsPublisher};
pub use embedding::EmbeddingProvider;
pub use error::BedrockError;
pub use invoker::ModelInvoker;
pub use llm::LlmProvider;
pub use monitoring::{Monitor, PerformanceMonitor, dashboard_body};
pub use rag::{BedrockInfo, BedrockRag, EmbeddingFunc, VisionInput};
pub use rate_limit::RateLimiter;
pub use retry::RetryHandler;
pub use vision::VisionProvider;
