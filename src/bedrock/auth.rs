//! AWS credential chain and Bedrock client management.
//!
//! Clients are built lazily on first use and kept behind an async mutex so
//! concurrent callers share one set. `refresh_clients` drops and rebuilds them.

use std::sync::Arc;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_config::retry::RetryConfig as SdkRetryConfig;
use aws_config::timeout::TimeoutConfig;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::BedrockError;
use super::error::AwsFailure;
use crate::config::BedrockConfig;

/// One set of SDK clients sharing a resolved credential chain.
#[derive(Clone)]
pub(crate) struct AwsClients {
    pub bedrock: aws_sdk_bedrock::Client,
    pub runtime: aws_sdk_bedrockruntime::Client,
    pub sts: aws_sdk_sts::Client,
}

/// Foundation model metadata, trimmed to what the CLI and checks need.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelSummary {
    pub model_id: String,
    pub model_name: Option<String>,
    pub provider_name: Option<String>,
    pub input_modalities: Vec<String>,
    pub output_modalities: Vec<String>,
    pub streaming: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CallerIdentity {
    pub account: Option<String>,
    pub arn: Option<String>,
    pub user_id: Option<String>,
}

pub struct Authenticator {
    config: Arc<BedrockConfig>,
    clients: Mutex<Option<AwsClients>>,
}

impl Authenticator {
    pub fn new(config: Arc<BedrockConfig>) -> Self {
        Self { config, clients: Mutex::new(None) }
    }

    pub(crate) async fn clients(&self) -> Result<AwsClients, BedrockError> {
        let mut slot = self.clients.lock().await;
        if let Some(c) = slot.as_ref() {
            return Ok(c.clone());
        }
        let c = self.create_clients().await?;
        *slot = Some(c.clone());
        Ok(c)
    }

    pub async fn refresh_clients(&self) -> Result<(), BedrockError> {
        let mut slot = self.clients.lock().await;
        *slot = None;
        *slot = Some(self.create_clients().await?);
        info!(region = %self.config.aws_region, "refreshed Bedrock clients");
        Ok(())
    }

    async fn create_clients(&self) -> Result<AwsClients, BedrockError> {
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(Duration::from_secs(self.config.request_timeout))
            .build();

        // The retry handler owns retries; the SDK makes a single attempt.
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(self.config.aws_region.clone()))
            .timeout_config(timeouts)
            .retry_config(SdkRetryConfig::disabled());
        if let Some(profile) = &self.config.aws_profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;

        if sdk_config.credentials_provider().is_none() {
            let msg = "AWS credentials not found or incomplete".to_string();
            error!("{msg}");
            return Err(BedrockError::Authentication(msg));
        }

        info!(region = %self.config.aws_region, "created Bedrock clients");
        Ok(AwsClients {
            bedrock: aws_sdk_bedrock::Client::new(&sdk_config),
            runtime: aws_sdk_bedrockruntime::Client::new(&sdk_config),
            sts: aws_sdk_sts::Client::new(&sdk_config),
        })
    }

    pub async fn list_models(&self) -> Result<Vec<ModelSummary>, BedrockError> {
        let clients = self.clients().await?;
        let out = clients
            .bedrock
            .list_foundation_models()
            .send()
            .await
            .map_err(|e| {
                let f = AwsFailure::from_sdk(&e);
                BedrockError::Authentication(format!(
                    "listing foundation models failed with error {}: {}",
                    f.code_or_unknown(),
                    f.message
                ))
            })?;
        Ok(out
            .model_summaries()
            .iter()
            .map(|m| ModelSummary {
                model_id: m.model_id().to_string(),
                model_name: m.model_name().map(str::to_string),
                provider_name: m.provider_name().map(str::to_string),
                input_modalities: m.input_modalities().iter().map(|x| x.as_str().to_string()).collect(),
                output_modalities: m
                    .output_modalities()
                    .iter()
                    .map(|x| x.as_str().to_string())
                    .collect(),
                streaming: m.response_streaming_supported(),
            })
            .collect())
    }

    /// Fetch one model's details. AccessDenied and ResourceNotFound get
    /// operator-facing explanations.
    pub async fn model_details(&self, model_id: &str) -> Result<ModelSummary, BedrockError> {
        let clients = self.clients().await?;
        let out = clients
            .bedrock
            .get_foundation_model()
            .model_identifier(model_id)
            .send()
            .await
            .map_err(|e| {
                let f = AwsFailure::from_sdk(&e);
                BedrockError::Authentication(model_access_message(
                    model_id,
                    &self.config.aws_region,
                    &f,
                ))
            })?;
        let Some(d) = out.model_details() else {
            return Err(BedrockError::model(format!("no details returned for model {model_id}")));
        };
        Ok(ModelSummary {
            model_id: d.model_id().to_string(),
            model_name: d.model_name().map(str::to_string),
            provider_name: d.provider_name().map(str::to_string),
            input_modalities: d.input_modalities().iter().map(|x| x.as_str().to_string()).collect(),
            output_modalities: d.output_modalities().iter().map(|x| x.as_str().to_string()).collect(),
            streaming: d.response_streaming_supported(),
        })
    }

    /// Best-effort; errors are logged and an empty identity returned.
    pub async fn caller_identity(&self) -> CallerIdentity {
        let clients = match self.clients().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "caller identity unavailable");
                return CallerIdentity::default();
            }
        };
        match clients.sts.get_caller_identity().send().await {
            Ok(out) => CallerIdentity {
                account: out.account().map(str::to_string),
                arn: out.arn().map(str::to_string),
                user_id: out.user_id().map(str::to_string),
            },
            Err(e) => {
                let f = AwsFailure::from_sdk(&e);
                error!(code = f.code_or_unknown(), message = %f.message, "failed to get caller identity");
                CallerIdentity::default()
            }
        }
    }
}

pub(crate) fn model_access_message(model_id: &str, region: &str, f: &AwsFailure) -> String {
    match f.code.as_deref() {
        Some("AccessDeniedException") => {
            format!("Access denied to model {model_id}. Check IAM permissions.")
        }
        Some("ResourceNotFoundException") => {
            format!("Model {model_id} not found or not available in region {region}")
        }
        _ => format!(
            "Failed to access model {model_id} with error {}: {}",
            f.code_or_unknown(),
            f.message
        ),
    }
}

/// Required ids that are absent from `available`, in `required` order.
pub fn missing_models(available: &[ModelSummary], required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|id| !available.iter().any(|m| m.model_id == **id))
        .map(|id| id.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str) -> ModelSummary {
        ModelSummary {
            model_id: id.into(),
            model_name: None,
            provider_name: None,
            input_modalities: vec![],
            output_modalities: vec![],
            streaming: None,
        }
    }

    #[test]
    fn missing_models_reports_absent_ids() {
        let available = vec![summary("a"), summary("c")];
        assert_eq!(missing_models(&available, &["a", "b", "c", "d"]), vec!["b", "d"]);
        assert!(missing_models(&available, &["a"]).is_empty());
    }

    #[test]
    fn access_messages() {
        let f = AwsFailure {
            code: Some("AccessDeniedException".into()),
            message: "no".into(),
            transport: false,
        };
        assert!(model_access_message("m", "us-east-1", &f).contains("Check IAM permissions"));
        let f = AwsFailure { code: Some("ResourceNotFoundException".into()), ..f };
        assert!(model_access_message("m", "eu-west-3", &f).contains("region eu-west-3"));
        let f = AwsFailure { code: None, ..f };
        assert!(model_access_message("m", "r", &f).contains("error Unknown"));
    }
}
