//! The CloudFormation seam.

use aws_config::BehaviorVersion;
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::types::{Capability, Parameter};
use tracing::debug;

use super::DeployError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    Started,
    /// CloudFormation reported "No updates are to be performed".
    NoChanges,
}

/// The stack operations the deploy flow needs. Parameter values of `None`
/// mean "use the previous value".
#[allow(async_fn_in_trait)]
pub trait StackApi {
    async fn validate_template(&self, body: &str) -> Result<(), DeployError>;

    /// Current status, or `None` when the stack does not exist.
    async fn stack_status(&self, name: &str) -> Result<Option<String>, DeployError>;

    async fn create_stack(
        &self,
        name: &str,
        body: &str,
        params: &[(&'static str, Option<String>)],
    ) -> Result<(), DeployError>;

    async fn update_stack(
        &self,
        name: &str,
        body: &str,
        params: &[(&'static str, Option<String>)],
    ) -> Result<UpdateResult, DeployError>;

    async fn delete_stack(&self, name: &str) -> Result<(), DeployError>;

    /// `(OutputKey, OutputValue)` pairs.
    async fn outputs(&self, name: &str) -> Result<Vec<(String, String)>, DeployError>;
}

fn aws_error<E, R>(err: SdkError<E, R>) -> DeployError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| aws_sdk_cloudformation::error::DisplayErrorContext(&err).to_string());
    DeployError::Aws { code, message }
}

fn is_missing_stack(e: &DeployError) -> bool {
    matches!(e, DeployError::Aws { code, message } if code == "ValidationError" && message.contains("does not exist"))
}

fn to_parameters(params: &[(&'static str, Option<String>)]) -> Vec<Parameter> {
    params
        .iter()
        .map(|(k, v)| match v {
            Some(v) => Parameter::builder().parameter_key(*k).parameter_value(v).build(),
            None => Parameter::builder().parameter_key(*k).use_previous_value(true).build(),
        })
        .collect()
}

/// [`StackApi`] over the AWS SDK.
pub struct CloudFormationApi {
    client: Client,
}

impl CloudFormationApi {
    pub async fn new(region: &str) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self { client: Client::new(&sdk_config) }
    }
}

impl StackApi for CloudFormationApi {
    async fn validate_template(&self, body: &str) -> Result<(), DeployError> {
        self.client
            .validate_template()
            .template_body(body)
            .send()
            .await
            .map_err(aws_error)?;
        Ok(())
    }

    async fn stack_status(&self, name: &str) -> Result<Option<String>, DeployError> {
        match self.client.describe_stacks().stack_name(name).send().await.map_err(aws_error) {
            Ok(out) => Ok(out
                .stacks()
                .first()
                .and_then(|s| s.stack_status())
                .map(|s| s.as_str().to_string())),
            Err(e) if is_missing_stack(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_stack(
        &self,
        name: &str,
        body: &str,
        params: &[(&'static str, Option<String>)],
    ) -> Result<(), DeployError> {
        let out = self
            .client
            .create_stack()
            .stack_name(name)
            .template_body(body)
            .set_parameters(Some(to_parameters(params)))
            .capabilities(Capability::CapabilityIam)
            .capabilities(Capability::CapabilityNamedIam)
            .send()
            .await
            .map_err(aws_error)?;
        debug!(stack_id = out.stack_id().unwrap_or("-"), "create_stack accepted");
        Ok(())
    }

    async fn update_stack(
        &self,
        name: &str,
        body: &str,
        params: &[(&'static str, Option<String>)],
    ) -> Result<UpdateResult, DeployError> {
        let result = self
            .client
            .update_stack()
            .stack_name(name)
            .template_body(body)
            .set_parameters(Some(to_parameters(params)))
            .capabilities(Capability::CapabilityIam)
            .capabilities(Capability::CapabilityNamedIam)
            .send()
            .await
            .map_err(aws_error);
        match result {
            Ok(_) => Ok(UpdateResult::Started),
            Err(DeployError::Aws { message, .. }) if message.contains("No updates are to be performed") => {
                Ok(UpdateResult::NoChanges)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_stack(&self, name: &str) -> Result<(), DeployError> {
        self.client
            .delete_stack()
            .stack_name(name)
            .send()
            .await
            .map_err(aws_error)?;
        Ok(())
    }

    async fn outputs(&self, name: &str) -> Result<Vec<(String, String)>, DeployError> {
        let out = self
            .client
            .describe_stacks()
            .stack_name(name)
            .send()
            .await
            .map_err(aws_error)?;
        Ok(out
            .stacks()
            .first()
            .map(|s| {
                s.outputs()
                    .iter()
                    .map(|o| {
                        (
                            o.output_key().unwrap_or_default().to_string(),
                            o.output_value().unwrap_or_default().to_string(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_stack_detection() {
        let e = DeployError::Aws {
            code: "ValidationError".into(),
            message: "Stack with id rag does not exist".into(),
        };
        assert!(is_missing_stack(&e));
        let e = DeployError::Aws { code: "ValidationError".into(), message: "Template format error".into() };
        assert!(!is_missing_stack(&e));
    }

    #[test]
    fn previous_value_parameter() {
        let p = to_parameters(&[("KeyPairName", None), ("VolumeSize", Some("50".into()))]);
        assert_eq!(p[0].use_previous_value(), Some(true));
        assert_eq!(p[0].parameter_value(), None);
        assert_eq!(p[1].parameter_value(), Some("50"));
    }
}
