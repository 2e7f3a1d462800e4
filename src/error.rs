//! Application-wide error types.

use thiserror::Error;

use crate::bedrock::BedrockError;
#[cfg(feature = "deploy")]
use crate::deploy::DeployError;
use crate::setup::SetupError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("setup error: {0}")]
    Setup(#[from] SetupError),

    #[error("bedrock error: {0}")]
    Bedrock(#[from] BedrockError),

    #[cfg(feature = "deploy")]
    #[error("deploy error: {0}")]
    Deploy(#[from] DeployError),

    #[error("usage error: {0}")]
    Usage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
