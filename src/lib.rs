//! Library root for the `rag-bedrock` and `rag-bedrock-deploy` binaries and
//! the integration tests.

pub mod bedrock;
pub mod config;
#[cfg(feature = "deploy")]
pub mod deploy;
pub mod error;
pub mod logger;
pub mod setup;
pub mod ui;
