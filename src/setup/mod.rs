//! Installation pipeline for Amazon Linux hosts.
//!
//! Each stage is a plain function over a [`runner::CommandRunner`] and the
//! resolved [`Config`](crate::config::Config); [`pipeline::Installer`] runs
//! them in order with console progress. Every stage is safe to re-run.

pub mod checker;
pub mod conflict;
pub mod envfile;
pub mod migrate;
pub mod packages;
pub mod pipeline;
pub mod runner;
pub mod scaffold;
pub mod service;
pub mod verify;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("command `{command}` failed with status {status}: {stderr}")]
    CommandFailed { command: String, status: i32, stderr: String },

    #[error("cannot run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not install {package}; resolve manually:\n{remediation}")]
    ConflictUnresolved { package: String, remediation: String },

    #[error("no supported package manager found (need dnf or yum)")]
    NoPackageManager,

    #[error("env file {}: {message}", path.display())]
    EnvFile { path: PathBuf, message: String },

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl SetupError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }
}
