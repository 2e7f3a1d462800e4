//! Public configuration types consumed by the setup pipeline, the Bedrock
//! facade and the deploy tool.

use std::path::PathBuf;

use crate::error::AppError;

/// Which model backend the Bedrock facade talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Real AWS Bedrock endpoints via the SDK credential chain.
    Bedrock,
    /// Offline echo backend. No AWS calls.
    Dummy,
}

impl ProviderKind {
    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "bedrock" => Ok(Self::Bedrock),
            "dummy" => Ok(Self::Dummy),
            other => Err(AppError::Config(format!("unknown provider: {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bedrock => "bedrock",
            Self::Dummy => "dummy",
        }
    }
}

/// Package pair that ships as a conflicting "minimal" variant on Amazon Linux.
#[derive(Debug, Clone)]
pub struct ConflictSpec {
    /// Full package we want installed (e.g. `curl`).
    pub target: String,
    /// Pre-installed minimal variant that blocks it (e.g. `curl-minimal`).
    pub minimal: String,
}

/// `[install]`: OS and Python dependency stages.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// `dnf` / `yum`; `None` means detect.
    pub package_manager: Option<String>,
    /// Interpreter used to create the virtual environment.
    pub python: String,
    /// Virtual environment directory, relative to the project dir unless absolute.
    pub venv_dir: PathBuf,
    pub conflicts: Vec<ConflictSpec>,
    pub system_packages: Vec<String>,
    /// Repositories enabled best-effort (EPEL, CRB).
    pub optional_repos: Vec<String>,
    /// Installed in order; first failure aborts.
    pub python_packages: Vec<String>,
    /// Installed in order; failures only warn.
    pub optional_python_packages: Vec<String>,
    /// Python modules import-checked by `verify`.
    pub import_checks: Vec<String>,
}

/// `[scaffold]`: directories created under the project dir.
#[derive(Debug, Clone)]
pub struct ScaffoldConfig {
    pub directories: Vec<String>,
}

/// `[service]`: systemd unit and CloudWatch agent settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub description: String,
    pub user: String,
    /// Command line run by the unit, relative to the project dir.
    pub exec_start: String,
    pub log_group: String,
    pub dashboard_name: String,
}

/// `[deploy]`: defaults for `rag-bedrock-deploy`; every field is overridable
/// by a flag.
#[derive(Debug, Clone)]
pub struct DeployDefaults {
    pub stack_name: String,
    pub template: PathBuf,
    pub region: String,
    pub environment: String,
    pub instance_type: String,
    pub volume_size: u32,
    pub ssh_cidr: String,
}

/// Fully-resolved application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_name: String,
    /// Installation root (already expanded, no `~`).
    pub project_dir: PathBuf,
    pub log_level: String,
    /// Optional log file, resolved against `project_dir`.
    pub log_file: Option<PathBuf>,
    pub provider: ProviderKind,
    pub install: InstallConfig,
    pub scaffold: ScaffoldConfig,
    pub service: ServiceConfig,
    pub deploy: DeployDefaults,
}

impl Config {
    /// Absolute venv path.
    pub fn venv_path(&self) -> PathBuf {
        self.resolve(&self.install.venv_dir)
    }

    /// `.env` path at the project root.
    pub fn env_path(&self) -> PathBuf {
        self.project_dir.join(".env")
    }

    /// Resolve `p` against the project dir unless it is already absolute.
    pub fn resolve(&self, p: &std::path::Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.project_dir.join(p)
        }
    }
}
