//! Raw TOML deserialization types.
//!
//! These structs mirror the TOML file shape and use `serde` defaults.
//! The `load` module converts them into the public `types` structs.

use serde::Deserialize;

// ── Top-level ────────────────────────────────────────────────────────────────

/// Raw TOML shape: serde target before resolution.
#[derive(Deserialize)]
pub(super) struct RawConfig {
    pub project: RawProject,
    #[serde(default)]
    pub bedrock: RawBedrock,
    #[serde(default)]
    pub install: RawInstall,
    #[serde(default)]
    pub scaffold: RawScaffold,
    #[serde(default)]
    pub service: RawService,
    #[serde(default)]
    pub deploy: RawDeploy,
}

#[derive(Deserialize)]
pub(super) struct RawProject {
    pub name: String,
    pub dir: String,
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

// ── Bedrock ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawBedrock {
    #[serde(default = "default_provider")]
    pub provider: String,
}

impl Default for RawBedrock {
    fn default() -> Self {
        Self { provider: default_provider() }
    }
}

pub(super) fn default_provider() -> String {
    "bedrock".to_string()
}

// ── Install ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawInstall {
    #[serde(default)]
    pub package_manager: Option<String>,
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_venv_dir")]
    pub venv_dir: String,
    #[serde(default = "default_conflicts")]
    pub conflicts: Vec<RawConflict>,
    #[serde(default = "default_system_packages")]
    pub system_packages: Vec<String>,
    #[serde(default = "default_optional_repos")]
    pub optional_repos: Vec<String>,
    #[serde(default = "default_python_packages")]
    pub python_packages: Vec<String>,
    #[serde(default = "default_optional_python_packages")]
    pub optional_python_packages: Vec<String>,
    #[serde(default = "default_import_checks")]
    pub import_checks: Vec<String>,
}

impl Default for RawInstall {
    fn default() -> Self {
        Self {
            package_manager: None,
            python: default_python(),
            venv_dir: default_venv_dir(),
            conflicts: default_conflicts(),
            system_packages: default_system_packages(),
            optional_repos: default_optional_repos(),
            python_packages: default_python_packages(),
            optional_python_packages: default_optional_python_packages(),
            import_checks: default_import_checks(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub(super) struct RawConflict {
    pub target: String,
    pub minimal: String,
}

pub(super) fn default_python() -> String {
    "python3.11".to_string()
}

pub(super) fn default_venv_dir() -> String {
    "venv".to_string()
}

pub(super) fn default_conflicts() -> Vec<RawConflict> {
    vec![RawConflict { target: "curl".into(), minimal: "curl-minimal".into() }]
}

pub(super) fn default_system_packages() -> Vec<String> {
    [
        "gcc",
        "gcc-c++",
        "make",
        "git",
        "python3.11",
        "python3.11-devel",
        "python3.11-pip",
        "openssl-devel",
        "zlib-devel",
        "libffi-devel",
        "bzip2-devel",
        "mesa-libGL",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub(super) fn default_optional_repos() -> Vec<String> {
    vec!["epel-release".into(), "crb".into()]
}

pub(super) fn default_python_packages() -> Vec<String> {
    [
        "boto3>=1.34.0",
        "botocore>=1.34.0",
        "python-dotenv",
        "numpy",
        "lightrag-hku",
        "raganything",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub(super) fn default_optional_python_packages() -> Vec<String> {
    vec!["mineru[core]".into(), "Pillow".into()]
}

pub(super) fn default_import_checks() -> Vec<String> {
    vec!["boto3".into(), "lightrag".into(), "raganything".into()]
}

// ── Scaffold ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawScaffold {
    #[serde(default = "default_directories")]
    pub directories: Vec<String>,
}

impl Default for RawScaffold {
    fn default() -> Self {
        Self { directories: default_directories() }
    }
}

pub(super) fn default_directories() -> Vec<String> {
    [
        "logs",
        "rag_storage",
        "output",
        "cache/transformers",
        "cache/huggingface",
        "data/samples",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

// ── Service ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawService {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_service_description")]
    pub description: String,
    #[serde(default = "default_service_user")]
    pub user: String,
    #[serde(default = "default_exec_start")]
    pub exec_start: String,
    #[serde(default = "default_log_group")]
    pub log_group: String,
    #[serde(default = "default_dashboard_name")]
    pub dashboard_name: String,
}

impl Default for RawService {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            description: default_service_description(),
            user: default_service_user(),
            exec_start: default_exec_start(),
            log_group: default_log_group(),
            dashboard_name: default_dashboard_name(),
        }
    }
}

pub(super) fn default_service_name() -> String {
    "raganything".to_string()
}
fn default_service_description() -> String {
    "RAG Anything with AWS Bedrock".to_string()
}
fn default_service_user() -> String {
    "ec2-user".to_string()
}
fn default_exec_start() -> String {
    "venv/bin/python -m raganything.server".to_string()
}
fn default_log_group() -> String {
    "/raganything/application".to_string()
}
fn default_dashboard_name() -> String {
    "RAGAnything-Bedrock".to_string()
}

// ── Deploy ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawDeploy {
    #[serde(default = "default_stack_name")]
    pub stack_name: String,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default = "default_volume_size")]
    pub volume_size: u32,
    #[serde(default = "default_ssh_cidr")]
    pub ssh_cidr: String,
}

impl Default for RawDeploy {
    fn default() -> Self {
        Self {
            stack_name: default_stack_name(),
            template: default_template(),
            region: default_region(),
            environment: default_environment(),
            instance_type: default_instance_type(),
            volume_size: default_volume_size(),
            ssh_cidr: default_ssh_cidr(),
        }
    }
}

pub(super) fn default_stack_name() -> String {
    "raganything-bedrock".to_string()
}
pub(super) fn default_template() -> String {
    "deploy/cloudformation.yaml".to_string()
}
pub(super) fn default_region() -> String {
    "us-east-1".to_string()
}
pub(super) fn default_environment() -> String {
    "production".to_string()
}
pub(super) fn default_instance_type() -> String {
    "t3.large".to_string()
}
pub(super) fn default_volume_size() -> u32 {
    50
}
pub(super) fn default_ssh_cidr() -> String {
    "0.0.0.0/0".to_string()
}
