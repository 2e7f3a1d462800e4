//! Installer pipeline end to end with a recording command runner.

use std::cell::RefCell;
use std::path::Path;

use rag_bedrock::config::{BedrockConfig, Config, ProviderKind, RagSettings, load_from};
use rag_bedrock::setup::SetupError;
use rag_bedrock::setup::conflict::ResolutionMethod;
use rag_bedrock::setup::envfile::{EnvFile, WriteOutcome};
use rag_bedrock::setup::pipeline::{InstallOptions, Installer, Stage};
use rag_bedrock::setup::runner::{Cmd, CmdOutput, CommandRunner};

/// Fails every command whose text starts with one of `failing`.
#[derive(Default)]
struct Recorder {
    failing: Vec<String>,
    calls: RefCell<Vec<String>>,
}

impl Recorder {
    fn failing<S: AsRef<str>>(prefixes: &[S]) -> Self {
        Self { failing: prefixes.iter().map(|p| p.as_ref().to_string()).collect(), ..Self::default() }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for Recorder {
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput, SetupError> {
        let line = cmd.to_string();
        self.calls.borrow_mut().push(line.clone());
        let status = if self.failing.iter().any(|p| line.starts_with(p.as_str())) { 1 } else { 0 };
        Ok(CmdOutput { status, ..CmdOutput::default() })
    }
}

fn config(dir: &Path) -> Config {
    Config::with_defaults(dir)
}

async fn install(cfg: &Config, runner: &Recorder) -> Result<rag_bedrock::setup::pipeline::InstallSummary, SetupError> {
    Installer::new(cfg, runner, BedrockConfig::default(), RagSettings::default(), InstallOptions::default())
        .run()
        .await
}

#[tokio::test]
async fn test_curl_minimal_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let runner = Recorder::failing(&["rpm -q curl"]);
    let summary = install(&cfg, &runner).await.unwrap();
    assert_eq!(summary.conflicts, vec![("curl".to_string(), ResolutionMethod::RemoveThenInstall)]);
    let calls = runner.calls();
    assert_eq!(calls[1], "dnf remove -y curl-minimal");
    assert_eq!(calls[2], "dnf install -y curl");
}

#[tokio::test]
async fn test_unresolvable_conflict_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let runner = Recorder::failing(&["rpm -q", "dnf remove", "dnf install -y --allowerasing", "dnf swap", "dnf reinstall"]);
    let err = install(&cfg, &runner).await.unwrap_err();
    match err {
        SetupError::ConflictUnresolved { package, remediation } => {
            assert_eq!(package, "curl");
            assert!(remediation.contains("curl-minimal"));
        }
        other => panic!("unexpected {other}"),
    }
    assert!(!cfg.env_path().exists());
}

#[tokio::test]
async fn test_second_install_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());

    let first = install(&cfg, &Recorder::default()).await.unwrap();
    assert_eq!(first.env, Some(WriteOutcome::Written));
    std::fs::create_dir_all(cfg.venv_path()).unwrap();

    let runner = Recorder::default();
    let second = install(&cfg, &runner).await.unwrap();
    assert_eq!(second.env, Some(WriteOutcome::Kept));
    assert!(!second.venv_created);
    assert!(!runner.calls().iter().any(|c| c.contains("-m venv")));
    assert_eq!(second.scaffold.existing.len(), cfg.scaffold.directories.len());
}

#[tokio::test]
async fn test_optional_failures_only_warn() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let pip_fail = format!("{}/bin/pip install mineru", cfg.venv_path().display());
    let runner = Recorder::failing(&["dnf config-manager", "dnf install -y epel-release", pip_fail.as_str()]);
    let summary = install(&cfg, &runner).await.unwrap();
    assert_eq!(summary.failed_repos, vec!["epel-release", "crb"]);
    assert_eq!(summary.packages.skipped, vec!["mineru[core]"]);
    assert!(summary.packages.installed.contains(&"Pillow".to_string()));
}

#[tokio::test]
async fn test_import_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let python = format!("{}/bin/python -c import raganything", cfg.venv_path().display());
    let runner = Recorder::failing(&[python]);
    let err = install(&cfg, &runner).await.unwrap_err();
    assert!(matches!(err, SetupError::Verification(ref m) if m.contains("raganything")));
}

#[tokio::test]
async fn test_env_file_carries_bedrock_settings() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let bedrock = BedrockConfig { aws_region: "eu-central-1".into(), ..BedrockConfig::default() };
    Installer::new(&cfg, &Recorder::default(), bedrock, RagSettings::default(), InstallOptions::default())
        .run_stages(&[Stage::EnvFile])
        .await
        .unwrap();
    let env = EnvFile::load(&cfg.env_path()).unwrap();
    assert_eq!(env.get("AWS_REGION"), Some("eu-central-1"));
    assert!(env.contains("BEDROCK_CLAUDE_MODEL_ID"));
    assert!(env.contains("BEDROCK_TITAN_EMBEDDING_MODEL_ID"));
}

#[test]
fn test_shipped_config_loads() {
    let cfg = load_from(Path::new("config/default.toml"), Some("/opt/rag"), None).unwrap();
    assert_eq!(cfg.provider, ProviderKind::Bedrock);
    assert_eq!(cfg.install.conflicts[0].target, "curl");
    assert_eq!(cfg.scaffold.directories.len(), 6);
    assert_eq!(cfg.venv_path(), Path::new("/opt/rag/venv"));
}

#[test]
fn test_dev_overlay_is_offline() {
    let cfg = load_from(Path::new("config/dev.toml"), None, None).unwrap();
    assert_eq!(cfg.provider, ProviderKind::Dummy);
    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.deploy.environment, "development");
    assert_eq!(cfg.service.name, "raganything");
}
