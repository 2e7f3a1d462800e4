//! The ordered installation pipeline.
//!
//! [`Installer::run`] executes every [`Stage`] in order behind a spinner and
//! stops at the first required failure. Re-running after a partial install is
//! safe: each stage skips work that is already done.

use std::fmt;

use tracing::{info, warn};

use super::SetupError;
use super::conflict::{ResolutionMethod, resolve_conflict};
use super::envfile::{WriteOutcome, default_env, write_env_file};
use super::packages::{
    PackageReport, detect_package_manager, enable_optional_repos, ensure_venv, install_python_packages,
    install_system_packages,
};
use super::runner::CommandRunner;
use super::scaffold::{ScaffoldReport, create_scaffold};
use super::service::{ServiceFiles, install_service, write_service_files};
use super::verify::{ImportReport, bedrock_smoke_test, verify_imports};
use crate::bedrock::BedrockRag;
use crate::config::{BedrockConfig, Config, RagSettings};
use crate::ui;

pub const ENV_HEADER: &str = "RAG Anything with AWS Bedrock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Conflicts,
    SystemPackages,
    PythonEnv,
    PythonPackages,
    EnvFile,
    Scaffold,
    Verify,
    Service,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Conflicts,
        Stage::SystemPackages,
        Stage::PythonEnv,
        Stage::PythonPackages,
        Stage::EnvFile,
        Stage::Scaffold,
        Stage::Verify,
        Stage::Service,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Conflicts => "package conflicts",
            Stage::SystemPackages => "system packages",
            Stage::PythonEnv => "python environment",
            Stage::PythonPackages => "python packages",
            Stage::EnvFile => "environment file",
            Stage::Scaffold => "directory scaffold",
            Stage::Verify => "verification",
            Stage::Service => "service registration",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Overwrite an existing `.env`.
    pub force_env: bool,
    /// Skip the Bedrock round trip during verification.
    pub skip_smoke_test: bool,
    /// Render service files but do not install or enable the unit.
    pub skip_service_install: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InstallSummary {
    pub conflicts: Vec<(String, ResolutionMethod)>,
    pub package_manager: String,
    pub failed_repos: Vec<String>,
    pub venv_created: bool,
    pub packages: PackageReport,
    pub env: Option<WriteOutcome>,
    pub scaffold: ScaffoldReport,
    pub imports: ImportReport,
    /// Error text when the Bedrock smoke test failed; it does not stop the install.
    pub smoke_test_error: Option<String>,
    pub service: Option<ServiceFiles>,
}

pub struct Installer<'a> {
    config: &'a Config,
    runner: &'a dyn CommandRunner,
    bedrock: BedrockConfig,
    rag: RagSettings,
    opts: InstallOptions,
}

impl<'a> Installer<'a> {
    pub fn new(
        config: &'a Config,
        runner: &'a dyn CommandRunner,
        bedrock: BedrockConfig,
        rag: RagSettings,
        opts: InstallOptions,
    ) -> Self {
        Self { config, runner, bedrock, rag, opts }
    }

    /// Run every stage in order.
    pub async fn run(&self) -> Result<InstallSummary, SetupError> {
        self.run_stages(&Stage::ALL).await
    }

    /// Run the given stages in the given order. Later stages may depend on
    /// earlier ones (the package manager is detected on first need).
    pub async fn run_stages(&self, stages: &[Stage]) -> Result<InstallSummary, SetupError> {
        let mut summary = InstallSummary::default();
        ui::info(format!("installing into {}", self.config.project_dir.display()));
        for (i, stage) in stages.iter().enumerate() {
            let spinner = ui::Spinner::start(format!("[{}/{}] {stage}", i + 1, stages.len()));
            match self.run_stage(*stage, &mut summary).await {
                Ok(note) => spinner.done(format!("{stage}{note}")),
                Err(e) => {
                    spinner.fail(format!("{stage}: {e}"));
                    return Err(e);
                }
            }
        }
        for repo in &summary.failed_repos {
            ui::warn(format!("repository {repo} not enabled"));
        }
        for pkg in &summary.packages.skipped {
            ui::warn(format!("optional package {pkg} skipped"));
        }
        if let Some(e) = &summary.smoke_test_error {
            ui::warn(format!("Bedrock smoke test failed: {e}"));
        }
        info!(project_dir = %self.config.project_dir.display(), "installation complete");
        Ok(summary)
    }

    fn package_manager(&self, summary: &mut InstallSummary) -> Result<String, SetupError> {
        if summary.package_manager.is_empty() {
            summary.package_manager =
                detect_package_manager(self.runner, self.config.install.package_manager.as_deref())?;
        }
        Ok(summary.package_manager.clone())
    }

    /// Returns a short suffix for the stage's `[OK]` line.
    async fn run_stage(&self, stage: Stage, summary: &mut InstallSummary) -> Result<String, SetupError> {
        let install = &self.config.install;
        match stage {
            Stage::Conflicts => {
                let pm = self.package_manager(summary)?;
                for spec in &install.conflicts {
                    let method = resolve_conflict(self.runner, &pm, spec)?;
                    summary.conflicts.push((spec.target.clone(), method));
                }
                let done: Vec<String> = summary.conflicts.iter().map(|(p, m)| format!("{p}: {m}")).collect();
                Ok(if done.is_empty() { String::new() } else { format!(" ({})", done.join(", ")) })
            }
            Stage::SystemPackages => {
                let pm = self.package_manager(summary)?;
                summary.failed_repos = enable_optional_repos(self.runner, &pm, &install.optional_repos);
                install_system_packages(self.runner, &pm, &install.system_packages)?;
                Ok(format!(" ({} via {pm})", install.system_packages.len()))
            }
            Stage::PythonEnv => {
                summary.venv_created = ensure_venv(self.runner, &install.python, &self.config.venv_path())?;
                Ok(if summary.venv_created { " (created)" } else { " (reused)" }.to_string())
            }
            Stage::PythonPackages => {
                summary.packages = install_python_packages(
                    self.runner,
                    &self.config.venv_path(),
                    &install.python_packages,
                    &install.optional_python_packages,
                )?;
                Ok(format!(
                    " ({} installed, {} skipped)",
                    summary.packages.installed.len(),
                    summary.packages.skipped.len()
                ))
            }
            Stage::EnvFile => {
                let env = default_env(&self.bedrock, &self.rag);
                let outcome = write_env_file(&self.config.env_path(), &env, ENV_HEADER, self.opts.force_env)?;
                summary.env = Some(outcome);
                Ok(match outcome {
                    WriteOutcome::Written => " (written)".to_string(),
                    WriteOutcome::Kept => " (kept existing)".to_string(),
                })
            }
            Stage::Scaffold => {
                summary.scaffold = create_scaffold(&self.config.project_dir, &self.config.scaffold.directories)?;
                Ok(format!(
                    " ({} created, {} existing)",
                    summary.scaffold.created.len(),
                    summary.scaffold.existing.len()
                ))
            }
            Stage::Verify => {
                summary.imports = verify_imports(self.runner, &self.config.venv_path(), &install.import_checks)?;
                if !self.opts.skip_smoke_test {
                    let result = match BedrockRag::new(self.bedrock.clone(), self.config.provider) {
                        Ok(rag) => bedrock_smoke_test(&rag).await,
                        Err(e) => Err(SetupError::Verification(e.to_string())),
                    };
                    if let Err(e) = result {
                        warn!(error = %e, "Bedrock smoke test failed; continuing");
                        summary.smoke_test_error = Some(e.to_string());
                    }
                }
                Ok(format!(" ({} imports)", summary.imports.passed.len()))
            }
            Stage::Service => {
                let files = write_service_files(self.config, &self.bedrock)?;
                if !self.opts.skip_service_install {
                    install_service(self.runner, self.config, &files)?;
                }
                summary.service = Some(files);
                Ok(format!(" ({})", self.config.service.name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::runner::testing::ScriptedRunner;

    fn installer<'a>(cfg: &'a Config, runner: &'a ScriptedRunner, opts: InstallOptions) -> Installer<'a> {
        Installer::new(cfg, runner, BedrockConfig::default(), RagSettings::default(), opts)
    }

    #[tokio::test]
    async fn full_run_then_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::with_defaults(dir.path());
        let runner = ScriptedRunner::new();
        let s = installer(&cfg, &runner, InstallOptions::default()).run().await.unwrap();
        assert_eq!(s.conflicts[0].1, ResolutionMethod::AlreadyInstalled);
        assert!(s.venv_created);
        assert_eq!(s.env, Some(WriteOutcome::Written));
        assert!(s.smoke_test_error.is_none());
        assert!(s.service.is_some());
        assert!(cfg.env_path().is_file());

        // The scripted runner never creates the venv itself.
        std::fs::create_dir_all(cfg.venv_path()).unwrap();
        let runner = ScriptedRunner::new();
        let s = installer(&cfg, &runner, InstallOptions::default()).run().await.unwrap();
        assert!(!s.venv_created);
        assert_eq!(s.env, Some(WriteOutcome::Kept));
        assert!(s.scaffold.created.is_empty());
    }

    #[tokio::test]
    async fn failed_required_stage_stops_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::with_defaults(dir.path());
        let runner = ScriptedRunner::new().on("dnf install -y gcc", &[1]);
        let err = installer(&cfg, &runner, InstallOptions::default()).run().await.unwrap_err();
        assert!(matches!(err, SetupError::CommandFailed { .. }));
        assert!(!runner.calls().iter().any(|c| c.contains("-m venv")));
        assert!(!cfg.env_path().exists());
    }

    #[tokio::test]
    async fn selected_stages_only() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::with_defaults(dir.path());
        let runner = ScriptedRunner::new();
        let opts = InstallOptions { force_env: true, ..InstallOptions::default() };
        let s = installer(&cfg, &runner, opts).run_stages(&[Stage::EnvFile, Stage::Scaffold]).await.unwrap();
        assert!(runner.calls().is_empty());
        assert_eq!(s.env, Some(WriteOutcome::Written));
        assert_eq!(s.scaffold.created.len(), cfg.scaffold.directories.len());
    }
}
