//! OS packages, the Python virtual environment and pip dependencies.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::SetupError;
use super::runner::{Cmd, CommandRunner};

/// `dnf` when available, else `yum`. A configured manager is used as is.
pub fn detect_package_manager(runner: &dyn CommandRunner, configured: Option<&str>) -> Result<String, SetupError> {
    if let Some(pm) = configured {
        return Ok(pm.to_string());
    }
    for pm in ["dnf", "yum"] {
        if runner.succeeds(&Cmd::new("which", &[pm])) {
            info!(package_manager = pm, "detected package manager");
            return Ok(pm.to_string());
        }
    }
    Err(SetupError::NoPackageManager)
}

/// One `install -y` over every package. Failure is fatal.
pub fn install_system_packages(runner: &dyn CommandRunner, pm: &str, packages: &[String]) -> Result<(), SetupError> {
    if packages.is_empty() {
        return Ok(());
    }
    info!(count = packages.len(), "installing system packages");
    runner.run_checked(&Cmd::root(pm, &["install", "-y"]).args(packages.iter().cloned()))?;
    Ok(())
}

/// `*-release` entries are installed as packages; anything else is treated
/// as a repo id for `config-manager --set-enabled`.
pub fn repo_command(pm: &str, repo: &str) -> Cmd {
    if repo.ends_with("-release") {
        Cmd::root(pm, &["install", "-y", repo])
    } else {
        Cmd::root(pm, &["config-manager", "--set-enabled", repo])
    }
}

/// Enable optional repositories. Returns the ones that failed; failures only warn.
pub fn enable_optional_repos(runner: &dyn CommandRunner, pm: &str, repos: &[String]) -> Vec<String> {
    let mut failed = Vec::new();
    for repo in repos {
        if runner.succeeds(&repo_command(pm, repo)) {
            info!(repo = %repo, "repository enabled");
        } else {
            warn!(repo = %repo, "could not enable repository; continuing");
            failed.push(repo.clone());
        }
    }
    failed
}

pub fn venv_pip(venv: &Path) -> PathBuf {
    venv.join("bin").join("pip")
}

pub fn venv_python(venv: &Path) -> PathBuf {
    venv.join("bin").join("python")
}

/// Create the venv when the directory is absent, then upgrade the packaging
/// tools. Returns `true` when the venv was created.
pub fn ensure_venv(runner: &dyn CommandRunner, python: &str, venv: &Path) -> Result<bool, SetupError> {
    let created = if venv.exists() {
        info!(venv = %venv.display(), "virtual environment exists; reusing");
        false
    } else {
        info!(venv = %venv.display(), python, "creating virtual environment");
        runner.run_checked(&Cmd::new(python, &["-m", "venv"]).arg(venv.display().to_string()))?;
        true
    };
    let pip = venv_pip(venv).display().to_string();
    runner.run_checked(&Cmd::new(pip, &["install", "--upgrade", "pip", "setuptools", "wheel"]))?;
    Ok(created)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageReport {
    pub installed: Vec<String>,
    /// Optional packages whose install failed.
    pub skipped: Vec<String>,
}

/// Required packages in order, stopping at the first failure; then optional
/// ones, which only warn.
pub fn install_python_packages(
    runner: &dyn CommandRunner,
    venv: &Path,
    required: &[String],
    optional: &[String],
) -> Result<PackageReport, SetupError> {
    let pip = venv_pip(venv).display().to_string();
    let mut report = PackageReport::default();

    for pkg in required {
        info!(package = %pkg, "pip install");
        runner.run_checked(&Cmd::new(pip.as_str(), &["install", pkg.as_str()]))?;
        report.installed.push(pkg.clone());
    }
    for pkg in optional {
        match runner.run_checked(&Cmd::new(pip.as_str(), &["install", pkg.as_str()])) {
            Ok(_) => report.installed.push(pkg.clone()),
            Err(e) => {
                warn!(package = %pkg, error = %e, "optional package failed; skipping");
                report.skipped.push(pkg.clone());
            }
        }
    }
    Ok(report)
}
