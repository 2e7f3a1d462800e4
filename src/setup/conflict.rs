//! Replacing a pre-installed "minimal" package with its full variant.
//!
//! Amazon Linux 2023 ships `curl-minimal`, which blocks a plain
//! `dnf install curl`. The resolver tries a fixed chain of package-manager
//! operations and stops at the first that exits 0.

use std::fmt;

use tracing::{info, warn};

use super::SetupError;
use super::runner::{Cmd, CommandRunner};
use crate::config::ConflictSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMethod {
    /// `rpm -q <target>` succeeded; nothing was run.
    AlreadyInstalled,
    RemoveThenInstall,
    AllowErasing,
    Swap,
    Reinstall,
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AlreadyInstalled => "already installed",
            Self::RemoveThenInstall => "remove minimal, then install",
            Self::AllowErasing => "install --allowerasing",
            Self::Swap => "swap",
            Self::Reinstall => "reinstall",
        })
    }
}

/// Attempts in the order they are tried. Each attempt is one or more commands
/// that must all succeed.
pub fn attempts(pm: &str, spec: &ConflictSpec) -> Vec<(ResolutionMethod, Vec<Cmd>)> {
    let (t, m) = (spec.target.as_str(), spec.minimal.as_str());
    vec![
        (
            ResolutionMethod::RemoveThenInstall,
            vec![Cmd::root(pm, &["remove", "-y", m]), Cmd::root(pm, &["install", "-y", t])],
        ),
        (ResolutionMethod::AllowErasing, vec![Cmd::root(pm, &["install", "-y", "--allowerasing", t])]),
        (ResolutionMethod::Swap, vec![Cmd::root(pm, &["swap", "-y", m, t])]),
        (ResolutionMethod::Reinstall, vec![Cmd::root(pm, &["reinstall", "-y", t])]),
    ]
}

/// Manual steps printed when every attempt fails.
pub fn remediation(pm: &str, spec: &ConflictSpec) -> String {
    let (t, m) = (&spec.target, &spec.minimal);
    format!(
        "  1. sudo {pm} remove -y {m}\n  \
         2. sudo {pm} install -y {t}\n  \
         or: sudo {pm} install -y --allowerasing {t}\n  \
         or: sudo {pm} swap -y {m} {t}\n  \
         then re-run the installer"
    )
}

pub fn resolve_conflict(
    runner: &dyn CommandRunner,
    pm: &str,
    spec: &ConflictSpec,
) -> Result<ResolutionMethod, SetupError> {
    if runner.succeeds(&Cmd::new("rpm", &["-q", &spec.target])) {
        info!(package = %spec.target, "already installed");
        return Ok(ResolutionMethod::AlreadyInstalled);
    }

    for (method, cmds) in attempts(pm, spec) {
        info!(package = %spec.target, %method, "attempting conflict resolution");
        if cmds.iter().all(|c| runner.succeeds(c)) {
            info!(package = %spec.target, %method, "conflict resolved");
            return Ok(method);
        }
        warn!(package = %spec.target, %method, "method failed");
    }

    Err(SetupError::ConflictUnresolved {
        package: spec.target.clone(),
        remediation: remediation(pm, spec),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::runner::testing::ScriptedRunner;

    fn curl() -> ConflictSpec {
        ConflictSpec { target: "curl".into(), minimal: "curl-minimal".into() }
    }

    #[test]
    fn already_installed_runs_nothing_else() {
        let r = ScriptedRunner::new().on("rpm -q", &[0]);
        assert_eq!(resolve_conflict(&r, "dnf", &curl()).unwrap(), ResolutionMethod::AlreadyInstalled);
        assert_eq!(r.calls(), vec!["rpm -q curl"]);
    }

    #[test]
    fn first_method_success_stops_chain() {
        let r = ScriptedRunner::new().on("rpm -q", &[1]);
        assert_eq!(resolve_conflict(&r, "dnf", &curl()).unwrap(), ResolutionMethod::RemoveThenInstall);
        assert_eq!(r.calls(), vec!["rpm -q curl", "dnf remove -y curl-minimal", "dnf install -y curl"]);
    }

    #[test]
    fn falls_through_to_swap() {
        let r = ScriptedRunner::new()
            .on("rpm -q", &[1])
            .on("dnf remove", &[1])
            .on("dnf install", &[1]);
        assert_eq!(resolve_conflict(&r, "dnf", &curl()).unwrap(), ResolutionMethod::Swap);
        assert!(!r.calls().iter().any(|c| c.starts_with("dnf reinstall")));
    }

    #[test]
    fn partial_first_attempt_moves_on() {
        let r = ScriptedRunner::new().on("rpm -q", &[1]).on("yum install -y curl", &[1]);
        assert_eq!(resolve_conflict(&r, "yum", &curl()).unwrap(), ResolutionMethod::AllowErasing);
    }

    #[test]
    fn all_fail_reports_remediation() {
        let r = ScriptedRunner::new().on("rpm", &[1]).on("dnf", &[1]);
        let err = resolve_conflict(&r, "dnf", &curl()).unwrap_err();
        match err {
            SetupError::ConflictUnresolved { package, remediation } => {
                assert_eq!(package, "curl");
                assert!(remediation.contains("swap -y curl-minimal curl"));
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(r.calls().last().map(String::as_str), Some("dnf reinstall -y curl"));
    }
}
