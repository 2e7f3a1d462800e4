//! Configuration loading with env-var overrides.
//!
//! Reads TOML files, supports `[meta] base = "..."` inheritance chains,
//! and applies `RAG_BEDROCK_PROJECT_DIR` and `RAG_BEDROCK_LOG_LEVEL` env overrides.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;

use super::raw::{RawBedrock, RawConfig, RawDeploy, RawInstall, RawProject, RawScaffold, RawService};
use super::types::*;

pub const PROJECT_DIR_ENV: &str = "RAG_BEDROCK_PROJECT_DIR";
pub const LOG_LEVEL_ENV: &str = "RAG_BEDROCK_LOG_LEVEL";

/// Deep-merge two TOML values.
/// Tables are merged recursively; the overlay only needs to specify keys that
/// differ from the base. For every other type (string, integer, array, …)
/// the overlay value replaces the base value wholesale.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file, follow any `[meta] base = "..."` chain, and return the
/// fully merged `toml::Value`. `visited` carries canonicalized paths already
/// seen in this chain so circular references are caught early.
fn load_raw_merged(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<toml::Value, AppError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(AppError::Config(format!(
            "circular base reference detected at: {}",
            path.display()
        )));
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let overlay_val: toml::Value = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    if let Some(base_str) = overlay_val
        .get("meta")
        .and_then(|m| m.get("base"))
        .and_then(|b| b.as_str())
    {
        let base_path = if Path::new(base_str).is_absolute() {
            PathBuf::from(base_str)
        } else {
            path.parent().unwrap_or(Path::new(".")).join(base_str)
        };
        let base_val = load_raw_merged(&base_path, visited)?;
        Ok(merge_toml(base_val, overlay_val))
    } else {
        Ok(overlay_val)
    }
}

/// Load config from the given path, or `config/default.toml`, then apply env-var overrides.
/// If no path is given and `config/default.toml` does not exist, returns a hardcoded default.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let project_dir_override = env::var(PROJECT_DIR_ENV).ok();
    let log_level_override = env::var(LOG_LEVEL_ENV).ok();

    if let Some(path) = config_path {
        return load_from(
            Path::new(path),
            project_dir_override.as_deref(),
            log_level_override.as_deref(),
        );
    }

    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        load_from(
            default_path,
            project_dir_override.as_deref(),
            log_level_override.as_deref(),
        )
    } else {
        let raw = RawConfig {
            project: RawProject {
                name: "raganything".to_string(),
                dir: "~/raganything-bedrock".to_string(),
                log_level: "info".to_string(),
                log_file: None,
            },
            bedrock: RawBedrock::default(),
            install: RawInstall::default(),
            scaffold: RawScaffold::default(),
            service: RawService::default(),
            deploy: RawDeploy::default(),
        };
        resolve(raw, project_dir_override.as_deref(), log_level_override.as_deref())
    }
}

/// Internal loader. Accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
/// Follows `[meta] base = "..."` inheritance chains before resolving.
pub fn load_from(
    path: &Path,
    project_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let merged_val = load_raw_merged(path, &mut HashSet::new())?;

    let parsed: RawConfig = Deserialize::deserialize(merged_val).map_err(|e: toml::de::Error| {
        AppError::Config(format!("config error in {}: {e}", path.display()))
    })?;

    resolve(parsed, project_dir_override, log_level_override)
}

fn resolve(
    parsed: RawConfig,
    project_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let p = parsed.project;

    let project_dir = expand_home(project_dir_override.unwrap_or(&p.dir));
    let log_level = log_level_override.unwrap_or(&p.log_level).to_string();
    crate::logger::parse_level(&log_level)?;
    let log_file = p.log_file.map(|f| {
        let f = expand_home(&f);
        if f.is_absolute() { f } else { project_dir.join(f) }
    });

    let provider = ProviderKind::parse(&parsed.bedrock.provider)?;

    let i = parsed.install;
    if let Some(pm) = i.package_manager.as_deref() {
        if pm != "dnf" && pm != "yum" {
            return Err(AppError::Config(format!(
                "install.package_manager must be \"dnf\" or \"yum\", got \"{pm}\""
            )));
        }
    }

    Ok(Config {
        project_name: p.name,
        project_dir,
        log_level,
        log_file,
        provider,
        install: InstallConfig {
            package_manager: i.package_manager,
            python: i.python,
            venv_dir: PathBuf::from(i.venv_dir),
            conflicts: i
                .conflicts
                .into_iter()
                .map(|c| ConflictSpec { target: c.target, minimal: c.minimal })
                .collect(),
            system_packages: i.system_packages,
            optional_repos: i.optional_repos,
            python_packages: i.python_packages,
            optional_python_packages: i.optional_python_packages,
            import_checks: i.import_checks,
        },
        scaffold: ScaffoldConfig {
            directories: parsed.scaffold.directories,
        },
        service: ServiceConfig {
            name: parsed.service.name,
            description: parsed.service.description,
            user: parsed.service.user,
            exec_start: parsed.service.exec_start,
            log_group: parsed.service.log_group,
            dashboard_name: parsed.service.dashboard_name,
        },
        deploy: DeployDefaults {
            stack_name: parsed.deploy.stack_name,
            template: PathBuf::from(parsed.deploy.template),
            region: parsed.deploy.region,
            environment: parsed.deploy.environment,
            instance_type: parsed.deploy.instance_type,
            volume_size: parsed.deploy.volume_size,
            ssh_cidr: parsed.deploy.ssh_cidr,
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
