//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `RAG_BEDROCK_PROJECT_DIR` and `RAG_BEDROCK_LOG_LEVEL` env overrides.
//!
//! # Module layout
//!
//! - **types**: Public configuration structs (`Config`, `InstallConfig`, …).
//! - **raw**: Raw TOML deserialization types. These mirror the file shape and
//!   use serde defaults; kept private.
//! - **load**: `merge_toml`, `load_raw_merged`, `load`, `load_from`, `expand_home`.
//! - **env**: typed environment lookup.
//! - **bedrock**: `BedrockConfig` / `RagSettings`, read from the environment.

mod bedrock;
mod env;
mod load;
mod raw;
mod types;

pub use bedrock::{
    BedrockConfig, DEFAULT_CLAUDE_MODEL_ID, DEFAULT_HAIKU_MODEL_ID, DEFAULT_RETRYABLE_CODES,
    DEFAULT_TITAN_EMBEDDING_MODEL_ID, MAX_CONCURRENT_REQUESTS, MAX_RETRY_BACKOFF_SECS, RagSettings, RetryConfig,
};
pub use env::{EnvReader, map_env, process_env};
pub use load::{LOG_LEVEL_ENV, PROJECT_DIR_ENV, expand_home, load, load_from};
pub use types::*;

impl Config {
    /// Config rooted at `project_dir` with every section at its default and the
    /// offline model backend. Used by tests and dry runs.
    pub fn with_defaults(project_dir: &std::path::Path) -> Self {
        let i = raw::RawInstall::default();
        let s = raw::RawService::default();
        let d = raw::RawDeploy::default();
        Self {
            project_name: "test".into(),
            project_dir: project_dir.to_path_buf(),
            log_level: "info".into(),
            log_file: None,
            provider: ProviderKind::Dummy,
            install: InstallConfig {
                package_manager: Some("dnf".into()),
                python: i.python,
                venv_dir: i.venv_dir.into(),
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
                directories: raw::default_directories(),
            },
            service: ServiceConfig {
                name: s.name,
                description: s.description,
                user: s.user,
                exec_start: s.exec_start,
                log_group: s.log_group,
                dashboard_name: s.dashboard_name,
            },
            deploy: DeployDefaults {
                stack_name: d.stack_name,
                template: d.template.into(),
                region: d.region,
                environment: d.environment,
                instance_type: d.instance_type,
                volume_size: d.volume_size,
                ssh_cidr: d.ssh_cidr,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const MINIMAL_TOML: &str = r#"
[project]
name = "test-rag"
dir = "~/raganything-bedrock"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.project_name, "test-rag");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.provider, ProviderKind::Bedrock);
        assert_eq!(cfg.install.conflicts[0].minimal, "curl-minimal");
        assert_eq!(cfg.scaffold.directories.len(), 6);
        assert_eq!(cfg.deploy.volume_size, 50);
    }

    fn shipped(name: &str) -> std::path::PathBuf {
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config").join(name)
    }

    #[test]
    fn shipped_default_project_dir_lands_under_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let cfg = load_from(&shipped("default.toml"), None, None).unwrap();
        assert_eq!(cfg.project_dir, home.join("raganything-bedrock"));
        assert_eq!(cfg.venv_path(), home.join("raganything-bedrock").join("venv"));
        assert_eq!(cfg.provider, ProviderKind::Bedrock);
    }

    #[test]
    fn absolute_path_unchanged() {
        let p = expand_home("/absolute/path");
        assert_eq!(p, std::path::PathBuf::from("/absolute/path"));
    }

    #[test]
    fn relative_path_unchanged() {
        let p = expand_home("relative/path");
        assert_eq!(p, std::path::PathBuf::from("relative/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(std::path::Path::new("/nonexistent/config.toml"), None, None);
        assert!(result.is_err());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn env_project_dir_override() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/test-override"), None).unwrap();
        assert_eq!(cfg.project_dir, std::path::PathBuf::from("/tmp/test-override"));
        assert_eq!(cfg.env_path(), std::path::PathBuf::from("/tmp/test-override/.env"));
    }

    #[test]
    fn env_log_level_override() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, Some("debug")).unwrap();
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn log_file_resolves_against_project_dir() {
        let toml = r#"
[project]
name = "x"
dir = "/srv/rag"
log_level = "info"
log_file = "logs/setup.log"
"#;
        let f = write_toml(toml);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.log_file, Some(std::path::PathBuf::from("/srv/rag/logs/setup.log")));
    }

    #[test]
    fn unknown_provider_rejected() {
        let toml = format!("{MINIMAL_TOML}\n[bedrock]\nprovider = \"openai\"\n");
        let f = write_toml(&toml);
        let msg = load_from(f.path(), None, None).unwrap_err().to_string();
        assert!(msg.contains("unknown provider"));
    }

    #[test]
    fn bad_package_manager_rejected() {
        let toml = format!("{MINIMAL_TOML}\n[install]\npackage_manager = \"apt\"\n");
        let f = write_toml(&toml);
        assert!(load_from(f.path(), None, None).is_err());
    }

    const BASE_TOML: &str = r#"
[project]
name = "base-rag"
dir = "~/raganything-bedrock"
log_level = "info"

[deploy]
region = "us-east-1"
instance_type = "t3.large"
"#;

    fn write_named(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, content).unwrap();
        p
    }

    #[test]
    fn overlay_keeps_base_fields() {
        let dir = TempDir::new().unwrap();
        write_named(&dir, "base.toml", BASE_TOML);
        let overlay = r#"
[meta]
base = "base.toml"

[project]
log_level = "debug"
"#;
        let overlay_path = write_named(&dir, "overlay.toml", overlay);
        let cfg = load_from(&overlay_path, None, None).unwrap();
        assert_eq!(cfg.project_name, "base-rag");
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn overlay_wins_scalar() {
        let dir = TempDir::new().unwrap();
        write_named(&dir, "base.toml", BASE_TOML);
        let overlay = r#"
[meta]
base = "base.toml"

[deploy]
instance_type = "m5.xlarge"
"#;
        let overlay_path = write_named(&dir, "overlay.toml", overlay);
        let cfg = load_from(&overlay_path, None, None).unwrap();
        assert_eq!(cfg.deploy.instance_type, "m5.xlarge");
        assert_eq!(cfg.deploy.region, "us-east-1");
    }

    #[test]
    fn dev_overlay_goes_offline_and_keeps_install_plan() {
        let cfg = load_from(&shipped("dev.toml"), None, None).unwrap();
        assert_eq!(cfg.provider, ProviderKind::Dummy);
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.deploy.environment, "development");
        assert_eq!(cfg.deploy.instance_type, "t3.medium");
        // inherited from default.toml
        assert_eq!(cfg.deploy.region, "us-east-1");
        assert_eq!(cfg.install.python, "python3.11");
        assert_eq!(cfg.scaffold.directories.len(), 6);
        assert_eq!(cfg.service.dashboard_name, "RAGAnything-Bedrock");
    }

    #[test]
    fn local_overlay_on_top_of_dev() {
        let dir = TempDir::new().unwrap();
        let local = format!(
            "[meta]\nbase = \"{}\"\n\n[deploy]\nregion = \"eu-west-1\"\nenvironment = \"staging\"\n",
            shipped("dev.toml").display()
        );
        let local_path = write_named(&dir, "local.toml", &local);
        let cfg = load_from(&local_path, None, None).unwrap();
        assert_eq!(cfg.deploy.region, "eu-west-1");
        assert_eq!(cfg.deploy.environment, "staging");
        assert_eq!(cfg.deploy.instance_type, "t3.medium");
        assert_eq!(cfg.provider, ProviderKind::Dummy);
        assert_eq!(cfg.install.conflicts[0].target, "curl");
    }

    #[test]
    fn missing_base_errors() {
        let dir = TempDir::new().unwrap();
        let overlay = r#"
[meta]
base = "nonexistent.toml"

[project]
name = "x"
dir = "~/rag"
log_level = "info"
"#;
        let overlay_path = write_named(&dir, "overlay.toml", overlay);
        let result = load_from(&overlay_path, None, None);
        assert!(result.is_err());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("cannot read") || msg.contains("config error"));
    }

    #[test]
    fn overlays_that_point_at_each_other_rejected() {
        let dir = TempDir::new().unwrap();
        write_named(&dir, "prod.toml", &format!("[meta]\nbase = \"dev.toml\"\n\n{BASE_TOML}"));
        let dev = write_named(&dir, "dev.toml", "[meta]\nbase = \"prod.toml\"\n\n[bedrock]\nprovider = \"dummy\"\n");
        let msg = load_from(&dev, None, None).unwrap_err().to_string();
        assert!(msg.contains("circular"), "{msg}");
        assert!(msg.contains("dev.toml"), "{msg}");
    }

    #[test]
    fn with_defaults_uses_dummy_backend() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::with_defaults(dir.path());
        assert_eq!(cfg.provider, ProviderKind::Dummy);
        assert_eq!(cfg.venv_path(), dir.path().join("venv"));
    }
}
