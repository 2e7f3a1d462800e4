//! systemd unit, CloudWatch agent config and dashboard body.
//!
//! Files are rendered into `<project>/service/` first, then installed into
//! system locations through the command runner.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tracing::{info, warn};

use super::SetupError;
use super::runner::{Cmd, CommandRunner};
use crate::bedrock::dashboard_body;
use crate::config::{BedrockConfig, Config};

pub const SYSTEMD_DIR: &str = "/etc/systemd/system";
pub const CLOUDWATCH_AGENT_CONFIG: &str = "/opt/aws/amazon-cloudwatch-agent/etc/amazon-cloudwatch-agent.json";

pub fn render_unit(config: &Config) -> String {
    let s = &config.service;
    let dir = config.project_dir.display();
    format!(
        "[Unit]\n\
         Description={desc}\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         User={user}\n\
         WorkingDirectory={dir}\n\
         EnvironmentFile={env}\n\
         Environment=PYTHONUNBUFFERED=1\n\
         Environment=HF_HOME={dir}/cache/huggingface\n\
         Environment=TRANSFORMERS_CACHE={dir}/cache/transformers\n\
         ExecStart={dir}/{exec}\n\
         Restart=on-failure\n\
         RestartSec=10\n\
         StandardOutput=append:{dir}/logs/{name}.log\n\
         StandardError=append:{dir}/logs/{name}.error.log\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        desc = s.description,
        user = s.user,
        env = config.env_path().display(),
        exec = s.exec_start,
        name = s.name,
    )
}

/// Ships the application and error logs to the configured log group.
pub fn cloudwatch_agent_config(config: &Config) -> Value {
    let dir = config.project_dir.display().to_string();
    let s = &config.service;
    json!({
        "agent": {
            "metrics_collection_interval": 60,
            "run_as_user": "cwagent"
        },
        "logs": {
            "logs_collected": {
                "files": {
                    "collect_list": [
                        {
                            "file_path": format!("{dir}/logs/{}.log", s.name),
                            "log_group_name": s.log_group,
                            "log_stream_name": "{instance_id}/application",
                            "timezone": "UTC"
                        },
                        {
                            "file_path": format!("{dir}/logs/{}.error.log", s.name),
                            "log_group_name": s.log_group,
                            "log_stream_name": "{instance_id}/error",
                            "timezone": "UTC"
                        }
                    ]
                }
            }
        },
        "metrics": {
            "namespace": "RAGAnything/System",
            "metrics_collected": {
                "cpu": {"measurement": ["cpu_usage_idle", "cpu_usage_user", "cpu_usage_system"], "totalcpu": true},
                "disk": {"measurement": ["used_percent"], "resources": ["/"]},
                "mem": {"measurement": ["mem_used_percent"]}
            }
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFiles {
    pub unit: PathBuf,
    pub agent_config: PathBuf,
    pub dashboard: PathBuf,
}

/// Render all three files into `<project>/service/`.
pub fn write_service_files(config: &Config, bedrock: &BedrockConfig) -> Result<ServiceFiles, SetupError> {
    let dir = config.project_dir.join("service");
    fs::create_dir_all(&dir).map_err(|e| SetupError::io(format!("create {}", dir.display()), e))?;

    let files = ServiceFiles {
        unit: dir.join(format!("{}.service", config.service.name)),
        agent_config: dir.join("amazon-cloudwatch-agent.json"),
        dashboard: dir.join(format!("{}-dashboard.json", config.service.dashboard_name)),
    };
    let models = [
        bedrock.claude_model_id.as_str(),
        bedrock.claude_haiku_model_id.as_str(),
        bedrock.titan_embedding_model_id.as_str(),
    ];
    write(&files.unit, &render_unit(config))?;
    write(&files.agent_config, &pretty(&cloudwatch_agent_config(config)))?;
    write(&files.dashboard, &pretty(&dashboard_body(&bedrock.aws_region, &models)))?;
    info!(dir = %dir.display(), "service files rendered");
    Ok(files)
}

fn pretty(v: &Value) -> String {
    serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
}

fn write(path: &Path, text: &str) -> Result<(), SetupError> {
    fs::write(path, text).map_err(|e| SetupError::io(format!("write {}", path.display()), e))
}

/// Install the unit and enable it. The agent config is copied only when the
/// CloudWatch agent directory exists; otherwise a warning is logged.
pub fn install_service(runner: &dyn CommandRunner, config: &Config, files: &ServiceFiles) -> Result<(), SetupError> {
    let unit_dest = format!("{SYSTEMD_DIR}/{}.service", config.service.name);
    runner.run_checked(
        &Cmd::root("install", &["-m", "0644"])
            .arg(files.unit.display().to_string())
            .arg(unit_dest),
    )?;
    runner.run_checked(&Cmd::root("systemctl", &["daemon-reload"]))?;
    runner.run_checked(&Cmd::root("systemctl", &["enable", config.service.name.as_str()]))?;

    let agent_dir = Path::new(CLOUDWATCH_AGENT_CONFIG).parent();
    if agent_dir.is_some_and(Path::is_dir) {
        let copy = Cmd::root("install", &["-m", "0644"])
            .arg(files.agent_config.display().to_string())
            .arg(CLOUDWATCH_AGENT_CONFIG);
        if !runner.succeeds(&copy) {
            warn!("could not install CloudWatch agent config");
        }
    } else {
        warn!("CloudWatch agent not installed; agent config left in {}", files.agent_config.display());
    }
    info!(service = %config.service.name, "service registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::runner::testing::ScriptedRunner;

    #[test]
    fn unit_points_at_project() {
        let cfg = Config::with_defaults(Path::new("/home/ec2-user/rag"));
        let unit = render_unit(&cfg);
        assert!(unit.contains("User=ec2-user"));
        assert!(unit.contains("WorkingDirectory=/home/ec2-user/rag\n"));
        assert!(unit.contains("EnvironmentFile=/home/ec2-user/rag/.env"));
        assert!(unit.contains("ExecStart=/home/ec2-user/rag/venv/bin/python -m raganything.server"));
        assert!(unit.contains("WantedBy=multi-user.target"));
    }

    #[test]
    fn agent_config_uses_log_group() {
        let cfg = Config::with_defaults(Path::new("/srv/rag"));
        let v = cloudwatch_agent_config(&cfg);
        let list = &v["logs"]["logs_collected"]["files"]["collect_list"];
        assert_eq!(list[0]["log_group_name"], "/raganything/application");
        assert_eq!(list[0]["file_path"], "/srv/rag/logs/raganything.log");
    }

    #[test]
    fn files_written_and_installed() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::with_defaults(dir.path());
        let files = write_service_files(&cfg, &BedrockConfig::default()).unwrap();
        assert!(files.unit.is_file());
        let dash: Value = serde_json::from_str(&fs::read_to_string(&files.dashboard).unwrap()).unwrap();
        assert_eq!(dash["widgets"].as_array().unwrap().len(), 4);

        let r = ScriptedRunner::new();
        install_service(&r, &cfg, &files).unwrap();
        let calls = r.calls();
        assert!(calls[0].ends_with("/etc/systemd/system/raganything.service"));
        assert_eq!(calls[1], "systemctl daemon-reload");
        assert_eq!(calls[2], "systemctl enable raganything");
    }
}
