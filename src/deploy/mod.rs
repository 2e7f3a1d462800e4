//! CloudFormation stack management for `rag-bedrock-deploy`.
//!
//! - **stack**: the [`StackApi`] seam and its AWS implementation.
//! - **run**: validate / create / update / delete orchestration and polling.

pub mod run;
pub mod stack;

use std::path::PathBuf;

use thiserror::Error;

use crate::config::DeployDefaults;

pub use run::{DeployOutcome, Deployer};
pub use stack::{CloudFormationApi, StackApi, UpdateResult};

pub const ENVIRONMENTS: [&str; 3] = ["development", "staging", "production"];

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("missing required argument {0}")]
    MissingArgument(&'static str),

    #[error("invalid value for {flag}: {message}")]
    InvalidArgument { flag: &'static str, message: String },

    #[error("template {}: {message}", path.display())]
    Template { path: PathBuf, message: String },

    #[error("AWS {code}: {message}")]
    Aws { code: String, message: String },

    #[error("stack ended in {status}")]
    StackFailed { status: String },

    #[error("timed out after {waited_secs}s waiting for stack {stack}")]
    WaitTimeout { stack: String, waited_secs: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create when absent, update when present.
    Deploy,
    ValidateOnly,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployArgs {
    pub key_pair: Option<String>,
    pub region: String,
    pub environment: String,
    pub instance_type: String,
    pub volume_size: u32,
    pub ssh_cidr: String,
    pub stack_name: String,
    pub template: PathBuf,
    pub action: Action,
    pub verbosity: u8,
}

impl DeployArgs {
    pub fn from_defaults(d: &DeployDefaults) -> Self {
        Self {
            key_pair: None,
            region: d.region.clone(),
            environment: d.environment.clone(),
            instance_type: d.instance_type.clone(),
            volume_size: d.volume_size,
            ssh_cidr: d.ssh_cidr.clone(),
            stack_name: d.stack_name.clone(),
            template: d.template.clone(),
            action: Action::Deploy,
            verbosity: 0,
        }
    }

    /// Stack parameters. A `None` value keeps the stack's previous value.
    pub fn parameters(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("InstanceType", Some(self.instance_type.clone())),
            ("KeyPairName", self.key_pair.clone()),
            ("AllowedSSHCIDR", Some(self.ssh_cidr.clone())),
            ("VolumeSize", Some(self.volume_size.to_string())),
            ("Environment", Some(self.environment.clone())),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Run(DeployArgs),
    Help,
}

/// Parse flags (without the program name) over `defaults`.
pub fn parse_args<I>(args: I, defaults: &DeployDefaults) -> Result<Parsed, DeployError>
where
    I: IntoIterator<Item = String>,
{
    let mut out = DeployArgs::from_defaults(defaults);
    let mut iter = args.into_iter();

    fn value(iter: &mut impl Iterator<Item = String>, flag: &'static str) -> Result<String, DeployError> {
        iter.next()
            .filter(|v| !v.starts_with("--"))
            .ok_or(DeployError::MissingArgument(flag))
    }

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--key-pair" => out.key_pair = Some(value(&mut iter, "--key-pair")?),
            "--region" => out.region = value(&mut iter, "--region")?,
            "--environment" => out.environment = value(&mut iter, "--environment")?,
            "--instance-type" => out.instance_type = value(&mut iter, "--instance-type")?,
            "--volume-size" => {
                let v = value(&mut iter, "--volume-size")?;
                out.volume_size = v.parse().map_err(|_| DeployError::InvalidArgument {
                    flag: "--volume-size",
                    message: format!("`{v}` is not a whole number of GB"),
                })?;
            }
            "--ssh-cidr" => out.ssh_cidr = value(&mut iter, "--ssh-cidr")?,
            "--stack-name" => out.stack_name = value(&mut iter, "--stack-name")?,
            "--template" => out.template = PathBuf::from(value(&mut iter, "--template")?),
            "--validate-only" => out.action = Action::ValidateOnly,
            "--delete" => out.action = Action::Delete,
            "--help" | "-h" => return Ok(Parsed::Help),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                out.verbosity = out.verbosity.saturating_add((a.len() - 1) as u8);
            }
            other => {
                return Err(DeployError::InvalidArgument { flag: "argument", message: format!("unknown flag `{other}`") });
            }
        }
    }

    validate(&out)?;
    Ok(Parsed::Run(out))
}

fn validate(a: &DeployArgs) -> Result<(), DeployError> {
    if !ENVIRONMENTS.contains(&a.environment.as_str()) {
        return Err(DeployError::InvalidArgument {
            flag: "--environment",
            message: format!("`{}` is not one of {}", a.environment, ENVIRONMENTS.join(", ")),
        });
    }
    if !(20..=1000).contains(&a.volume_size) {
        return Err(DeployError::InvalidArgument {
            flag: "--volume-size",
            message: format!("{} GB is outside 20..=1000", a.volume_size),
        });
    }
    if !is_cidr(&a.ssh_cidr) {
        return Err(DeployError::InvalidArgument {
            flag: "--ssh-cidr",
            message: format!("`{}` is not an IPv4 CIDR", a.ssh_cidr),
        });
    }
    if a.stack_name.is_empty() {
        return Err(DeployError::MissingArgument("--stack-name"));
    }
    Ok(())
}

fn is_cidr(s: &str) -> bool {
    let Some((ip, prefix)) = s.split_once('/') else {
        return false;
    };
    ip.parse::<std::net::Ipv4Addr>().is_ok() && prefix.parse::<u8>().is_ok_and(|p| p <= 32)
}

pub fn usage() -> &'static str {
    "usage: rag-bedrock-deploy [flags]

flags:
  --key-pair <name>        EC2 key pair (required to create a stack)
  --region <region>        AWS region
  --environment <env>      development | staging | production
  --instance-type <type>   EC2 instance type
  --volume-size <gb>       root volume size in GB (20-1000)
  --ssh-cidr <cidr>        CIDR allowed to reach port 22
  --stack-name <name>      CloudFormation stack name
  --template <path>        template file
  --validate-only          validate the template and exit
  --delete                 delete the stack
  -v, -vv, -vvv            more logging
  -h, --help               print this help"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> DeployDefaults {
        crate::config::Config::with_defaults(std::path::Path::new("/tmp")).deploy
    }

    fn parse(args: &[&str]) -> Result<Parsed, DeployError> {
        parse_args(args.iter().map(|s| s.to_string()), &defaults())
    }

    #[test]
    fn flags_override_defaults() {
        let Parsed::Run(a) = parse(&["--key-pair", "ops", "--region", "eu-west-1", "--volume-size", "100"]).unwrap()
        else {
            panic!("expected run");
        };
        assert_eq!(a.key_pair.as_deref(), Some("ops"));
        assert_eq!(a.region, "eu-west-1");
        assert_eq!(a.volume_size, 100);
        assert_eq!(a.action, Action::Deploy);
        assert_eq!(a.instance_type, "t3.large");
    }

    #[test]
    fn actions_and_help() {
        assert!(matches!(parse(&["--validate-only"]).unwrap(), Parsed::Run(DeployArgs { action: Action::ValidateOnly, .. })));
        assert!(matches!(parse(&["--delete"]).unwrap(), Parsed::Run(DeployArgs { action: Action::Delete, .. })));
        assert_eq!(parse(&["-h"]).unwrap(), Parsed::Help);
    }

    #[test]
    fn bad_values_rejected() {
        assert!(matches!(parse(&["--region"]), Err(DeployError::MissingArgument("--region"))));
        assert!(matches!(parse(&["--volume-size", "big"]), Err(DeployError::InvalidArgument { .. })));
        assert!(matches!(parse(&["--volume-size", "5"]), Err(DeployError::InvalidArgument { .. })));
        assert!(matches!(parse(&["--environment", "qa"]), Err(DeployError::InvalidArgument { .. })));
        assert!(matches!(parse(&["--ssh-cidr", "10.0.0.1"]), Err(DeployError::InvalidArgument { .. })));
        assert!(matches!(parse(&["--bogus"]), Err(DeployError::InvalidArgument { .. })));
    }

    #[test]
    fn parameters_keep_previous_key_pair() {
        let a = DeployArgs::from_defaults(&defaults());
        let p = a.parameters();
        assert_eq!(p.len(), 5);
        assert_eq!(p[1], ("KeyPairName", None));
        assert_eq!(p[3], ("VolumeSize", Some("50".to_string())));
    }
}
