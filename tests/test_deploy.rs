//! Deploy flow against an in-memory CloudFormation fake.

use std::collections::VecDeque;
use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use rag_bedrock::config::Config;
use rag_bedrock::deploy::{
    Action, DeployArgs, DeployError, DeployOutcome, Deployer, Parsed, StackApi, UpdateResult, parse_args,
};

#[derive(Default)]
struct FakeStacks {
    /// Successive `stack_status` answers; the last one repeats.
    statuses: Mutex<VecDeque<Option<String>>>,
    no_changes: bool,
    invalid_template: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeStacks {
    fn with_statuses(statuses: &[Option<&str>]) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().map(|s| s.map(str::to_string)).collect()),
            ..Self::default()
        }
    }

    fn log(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl StackApi for FakeStacks {
    async fn validate_template(&self, _body: &str) -> Result<(), DeployError> {
        self.log("validate");
        if self.invalid_template {
            return Err(DeployError::Aws { code: "ValidationError".into(), message: "Template format error".into() });
        }
        Ok(())
    }

    async fn stack_status(&self, _name: &str) -> Result<Option<String>, DeployError> {
        let mut q = self.statuses.lock().unwrap();
        Ok(if q.len() > 1 { q.pop_front().flatten() } else { q.front().cloned().flatten() })
    }

    async fn create_stack(
        &self,
        _name: &str,
        _body: &str,
        params: &[(&'static str, Option<String>)],
    ) -> Result<(), DeployError> {
        assert!(params.iter().all(|(_, v)| v.is_some()));
        self.log("create");
        Ok(())
    }

    async fn update_stack(
        &self,
        _name: &str,
        _body: &str,
        _params: &[(&'static str, Option<String>)],
    ) -> Result<UpdateResult, DeployError> {
        self.log("update");
        Ok(if self.no_changes { UpdateResult::NoChanges } else { UpdateResult::Started })
    }

    async fn delete_stack(&self, _name: &str) -> Result<(), DeployError> {
        self.log("delete");
        Ok(())
    }

    async fn outputs(&self, _name: &str) -> Result<Vec<(String, String)>, DeployError> {
        Ok(vec![("InstancePublicIp".into(), "203.0.113.10".into())])
    }
}

fn args(flags: &[&str]) -> DeployArgs {
    let defaults = Config::with_defaults(std::path::Path::new("/tmp")).deploy;
    match parse_args(flags.iter().map(|s| s.to_string()), &defaults).unwrap() {
        Parsed::Run(a) => a,
        Parsed::Help => panic!("unexpected help"),
    }
}

fn deployer(api: &FakeStacks) -> Deployer<'_, FakeStacks> {
    Deployer::new(api).with_polling(Duration::from_secs(10), Duration::from_secs(60))
}

#[tokio::test]
async fn test_validate_only_never_creates() {
    let api = FakeStacks::with_statuses(&[None]);
    let out = deployer(&api).run(&args(&["--validate-only"]), "{}").await.unwrap();
    assert_eq!(out, DeployOutcome::Validated);
    assert_eq!(api.calls(), vec!["validate"]);
}

#[tokio::test]
async fn test_invalid_template_fails_validation() {
    let api = FakeStacks { invalid_template: true, ..FakeStacks::with_statuses(&[None]) };
    let err = deployer(&api).run(&args(&["--validate-only"]), "{}").await.unwrap_err();
    assert!(err.to_string().contains("Template format error"));
}

#[tokio::test]
async fn test_delete_missing_stack_is_ok() {
    let api = FakeStacks::with_statuses(&[None]);
    let out = deployer(&api).run(&args(&["--delete"]), "{}").await.unwrap();
    assert_eq!(out, DeployOutcome::NothingToDelete);
    assert!(api.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_delete_waits_until_gone() {
    let api = FakeStacks::with_statuses(&[Some("CREATE_COMPLETE"), Some("DELETE_IN_PROGRESS"), None]);
    let out = deployer(&api).run(&args(&["--delete"]), "{}").await.unwrap();
    assert_eq!(out, DeployOutcome::Deleted);
    assert_eq!(api.calls(), vec!["delete"]);
}

#[tokio::test]
async fn test_create_requires_key_pair() {
    let api = FakeStacks::with_statuses(&[None]);
    let err = deployer(&api).run(&args(&[]), "{}").await.unwrap_err();
    assert!(matches!(err, DeployError::MissingArgument("--key-pair")));
    assert_eq!(api.calls(), vec!["validate"]);
}

#[tokio::test(start_paused = true)]
async fn test_create_polls_to_completion() {
    let api = FakeStacks::with_statuses(&[None, Some("CREATE_IN_PROGRESS"), Some("CREATE_COMPLETE")]);
    let out = deployer(&api).run(&args(&["--key-pair", "ops"]), "{}").await.unwrap();
    match out {
        DeployOutcome::Created { outputs } => assert_eq!(outputs[0].0, "InstancePublicIp"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(api.calls(), vec!["validate", "create"]);
}

#[tokio::test(start_paused = true)]
async fn test_rollback_is_failure() {
    let api = FakeStacks::with_statuses(&[None, Some("ROLLBACK_IN_PROGRESS"), Some("ROLLBACK_COMPLETE")]);
    let err = deployer(&api).run(&args(&["--key-pair", "ops"]), "{}").await.unwrap_err();
    assert!(matches!(err, DeployError::StackFailed { status } if status == "ROLLBACK_COMPLETE"));
}

#[tokio::test]
async fn test_existing_stack_without_changes_succeeds() {
    let api = FakeStacks { no_changes: true, ..FakeStacks::with_statuses(&[Some("CREATE_COMPLETE")]) };
    let out = deployer(&api).run(&args(&[]), "{}").await.unwrap();
    assert_eq!(out, DeployOutcome::NoChanges);
    assert_eq!(api.calls(), vec!["validate", "update"]);
}

#[tokio::test(start_paused = true)]
async fn test_update_times_out() {
    let api = FakeStacks::with_statuses(&[Some("CREATE_COMPLETE"), Some("UPDATE_IN_PROGRESS")]);
    let err = deployer(&api).run(&args(&[]), "{}").await.unwrap_err();
    assert!(matches!(err, DeployError::WaitTimeout { waited_secs: 60, .. }));
}

#[test]
fn test_default_action_is_deploy() {
    assert_eq!(args(&[]).action, Action::Deploy);
}

#[test]
fn test_template_declares_parameters() {
    let text = fs::read_to_string("deploy/cloudformation.yaml").expect("template missing");
    for p in ["InstanceType", "KeyPairName", "AllowedSSHCIDR", "VolumeSize", "Environment"] {
        assert!(text.contains(&format!("  {p}:")), "template should declare {p}");
    }
}
