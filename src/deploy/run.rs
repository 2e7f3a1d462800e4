//! Deploy orchestration over a [`StackApi`].

use std::time::Duration;

use tracing::{info, warn};

use super::stack::{StackApi, UpdateResult};
use super::{Action, DeployArgs, DeployError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    Validated,
    Created { outputs: Vec<(String, String)> },
    Updated { outputs: Vec<(String, String)> },
    NoChanges,
    Deleted,
    /// `--delete` on a stack that does not exist.
    NothingToDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    InProgress,
    Complete,
    Failed,
}

fn phase(status: &str) -> Phase {
    if status.ends_with("_IN_PROGRESS") {
        Phase::InProgress
    } else if status.ends_with("_FAILED") || status.ends_with("ROLLBACK_COMPLETE") {
        Phase::Failed
    } else {
        Phase::Complete
    }
}

pub struct Deployer<'a, A: StackApi> {
    api: &'a A,
    poll: Duration,
    max_wait: Duration,
}

impl<'a, A: StackApi> Deployer<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api, poll: Duration::from_secs(15), max_wait: Duration::from_secs(3600) }
    }

    pub fn with_polling(mut self, poll: Duration, max_wait: Duration) -> Self {
        self.poll = poll;
        self.max_wait = max_wait;
        self
    }

    pub async fn run(&self, args: &DeployArgs, template_body: &str) -> Result<DeployOutcome, DeployError> {
        let stack = args.stack_name.as_str();
        match args.action {
            Action::ValidateOnly => {
                self.api.validate_template(template_body).await?;
                info!(template = %args.template.display(), "template is valid");
                Ok(DeployOutcome::Validated)
            }
            Action::Delete => {
                if self.api.stack_status(stack).await?.is_none() {
                    warn!(stack, "stack does not exist; nothing to delete");
                    return Ok(DeployOutcome::NothingToDelete);
                }
                self.api.delete_stack(stack).await?;
                info!(stack, "delete requested");
                self.wait(stack).await?;
                Ok(DeployOutcome::Deleted)
            }
            Action::Deploy => {
                self.api.validate_template(template_body).await?;
                let params = args.parameters();
                match self.api.stack_status(stack).await? {
                    Some(status) => {
                        info!(stack, %status, "stack exists; updating");
                        match self.api.update_stack(stack, template_body, &params).await? {
                            UpdateResult::NoChanges => {
                                info!(stack, "no updates are to be performed");
                                Ok(DeployOutcome::NoChanges)
                            }
                            UpdateResult::Started => {
                                self.wait(stack).await?;
                                Ok(DeployOutcome::Updated { outputs: self.api.outputs(stack).await? })
                            }
                        }
                    }
                    None => {
                        if args.key_pair.is_none() {
                            return Err(DeployError::MissingArgument("--key-pair"));
                        }
                        info!(stack, region = %args.region, environment = %args.environment, "creating stack");
                        self.api.create_stack(stack, template_body, &params).await?;
                        self.wait(stack).await?;
                        Ok(DeployOutcome::Created { outputs: self.api.outputs(stack).await? })
                    }
                }
            }
        }
    }

    /// Poll until the stack leaves `*_IN_PROGRESS`. A vanished stack counts as
    /// a completed delete.
    async fn wait(&self, stack: &str) -> Result<(), DeployError> {
        let mut waited = Duration::ZERO;
        loop {
            let Some(status) = self.api.stack_status(stack).await? else {
                return Ok(());
            };
            match phase(&status) {
                Phase::Complete => {
                    info!(stack, %status, "stack operation complete");
                    return Ok(());
                }
                Phase::Failed => return Err(DeployError::StackFailed { status }),
                Phase::InProgress => {}
            }
            if waited >= self.max_wait {
                return Err(DeployError::WaitTimeout { stack: stack.to_string(), waited_secs: waited.as_secs() });
            }
            info!(stack, %status, "waiting");
            tokio::time::sleep(self.poll).await;
            waited += self.poll;
        }
    }
}
