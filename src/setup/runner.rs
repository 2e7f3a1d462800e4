//! External command execution.
//!
//! Stages build [`Cmd`] values and hand them to a [`CommandRunner`]. The
//! system runner spawns real processes; tests script exit statuses instead.

use std::fmt;
use std::process::Command;

use tracing::debug;

use super::SetupError;

/// One external command. `privileged` commands are prefixed with `sudo` when
/// the runner is not already root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    pub privileged: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            privileged: false,
        }
    }

    /// Same as [`Cmd::new`] but run as root.
    pub fn root(program: impl Into<String>, args: &[&str]) -> Self {
        Self { privileged: true, ..Self::new(program, args) }
    }

    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    pub fn args<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(items.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    /// Exit code; `-1` when killed by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

pub trait CommandRunner {
    /// Run `cmd` to completion. `Err` only when it could not be started.
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput, SetupError>;

    /// Run `cmd` and turn a non-zero exit into [`SetupError::CommandFailed`].
    fn run_checked(&self, cmd: &Cmd) -> Result<CmdOutput, SetupError> {
        let out = self.run(cmd)?;
        if out.success() {
            Ok(out)
        } else {
            Err(SetupError::CommandFailed {
                command: cmd.to_string(),
                status: out.status,
                stderr: out.stderr.trim().to_string(),
            })
        }
    }

    /// `true` when `cmd` started and exited 0.
    fn succeeds(&self, cmd: &Cmd) -> bool {
        self.run(cmd).map(|o| o.success()).unwrap_or(false)
    }
}

/// Spawns real processes via `std::process`.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    sudo: bool,
}

impl SystemRunner {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }

    /// Use `sudo` for privileged commands unless `id -u` reports root.
    pub fn detect() -> Self {
        let is_root = Command::new("id")
            .arg("-u")
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "0")
            .unwrap_or(false);
        Self::new(!is_root)
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &Cmd) -> Result<CmdOutput, SetupError> {
        let mut command = if cmd.privileged && self.sudo {
            let mut c = Command::new("sudo");
            c.arg(&cmd.program);
            c
        } else {
            Command::new(&cmd.program)
        };
        command.args(&cmd.args);
        debug!(command = %cmd, sudo = cmd.privileged && self.sudo, "running");

        let out = command.output().map_err(|e| SetupError::Spawn { command: cmd.to_string(), source: e })?;
        let result = CmdOutput {
            status: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        };
        debug!(command = %cmd, status = result.status, "finished");
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;

    /// Replays exit statuses keyed by command prefix and records every call.
    #[derive(Default)]
    pub struct ScriptedRunner {
        rules: RefCell<Vec<(String, VecDeque<i32>)>>,
        outputs: Vec<(String, String)>,
        pub calls: RefCell<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Commands starting with `prefix` exit with the given statuses in
        /// turn; the last one repeats. Unmatched commands exit 0.
        pub fn on(self, prefix: &str, statuses: &[i32]) -> Self {
            self.rules.borrow_mut().push((prefix.to_string(), statuses.iter().copied().collect()));
            self
        }

        /// Commands starting with `prefix` print `text` on stdout.
        pub fn stdout(mut self, prefix: &str, text: &str) -> Self {
            self.outputs.push((prefix.to_string(), text.to_string()));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, cmd: &Cmd) -> Result<CmdOutput, SetupError> {
            let line = cmd.to_string();
            self.calls.borrow_mut().push(line.clone());
            let mut rules = self.rules.borrow_mut();
            let status = rules
                .iter_mut()
                .find(|(p, _)| line.starts_with(p.as_str()))
                .map(|(_, q)| if q.len() > 1 { q.pop_front().unwrap_or(0) } else { q.front().copied().unwrap_or(0) })
                .unwrap_or(0);
            let stdout = self
                .outputs
                .iter()
                .find(|(p, _)| line.starts_with(p.as_str()))
                .map(|(_, t)| t.clone())
                .unwrap_or_default();
            Ok(CmdOutput {
                status,
                stdout,
                stderr: if status == 0 { String::new() } else { format!("{line}: failed") },
            })
        }
    }
}
