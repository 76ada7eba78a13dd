//! External tool abstraction for testability.
//!
//! The [`ToolRunner`] trait abstracts subprocess execution of the
//! provisioning tool. Production code uses [`ProcessRunner`] while unit tests
//! use `MockToolRunner` and the e2e suite uses a stateful fake.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │     Harness      │
//! └────────┬─────────┘
//!          │ Invocation
//!          ▼
//!   ┌─────────────┐
//!   │ ToolRunner  │ (trait)
//!   └─────────────┘
//!        │     │
//!        ▼     ▼
//!   ┌───────┐ ┌──────┐
//!   │Process│ │ Mock │
//!   └───┬───┘ └──────┘
//!       │
//!       ▼
//!   terraform / tofu
//! ```
//!
//! A non-zero exit code is *not* a runner error. The runner reports what the
//! process did and the harness decides what it means for the phase.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use crate::error::HarnessError;

/// A single tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable name or path
    pub program: String,
    /// Arguments, subcommand first
    pub args: Vec<String>,
    /// Working directory
    pub cwd: PathBuf,
    /// Extra environment variables layered on top of the inherited env
    pub env: BTreeMap<String, String>,
    /// Upper bound for a single invocation
    pub timeout: Duration,
}

impl Invocation {
    /// The subcommand (`init`, `apply`, ...), if any.
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Whether `flag` appears verbatim in the argument list.
    pub fn has_arg(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code (`-1` when the process was terminated by a signal)
    pub exit_code: i32,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Wall-clock time of the invocation
    pub duration: Duration,
}

impl ToolOutput {
    /// Successful output with the given stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration: Duration::ZERO,
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, as matched by retry rules.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Trait abstracting provisioning tool execution.
///
/// The trait is `Send + Sync + 'static`, so one runner can be shared by every
/// scenario task in a suite.
///
/// # Implementations
///
/// - [`ProcessRunner`]: spawns the real binary with `tokio::process`
/// - `MockToolRunner`: scripted responses (available in tests only)
///
/// # Errors
///
/// - `HarnessError::Tool`: the process could not be spawned or awaited
/// - `HarnessError::Timeout`: the invocation exceeded `Invocation::timeout`
pub trait ToolRunner: Send + Sync + 'static {
    /// Runs one invocation to completion and captures its output.
    fn run(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<ToolOutput, HarnessError>> + Send;
}

/// Production runner backed by `tokio::process::Command`.
///
/// The child is killed when the future is dropped, so timeouts and
/// cancellation never leave a stray process behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, HarnessError> {
        let started = Instant::now();

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            HarnessError::Tool(format!(
                "failed to spawn '{}' in {}: {e}",
                invocation.program,
                invocation.cwd.display()
            ))
        })?;

        let output = match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(HarnessError::Tool(format!(
                    "failed to wait for '{}': {e}",
                    invocation.program
                )));
            }
            Err(_elapsed) => {
                return Err(HarnessError::Timeout {
                    after: invocation.timeout,
                });
            }
        };

        Ok(ToolOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        })
    }
}

/// Mock runner for unit tests.
///
/// Responses are scripted per subcommand and consumed in order. Once a
/// subcommand's script is exhausted it answers with a successful empty output.
#[cfg(test)]
#[derive(Default)]
pub struct MockToolRunner {
    scripts: tokio::sync::Mutex<
        std::collections::HashMap<String, std::collections::VecDeque<Result<ToolOutput, HarnessError>>>,
    >,
    invocations: tokio::sync::Mutex<Vec<Invocation>>,
}

#[cfg(test)]
impl MockToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the given subcommand.
    pub fn with_response(self, subcommand: &str, response: Result<ToolOutput, HarnessError>) -> Self {
        self.scripts
            .try_lock()
            .expect("mock is not shared yet")
            .entry(subcommand.to_owned())
            .or_default()
            .push_back(response);
        self
    }

    /// Queues a successful response with the given stdout.
    pub fn with_output(self, subcommand: &str, stdout: &str) -> Self {
        self.with_response(subcommand, Ok(ToolOutput::success(stdout)))
    }

    /// Queues a failed response with the given exit code and stderr.
    pub fn with_failure(self, subcommand: &str, exit_code: i32, stderr: &str) -> Self {
        self.with_response(subcommand, Ok(ToolOutput::failure(exit_code, stderr)))
    }

    pub async fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().await.clone()
    }

    /// Subcommands in invocation order.
    pub async fn subcommands(&self) -> Vec<String> {
        self.invocations
            .lock()
            .await
            .iter()
            .filter_map(|inv| inv.subcommand().map(str::to_owned))
            .collect()
    }

    pub async fn count(&self, subcommand: &str) -> usize {
        self.invocations
            .lock()
            .await
            .iter()
            .filter(|inv| inv.subcommand() == Some(subcommand))
            .count()
    }
}

#[cfg(test)]
impl ToolRunner for MockToolRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, HarnessError> {
        self.invocations.lock().await.push(invocation.clone());
        let subcommand = invocation.subcommand().unwrap_or_default().to_owned();
        self.scripts
            .lock()
            .await
            .get_mut(&subcommand)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Ok(ToolOutput::success("")))
    }
}
