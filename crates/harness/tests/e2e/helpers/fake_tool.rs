//! Stateful fake provisioning tool for E2E tests.
//!
//! `FakeTool` implements `ToolRunner` and behaves like a minimal provisioning
//! binary: it reads the `.tf` files in the invocation's working directory,
//! counts `resource` blocks, and tracks the "provisioned" resources per
//! working directory. Apply converges the workspace to the configuration, so a
//! second apply reports no changes unless drift is enabled.
//!
//! Local module sources that leave the working directory (`source = "../.."`)
//! are resolved relative to the file that declares them; `init` fails the way
//! the real tool does when such a directory is missing.
//!
//! Faults (scripted failures or stalls) can be injected per subcommand and
//! optionally scoped to a single working directory.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use converge_harness::{HarnessError, Invocation, ToolOutput, ToolRunner};

/// Marker that makes `validate` fail when present in any `.tf` file.
pub const INVALID_MARKER: &str = "# converge:invalid";

#[derive(Debug, Default)]
struct Workspace {
    initialized: bool,
    resources: usize,
}

#[derive(Debug, Clone)]
enum FaultKind {
    Fail { exit_code: i32, stderr: String },
    Stall(Duration),
}

#[derive(Debug, Clone)]
struct Fault {
    subcommand: String,
    scope: Option<PathBuf>,
    remaining: usize,
    kind: FaultKind,
}

impl Fault {
    fn matches(&self, subcommand: &str, cwd: &Path) -> bool {
        self.remaining > 0
            && self.subcommand == subcommand
            && self.scope.as_deref().is_none_or(|scope| scope == cwd)
    }
}

/// Parsed view of a configuration directory.
struct Config {
    resources: usize,
    invalid: bool,
    missing_module: Option<String>,
    visited: HashSet<PathBuf>,
}

/// Decrements the in-flight counter even when the invocation future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A fake provisioning tool with per-directory state.
#[derive(Default)]
pub struct FakeTool {
    workspaces: tokio::sync::Mutex<HashMap<PathBuf, Workspace>>,
    faults: tokio::sync::Mutex<Vec<Fault>>,
    delays: HashMap<String, Duration>,
    drifting: bool,
    invocations: tokio::sync::Mutex<Vec<Invocation>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[allow(dead_code)]
impl FakeTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every apply after the first reports changed resources.
    pub fn drifting(mut self) -> Self {
        self.drifting = true;
        self
    }

    /// Every call to `subcommand` sleeps for `delay` before answering.
    pub fn with_delay(mut self, subcommand: &str, delay: Duration) -> Self {
        self.delays.insert(subcommand.to_owned(), delay);
        self
    }

    /// The next `times` calls to `subcommand` fail with `stderr`.
    pub fn fail_next(self, subcommand: &str, times: usize, stderr: &str) -> Self {
        self.push_fault(subcommand, None, times, FaultKind::Fail {
            exit_code: 1,
            stderr: stderr.to_owned(),
        })
    }

    /// Like [`FakeTool::fail_next`], but only for invocations in `dir`.
    pub fn fail_next_in(self, dir: &Path, subcommand: &str, times: usize, stderr: &str) -> Self {
        self.push_fault(subcommand, Some(dir.to_path_buf()), times, FaultKind::Fail {
            exit_code: 1,
            stderr: stderr.to_owned(),
        })
    }

    /// The next `times` calls to `subcommand` hang for `duration` first.
    pub fn stall_next(self, subcommand: &str, times: usize, duration: Duration) -> Self {
        self.push_fault(subcommand, None, times, FaultKind::Stall(duration))
    }

    fn push_fault(
        mut self,
        subcommand: &str,
        scope: Option<PathBuf>,
        times: usize,
        kind: FaultKind,
    ) -> Self {
        self.faults.get_mut().push(Fault {
            subcommand: subcommand.to_owned(),
            scope,
            remaining: times,
            kind,
        });
        self
    }

    pub async fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().await.clone()
    }

    /// Total number of calls to `subcommand`.
    pub async fn count(&self, subcommand: &str) -> usize {
        self.invocations
            .lock()
            .await
            .iter()
            .filter(|inv| inv.subcommand() == Some(subcommand))
            .count()
    }

    /// Number of calls to `subcommand` made in `dir`.
    pub async fn count_in(&self, dir: &Path, subcommand: &str) -> usize {
        self.invocations
            .lock()
            .await
            .iter()
            .filter(|inv| inv.cwd == dir && inv.subcommand() == Some(subcommand))
            .count()
    }

    /// Subcommands invoked in `dir`, in order.
    pub async fn subcommands_in(&self, dir: &Path) -> Vec<String> {
        self.invocations
            .lock()
            .await
            .iter()
            .filter(|inv| inv.cwd == dir)
            .filter_map(|inv| inv.subcommand().map(str::to_owned))
            .collect()
    }

    /// Resources currently provisioned for `dir`.
    pub async fn resources_in(&self, dir: &Path) -> usize {
        self.workspaces
            .lock()
            .await
            .get(dir)
            .map_or(0, |ws| ws.resources)
    }

    /// Resources currently provisioned across every workspace.
    pub async fn total_resources(&self) -> usize {
        self.workspaces
            .lock()
            .await
            .values()
            .map(|ws| ws.resources)
            .sum()
    }

    /// Highest number of invocations observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Consumes the first matching fault, if any.
    async fn take_fault(&self, subcommand: &str, cwd: &Path) -> Option<FaultKind> {
        let mut faults = self.faults.lock().await;
        let fault = faults.iter_mut().find(|f| f.matches(subcommand, cwd))?;
        fault.remaining -= 1;
        Some(fault.kind.clone())
    }

    async fn respond(&self, inv: &Invocation) -> ToolOutput {
        let subcommand = inv.subcommand().unwrap_or_default().to_owned();

        if let Some(delay) = self.delays.get(&subcommand) {
            tokio::time::sleep(*delay).await;
        }
        match self.take_fault(&subcommand, &inv.cwd).await {
            Some(FaultKind::Fail { exit_code, stderr }) => {
                return ToolOutput::failure(exit_code, stderr);
            }
            Some(FaultKind::Stall(duration)) => tokio::time::sleep(duration).await,
            None => {}
        }

        let config = read_config(&inv.cwd);
        let mut workspaces = self.workspaces.lock().await;
        let ws = workspaces.entry(inv.cwd.clone()).or_default();

        match subcommand.as_str() {
            "init" => match config {
                Some(Config {
                    missing_module: Some(source),
                    ..
                }) => ToolOutput::failure(
                    1,
                    format!(
                        "Error: Unreadable module directory\n\nUnable to evaluate directory symlink: lstat {source}: no such file or directory"
                    ),
                ),
                Some(_) => {
                    ws.initialized = true;
                    ToolOutput::success("Terraform has been successfully initialized!")
                }
                None => ToolOutput::failure(
                    1,
                    "Error: No configuration files\n\nApply requires configuration to be present.",
                ),
            },
            "validate" => match config {
                _ if !ws.initialized => {
                    ToolOutput::failure(1, "Error: Module not installed")
                }
                Some(c) if c.invalid => ToolOutput::failure(
                    1,
                    "Error: Unsupported block type\n\nBlocks of type \"resourse\" are not expected here.",
                ),
                _ => ToolOutput::success("Success! The configuration is valid."),
            },
            "apply" => {
                if !ws.initialized {
                    return ToolOutput::failure(1, "Error: Inconsistent dependency lock file");
                }
                let desired = config.map_or(0, |c| c.resources);
                let added = desired.saturating_sub(ws.resources);
                let destroyed = ws.resources.saturating_sub(desired);
                let changed = if self.drifting {
                    ws.resources.min(desired)
                } else {
                    0
                };
                ws.resources = desired;
                ToolOutput::success(apply_summary(added, changed, destroyed))
            }
            "plan" => {
                let desired = config.map_or(0, |c| c.resources);
                let added = desired.saturating_sub(ws.resources);
                let destroyed = ws.resources.saturating_sub(desired);
                if added == 0 && destroyed == 0 {
                    ToolOutput::success("No changes. Your infrastructure matches the configuration.")
                } else {
                    ToolOutput {
                        exit_code: 2,
                        stdout: format!(
                            "Plan: {added} to add, 0 to change, {destroyed} to destroy."
                        ),
                        stderr: String::new(),
                        duration: Duration::ZERO,
                    }
                }
            }
            "destroy" => {
                let count = ws.resources;
                ws.resources = 0;
                ToolOutput::success(format!("Destroy complete! Resources: {count} destroyed."))
            }
            "output" => {
                let run_id = inv
                    .env
                    .get("TF_VAR_converge_run_id")
                    .cloned()
                    .unwrap_or_default();
                let json = serde_json::json!({
                    "run_id": { "sensitive": false, "type": "string", "value": run_id },
                    "resource_count": { "sensitive": false, "type": "number", "value": ws.resources },
                });
                ToolOutput::success(json.to_string())
            }
            other => ToolOutput::failure(1, format!("Error: unknown command \"{other}\"")),
        }
    }
}

impl ToolRunner for FakeTool {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, HarnessError> {
        self.invocations.lock().await.push(invocation.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::timeout(invocation.timeout, self.respond(invocation))
            .await
            .map_err(|_| HarnessError::Timeout {
                after: invocation.timeout,
            })
    }
}

fn apply_summary(added: usize, changed: usize, destroyed: usize) -> String {
    let summary =
        format!("Apply complete! Resources: {added} added, {changed} changed, {destroyed} destroyed.");
    if added + changed + destroyed == 0 {
        format!("No changes. Your infrastructure matches the configuration.\n\n{summary}")
    } else {
        summary
    }
}

/// Reads every `.tf` file under `dir`. Returns `None` when the directory has
/// no top-level configuration file.
fn read_config(dir: &Path) -> Option<Config> {
    let has_root_config = fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .any(|e| e.path().extension().is_some_and(|ext| ext == "tf"));
    if !has_root_config {
        return None;
    }

    let mut config = Config {
        resources: 0,
        invalid: false,
        missing_module: None,
        visited: HashSet::new(),
    };
    scan(dir, &mut config);
    Some(config)
}

fn scan(dir: &Path, config: &mut Config) {
    let Ok(canonical) = dir.canonicalize() else {
        return;
    };
    if !config.visited.insert(canonical) {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if path.is_dir() {
            if entry.file_name() != ".terraform" {
                scan(&path, config);
            }
        } else if path.extension().is_some_and(|ext| ext == "tf") {
            let Ok(text) = fs::read_to_string(&path) else {
                continue;
            };
            config.resources += text
                .lines()
                .filter(|line| line.trim_start().starts_with("resource \""))
                .count();
            config.invalid |= text.contains(INVALID_MARKER);
            for source in parent_module_sources(&text) {
                let module_dir = dir.join(source);
                if module_dir.is_dir() {
                    scan(&module_dir, config);
                } else if config.missing_module.is_none() {
                    config.missing_module = Some(source.to_owned());
                }
            }
        }
    }
}

/// `source = "../..."` values declared in `text`.
fn parent_module_sources(text: &str) -> impl Iterator<Item = &str> {
    text.lines().filter_map(|line| {
        let value = line.trim_start().strip_prefix("source")?.trim_start();
        let value = value.strip_prefix('=')?.trim();
        let value = value.strip_prefix('"')?.strip_suffix('"')?;
        value.starts_with("../").then_some(value)
    })
}
