//! Fixture directories and harness construction for E2E tests.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use converge_harness::{
    Backoff, Harness, HarnessConfig, HarnessConfigBuilder, RetryPolicy, Scenario,
    ScenarioBuilder,
};

use super::fake_tool::{FakeTool, INVALID_MARKER};

/// Path of a checked-in fixture under the workspace `fixtures/` directory.
#[allow(dead_code)]
pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(name)
}

/// Temporary configuration directory with `resources` resource blocks.
#[allow(dead_code)]
pub fn config_dir(resources: usize) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut main = String::from("variable \"converge_run_id\" {\n  type = string\n}\n");
    for i in 0..resources {
        let _ = write!(
            main,
            "\nresource \"terraform_data\" \"r{i}\" {{\n  input = var.converge_run_id\n}}\n"
        );
    }
    fs::write(dir.path().join("main.tf"), main).expect("write main.tf");
    dir
}

/// Module repository layout: `examples/basic` references
/// `../../modules/shared`. Returns the repository and the example dir.
#[allow(dead_code)]
pub fn module_repo() -> (TempDir, PathBuf) {
    let repo = tempfile::tempdir().expect("tempdir");
    let shared = repo.path().join("modules/shared");
    fs::create_dir_all(&shared).expect("create module dir");
    fs::write(
        shared.join("main.tf"),
        "variable \"name\" {\n  type = string\n}\n\nresource \"terraform_data\" \"shared\" {\n  input = var.name\n}\n",
    )
    .expect("write module");

    let example = repo.path().join("examples/basic");
    fs::create_dir_all(&example).expect("create example dir");
    fs::write(
        example.join("main.tf"),
        "variable \"converge_run_id\" {\n  type = string\n}\n\nresource \"terraform_data\" \"root\" {\n  input = var.converge_run_id\n}\n\nmodule \"shared\" {\n  source = \"../../modules/shared\"\n\n  name = var.converge_run_id\n}\n",
    )
    .expect("write example");
    (repo, example)
}

/// Temporary configuration directory that fails validation.
#[allow(dead_code)]
pub fn invalid_config_dir() -> TempDir {
    let dir = config_dir(1);
    let path = dir.path().join("broken.tf");
    fs::write(path, format!("{INVALID_MARKER}\nresourse \"terraform_data\" \"x\" {{}}\n"))
        .expect("write broken.tf");
    dir
}

/// Temporary directory without any configuration file.
#[allow(dead_code)]
pub fn empty_dir() -> TempDir {
    tempfile::tempdir().expect("tempdir")
}

/// Harness configuration with short timeouts suitable for tests.
#[allow(dead_code)]
pub fn test_config() -> HarnessConfigBuilder {
    HarnessConfigBuilder::new()
        .command_timeout(Duration::from_secs(10))
        .scenario_timeout(Duration::from_secs(30))
        .cleanup_timeout(Duration::from_secs(10))
}

#[allow(dead_code)]
pub fn harness(tool: FakeTool) -> (Arc<Harness<FakeTool>>, Arc<FakeTool>) {
    harness_with(tool, test_config().build().expect("valid test config"))
}

#[allow(dead_code)]
pub fn harness_with(tool: FakeTool, config: HarnessConfig) -> (Arc<Harness<FakeTool>>, Arc<FakeTool>) {
    let tool = Arc::new(tool);
    let harness = Harness::new(Arc::clone(&tool), config).expect("valid harness");
    (Arc::new(harness), tool)
}

/// Default retry rules with millisecond backoff.
#[allow(dead_code)]
pub fn quick_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::with_default_rules().with_backoff(Backoff {
        max_retries,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    })
}

#[allow(dead_code)]
pub fn scenario(name: &str, dir: &Path) -> Scenario {
    scenario_builder(name, dir).build().expect("valid scenario")
}

#[allow(dead_code)]
pub fn scenario_builder(name: &str, dir: &Path) -> ScenarioBuilder {
    ScenarioBuilder::new(name, dir).retry_policy(quick_retry(3))
}
