//! Full lifecycle against the checked-in fixtures.
//!
//! init -> validate -> apply -> re-apply -> destroy, verified through the
//! report's state history and the fake tool's invocation log.

use std::sync::Arc;

use converge_core::types::{Phase, ResourceDelta, ScenarioState};
use converge_harness::{CheckFn, CleanupStatus, Outputs};

use crate::helpers::assertions::*;
use crate::helpers::fake_tool::FakeTool;
use crate::helpers::fixtures::*;

/// fixtures/default converges and is destroyed.
#[tokio::test]
async fn test_e2e_default_fixture_converges() {
    let (harness, tool) = harness(FakeTool::new());
    let dir = fixture("default");

    let report = harness.run_scenario(&scenario("default", &dir)).await;

    assert_converged(&report);
    assert_eq!(report.cleanup, CleanupStatus::Destroyed);
    assert_eq!(
        tool.subcommands_in(&dir).await,
        ["init", "validate", "apply", "apply", "destroy"]
    );
    assert_eq!(tool.resources_in(&dir).await, 0, "destroy should remove everything");
}

/// Second apply on a converged fixture reports a zero delta.
#[tokio::test]
async fn test_e2e_default_fixture_second_apply_is_zero() {
    let (harness, tool) = harness(FakeTool::new());
    let s = scenario("default", &fixture("default"));

    harness.init(&s).await.expect("init");
    let first = harness.apply(&s).await.expect("first apply");
    let second = harness.apply_idempotent(&s).await;
    let second = second.expect("should stay converged");

    assert_eq!(first.delta, Some(ResourceDelta::new(1, 0, 0)));
    assert_eq!(second.delta, Some(ResourceDelta::ZERO));
    harness.destroy(&s).await.expect("destroy");
    assert_eq!(tool.total_resources().await, 0);
}

/// Nested modules are part of the applied configuration.
#[tokio::test]
async fn test_e2e_include_fixture_applies_module_resources() {
    let (harness, tool) = harness(FakeTool::new());
    let dir = fixture("include");
    let s = scenario("include", &dir);

    harness.init(&s).await.expect("init");
    let applied = harness.apply(&s).await.expect("apply");
    assert_eq!(applied.delta, Some(ResourceDelta::new(3, 0, 0)));

    let destroyed = harness.destroy(&s).await.expect("destroy");
    assert_eq!(destroyed.delta, Some(ResourceDelta::new(0, 0, 3)));
    assert_eq!(tool.resources_in(&dir).await, 0);
}

/// Scenario vars are passed as -var flags and the run id is exported.
#[tokio::test]
async fn test_e2e_storage_fixture_passes_vars_in_isolated_workdir() {
    let (harness, tool) = harness(FakeTool::new());
    let dir = fixture("storage");
    let s = scenario_builder("storage", &dir)
        .copy_root(fixture(""))
        .isolate_workdir(true)
        .var("bucket_prefix", "converge")
        .build()
        .expect("scenario");

    let report = harness.run_scenario(&s).await;
    assert_converged(&report);

    let invocations = tool.invocations().await;
    assert_eq!(invocations.len(), 5);
    for inv in &invocations {
        assert_ne!(inv.cwd, dir, "isolated scenarios must not run in the fixture dir");
        assert_eq!(
            inv.env.get("TF_VAR_converge_run_id").map(String::as_str),
            Some(s.run_id())
        );
    }
    let apply = invocations
        .iter()
        .find(|inv| inv.subcommand() == Some("apply"))
        .expect("apply invocation");
    assert!(apply.has_arg("-var"));
    assert!(apply.has_arg("bucket_prefix=converge"));
    assert!(apply.has_arg("-auto-approve"));
    assert!(apply.has_arg("-input=false"));
}

/// An isolated example dir still resolves modules referenced via `../../`.
#[tokio::test]
async fn test_e2e_isolated_example_resolves_parent_relative_module() {
    let (harness, tool) = harness(FakeTool::new());
    let (repo, example) = module_repo();
    let s = scenario_builder("basic", &example)
        .copy_root(repo.path())
        .isolate_workdir(true)
        .build()
        .expect("scenario");

    // example and shared module resources are both applied
    let check: CheckFn = Arc::new(|outputs: &Outputs| {
        match outputs.get("resource_count").and_then(|v| v.as_u64()) {
            Some(2) => Ok(()),
            other => Err(format!("expected 2 resources, got {other:?}")),
        }
    });
    let report = harness.run_scenario_with(&s, Some(check)).await;
    assert_converged(&report);

    let invocations = tool.invocations().await;
    let cwd = &invocations[0].cwd;
    assert!(
        cwd.ends_with("examples/basic"),
        "runs in the matching subpath: {}",
        cwd.display()
    );
    assert_ne!(cwd, &example);
    assert_eq!(tool.resources_in(cwd).await, 0);
}

/// Copying only the example dir would leave the `../../` module dangling.
#[tokio::test]
async fn test_e2e_isolated_example_without_repo_root_fails_init() {
    let (harness, tool) = harness(FakeTool::new());
    let (_repo, example) = module_repo();
    let s = scenario_builder("basic", &example)
        .copy_root(&example)
        .isolate_workdir(true)
        .build()
        .expect("scenario");

    let report = harness.run_scenario(&s).await;

    let error = assert_failed_at(&report, Phase::Init);
    assert!(error.contains("Unreadable module directory"), "{error}");
    assert_eq!(report.cleanup, CleanupStatus::Destroyed);
    assert_eq!(tool.count("destroy").await, 1);
}

/// A check closure sees the outputs of the converged scenario.
#[tokio::test]
async fn test_e2e_check_reads_outputs() {
    let (harness, _tool) = harness(FakeTool::new());
    let s = scenario("default", &fixture("default"));
    let expected = s.run_id().to_owned();

    let check: CheckFn = Arc::new(move |outputs: &Outputs| {
        match outputs.get("run_id").and_then(|v| v.as_str()) {
            Some(id) if id == expected => Ok(()),
            other => Err(format!("run_id output mismatch: {other:?}")),
        }
    });
    let report = harness.run_scenario_with(&s, Some(check)).await;

    assert_converged(&report);
}

/// A missing configuration directory fails at init without calling the tool,
/// but destroy is still attempted.
#[tokio::test]
async fn test_e2e_missing_dir_fails_at_init() {
    let (harness, tool) = harness(FakeTool::new());
    let missing = std::env::temp_dir().join("converge-e2e-does-not-exist");

    let report = harness.run_scenario(&scenario("missing", &missing)).await;

    let error = assert_failed_at(&report, Phase::Init);
    assert!(error.contains("not accessible"), "unexpected error: {error}");
    assert_eq!(tool.subcommands_in(&missing).await, ["destroy"]);
}

/// A directory without configuration files fails at init.
#[tokio::test]
async fn test_e2e_empty_dir_fails_at_init() {
    let (harness, tool) = harness(FakeTool::new());
    let dir = empty_dir();

    let report = harness.run_scenario(&scenario("empty", dir.path())).await;

    let error = assert_failed_at(&report, Phase::Init);
    assert!(error.contains("No configuration files"));
    assert_eq!(tool.count_in(dir.path(), "init").await, 1);
    assert_eq!(tool.count_in(dir.path(), "destroy").await, 1);
}

/// An invalid configuration fails at validate and never applies.
#[tokio::test]
async fn test_e2e_invalid_config_fails_at_validate() {
    let (harness, tool) = harness(FakeTool::new());
    let dir = invalid_config_dir();

    let report = harness.run_scenario(&scenario("invalid", dir.path())).await;

    let error = assert_failed_at(&report, Phase::Validate);
    assert!(error.contains("Unsupported block type"));
    assert_eq!(
        report.states,
        [
            ScenarioState::Created,
            ScenarioState::Initialized,
            ScenarioState::Failed {
                phase: Phase::Validate
            },
            ScenarioState::Destroyed,
        ]
    );
    assert_eq!(tool.count_in(dir.path(), "apply").await, 0);
}
