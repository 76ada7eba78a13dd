//! Idempotence: the second apply of a converged configuration changes nothing.

use converge_core::types::{Phase, ResourceDelta, ScenarioState};
use converge_harness::{HarnessError, PlanStatus};

use crate::helpers::assertions::*;
use crate::helpers::fake_tool::FakeTool;
use crate::helpers::fixtures::*;

#[tokio::test]
async fn test_e2e_converged_config_has_zero_second_delta() {
    let (harness, _tool) = harness(FakeTool::new());
    let dir = config_dir(4);
    let s = scenario("converged", dir.path());

    harness.init(&s).await.expect("init");
    let result = harness.apply_idempotent(&s).await.expect("idempotent");

    assert_eq!(result.phase, Phase::Reconcile);
    assert_eq!(result.delta, Some(ResourceDelta::ZERO));
    harness.destroy(&s).await.expect("destroy");
}

/// A drifting provider reports changes on every apply.
#[tokio::test]
async fn test_e2e_drift_is_an_idempotence_error() {
    let (harness, _tool) = harness(FakeTool::new().drifting());
    let dir = config_dir(2);
    let s = scenario("drift", dir.path());

    harness.init(&s).await.expect("init");
    match harness.apply_idempotent(&s).await {
        Err(HarnessError::Idempotence { scenario, delta }) => {
            assert_eq!(scenario, "drift");
            assert_eq!(delta, Some(ResourceDelta::new(0, 2, 0)));
        }
        other => panic!("expected idempotence error, got {other:?}"),
    }
}

/// The idempotence failure is terminal: no retry, reported at Reconcile.
#[tokio::test]
async fn test_e2e_drift_fails_scenario_at_reconcile() {
    let (harness, tool) = harness(FakeTool::new().drifting());
    let dir = config_dir(1);

    let report = harness.run_scenario(&scenario("drift", dir.path())).await;

    let error = assert_failed_at(&report, Phase::Reconcile);
    assert!(error.contains("not idempotent"), "unexpected error: {error}");
    assert!(error.contains("1 changed"), "delta should be reported: {error}");
    assert_eq!(tool.count_in(dir.path(), "apply").await, 2);
    assert_eq!(
        report.states,
        [
            ScenarioState::Created,
            ScenarioState::Initialized,
            ScenarioState::Validated,
            ScenarioState::Applied,
            ScenarioState::Failed {
                phase: Phase::Reconcile
            },
            ScenarioState::Destroyed,
        ]
    );
    assert_eq!(tool.resources_in(dir.path()).await, 0);
}

/// `plan -detailed-exitcode` reports pending changes before apply and none after.
#[tokio::test]
async fn test_e2e_plan_exit_code_tracks_convergence() {
    let (harness, _tool) = harness(FakeTool::new());
    let dir = config_dir(3);
    let s = scenario("plan", dir.path());

    harness.init(&s).await.expect("init");
    assert_eq!(
        harness.plan_exit_code(&s).await.expect("plan"),
        PlanStatus::Changes(Some(ResourceDelta::new(3, 0, 0)))
    );

    harness.apply(&s).await.expect("apply");
    assert_eq!(
        harness.plan_exit_code(&s).await.expect("plan"),
        PlanStatus::NoChanges
    );
    harness.destroy(&s).await.expect("destroy");
}
