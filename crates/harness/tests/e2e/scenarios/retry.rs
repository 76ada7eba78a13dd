//! Retry behavior: matching errors are retried up to the budget, anything
//! else fails after exactly one attempt.

use std::time::Duration;

use converge_core::config::{RetryRuleConfig, ScenarioConfig};
use converge_core::types::Phase;
use converge_harness::{HarnessError, RetryPolicy, RetryRule};

use crate::helpers::assertions::*;
use crate::helpers::fake_tool::FakeTool;
use crate::helpers::fixtures::*;

const TRANSIENT: &str = "Error: Failed to query available provider packages\n\
                         Could not retrieve the list of available versions";

/// A transient init failure is retried and the scenario still converges.
#[tokio::test]
async fn test_e2e_transient_init_failure_is_retried() {
    let (harness, tool) = harness(FakeTool::new().fail_next("init", 2, TRANSIENT));
    let dir = config_dir(2);

    let report = harness.run_scenario(&scenario("flaky", dir.path())).await;

    assert_converged(&report);
    assert_eq!(tool.count_in(dir.path(), "init").await, 3);
}

/// With N retries a persistently matching error is attempted N+1 times.
#[tokio::test]
async fn test_e2e_retry_budget_caps_attempts() {
    let (harness, tool) = harness(FakeTool::new().fail_next(
        "apply",
        100,
        "Error: Provider produced inconsistent result after apply",
    ));
    let dir = config_dir(1);
    let s = scenario_builder("exhausted", dir.path())
        .retry_policy(quick_retry(2))
        .build()
        .expect("scenario");

    let report = harness.run_scenario(&s).await;

    let error = assert_failed_at(&report, Phase::Apply);
    assert!(error.contains("3 attempt(s)"), "unexpected error: {error}");
    assert_eq!(tool.count_in(dir.path(), "apply").await, 3);
    assert_eq!(tool.count_in(dir.path(), "destroy").await, 1);
}

/// A non-matching error gets exactly one attempt.
#[tokio::test]
async fn test_e2e_non_retryable_error_is_not_retried() {
    let (harness, tool) = harness(FakeTool::new().fail_next(
        "apply",
        1,
        "Error: Invalid reference\n\nA reference to a resource type must be followed by a name.",
    ));
    let dir = config_dir(1);

    let report = harness.run_scenario(&scenario("broken", dir.path())).await;

    assert_failed_at(&report, Phase::Apply);
    assert_eq!(tool.count_in(dir.path(), "apply").await, 1);
}

/// Validate is never retried, even for a retryable-looking error.
#[tokio::test]
async fn test_e2e_validate_is_never_retried() {
    let (harness, tool) = harness(FakeTool::new().fail_next("validate", 1, TRANSIENT));
    let dir = config_dir(1);

    let report = harness.run_scenario(&scenario("validate", dir.path())).await;

    assert_failed_at(&report, Phase::Validate);
    assert_eq!(tool.count_in(dir.path(), "validate").await, 1);
}

/// Destroy failures are retried like apply failures.
#[tokio::test]
async fn test_e2e_transient_destroy_failure_is_retried() {
    let (harness, tool) = harness(FakeTool::new().fail_next("destroy", 1, TRANSIENT));
    let dir = config_dir(1);

    let report = harness.run_scenario(&scenario("destroy", dir.path())).await;

    assert_converged(&report);
    assert_eq!(tool.count_in(dir.path(), "destroy").await, 2);
    assert_eq!(tool.resources_in(dir.path()).await, 0);
}

/// An empty policy disables retries entirely.
#[tokio::test]
async fn test_e2e_retry_policy_none_fails_immediately() {
    let (harness, tool) = harness(FakeTool::new().fail_next("init", 1, TRANSIENT));
    let dir = config_dir(1);
    let s = scenario_builder("none", dir.path())
        .retry_policy(RetryPolicy::none())
        .build()
        .expect("scenario");

    let report = harness.run_scenario(&s).await;

    assert_failed_at(&report, Phase::Init);
    assert_eq!(tool.count_in(dir.path(), "init").await, 1);
}

/// Scenario retry rules from the suite file extend the suite policy.
#[tokio::test]
async fn test_e2e_scenario_rules_extend_suite_policy() {
    let (harness, tool) = harness(FakeTool::new().fail_next(
        "apply",
        1,
        "Error: creating bucket: OperationAborted: A conflicting conditional operation is in progress",
    ));
    let dir = config_dir(1);

    let mut config = ScenarioConfig::new("storage", dir.path());
    config.retry_rules.push(RetryRuleConfig {
        pattern: "OperationAborted".to_owned(),
        reason: "bucket operations are eventually consistent".to_owned(),
        max_retries: Some(1),
        base_delay_ms: Some(1),
    });
    let s = harness
        .config()
        .scenario_from_config(&config)
        .expect("scenario from config");

    let report = harness.run_scenario(&s).await;

    assert_converged(&report);
    assert_eq!(tool.count_in(dir.path(), "apply").await, 3);
}

/// A tool invocation timeout is a failed attempt whose text only matches a
/// rule that mentions it.
#[tokio::test]
async fn test_e2e_invocation_timeout_retried_only_with_matching_rule() {
    let config = || {
        test_config()
            .command_timeout(Duration::from_millis(200))
            .build()
            .expect("config")
    };
    let dir = config_dir(1);

    // default rules: timeout is not retryable
    let (h, tool) =
        harness_with(FakeTool::new().stall_next("apply", 1, Duration::from_secs(5)), config());
    let s = scenario("slow", dir.path());
    match h.apply(&s).await {
        Err(HarnessError::Apply { attempts, reason, .. }) => {
            assert_eq!(attempts, 1);
            assert!(reason.contains("timed out after"));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(tool.count("apply").await, 1);

    // explicit rule: retried and succeeds on the second attempt
    let (h, tool) =
        harness_with(FakeTool::new().stall_next("apply", 1, Duration::from_secs(5)), config());
    let rule = RetryRule::new("timed out after", "slow provider").expect("rule");
    let s = scenario_builder("slow", dir.path())
        .retry_policy(quick_retry(1).extend([rule]))
        .build()
        .expect("scenario");
    h.init(&s).await.expect("init");
    let result = h.apply(&s).await.expect("apply after retry");
    assert_eq!(result.attempts, 2);
    assert_eq!(tool.count("apply").await, 2);
}
