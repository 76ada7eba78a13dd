//! 라이프사이클 실행기: init → validate → apply → re-apply → destroy
//!
//! [`Harness`]는 [`ToolRunner`]를 통해 외부 도구를 실행하고, 시나리오의
//! 재시도 정책에 따라 일시적 실패를 재시도하며, 두 번째 apply가 변경 없음을
//! 보고하는지 확인합니다.
//!
//! # 정리 보장
//!
//! [`Harness::run_scenario`]는 어떤 단계에서 실패하든(패닉, 타임아웃, 취소 포함)
//! destroy를 정확히 한 번 시도합니다.
//!
//! ```text
//! prepare workdir ─→ arm CleanupGuard
//!        │
//!        ▼
//! catch_unwind(lifecycle) ⟂ scenario timeout ⟂ cancel token
//!        │
//!        ▼
//! disarm guard ─→ destroy (cleanup timeout) ─→ resume panic
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use converge_core::metrics as m;
use converge_core::types::{Phase, ResourceDelta, ScenarioState};

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::guard::CleanupGuard;
use crate::report::{CleanupStatus, ScenarioReport, Verdict};
use crate::retry::RetryDecision;
use crate::runner::{Invocation, ToolRunner};
use crate::scenario::Scenario;
use crate::summary::SummaryParser;
use crate::workdir::{Workdir, ensure_config_dir};

/// 에러 메시지에 포함할 출력 줄 수
const EXCERPT_LINES: usize = 20;

/// `output -json`의 결과 (이름 → 값)
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// 수렴 이후 출력값에 대한 사용자 검증
pub type CheckFn = Arc<dyn Fn(&Outputs) -> Result<(), String> + Send + Sync>;

/// 성공한 단계의 결과
#[derive(Debug, Clone)]
pub struct LifecycleResult {
    /// 실행한 단계
    pub phase: Phase,
    /// 시도 횟수 (재시도 포함)
    pub attempts: u32,
    /// 마지막 시도의 종료 코드
    pub exit_code: i32,
    /// 마지막 시도의 stdout
    pub stdout: String,
    /// 마지막 시도의 stderr
    pub stderr: String,
    /// 재시도 대기를 포함한 소요 시간
    pub duration: Duration,
    /// 출력에서 읽어낸 변경량
    pub delta: Option<ResourceDelta>,
}

/// `plan -detailed-exitcode` 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    /// 종료 코드 0
    NoChanges,
    /// 종료 코드 2 (요약 줄이 없으면 `None`)
    Changes(Option<ResourceDelta>),
}

struct PhaseFailure {
    attempts: u32,
    reason: String,
}

#[derive(Deserialize)]
struct OutputEntry {
    value: serde_json::Value,
}

enum Outcome {
    Passed,
    Failed(HarnessError),
    Panicked(Box<dyn Any + Send>),
}

/// 상태 이력과 현재 단계 추적
struct StateTracker {
    states: Vec<ScenarioState>,
    phase: Phase,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            states: vec![ScenarioState::Created],
            phase: Phase::Init,
        }
    }

    fn current(&self) -> ScenarioState {
        self.states
            .last()
            .copied()
            .unwrap_or(ScenarioState::Created)
    }

    fn begin(&mut self, phase: Phase) {
        self.phase = phase;
    }

    fn advance(&mut self, next: ScenarioState) {
        let current = self.current();
        if current.can_transition_to(&next) {
            self.states.push(next);
        } else {
            warn!(from = %current, to = %next, "ignoring invalid state transition");
        }
    }

    fn fail(&mut self) {
        let phase = self.phase;
        self.advance(ScenarioState::Failed { phase });
    }
}

/// 수렴 테스트 하네스
pub struct Harness<R: ToolRunner> {
    runner: Arc<R>,
    config: HarnessConfig,
    parser: SummaryParser,
}

impl<R: ToolRunner> Harness<R> {
    /// 새 하네스를 생성합니다.
    pub fn new(runner: Arc<R>, config: HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        Ok(Self {
            runner,
            config,
            parser: SummaryParser::new()?,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn runner(&self) -> &Arc<R> {
        &self.runner
    }

    /// 작업 디렉토리를 준비합니다 (플러그인/모듈 설치).
    ///
    /// 구성 디렉토리가 없거나 읽을 수 없으면 도구를 실행하지 않고 실패합니다.
    pub async fn init(&self, scenario: &Scenario) -> Result<LifecycleResult, HarnessError> {
        ensure_config_dir(scenario).await?;
        self.execute(scenario, Phase::Init, scenario.init_args(), true, exit_ok)
            .await
            .map_err(|f| HarnessError::Setup {
                scenario: scenario.name().to_owned(),
                reason: format!("init failed after {} attempt(s): {}", f.attempts, f.reason),
            })
    }

    /// 구성 문법을 검증합니다. 재시도하지 않습니다.
    pub async fn validate(&self, scenario: &Scenario) -> Result<LifecycleResult, HarnessError> {
        self.execute(scenario, Phase::Validate, scenario.validate_args(), false, exit_ok)
            .await
            .map_err(|f| HarnessError::Validation {
                scenario: scenario.name().to_owned(),
                output: f.reason,
            })
    }

    /// 구성을 적용합니다. 결과에 변경량이 포함됩니다.
    pub async fn apply(&self, scenario: &Scenario) -> Result<LifecycleResult, HarnessError> {
        let result = self
            .execute(scenario, Phase::Apply, scenario.apply_args(), true, exit_ok)
            .await
            .map_err(|f| apply_error(scenario, f))?;
        log_delta(scenario, Phase::Apply, result.delta);
        Ok(result)
    }

    /// 두 번 적용하고 두 번째 apply가 변경 없음을 보고하는지 확인합니다.
    ///
    /// 두 번째 결과를 반환합니다.
    pub async fn apply_idempotent(
        &self,
        scenario: &Scenario,
    ) -> Result<LifecycleResult, HarnessError> {
        self.apply(scenario).await?;
        self.reapply(scenario).await
    }

    /// 리소스를 정리합니다.
    pub async fn destroy(&self, scenario: &Scenario) -> Result<LifecycleResult, HarnessError> {
        let result = self
            .execute(scenario, Phase::Destroy, scenario.destroy_args(), true, exit_ok)
            .await
            .map_err(|f| HarnessError::Destroy {
                scenario: scenario.name().to_owned(),
                attempts: f.attempts,
                reason: f.reason,
            })?;
        log_delta(scenario, Phase::Destroy, result.delta);
        Ok(result)
    }

    /// `plan -detailed-exitcode`로 남은 변경이 있는지 확인합니다.
    pub async fn plan_exit_code(&self, scenario: &Scenario) -> Result<PlanStatus, HarnessError> {
        let result = self
            .execute(scenario, Phase::Plan, scenario.plan_args(), true, |code| {
                code == 0 || code == 2
            })
            .await
            .map_err(|f| apply_error(scenario, f))?;
        Ok(if result.exit_code == 0 {
            PlanStatus::NoChanges
        } else {
            PlanStatus::Changes(result.delta)
        })
    }

    /// `output -json` 결과를 이름 → 값으로 읽습니다.
    pub async fn output(&self, scenario: &Scenario) -> Result<Outputs, HarnessError> {
        let result = self
            .execute(scenario, Phase::Output, scenario.output_args(), false, exit_ok)
            .await
            .map_err(|f| apply_error(scenario, f))?;

        let raw = result.stdout.trim();
        if raw.is_empty() {
            return Ok(Outputs::new());
        }
        let entries: BTreeMap<String, OutputEntry> =
            serde_json::from_str(raw).map_err(|e| HarnessError::Apply {
                scenario: scenario.name().to_owned(),
                attempts: result.attempts,
                reason: format!("malformed output JSON: {e}"),
            })?;
        Ok(entries
            .into_iter()
            .map(|(name, entry)| (name, entry.value))
            .collect())
    }

    /// 전체 라이프사이클을 실행합니다.
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioReport {
        self.run_scenario_with(scenario, None).await
    }

    /// 전체 라이프사이클을 실행하고 수렴 이후 `check`로 출력값을 검증합니다.
    ///
    /// 라이프사이클이나 `check`에서 발생한 패닉은 destroy 이후 다시 발생합니다.
    pub async fn run_scenario_with(
        &self,
        scenario: &Scenario,
        check: Option<CheckFn>,
    ) -> ScenarioReport {
        self.run_scenario_cancellable(scenario, check, CancellationToken::new())
            .await
    }

    /// 취소 토큰을 받는 [`Harness::run_scenario_with`]
    ///
    /// 토큰이 취소되면 진행 중인 단계를 중단하고 destroy를 시도합니다.
    pub async fn run_scenario_cancellable(
        &self,
        scenario: &Scenario,
        check: Option<CheckFn>,
        cancel: CancellationToken,
    ) -> ScenarioReport {
        let (report, panic) = self.run_catching(scenario, check, cancel).await;
        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        report
    }

    /// 패닉을 다시 발생시키지 않고 보고서와 함께 돌려줍니다.
    pub(crate) async fn run_catching(
        &self,
        scenario: &Scenario,
        check: Option<CheckFn>,
        cancel: CancellationToken,
    ) -> (ScenarioReport, Option<Box<dyn Any + Send>>) {
        let started = Instant::now();
        info!(
            scenario = scenario.name(),
            run_id = scenario.run_id(),
            dir = %scenario.dir().display(),
            "scenario started"
        );

        let mut tracker = StateTracker::new();

        let (workdir, setup_error) = match Workdir::prepare(scenario).await {
            Ok(workdir) => (workdir, None),
            Err(e) => (Workdir::Shared(scenario.dir().to_path_buf()), Some(e)),
        };
        let active = scenario.relocated(workdir.path().to_path_buf());
        let guard = CleanupGuard::arm(
            Arc::clone(&self.runner),
            self.invocation(&active, active.destroy_args()),
            self.config.cleanup_timeout,
            workdir,
            scenario.name(),
            scenario.run_id(),
        );

        let outcome = match setup_error {
            Some(e) => Outcome::Failed(e),
            None => {
                let lifecycle =
                    AssertUnwindSafe(self.lifecycle(&active, check.as_ref(), &mut tracker))
                        .catch_unwind();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Outcome::Failed(HarnessError::Cancelled),
                    res = tokio::time::timeout(self.config.scenario_timeout, lifecycle) => match res {
                        Ok(Ok(Ok(()))) => Outcome::Passed,
                        Ok(Ok(Err(e))) => Outcome::Failed(e),
                        Ok(Err(payload)) => Outcome::Panicked(payload),
                        Err(_elapsed) => Outcome::Failed(HarnessError::Timeout {
                            after: self.config.scenario_timeout,
                        }),
                    },
                }
            }
        };

        let phase = tracker.phase;
        let (verdict, panic) = match outcome {
            Outcome::Passed => (Verdict::Passed, None),
            Outcome::Failed(e) => {
                error!(
                    scenario = scenario.name(),
                    run_id = scenario.run_id(),
                    phase = %phase,
                    error = %e,
                    "scenario failed"
                );
                (
                    Verdict::Failed {
                        phase,
                        error: e.to_string(),
                    },
                    None,
                )
            }
            Outcome::Panicked(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    scenario = scenario.name(),
                    run_id = scenario.run_id(),
                    phase = %phase,
                    panic = %message,
                    "scenario panicked"
                );
                (
                    Verdict::Failed {
                        phase,
                        error: format!("panicked: {message}"),
                    },
                    Some(payload),
                )
            }
        };
        if !verdict.is_passed() {
            tracker.fail();
        }

        let workdir = guard.disarm();
        let cleanup = self.cleanup(&active).await;
        if cleanup == CleanupStatus::Destroyed {
            tracker.advance(ScenarioState::Destroyed);
        }
        // 정리에 실패하면 상태 파일이 남은 격리 디렉토리를 지우지 않음
        let retained_workdir = match workdir {
            Some(workdir) if cleanup.is_failure() => workdir.retain(),
            _ => None,
        };
        if let Some(dir) = &retained_workdir {
            error!(
                scenario = scenario.name(),
                run_id = scenario.run_id(),
                workdir = %dir.display(),
                "cleanup failed, isolated workdir retained for manual destroy"
            );
        }

        metrics::counter!(m::SCENARIOS_TOTAL, m::LABEL_RESULT => verdict.as_label()).increment(1);
        info!(
            scenario = scenario.name(),
            run_id = scenario.run_id(),
            result = verdict.as_label(),
            elapsed_ms = elapsed_ms(started),
            "scenario finished"
        );

        let report = ScenarioReport {
            scenario: scenario.name().to_owned(),
            run_id: scenario.run_id().to_owned(),
            states: tracker.states,
            verdict,
            cleanup,
            duration_ms: elapsed_ms(started),
            retained_workdir,
        };
        (report, panic)
    }

    async fn lifecycle(
        &self,
        scenario: &Scenario,
        check: Option<&CheckFn>,
        tracker: &mut StateTracker,
    ) -> Result<(), HarnessError> {
        tracker.begin(Phase::Init);
        self.init(scenario).await?;
        tracker.advance(ScenarioState::Initialized);

        tracker.begin(Phase::Validate);
        self.validate(scenario).await?;
        tracker.advance(ScenarioState::Validated);

        tracker.begin(Phase::Apply);
        self.apply(scenario).await?;
        tracker.advance(ScenarioState::Applied);

        tracker.begin(Phase::Reconcile);
        self.reapply(scenario).await?;
        tracker.advance(ScenarioState::Reconciled);

        if let Some(check) = check {
            tracker.begin(Phase::Check);
            let outputs = self.output(scenario).await?;
            check(&outputs).map_err(|reason| HarnessError::Check {
                scenario: scenario.name().to_owned(),
                reason,
            })?;
        }
        Ok(())
    }

    /// 두 번째 apply: 변경량이 0임을 확인할 수 없으면 실패
    async fn reapply(&self, scenario: &Scenario) -> Result<LifecycleResult, HarnessError> {
        let result = self
            .execute(scenario, Phase::Reconcile, scenario.apply_args(), true, exit_ok)
            .await
            .map_err(|f| apply_error(scenario, f))?;

        match result.delta {
            Some(delta) if delta.is_empty() => {
                info!(
                    scenario = scenario.name(),
                    run_id = scenario.run_id(),
                    "second apply reported no changes"
                );
                Ok(result)
            }
            delta => Err(HarnessError::Idempotence {
                scenario: scenario.name().to_owned(),
                delta,
            }),
        }
    }

    async fn cleanup(&self, scenario: &Scenario) -> CleanupStatus {
        match tokio::time::timeout(self.config.cleanup_timeout, self.destroy(scenario)).await {
            Ok(Ok(_)) => CleanupStatus::Destroyed,
            Ok(Err(e)) => {
                error!(
                    scenario = scenario.name(),
                    run_id = scenario.run_id(),
                    error = %e,
                    "cleanup failed, resources may be left behind"
                );
                metrics::counter!(m::CLEANUP_FAILURES_TOTAL, m::LABEL_SCENARIO => scenario.name().to_owned())
                    .increment(1);
                CleanupStatus::Failed {
                    error: e.to_string(),
                }
            }
            Err(_elapsed) => {
                error!(
                    scenario = scenario.name(),
                    run_id = scenario.run_id(),
                    timeout_secs = self.config.cleanup_timeout.as_secs(),
                    "cleanup timed out, resources may be left behind"
                );
                metrics::counter!(m::CLEANUP_FAILURES_TOTAL, m::LABEL_SCENARIO => scenario.name().to_owned())
                    .increment(1);
                CleanupStatus::TimedOut
            }
        }
    }

    fn invocation(&self, scenario: &Scenario, args: Vec<String>) -> Invocation {
        let mut env = BTreeMap::new();
        env.insert("TF_IN_AUTOMATION".to_owned(), "1".to_owned());
        env.extend(
            scenario
                .env()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        env.insert(
            format!("TF_VAR_{}", self.config.namespace_var),
            scenario.run_id().to_owned(),
        );
        Invocation {
            program: self.config.binary.clone(),
            args,
            cwd: scenario.dir().to_path_buf(),
            env,
            timeout: self.config.command_timeout,
        }
    }

    /// 재시도 로직을 포함한 단일 단계 실행
    ///
    /// `accept`가 참인 종료 코드를 성공으로 봅니다. `retry`가 거짓이면 한 번만 시도합니다.
    async fn execute(
        &self,
        scenario: &Scenario,
        phase: Phase,
        args: Vec<String>,
        retry: bool,
        accept: fn(i32) -> bool,
    ) -> Result<LifecycleResult, PhaseFailure> {
        let invocation = self.invocation(scenario, args);
        let policy = scenario.retry_policy();
        let started = Instant::now();
        let mut attempt: u32 = 0;

        let result = loop {
            attempt += 1;
            metrics::counter!(m::PHASE_ATTEMPTS_TOTAL, m::LABEL_PHASE => phase.as_str())
                .increment(1);
            debug!(
                scenario = scenario.name(),
                run_id = scenario.run_id(),
                phase = %phase,
                attempt,
                "running tool"
            );

            let (text, reason) = match self.runner.run(&invocation).await {
                Ok(output) if accept(output.exit_code) => {
                    debug!(
                        scenario = scenario.name(),
                        phase = %phase,
                        attempt,
                        exit_code = output.exit_code,
                        "tool finished"
                    );
                    break Ok(LifecycleResult {
                        phase,
                        attempts: attempt,
                        exit_code: output.exit_code,
                        delta: self.parser.parse(&output.stdout),
                        stdout: output.stdout,
                        stderr: output.stderr,
                        duration: started.elapsed(),
                    });
                }
                Ok(output) => {
                    let text = output.combined();
                    let reason = format!("exit code {}: {}", output.exit_code, excerpt(&text));
                    (text, reason)
                }
                Err(e) => {
                    let text = e.to_string();
                    (text.clone(), text)
                }
            };

            let decision = if retry {
                policy.decide(attempt, &text)
            } else {
                RetryDecision::GiveUp
            };

            match decision {
                RetryDecision::Retry { delay, reason: why } => {
                    warn!(
                        scenario = scenario.name(),
                        run_id = scenario.run_id(),
                        phase = %phase,
                        attempt,
                        backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        reason = %why,
                        "retrying after retryable error"
                    );
                    metrics::counter!(m::PHASE_RETRIES_TOTAL, m::LABEL_PHASE => phase.as_str())
                        .increment(1);
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    warn!(
                        scenario = scenario.name(),
                        run_id = scenario.run_id(),
                        phase = %phase,
                        attempts = attempt,
                        "phase failed"
                    );
                    break Err(PhaseFailure {
                        attempts: attempt,
                        reason,
                    });
                }
            }
        };

        metrics::histogram!(m::PHASE_DURATION_SECONDS, m::LABEL_PHASE => phase.as_str())
            .record(started.elapsed().as_secs_f64());
        result
    }
}

fn exit_ok(code: i32) -> bool {
    code == 0
}

fn apply_error(scenario: &Scenario, failure: PhaseFailure) -> HarnessError {
    HarnessError::Apply {
        scenario: scenario.name().to_owned(),
        attempts: failure.attempts,
        reason: failure.reason,
    }
}

fn log_delta(scenario: &Scenario, phase: Phase, delta: Option<ResourceDelta>) {
    match delta {
        Some(delta) => info!(
            scenario = scenario.name(),
            run_id = scenario.run_id(),
            phase = %phase,
            added = delta.added,
            changed = delta.changed,
            destroyed = delta.destroyed,
            "phase completed"
        ),
        None => info!(
            scenario = scenario.name(),
            run_id = scenario.run_id(),
            phase = %phase,
            "phase completed without change summary"
        ),
    }
}

/// 출력의 마지막 몇 줄
fn excerpt(text: &str) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(EXCERPT_LINES);
    lines[start..].join("\n")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
