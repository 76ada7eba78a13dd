//! 스위트 실행기: 여러 시나리오를 병렬로 실행
//!
//! 시나리오마다 독립된 tokio 태스크(`JoinSet`)를 띄우고 `Semaphore`로 동시 실행 수를
//! 제한합니다. 태스크 간에 공유하는 상태는 추가 전용 [`ReportLog`]뿐입니다.
//!
//! 취소 토큰이 발동하면 진행 중인 시나리오는 현재 단계를 중단하고 destroy를 시도하며,
//! 아직 시작하지 않은 시나리오는 시작하지 않고 취소로 기록됩니다.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::HarnessConfig;
use crate::lifecycle::{CheckFn, Harness};
use crate::report::{ReportLog, ScenarioReport, SuiteReport, Verdict};
use crate::runner::ToolRunner;
use crate::scenario::Scenario;
use converge_core::types::Phase;

/// 스위트 실행기
#[derive(Debug, Clone)]
pub struct Suite {
    max_parallel: usize,
    fail_fast: bool,
    log: ReportLog,
}

impl Suite {
    /// 동시 실행 수를 지정해 생성합니다. 0은 1로 취급합니다.
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            fail_fast: false,
            log: ReportLog::new(),
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.max_parallel)
    }

    /// 첫 실패 이후 아직 시작하지 않은 시나리오를 취소합니다.
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// 외부에서 만든 로그를 공유합니다.
    pub fn with_log(mut self, log: ReportLog) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> &ReportLog {
        &self.log
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// 시나리오들을 실행하고 입력 순서대로 결과를 모읍니다.
    pub async fn run<R: ToolRunner>(
        &self,
        harness: Arc<Harness<R>>,
        scenarios: Vec<Scenario>,
        cancel: CancellationToken,
    ) -> SuiteReport {
        let checked = scenarios.into_iter().map(|s| (s, None)).collect();
        self.run_with_checks(harness, checked, cancel).await
    }

    /// 시나리오별 출력 검증과 함께 실행합니다.
    ///
    /// 시나리오 안에서 발생한 패닉은 해당 시나리오의 실패로 기록되며 스위트를
    /// 중단하지 않습니다.
    pub async fn run_with_checks<R: ToolRunner>(
        &self,
        harness: Arc<Harness<R>>,
        scenarios: Vec<(Scenario, Option<CheckFn>)>,
        cancel: CancellationToken,
    ) -> SuiteReport {
        let total = scenarios.len();
        info!(
            scenarios = total,
            max_parallel = self.max_parallel,
            fail_fast = self.fail_fast,
            "suite started"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        // 새 시나리오 시작 여부만 제어. 진행 중인 시나리오는 `cancel`만 따름
        let gate = cancel.child_token();

        let mut identities = Vec::with_capacity(total);
        let mut slots: Vec<Option<ScenarioReport>> = vec![None; total];
        let mut tasks = JoinSet::new();

        for (index, (scenario, check)) in scenarios.into_iter().enumerate() {
            identities.push((scenario.name().to_owned(), scenario.run_id().to_owned()));

            let harness = Arc::clone(&harness);
            let semaphore = Arc::clone(&semaphore);
            let gate = gate.clone();
            let cancel = cancel.clone();
            let log = self.log.clone();
            let fail_fast = self.fail_fast;

            tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = gate.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    warn!(scenario = scenario.name(), "scenario cancelled before start");
                    let report = ScenarioReport::cancelled(scenario.name(), scenario.run_id());
                    log.record_report(&report).await;
                    return (index, report);
                };

                let (report, panic) = harness.run_catching(&scenario, check, cancel).await;
                if panic.is_some() {
                    error!(scenario = scenario.name(), "scenario panicked, recorded as failure");
                }
                log.record_report(&report).await;

                if fail_fast && !report.passed() && !gate.is_cancelled() {
                    warn!(scenario = scenario.name(), "fail-fast: cancelling pending scenarios");
                    gate.cancel();
                }
                (index, report)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                // 결과 없는 슬롯은 아래에서 중단으로 기록
                Err(e) => error!(error = %e, "scenario task aborted"),
            }
        }

        let reports: Vec<ScenarioReport> = slots
            .into_iter()
            .zip(identities.iter())
            .map(|(slot, (name, run_id))| {
                slot.unwrap_or_else(|| aborted_report(name, run_id))
            })
            .collect();

        let report = SuiteReport::from_reports(reports);
        info!(
            passed = report.passed,
            failed = report.failed,
            cleanup_failures = report.cleanup_failures,
            "suite finished"
        );
        report
    }
}

fn aborted_report(name: &str, run_id: &str) -> ScenarioReport {
    let mut report = ScenarioReport::cancelled(name, run_id);
    report.verdict = Verdict::Failed {
        phase: Phase::Init,
        error: "scenario task aborted".to_owned(),
    };
    report
}
