//! 실행 결과 보고
//!
//! - [`ScenarioReport`]: 시나리오 하나의 상태 이력, 판정, 정리 결과
//! - [`SuiteReport`]: 스위트 전체 결과 (입력 순서 유지)
//! - [`ReportLog`]: 여러 시나리오 태스크가 동시에 기록하는 추가 전용 로그

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use converge_core::types::{Phase, ScenarioState};

/// 시나리오 판정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed {
        /// 실패한 단계
        phase: Phase,
        /// 에러 메시지
        error: String,
    },
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// 메트릭 레이블 값 (passed, failed)
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// 정리(destroy) 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanupStatus {
    /// destroy 성공
    Destroyed,
    /// destroy 실패
    Failed {
        /// 에러 메시지
        error: String,
    },
    /// cleanup 타임아웃 초과
    TimedOut,
    /// 시작 전에 취소되어 정리할 것이 없음
    Skipped,
}

impl CleanupStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::TimedOut)
    }
}

/// 시나리오 실행 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// 시나리오 이름
    pub scenario: String,
    /// 실행 ID
    pub run_id: String,
    /// 거쳐 간 상태 (Created부터)
    pub states: Vec<ScenarioState>,
    /// 판정
    pub verdict: Verdict,
    /// 정리 결과
    pub cleanup: CleanupStatus,
    /// 실행 시간 (밀리초)
    pub duration_ms: u64,
    /// 정리 실패로 삭제하지 않고 남긴 격리 작업 디렉토리 (남은 리소스의 상태 파일 위치)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retained_workdir: Option<PathBuf>,
}

impl ScenarioReport {
    /// 시작되기 전에 취소된 시나리오의 보고서
    pub fn cancelled(scenario: &str, run_id: &str) -> Self {
        Self {
            scenario: scenario.to_owned(),
            run_id: run_id.to_owned(),
            states: vec![
                ScenarioState::Created,
                ScenarioState::Failed { phase: Phase::Init },
            ],
            verdict: Verdict::Failed {
                phase: Phase::Init,
                error: "cancelled".to_owned(),
            },
            cleanup: CleanupStatus::Skipped,
            duration_ms: 0,
            retained_workdir: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict.is_passed()
    }

    /// 마지막 상태
    pub fn final_state(&self) -> Option<ScenarioState> {
        self.states.last().copied()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// 스위트 실행 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    /// 시나리오 결과 (입력 순서)
    pub scenarios: Vec<ScenarioReport>,
    /// 통과한 시나리오 수
    pub passed: usize,
    /// 실패한 시나리오 수
    pub failed: usize,
    /// 정리에 실패한 시나리오 수
    pub cleanup_failures: usize,
}

impl SuiteReport {
    /// 입력 순서의 시나리오 결과로 집계합니다.
    pub fn from_reports(scenarios: Vec<ScenarioReport>) -> Self {
        let passed = scenarios.iter().filter(|r| r.passed()).count();
        let cleanup_failures = scenarios.iter().filter(|r| r.cleanup.is_failure()).count();
        Self {
            failed: scenarios.len() - passed,
            passed,
            cleanup_failures,
            scenarios,
        }
    }

    /// 모든 판정이 통과인지 여부 (정리 실패는 판정에 영향 없음)
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioReport> {
        self.scenarios.iter().find(|r| r.scenario == name)
    }
}

/// 로그 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// 기록 시각
    pub timestamp: DateTime<Utc>,
    /// 시나리오 이름
    pub scenario: String,
    /// 실행 ID
    pub run_id: String,
    /// 이벤트 내용
    pub event: String,
}

/// 추가 전용 실행 로그
///
/// 복제본은 같은 로그를 공유합니다. 읽기는 항상 스냅샷 사본을 반환합니다.
#[derive(Debug, Clone, Default)]
pub struct ReportLog {
    entries: Arc<Mutex<Vec<ReportEntry>>>,
    passed: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
}

impl ReportLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 이벤트를 기록합니다.
    pub async fn record(&self, scenario: &str, run_id: &str, event: impl Into<String>) {
        let entry = ReportEntry {
            timestamp: Utc::now(),
            scenario: scenario.to_owned(),
            run_id: run_id.to_owned(),
            event: event.into(),
        };
        self.entries.lock().await.push(entry);
    }

    /// 시나리오 결과를 기록하고 통과/실패 카운터를 갱신합니다.
    pub async fn record_report(&self, report: &ScenarioReport) {
        let counter = if report.passed() {
            &self.passed
        } else {
            &self.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let event = match &report.verdict {
            Verdict::Passed => "passed".to_owned(),
            Verdict::Failed { phase, error } => format!("failed at {phase}: {error}"),
        };
        self.record(&report.scenario, &report.run_id, event).await;

        if let CleanupStatus::Failed { error } = &report.cleanup {
            self.record(
                &report.scenario,
                &report.run_id,
                format!("cleanup failed: {error}"),
            )
            .await;
        } else if report.cleanup == CleanupStatus::TimedOut {
            self.record(&report.scenario, &report.run_id, "cleanup timed out")
                .await;
        }

        if let Some(dir) = &report.retained_workdir {
            self.record(
                &report.scenario,
                &report.run_id,
                format!("workdir retained at {}", dir.display()),
            )
            .await;
        }
    }

    /// 현재까지의 항목 사본
    pub async fn snapshot(&self) -> Vec<ReportEntry> {
        self.entries.lock().await.clone()
    }

    /// 특정 시나리오의 항목 사본
    pub async fn entries_for(&self, scenario: &str) -> Vec<ReportEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.scenario == scenario)
            .cloned()
            .collect()
    }

    pub fn passed_count(&self) -> usize {
        self.passed.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}
