//! Converge 수렴 테스트 하네스
//!
//! 인프라 구성 디렉토리를 외부 프로비저닝 도구로 init → validate → apply →
//! re-apply(멱등성 확인) → destroy 순서로 실행하고, 일시적 오류는 재시도하며,
//! 어떤 경우에도 destroy를 보장합니다.
//!
//! # Module Structure
//!
//! - [`error`]: 하네스 에러 (`HarnessError`)
//! - [`config`]: 하네스 설정 (`HarnessConfig`, builder)
//! - [`runner`]: 외부 도구 실행 추상화 (`ToolRunner` trait, `ProcessRunner`)
//! - [`retry`]: 재시도 정책 (`RetryPolicy`, `RetryRule`, `Backoff`)
//! - [`summary`]: 도구 출력의 변경량 요약 파싱 (`SummaryParser`)
//! - [`scenario`]: 시나리오 정의 (`Scenario`, `ScenarioBuilder`)
//! - [`workdir`]: 격리 작업 디렉토리 (`Workdir`)
//! - [`guard`]: 취소 시 destroy 보장 (`CleanupGuard`)
//! - [`lifecycle`]: 라이프사이클 실행기 (`Harness`)
//! - [`report`]: 실행 결과 (`ScenarioReport`, `SuiteReport`, `ReportLog`)
//! - [`suite`]: 병렬 스위트 실행기 (`Suite`)
//!
//! # Architecture
//!
//! ```text
//! Suite ──JoinSet + Semaphore──> Harness::run_scenario (per scenario)
//!                                     │
//!                          init → validate → apply → re-apply
//!                                     │        (RetryPolicy)
//!                                  destroy (always)
//!                                     │
//!                                 ReportLog
//! ```

pub mod config;
pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod report;
pub mod retry;
pub mod runner;
pub mod scenario;
pub mod suite;
pub mod summary;
pub mod workdir;

// --- Public API Re-exports ---

// Lifecycle (main entry point)
pub use lifecycle::{CheckFn, Harness, LifecycleResult, Outputs, PlanStatus};

// Configuration
pub use config::{HarnessConfig, HarnessConfigBuilder};

// Error
pub use error::HarnessError;

// Tool runner
pub use runner::{Invocation, ProcessRunner, ToolOutput, ToolRunner};

// Retry
pub use retry::{Backoff, DEFAULT_RETRYABLE_ERRORS, RetryDecision, RetryPolicy, RetryRule};

// Scenario
pub use scenario::{Scenario, ScenarioBuilder, new_run_id};

// Cleanup
pub use guard::CleanupGuard;
pub use workdir::Workdir;

// Reporting
pub use report::{CleanupStatus, ReportEntry, ReportLog, ScenarioReport, SuiteReport, Verdict};
pub use suite::Suite;
pub use summary::SummaryParser;
