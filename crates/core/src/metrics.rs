//! 메트릭 상수 및 설명 등록
//!
//! 하네스가 기록하는 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 레코더가 설치되지 않은 경우 `metrics` 매크로 호출은 아무 동작도 하지 않습니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `converge_`
//! - 접미어: `_total` (counter), `_seconds` (histogram)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 라이프사이클 단계 레이블 키 (init, validate, apply, reconcile, destroy, ...)
pub const LABEL_PHASE: &str = "phase";

/// 시나리오 이름 레이블 키
pub const LABEL_SCENARIO: &str = "scenario";

/// 결과 레이블 키 (passed, failed)
pub const LABEL_RESULT: &str = "result";

// ─── Harness 메트릭 ────────────────────────────────────────────────

/// 단계별 외부 도구 실행 시도 수 (counter, label: phase)
pub const PHASE_ATTEMPTS_TOTAL: &str = "converge_phase_attempts_total";

/// 재시도 규칙에 의해 다시 실행된 횟수 (counter, label: phase)
pub const PHASE_RETRIES_TOTAL: &str = "converge_phase_retries_total";

/// 단계 실행 소요 시간 (histogram, 초, label: phase)
pub const PHASE_DURATION_SECONDS: &str = "converge_phase_duration_seconds";

/// 종료된 시나리오 수 (counter, label: result)
pub const SCENARIOS_TOTAL: &str = "converge_scenarios_total";

/// 정리(destroy)에 실패한 시나리오 수 (counter, label: scenario)
pub const CLEANUP_FAILURES_TOTAL: &str = "converge_cleanup_failures_total";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 레코더 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(
        PHASE_ATTEMPTS_TOTAL,
        "Total number of tool invocations per lifecycle phase"
    );
    describe_counter!(
        PHASE_RETRIES_TOTAL,
        "Total number of retries triggered by a matching retry rule"
    );
    describe_histogram!(
        PHASE_DURATION_SECONDS,
        "Time spent in a lifecycle phase including retries in seconds"
    );
    describe_counter!(
        SCENARIOS_TOTAL,
        "Total number of scenarios that reached a verdict"
    );
    describe_counter!(
        CLEANUP_FAILURES_TOTAL,
        "Total number of scenarios whose destroy phase failed"
    );
}
