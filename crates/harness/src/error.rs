//! 하네스 에러 타입
//!
//! [`HarnessError`]는 라이프사이클 실행 중 발생하는 모든 에러를 표현합니다.
//! `From<HarnessError> for ConvergeError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use std::time::Duration;

use converge_core::error::{ConfigError, ConvergeError, LifecycleError};
use converge_core::types::ResourceDelta;

/// 하네스 도메인 에러
///
/// 단계별 실패(setup, validation, apply, idempotence, destroy)와
/// 외부 도구 실행 실패, 타임아웃, 취소, 설정 에러를 포괄합니다.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HarnessError {
    /// 작업 디렉토리 준비 또는 init 실패
    #[error("setup failed for scenario '{scenario}': {reason}")]
    Setup {
        /// 시나리오 이름
        scenario: String,
        /// 실패 사유
        reason: String,
    },

    /// 구성 검증 실패 (재시도 없음)
    #[error("validation failed for scenario '{scenario}': {output}")]
    Validation {
        /// 시나리오 이름
        scenario: String,
        /// 도구 출력 발췌
        output: String,
    },

    /// apply 실패 (재시도 소진 또는 재시도 불가 에러)
    #[error("apply failed for scenario '{scenario}' after {attempts} attempt(s): {reason}")]
    Apply {
        /// 시나리오 이름
        scenario: String,
        /// 시도 횟수
        attempts: u32,
        /// 실패 사유
        reason: String,
    },

    /// 두 번째 apply가 변경을 보고했거나 변경량을 확인할 수 없음
    #[error("scenario '{scenario}' is not idempotent: {}", describe_delta(.delta))]
    Idempotence {
        /// 시나리오 이름
        scenario: String,
        /// 두 번째 apply의 변경량 (요약 줄이 없으면 `None`)
        delta: Option<ResourceDelta>,
    },

    /// destroy 실패
    #[error("destroy failed for scenario '{scenario}' after {attempts} attempt(s): {reason}")]
    Destroy {
        /// 시나리오 이름
        scenario: String,
        /// 시도 횟수
        attempts: u32,
        /// 실패 사유
        reason: String,
    },

    /// 수렴 이후 사용자 검증 실패
    #[error("check failed for scenario '{scenario}': {reason}")]
    Check {
        /// 시나리오 이름
        scenario: String,
        /// 실패 사유
        reason: String,
    },

    /// 외부 도구 실행 자체의 실패 (spawn, I/O)
    #[error("tool error: {0}")]
    Tool(String),

    /// 명령 또는 시나리오 타임아웃
    #[error("timed out after {after:?}")]
    Timeout {
        /// 적용된 타임아웃
        after: Duration,
    },

    /// 취소 토큰에 의한 중단
    #[error("cancelled")]
    Cancelled,

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },
}

fn describe_delta(delta: &Option<ResourceDelta>) -> String {
    match delta {
        Some(delta) => format!("second apply reported {delta}"),
        None => "second apply produced no recognizable change summary".to_owned(),
    }
}

impl From<HarnessError> for ConvergeError {
    fn from(err: HarnessError) -> Self {
        let message = err.to_string();
        match err {
            HarnessError::Setup { .. } => {
                ConvergeError::Lifecycle(LifecycleError::Setup(message))
            }
            HarnessError::Validation { .. } => {
                ConvergeError::Lifecycle(LifecycleError::Validation(message))
            }
            HarnessError::Apply { .. } | HarnessError::Check { .. } => {
                ConvergeError::Lifecycle(LifecycleError::Apply(message))
            }
            HarnessError::Idempotence { .. } => {
                ConvergeError::Lifecycle(LifecycleError::Idempotence(message))
            }
            HarnessError::Destroy { .. } => {
                ConvergeError::Lifecycle(LifecycleError::Destroy(message))
            }
            HarnessError::Tool(_) | HarnessError::Timeout { .. } | HarnessError::Cancelled => {
                ConvergeError::Lifecycle(LifecycleError::Tool(message))
            }
            HarnessError::Config { field, reason } => {
                ConvergeError::Config(ConfigError::InvalidValue { field, reason })
            }
        }
    }
}
