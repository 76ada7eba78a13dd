//! 에러 타입: 도메인별 에러 정의

/// Converge 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum ConvergeError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 시나리오 라이프사이클 에러
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 라이프사이클 단계별 에러 분류
///
/// 하네스 크레이트의 상세 에러가 이 분류로 변환됩니다.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// 작업 디렉토리 준비(init) 실패
    #[error("setup failed: {0}")]
    Setup(String),

    /// 구성 문법 검증 실패
    #[error("validation failed: {0}")]
    Validation(String),

    /// apply 실패 (재시도 소진 포함)
    #[error("apply failed: {0}")]
    Apply(String),

    /// 두 번째 apply가 변경을 보고함
    #[error("not idempotent: {0}")]
    Idempotence(String),

    /// 리소스 정리 실패
    #[error("destroy failed: {0}")]
    Destroy(String),

    /// 외부 도구 실행 자체의 실패 (spawn, 타임아웃, 취소)
    #[error("tool error: {0}")]
    Tool(String),
}
