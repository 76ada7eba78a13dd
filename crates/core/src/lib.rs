//! Converge 공통 크레이트
//!
//! 수렴(reconciliation) 테스트 하네스 전반에서 공유하는 설정, 에러, 도메인 타입,
//! 메트릭 이름을 정의합니다.
//!
//! # Module Structure
//!
//! - [`config`]: `converge.toml` 파싱 및 환경변수 오버라이드 (`ConvergeConfig`)
//! - [`error`]: 최상위 에러 트리 (`ConvergeError`, `ConfigError`, `LifecycleError`)
//! - [`types`]: 라이프사이클 단계, 리소스 변경량, 시나리오 상태
//! - [`metrics`]: 메트릭 이름 상수

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, ConvergeError, LifecycleError};

// 설정
pub use config::ConvergeConfig;

// 도메인 타입
pub use types::{Phase, ResourceDelta, ScenarioState};
