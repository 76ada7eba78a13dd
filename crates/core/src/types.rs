//! 도메인 타입: 라이프사이클 단계와 시나리오 상태 전이
//!
//! 하네스와 CLI가 공유하는 데이터 구조를 정의합니다.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 라이프사이클 단계
///
/// 하나의 시나리오는 `Init → Validate → Apply → Reconcile → Destroy` 순서로
/// 진행됩니다. `Check`, `Plan`, `Output`은 보조 단계입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// 작업 디렉토리 준비 (플러그인/모듈 설치)
    Init,
    /// 구성 문법 검증
    Validate,
    /// 첫 번째 apply
    Apply,
    /// 두 번째 apply (멱등성 확인)
    Reconcile,
    /// 수렴 이후 사용자 검증
    Check,
    /// 변경 계획 조회
    Plan,
    /// 출력값 조회
    Output,
    /// 리소스 정리
    Destroy,
}

impl Phase {
    /// 메트릭 레이블과 로그 필드에 쓰는 고정 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Validate => "validate",
            Self::Apply => "apply",
            Self::Reconcile => "reconcile",
            Self::Check => "check",
            Self::Plan => "plan",
            Self::Output => "output",
            Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// apply/plan/destroy 요약에서 읽어낸 리소스 변경량
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDelta {
    /// 추가된 리소스 수
    pub added: u64,
    /// 변경된 리소스 수
    pub changed: u64,
    /// 삭제된 리소스 수
    pub destroyed: u64,
}

impl ResourceDelta {
    /// 변경 없음
    pub const ZERO: Self = Self {
        added: 0,
        changed: 0,
        destroyed: 0,
    };

    pub fn new(added: u64, changed: u64, destroyed: u64) -> Self {
        Self {
            added,
            changed,
            destroyed,
        }
    }

    /// added + changed + destroyed
    pub fn total(&self) -> u64 {
        self.added
            .saturating_add(self.changed)
            .saturating_add(self.destroyed)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for ResourceDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} changed, {} destroyed",
            self.added, self.changed, self.destroyed
        )
    }
}

/// 시나리오 상태 머신
///
/// ```text
/// Created → Initialized → Validated → Applied → Reconciled → Destroyed
///    └──────────┴────────────┴───────────┴──────────┴──→ Failed ──→ Destroyed
/// ```
///
/// `Failed`는 종료 상태가 아닌 모든 상태에서 도달 가능하며,
/// 항상 `Destroyed`로의 전이 시도가 뒤따릅니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScenarioState {
    Created,
    Initialized,
    Validated,
    Applied,
    /// 두 번째 apply가 변경 없음을 보고함
    Reconciled,
    /// 실패한 단계
    Failed { phase: Phase },
    Destroyed,
}

impl ScenarioState {
    /// 더 이상 전이할 수 없는 상태인지 여부
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed)
    }

    /// `self → next` 전이가 허용되는지 여부
    pub fn can_transition_to(&self, next: &ScenarioState) -> bool {
        use ScenarioState::*;
        match (self, next) {
            (Destroyed, _) => false,
            (Failed { .. }, Destroyed) => true,
            (Failed { .. }, _) => false,
            (_, Failed { .. }) => true,
            (Created, Initialized)
            | (Initialized, Validated)
            | (Validated, Applied)
            | (Applied, Reconciled) => true,
            // 정리는 어느 단계에서든 시도됨
            (_, Destroyed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Initialized => write!(f, "initialized"),
            Self::Validated => write!(f, "validated"),
            Self::Applied => write!(f, "applied"),
            Self::Reconciled => write!(f, "reconciled"),
            Self::Failed { phase } => write!(f, "failed({phase})"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}
