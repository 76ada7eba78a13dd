//! 재시도 정책: 알려진 일시적 에러 패턴과 지수 백오프
//!
//! [`RetryPolicy`]는 순서가 있는 [`RetryRule`] 목록과 기본 [`Backoff`]로 구성됩니다.
//! 실패한 시도의 stdout+stderr를 규칙 선언 순서대로 검사하여
//! 처음 매칭되는 규칙의 백오프로 재시도 여부를 결정합니다.
//!
//! 정책은 생성 후 변경되지 않으며, [`RetryPolicy::extend`]는 항상 새 정책을 반환합니다.

use std::time::Duration;

use regex::Regex;

use converge_core::config::RetryRuleConfig;

use crate::error::HarnessError;

/// 알려진 일시적 에러 패턴 (패턴, 사유)
///
/// 플러그인/프로바이더 다운로드 중 네트워크 오류와
/// 프로바이더의 최종 일관성 오류를 포함합니다.
pub const DEFAULT_RETRYABLE_ERRORS: &[(&str, &str)] = &[
    (
        ".*unable to verify signature.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*unable to verify checksum.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*no provider exists with the given name.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*registry service is unreachable.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*Error installing provider.*",
        "Failed to retrieve plugin due to transient network error.",
    ),
    (
        ".*Failed to query available provider packages.*",
        "Failed to retrieve provider due to transient network error.",
    ),
    (
        ".*timeout while waiting for plugin to start.*",
        "Failed to start plugin due to transient error.",
    ),
    (
        ".*timed out waiting for server handshake.*",
        "Failed to start plugin due to transient error.",
    ),
    (
        "could not query provider registry for",
        "Failed to query provider registry due to transient network error.",
    ),
    (
        ".*Provider produced inconsistent result after apply.*",
        "Provider eventual consistency error.",
    ),
    (
        ".*read: connection reset by peer.*",
        "Failed to reach helm charts repository.",
    ),
    (
        ".*transport is closing.*",
        "Failed to reach Kubernetes API.",
    ),
];

/// 지수 백오프 설정
///
/// `attempt`번째 실패 후 대기 시간은 `min(base_delay * 2^(attempt-1), max_delay)`입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// 최대 재시도 횟수 (총 시도 = max_retries + 1)
    pub max_retries: u32,
    /// 첫 재시도 전 대기 시간
    pub base_delay: Duration,
    /// 대기 시간 상한
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    /// 재시도하지 않는 백오프
    pub const NONE: Self = Self {
        max_retries: 0,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    /// `attempt`번째(1부터) 실패 후의 대기 시간
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// 재시도 규칙
#[derive(Debug, Clone)]
pub struct RetryRule {
    pattern: Regex,
    reason: String,
    backoff: Option<Backoff>,
}

impl RetryRule {
    /// 패턴을 컴파일하여 규칙을 생성합니다.
    pub fn new(pattern: &str, reason: impl Into<String>) -> Result<Self, HarnessError> {
        let regex = Regex::new(pattern).map_err(|e| HarnessError::Config {
            field: "retry.pattern".to_owned(),
            reason: format!("invalid pattern '{pattern}': {e}"),
        })?;
        Ok(Self {
            pattern: regex,
            reason: reason.into(),
            backoff: None,
        })
    }

    /// 이 규칙에만 적용할 백오프를 지정합니다.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// 설정 파일의 규칙을 변환합니다.
    ///
    /// `max_retries`나 `base_delay_ms`가 지정되면 나머지 값은 `defaults`에서 가져옵니다.
    pub fn from_config(
        config: &RetryRuleConfig,
        defaults: Backoff,
        field: &str,
    ) -> Result<Self, HarnessError> {
        let rule = Self::new(&config.pattern, config.reason.clone()).map_err(|e| match e {
            HarnessError::Config { reason, .. } => HarnessError::Config {
                field: field.to_owned(),
                reason,
            },
            other => other,
        })?;

        if config.max_retries.is_none() && config.base_delay_ms.is_none() {
            return Ok(rule);
        }

        Ok(rule.with_backoff(Backoff {
            max_retries: config.max_retries.unwrap_or(defaults.max_retries),
            base_delay: config
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: defaults.max_delay,
        }))
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn backoff(&self) -> Option<Backoff> {
        self.backoff
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// 재시도 판단 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// `delay` 후 다시 시도
    Retry {
        /// 대기 시간
        delay: Duration,
        /// 매칭된 규칙의 사유
        reason: String,
    },
    /// 더 이상 재시도하지 않음
    GiveUp,
}

/// 재시도 정책
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    rules: Vec<RetryRule>,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

impl RetryPolicy {
    /// 규칙 없이 주어진 백오프만 가진 정책
    pub fn new(backoff: Backoff) -> Self {
        Self {
            rules: Vec::new(),
            backoff,
        }
    }

    /// 어떤 실패도 재시도하지 않는 정책
    pub fn none() -> Self {
        Self::new(Backoff::NONE)
    }

    /// 알려진 일시적 에러 목록과 기본 백오프를 가진 정책
    pub fn with_default_rules() -> Self {
        let rules = DEFAULT_RETRYABLE_ERRORS
            .iter()
            .filter_map(|(pattern, reason)| RetryRule::new(pattern, *reason).ok())
            .collect();
        Self {
            rules,
            backoff: Backoff::default(),
        }
    }

    /// 규칙을 뒤에 덧붙인 새 정책을 반환합니다.
    pub fn extend(&self, rules: impl IntoIterator<Item = RetryRule>) -> Self {
        let mut extended = self.clone();
        extended.rules.extend(rules);
        extended
    }

    /// 기본 백오프를 교체합니다.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn rules(&self) -> &[RetryRule] {
        &self.rules
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// 출력에 처음 매칭되는 규칙
    pub fn matching_rule(&self, text: &str) -> Option<&RetryRule> {
        self.rules.iter().find(|rule| rule.is_match(text))
    }

    /// `attempt`번째(1부터) 시도가 `text`를 출력하며 실패했을 때의 판단
    pub fn decide(&self, attempt: u32, text: &str) -> RetryDecision {
        let Some(rule) = self.matching_rule(text) else {
            return RetryDecision::GiveUp;
        };
        let backoff = rule.backoff.unwrap_or(self.backoff);
        if attempt > backoff.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: backoff.delay_for(attempt),
            reason: rule.reason.clone(),
        }
    }
}
