//! 하네스 설정
//!
//! [`HarnessConfig`]는 core의 [`ConvergeConfig`]를 기반으로 하네스 전용 설정을 제공합니다.
//! 재시도 패턴은 이 변환 시점에 컴파일되므로 잘못된 정규식은 실행 전에 드러납니다.
//!
//! # 사용 예시
//! ```ignore
//! use converge_core::config::ConvergeConfig;
//! use converge_harness::config::HarnessConfig;
//!
//! let core_config = ConvergeConfig::default();
//! let config = HarnessConfig::from_core(&core_config)?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use converge_core::config::{ConvergeConfig, ScenarioConfig};

use crate::error::HarnessError;
use crate::retry::{Backoff, RetryPolicy, RetryRule};
use crate::scenario::{Scenario, ScenarioBuilder};

/// 설정 상한값 상수
const MAX_PARALLEL: usize = 64;
const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(86_400);

/// 하네스 설정
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// 프로비저닝 도구 실행 파일
    pub binary: String,
    /// `-no-color` 기본값
    pub no_color: bool,
    /// 단일 명령 타임아웃
    pub command_timeout: Duration,
    /// 시나리오 라이프사이클 타임아웃 (destroy 제외)
    pub scenario_timeout: Duration,
    /// destroy 단계 타임아웃
    pub cleanup_timeout: Duration,
    /// 동시 실행 시나리오 수
    pub max_parallel: usize,
    /// 실행 ID를 받을 입력 변수 이름
    pub namespace_var: String,
    /// 스위트 공통 재시도 정책
    pub retry: Arc<RetryPolicy>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            binary: "terraform".to_owned(),
            no_color: true,
            command_timeout: Duration::from_secs(1800),
            scenario_timeout: Duration::from_secs(3600),
            cleanup_timeout: Duration::from_secs(900),
            max_parallel: 4,
            namespace_var: "converge_run_id".to_owned(),
            retry: Arc::new(RetryPolicy::with_default_rules()),
        }
    }
}

impl HarnessConfig {
    /// core 설정에서 하네스 설정을 생성합니다.
    ///
    /// 재시도 규칙 패턴이 컴파일되지 않으면 `HarnessError::Config`를 반환합니다.
    pub fn from_core(core: &ConvergeConfig) -> Result<Self, HarnessError> {
        let backoff = Backoff {
            max_retries: core.retry.max_retries,
            base_delay: Duration::from_millis(core.retry.base_delay_ms),
            max_delay: Duration::from_millis(core.retry.max_delay_ms),
        };

        let base = if core.retry.use_default_rules {
            RetryPolicy::with_default_rules().with_backoff(backoff)
        } else {
            RetryPolicy::new(backoff)
        };

        let rules = core
            .retry
            .rules
            .iter()
            .enumerate()
            .map(|(idx, rule)| {
                RetryRule::from_config(rule, backoff, &format!("retry.rules[{idx}].pattern"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // 시나리오별 규칙도 실행 전에 검증
        for scenario in &core.scenarios {
            scenario_rules(scenario, backoff)?;
        }

        let config = Self {
            binary: core.tool.binary.clone(),
            no_color: core.tool.no_color,
            command_timeout: Duration::from_secs(core.tool.command_timeout_secs),
            scenario_timeout: Duration::from_secs(core.suite.scenario_timeout_secs),
            cleanup_timeout: Duration::from_secs(core.suite.cleanup_timeout_secs),
            max_parallel: core.suite.max_parallel,
            namespace_var: core.suite.namespace_var.clone(),
            retry: Arc::new(base.extend(rules)),
        };
        config.validate()?;
        Ok(config)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.binary.trim().is_empty() {
            return Err(config_error("binary", "must not be empty"));
        }
        if self.command_timeout.is_zero() || self.command_timeout > MAX_COMMAND_TIMEOUT {
            return Err(config_error(
                "command_timeout",
                format!("must be 1s-{}s", MAX_COMMAND_TIMEOUT.as_secs()),
            ));
        }
        if self.scenario_timeout.is_zero() {
            return Err(config_error("scenario_timeout", "must be greater than 0"));
        }
        if self.cleanup_timeout.is_zero() {
            return Err(config_error("cleanup_timeout", "must be greater than 0"));
        }
        if self.max_parallel == 0 || self.max_parallel > MAX_PARALLEL {
            return Err(config_error(
                "max_parallel",
                format!("must be 1-{MAX_PARALLEL}"),
            ));
        }
        let valid_name = !self.namespace_var.is_empty()
            && self
                .namespace_var
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            return Err(config_error(
                "namespace_var",
                "must be a non-empty identifier of [A-Za-z0-9_]",
            ));
        }
        Ok(())
    }

    /// 설정 파일의 시나리오 항목으로 [`Scenario`]를 생성합니다.
    ///
    /// 시나리오별 재시도 규칙은 스위트 공통 정책에 덧붙여집니다.
    pub fn scenario_from_config(&self, config: &ScenarioConfig) -> Result<Scenario, HarnessError> {
        let rules = scenario_rules(config, self.retry.backoff())?;
        let policy = if rules.is_empty() {
            Arc::clone(&self.retry)
        } else {
            Arc::new(self.retry.extend(rules))
        };

        let mut builder = ScenarioBuilder::new(config.name.clone(), config.dir.clone())
            .no_color(self.no_color)
            .isolate_workdir(config.isolate_workdir)
            .lock(config.lock)
            .vars(config.vars.clone())
            .envs(config.env.clone())
            .retry_policy(policy);
        if let Some(root) = &config.copy_root {
            builder = builder.copy_root(root.clone());
        }
        for file in &config.var_files {
            builder = builder.var_file(file.clone());
        }
        if let Some(n) = config.parallelism {
            builder = builder.parallelism(n);
        }
        builder.build()
    }
}

fn scenario_rules(config: &ScenarioConfig, backoff: Backoff) -> Result<Vec<RetryRule>, HarnessError> {
    config
        .retry_rules
        .iter()
        .enumerate()
        .map(|(idx, rule)| {
            RetryRule::from_config(
                rule,
                backoff,
                &format!("scenarios.{}.retry_rules[{idx}].pattern", config.name),
            )
        })
        .collect()
}

fn config_error(field: &str, reason: impl Into<String>) -> HarnessError {
    HarnessError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// 하네스 설정 빌더
#[derive(Default)]
pub struct HarnessConfigBuilder {
    config: HarnessConfig,
}

impl HarnessConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 도구 실행 파일을 설정합니다.
    pub fn binary(mut self, binary: impl Into<String>) -> Self {
        self.config.binary = binary.into();
        self
    }

    /// `-no-color` 기본값을 설정합니다.
    pub fn no_color(mut self, no_color: bool) -> Self {
        self.config.no_color = no_color;
        self
    }

    /// 단일 명령 타임아웃을 설정합니다.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// 시나리오 타임아웃을 설정합니다.
    pub fn scenario_timeout(mut self, timeout: Duration) -> Self {
        self.config.scenario_timeout = timeout;
        self
    }

    /// destroy 타임아웃을 설정합니다.
    pub fn cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.config.cleanup_timeout = timeout;
        self
    }

    /// 동시 실행 시나리오 수를 설정합니다.
    pub fn max_parallel(mut self, max: usize) -> Self {
        self.config.max_parallel = max;
        self
    }

    /// 실행 ID 변수 이름을 설정합니다.
    pub fn namespace_var(mut self, name: impl Into<String>) -> Self {
        self.config.namespace_var = name.into();
        self
    }

    /// 스위트 공통 재시도 정책을 설정합니다.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = Arc::new(policy);
        self
    }

    /// 설정을 빌드합니다. 유효성 검증을 수행합니다.
    pub fn build(self) -> Result<HarnessConfig, HarnessError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
