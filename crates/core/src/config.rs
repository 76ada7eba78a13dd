//! 설정 관리: converge.toml 파싱 및 런타임 설정
//!
//! [`ConvergeConfig`]는 하네스 전체 설정(로깅, 외부 도구, 재시도, 스위트, 시나리오 목록)을
//! 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`CONVERGE_TOOL_BINARY=tofu` 형식)
//! 3. 설정 파일 (`converge.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), converge_core::error::ConvergeError> {
//! use converge_core::config::ConvergeConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = ConvergeConfig::load("converge.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = ConvergeConfig::parse("[tool]\nbinary = \"tofu\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ConvergeError};

/// 설정 상한값 상수
const MAX_COMMAND_TIMEOUT_SECS: u64 = 86_400;
const MAX_RETRIES: u32 = 10;
const MAX_PARALLEL: usize = 64;

/// Converge 통합 설정
///
/// `converge.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvergeConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 외부 프로비저닝 도구 설정
    #[serde(default)]
    pub tool: ToolConfig,
    /// 재시도 정책 기본값
    #[serde(default)]
    pub retry: RetryConfig,
    /// 스위트 실행 설정
    #[serde(default)]
    pub suite: SuiteConfig,
    /// 시나리오 목록
    #[serde(default)]
    pub scenarios: Vec<ScenarioConfig>,
}

impl ConvergeConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    ///
    /// 설정 로딩 순서:
    /// 1. TOML 파일 파싱
    /// 2. 상대 경로 시나리오 디렉토리를 설정 파일 기준으로 변환
    /// 3. 환경변수 오버라이드 적용
    /// 4. 유효성 검증
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConvergeError> {
        let path = path.as_ref();
        let mut config = Self::from_file(path).await?;
        if let Some(base) = path.parent() {
            config.resolve_scenario_dirs(base);
        }
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConvergeError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConvergeError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                ConvergeError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, ConvergeError> {
        toml::from_str(toml_str).map_err(|e| {
            ConvergeError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 상대 경로로 지정된 시나리오 디렉토리와 복사 루트를 `base` 기준 경로로 바꿉니다.
    pub fn resolve_scenario_dirs(&mut self, base: &Path) {
        if base.as_os_str().is_empty() {
            return;
        }
        for scenario in &mut self.scenarios {
            if scenario.dir.is_relative() {
                scenario.dir = base.join(&scenario.dir);
            }
            if let Some(root) = scenario.copy_root.as_mut().filter(|r| r.is_relative()) {
                *root = base.join(&*root);
            }
        }
    }

    /// 이름으로 시나리오를 찾습니다.
    pub fn scenario(&self, name: &str) -> Option<&ScenarioConfig> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `CONVERGE_{SECTION}_{FIELD}`
    /// 예: `CONVERGE_SUITE_MAX_PARALLEL=2`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "CONVERGE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "CONVERGE_GENERAL_LOG_FORMAT");

        // Tool
        override_string(&mut self.tool.binary, "CONVERGE_TOOL_BINARY");
        override_bool(&mut self.tool.no_color, "CONVERGE_TOOL_NO_COLOR");
        override_u64(
            &mut self.tool.command_timeout_secs,
            "CONVERGE_TOOL_COMMAND_TIMEOUT_SECS",
        );

        // Retry
        override_u32(&mut self.retry.max_retries, "CONVERGE_RETRY_MAX_RETRIES");
        override_u64(&mut self.retry.base_delay_ms, "CONVERGE_RETRY_BASE_DELAY_MS");
        override_u64(&mut self.retry.max_delay_ms, "CONVERGE_RETRY_MAX_DELAY_MS");
        override_bool(
            &mut self.retry.use_default_rules,
            "CONVERGE_RETRY_USE_DEFAULT_RULES",
        );

        // Suite
        override_usize(&mut self.suite.max_parallel, "CONVERGE_SUITE_MAX_PARALLEL");
        override_u64(
            &mut self.suite.scenario_timeout_secs,
            "CONVERGE_SUITE_SCENARIO_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.suite.cleanup_timeout_secs,
            "CONVERGE_SUITE_CLEANUP_TIMEOUT_SECS",
        );
        override_string(
            &mut self.suite.namespace_var,
            "CONVERGE_SUITE_NAMESPACE_VAR",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 재시도 패턴의 정규식 컴파일 여부는 하네스 설정 변환 시 검사합니다.
    pub fn validate(&self) -> Result<(), ConvergeError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.tool.binary.trim().is_empty() {
            return Err(invalid("tool.binary", "must not be empty"));
        }

        if self.tool.command_timeout_secs == 0
            || self.tool.command_timeout_secs > MAX_COMMAND_TIMEOUT_SECS
        {
            return Err(invalid(
                "tool.command_timeout_secs",
                format!("must be 1-{MAX_COMMAND_TIMEOUT_SECS}"),
            ));
        }

        if self.retry.max_retries > MAX_RETRIES {
            return Err(invalid(
                "retry.max_retries",
                format!("must be 0-{MAX_RETRIES}"),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }

        for (idx, rule) in self.retry.rules.iter().enumerate() {
            if rule.pattern.is_empty() {
                return Err(invalid(
                    &format!("retry.rules[{idx}].pattern"),
                    "must not be empty",
                ));
            }
        }

        if self.suite.max_parallel == 0 || self.suite.max_parallel > MAX_PARALLEL {
            return Err(invalid(
                "suite.max_parallel",
                format!("must be 1-{MAX_PARALLEL}"),
            ));
        }

        if self.suite.scenario_timeout_secs == 0 {
            return Err(invalid(
                "suite.scenario_timeout_secs",
                "must be greater than 0",
            ));
        }

        if self.suite.cleanup_timeout_secs == 0 {
            return Err(invalid(
                "suite.cleanup_timeout_secs",
                "must be greater than 0",
            ));
        }

        let mut seen = HashSet::new();
        for scenario in &self.scenarios {
            if scenario.name.trim().is_empty() {
                return Err(invalid("scenarios.name", "must not be empty"));
            }
            if !seen.insert(scenario.name.as_str()) {
                return Err(invalid(
                    "scenarios.name",
                    format!("duplicate scenario name '{}'", scenario.name),
                ));
            }
            if scenario.dir.as_os_str().is_empty() {
                return Err(invalid(
                    &format!("scenarios.{}.dir", scenario.name),
                    "must not be empty",
                ));
            }
            for (idx, rule) in scenario.retry_rules.iter().enumerate() {
                if rule.pattern.is_empty() {
                    return Err(invalid(
                        &format!("scenarios.{}.retry_rules[{idx}].pattern", scenario.name),
                        "must not be empty",
                    ));
                }
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConvergeError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// 외부 프로비저닝 도구 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// 실행 파일 이름 또는 경로
    pub binary: String,
    /// `-no-color` 전달 여부
    pub no_color: bool,
    /// 단일 명령 타임아웃 (초)
    pub command_timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: "terraform".to_owned(),
            no_color: true,
            command_timeout_secs: 1800,
        }
    }
}

/// 재시도 정책 기본값
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 최대 재시도 횟수 (총 시도 = max_retries + 1)
    pub max_retries: u32,
    /// 지수 백오프 기본 간격 (밀리초)
    pub base_delay_ms: u64,
    /// 백오프 상한 (밀리초)
    pub max_delay_ms: u64,
    /// 알려진 일시적 에러 패턴 기본 목록 사용 여부
    pub use_default_rules: bool,
    /// 추가 재시도 규칙
    pub rules: Vec<RetryRuleConfig>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            use_default_rules: true,
            rules: Vec::new(),
        }
    }
}

/// 재시도 규칙 (에러 패턴 → 재시도)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryRuleConfig {
    /// 출력 전체에 대해 검사할 정규식
    pub pattern: String,
    /// 사람이 읽는 사유
    #[serde(default)]
    pub reason: String,
    /// 이 규칙 전용 최대 재시도 횟수
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// 이 규칙 전용 백오프 기본 간격 (밀리초)
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
}

/// 스위트 실행 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// 동시에 실행할 시나리오 최대 수
    pub max_parallel: usize,
    /// 시나리오 하나의 라이프사이클 타임아웃 (초, destroy 제외)
    pub scenario_timeout_secs: u64,
    /// 정리(destroy) 단계 타임아웃 (초)
    pub cleanup_timeout_secs: u64,
    /// 실행 ID를 전달할 입력 변수 이름 (`TF_VAR_<name>`)
    pub namespace_var: String,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            scenario_timeout_secs: 3600,
            cleanup_timeout_secs: 900,
            namespace_var: "converge_run_id".to_owned(),
        }
    }
}

/// 시나리오 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// 시나리오 이름 (고유)
    pub name: String,
    /// 구성 디렉토리
    pub dir: PathBuf,
    /// 실행 전 임시 디렉토리로 복사할지 여부
    #[serde(default)]
    pub isolate_workdir: bool,
    /// 격리 실행 시 복사할 루트 (생략 시 `.git`이 있는 상위 디렉토리)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_root: Option<PathBuf>,
    /// 상태 잠금 사용 여부 (`-lock=<bool>`)
    #[serde(default)]
    pub lock: bool,
    /// 입력 변수 (`-var key=value`)
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// 변수 파일 (`-var-file=path`)
    #[serde(default)]
    pub var_files: Vec<PathBuf>,
    /// 하위 프로세스 추가 환경변수
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// 이 시나리오에만 추가되는 재시도 규칙
    #[serde(default)]
    pub retry_rules: Vec<RetryRuleConfig>,
    /// `-parallelism=N`
    #[serde(default)]
    pub parallelism: Option<u32>,
}

impl ScenarioConfig {
    /// 이름과 디렉토리만으로 시나리오 설정을 만듭니다.
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            isolate_workdir: false,
            copy_root: None,
            lock: false,
            vars: BTreeMap::new(),
            var_files: Vec::new(),
            env: BTreeMap::new(),
            retry_rules: Vec::new(),
            parallelism: None,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
