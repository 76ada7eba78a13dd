//! 시나리오: 구성 디렉토리와 실행 옵션
//!
//! [`Scenario`]는 생성 후 변경되지 않으며 실행 한 번에 하나씩 만듭니다.
//! 실행 ID는 빌드 시 생성되어 `TF_VAR_<namespace_var>`로 도구에 전달됩니다.
//!
//! # 사용 예시
//! ```ignore
//! use converge_harness::ScenarioBuilder;
//!
//! let scenario = ScenarioBuilder::new("default", "fixtures/default")
//!     .var("region", "local")
//!     .build()?;
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::HarnessError;
use crate::retry::RetryPolicy;

/// 하나의 테스트 구성과 그 옵션
#[derive(Debug, Clone)]
pub struct Scenario {
    name: String,
    dir: PathBuf,
    copy_root: Option<PathBuf>,
    run_id: String,
    no_color: bool,
    lock: bool,
    parallelism: Option<u32>,
    isolate_workdir: bool,
    vars: BTreeMap<String, String>,
    var_files: Vec<PathBuf>,
    env: BTreeMap<String, String>,
    retry: Arc<RetryPolicy>,
}

impl Scenario {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 격리 실행 시 복사할 루트 (없으면 저장소 루트 탐색)
    pub fn copy_root(&self) -> Option<&Path> {
        self.copy_root.as_deref()
    }

    /// 실행 ID (uuid v4 앞 8자리 hex)
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn no_color(&self) -> bool {
        self.no_color
    }

    pub fn lock(&self) -> bool {
        self.lock
    }

    pub fn parallelism(&self) -> Option<u32> {
        self.parallelism
    }

    pub fn isolate_workdir(&self) -> bool {
        self.isolate_workdir
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn var_files(&self) -> &[PathBuf] {
        &self.var_files
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// 같은 시나리오를 다른 디렉토리에서 실행하기 위한 사본
    pub(crate) fn relocated(&self, dir: PathBuf) -> Self {
        Self {
            dir,
            ..self.clone()
        }
    }

    /// `init -input=false [-no-color]`
    pub fn init_args(&self) -> Vec<String> {
        let mut args = vec!["init".to_owned(), "-input=false".to_owned()];
        self.push_color(&mut args);
        args
    }

    /// `validate [-no-color]`
    pub fn validate_args(&self) -> Vec<String> {
        let mut args = vec!["validate".to_owned()];
        self.push_color(&mut args);
        args
    }

    /// `apply -input=false -auto-approve -lock=<bool> [-no-color] [-parallelism=N] [-var ...] [-var-file=...]`
    pub fn apply_args(&self) -> Vec<String> {
        let mut args = vec![
            "apply".to_owned(),
            "-input=false".to_owned(),
            "-auto-approve".to_owned(),
            format!("-lock={}", self.lock),
        ];
        self.push_color(&mut args);
        if let Some(n) = self.parallelism {
            args.push(format!("-parallelism={n}"));
        }
        self.push_vars(&mut args);
        args
    }

    /// `destroy -input=false -auto-approve -lock=<bool> [-no-color] [-var ...] [-var-file=...]`
    pub fn destroy_args(&self) -> Vec<String> {
        let mut args = vec![
            "destroy".to_owned(),
            "-input=false".to_owned(),
            "-auto-approve".to_owned(),
            format!("-lock={}", self.lock),
        ];
        self.push_color(&mut args);
        self.push_vars(&mut args);
        args
    }

    /// `plan -input=false -lock=<bool> -detailed-exitcode [-no-color] [-var ...] [-var-file=...]`
    pub fn plan_args(&self) -> Vec<String> {
        let mut args = vec![
            "plan".to_owned(),
            "-input=false".to_owned(),
            format!("-lock={}", self.lock),
            "-detailed-exitcode".to_owned(),
        ];
        self.push_color(&mut args);
        self.push_vars(&mut args);
        args
    }

    /// `output -json [-no-color]`
    pub fn output_args(&self) -> Vec<String> {
        let mut args = vec!["output".to_owned(), "-json".to_owned()];
        self.push_color(&mut args);
        args
    }

    fn push_color(&self, args: &mut Vec<String>) {
        if self.no_color {
            args.push("-no-color".to_owned());
        }
    }

    fn push_vars(&self, args: &mut Vec<String>) {
        for (key, value) in &self.vars {
            args.push("-var".to_owned());
            args.push(format!("{key}={value}"));
        }
        for file in &self.var_files {
            args.push(format!("-var-file={}", file.display()));
        }
    }
}

/// 시나리오 빌더
///
/// 3개 이상의 설정 필드가 있으므로 빌더 패턴을 사용합니다.
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    name: String,
    dir: PathBuf,
    copy_root: Option<PathBuf>,
    run_id: Option<String>,
    no_color: bool,
    lock: bool,
    parallelism: Option<u32>,
    isolate_workdir: bool,
    vars: BTreeMap<String, String>,
    var_files: Vec<PathBuf>,
    env: BTreeMap<String, String>,
    retry: Option<Arc<RetryPolicy>>,
}

impl ScenarioBuilder {
    /// 이름과 구성 디렉토리로 빌더를 생성합니다.
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            copy_root: None,
            run_id: None,
            no_color: true,
            lock: false,
            parallelism: None,
            isolate_workdir: false,
            vars: BTreeMap::new(),
            var_files: Vec::new(),
            env: BTreeMap::new(),
            retry: None,
        }
    }

    /// `-no-color` 전달 여부를 설정합니다 (기본값: true).
    pub fn no_color(mut self, no_color: bool) -> Self {
        self.no_color = no_color;
        self
    }

    /// 상태 잠금 사용 여부를 설정합니다 (기본값: false).
    pub fn lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    /// `-parallelism=N`을 설정합니다.
    pub fn parallelism(mut self, n: u32) -> Self {
        self.parallelism = Some(n);
        self
    }

    /// 실행 전 임시 디렉토리 복사 여부를 설정합니다.
    pub fn isolate_workdir(mut self, isolate: bool) -> Self {
        self.isolate_workdir = isolate;
        self
    }

    /// 격리 실행 시 복사할 루트를 설정합니다. 구성 디렉토리는 이 아래에 있어야 합니다.
    pub fn copy_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.copy_root = Some(root.into());
        self
    }

    /// 입력 변수를 추가합니다.
    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// 입력 변수를 일괄 추가합니다.
    pub fn vars(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.vars.extend(vars);
        self
    }

    /// 변수 파일을 추가합니다.
    pub fn var_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.var_files.push(path.into());
        self
    }

    /// 하위 프로세스 환경변수를 추가합니다.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// 하위 프로세스 환경변수를 일괄 추가합니다.
    pub fn envs(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    /// 재시도 정책을 설정합니다 (기본값: 알려진 일시적 에러 목록).
    pub fn retry_policy(mut self, policy: impl Into<Arc<RetryPolicy>>) -> Self {
        self.retry = Some(policy.into());
        self
    }

    /// 실행 ID를 고정합니다 (기본값: 무작위 생성).
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// 시나리오를 생성합니다.
    pub fn build(self) -> Result<Scenario, HarnessError> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::Config {
                field: "scenario.name".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        if self.dir.as_os_str().is_empty() {
            return Err(HarnessError::Config {
                field: format!("scenarios.{}.dir", self.name),
                reason: "must not be empty".to_owned(),
            });
        }
        if self.parallelism == Some(0) {
            return Err(HarnessError::Config {
                field: format!("scenarios.{}.parallelism", self.name),
                reason: "must be greater than 0".to_owned(),
            });
        }

        Ok(Scenario {
            name: self.name,
            dir: self.dir,
            copy_root: self.copy_root,
            run_id: self.run_id.unwrap_or_else(new_run_id),
            no_color: self.no_color,
            lock: self.lock,
            parallelism: self.parallelism,
            isolate_workdir: self.isolate_workdir,
            vars: self.vars,
            var_files: self.var_files,
            env: self.env,
            retry: self
                .retry
                .unwrap_or_else(|| Arc::new(RetryPolicy::with_default_rules())),
        })
    }
}

/// uuid v4의 앞 8자리 hex
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_owned()
}
