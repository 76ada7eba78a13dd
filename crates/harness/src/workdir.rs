//! 시나리오 작업 디렉토리 준비
//!
//! `isolate_workdir`가 설정된 시나리오는 복사 루트 전체를 임시 디렉토리로 복사한 뒤
//! 그 안에서 구성 디렉토리에 해당하는 하위 경로에서 실행합니다. 그래서
//! `../../modules/x` 같은 상위 상대 경로 모듈과 변수 파일이 복사본에서도 그대로
//! 해석됩니다. 로컬 상태, 플러그인 캐시, 숨김 항목은 복사하지 않으므로 같은
//! 디렉토리를 동시에 실행해도 상태를 공유하지 않습니다.
//!
//! 복사 루트는 `copy_root`로 지정하며, 지정하지 않으면 구성 디렉토리에서 위로
//! 올라가며 찾은 첫 `.git` 보유 디렉토리, 그것도 없으면 구성 디렉토리 자체입니다.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::HarnessError;
use crate::scenario::Scenario;

/// 시나리오가 실제로 실행되는 디렉토리
///
/// 격리된 경우 값이 drop될 때 임시 디렉토리가 삭제됩니다.
#[derive(Debug)]
pub enum Workdir {
    /// 원본 디렉토리에서 직접 실행
    Shared(PathBuf),
    /// 임시 복사본에서 실행
    Isolated {
        /// 복사 루트의 사본
        temp: TempDir,
        /// 사본 안에서 구성 디렉토리에 해당하는 경로
        path: PathBuf,
    },
}

impl Workdir {
    /// 시나리오의 작업 디렉토리를 준비합니다.
    ///
    /// 원본 디렉토리가 없거나 디렉토리가 아니면 `HarnessError::Setup`을 반환합니다.
    /// 구성 디렉토리가 복사 루트 밖에 있어도 `HarnessError::Setup`입니다.
    pub async fn prepare(scenario: &Scenario) -> Result<Self, HarnessError> {
        ensure_config_dir(scenario).await?;

        if !scenario.isolate_workdir() {
            return Ok(Self::Shared(scenario.dir().to_path_buf()));
        }

        let source = scenario.dir().to_path_buf();
        let explicit_root = scenario.copy_root().map(Path::to_path_buf);
        let prefix = format!("converge-{}-{}-", scenario.name(), scenario.run_id());
        let name = scenario.name().to_owned();

        let (temp, subpath) = tokio::task::spawn_blocking(
            move || -> io::Result<(TempDir, PathBuf)> {
                let (root, subpath) = resolve_copy_root(&source, explicit_root.as_deref())?;
                let temp = tempfile::Builder::new().prefix(&prefix).tempdir()?;
                copy_config_tree(&root, temp.path())?;
                Ok((temp, subpath))
            },
        )
        .await
        .map_err(|e| HarnessError::Setup {
            scenario: name.clone(),
            reason: format!("workdir copy task failed: {e}"),
        })?
        .map_err(|e| HarnessError::Setup {
            scenario: name.clone(),
            reason: format!("failed to copy configuration into isolated workdir: {e}"),
        })?;

        let path = if subpath.as_os_str().is_empty() {
            temp.path().to_path_buf()
        } else {
            temp.path().join(&subpath)
        };
        debug!(
            scenario = %name,
            copy = %temp.path().display(),
            workdir = %path.display(),
            "prepared isolated workdir"
        );
        Ok(Self::Isolated { temp, path })
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Shared(path) => path,
            Self::Isolated { path, .. } => path,
        }
    }

    pub fn is_isolated(&self) -> bool {
        matches!(self, Self::Isolated { .. })
    }

    /// 임시 복사본을 삭제하지 않고 남깁니다.
    ///
    /// destroy가 실패하면 남은 리소스의 유일한 로컬 상태가 이 디렉토리에 있습니다.
    /// 격리된 경우에만 상태가 있는 작업 경로를 반환합니다.
    pub fn retain(self) -> Option<PathBuf> {
        match self {
            Self::Shared(_) => None,
            Self::Isolated { temp, path } => {
                let _copy = temp.keep();
                Some(path)
            }
        }
    }
}

/// 복사 루트와 그 안에서 구성 디렉토리의 상대 경로를 결정합니다.
fn resolve_copy_root(dir: &Path, explicit: Option<&Path>) -> io::Result<(PathBuf, PathBuf)> {
    let dir = dir.canonicalize()?;
    let root = match explicit {
        Some(root) => root.canonicalize()?,
        None => find_repo_root(&dir).unwrap_or_else(|| dir.clone()),
    };
    let subpath = dir
        .strip_prefix(&root)
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "configuration directory {} is outside copy root {}",
                    dir.display(),
                    root.display()
                ),
            )
        })?
        .to_path_buf();
    Ok((root, subpath))
}

/// `.git`이 있는 가장 가까운 상위 디렉토리
fn find_repo_root(dir: &Path) -> Option<PathBuf> {
    dir.ancestors()
        .find(|candidate| candidate.join(".git").exists())
        .map(Path::to_path_buf)
}

/// 구성 디렉토리가 존재하고 읽을 수 있는 디렉토리인지 확인합니다.
pub(crate) async fn ensure_config_dir(scenario: &Scenario) -> Result<(), HarnessError> {
    let dir = scenario.dir();
    let metadata = tokio::fs::metadata(dir)
        .await
        .map_err(|e| HarnessError::Setup {
            scenario: scenario.name().to_owned(),
            reason: format!("configuration directory {} is not accessible: {e}", dir.display()),
        })?;
    if !metadata.is_dir() {
        return Err(HarnessError::Setup {
            scenario: scenario.name().to_owned(),
            reason: format!("{} is not a directory", dir.display()),
        });
    }
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| HarnessError::Setup {
            scenario: scenario.name().to_owned(),
            reason: format!("configuration directory {} is not readable: {e}", dir.display()),
        })?;
    entries.next_entry().await.map_err(|e| HarnessError::Setup {
        scenario: scenario.name().to_owned(),
        reason: format!("configuration directory {} is not readable: {e}", dir.display()),
    })?;
    Ok(())
}

/// 복사에서 제외할 항목: 숨김 항목 (`.git`, `.terraform`, 잠금 파일 포함), 로컬 상태
fn is_excluded(name: &str) -> bool {
    name.starts_with('.') || name.contains(".tfstate")
}

/// 심볼릭 링크는 따라가지 않습니다. 파일을 가리키면 내용을 복사하고,
/// 디렉토리를 가리키면 (상위 디렉토리 순환 방지) 건너뜁니다.
fn copy_config_tree(from: &Path, to: &Path) -> io::Result<()> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name();
        if is_excluded(&name.to_string_lossy()) {
            continue;
        }
        let source = entry.path();
        let target = to.join(&name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            copy_config_tree(&source, &target)?;
        } else if file_type.is_symlink() {
            match fs::metadata(&source) {
                Ok(meta) if meta.is_file() => {
                    fs::copy(&source, &target)?;
                }
                Ok(_) => {
                    warn!(link = %source.display(), "skipping symlinked directory in configuration");
                }
                Err(e) => {
                    warn!(link = %source.display(), error = %e, "skipping dangling symlink in configuration");
                }
            }
        } else {
            fs::copy(&source, &target)?;
        }
    }
    Ok(())
}
