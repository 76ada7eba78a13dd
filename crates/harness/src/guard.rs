//! 정리 보장 가드
//!
//! [`CleanupGuard`]는 시나리오 실행 동안 destroy 명령과 작업 디렉토리를 보관합니다.
//! 실행 future가 정리 단계에 도달하기 전에 drop되면(취소) 현재 tokio 런타임에
//! best-effort destroy를 spawn합니다. 정상 경로에서는 destroy를 기다리기 전에
//! [`CleanupGuard::disarm`]으로 해제하므로 destroy가 두 번 실행되지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::runner::{Invocation, ToolRunner};
use crate::workdir::Workdir;

struct Armed<R: ToolRunner> {
    runner: Arc<R>,
    destroy: Invocation,
    timeout: Duration,
    workdir: Workdir,
    scenario: String,
    run_id: String,
}

/// 취소 시 destroy를 보장하는 가드
pub struct CleanupGuard<R: ToolRunner> {
    armed: Option<Armed<R>>,
}

impl<R: ToolRunner> CleanupGuard<R> {
    /// 가드를 설정합니다.
    ///
    /// `workdir`은 가드가 소유하며, 격리된 임시 디렉토리는 destroy가 끝날 때까지 유지됩니다.
    pub fn arm(
        runner: Arc<R>,
        destroy: Invocation,
        timeout: Duration,
        workdir: Workdir,
        scenario: &str,
        run_id: &str,
    ) -> Self {
        Self {
            armed: Some(Armed {
                runner,
                destroy,
                timeout,
                workdir,
                scenario: scenario.to_owned(),
                run_id: run_id.to_owned(),
            }),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// 가드를 해제하고 작업 디렉토리를 돌려받습니다.
    pub fn disarm(mut self) -> Option<Workdir> {
        self.armed.take().map(|armed| armed.workdir)
    }
}

impl<R: ToolRunner> Drop for CleanupGuard<R> {
    fn drop(&mut self) {
        let Some(armed) = self.armed.take() else {
            return;
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(
                scenario = %armed.scenario,
                run_id = %armed.run_id,
                "scenario dropped outside a tokio runtime, resources may leak"
            );
            return;
        };

        warn!(
            scenario = %armed.scenario,
            run_id = %armed.run_id,
            "scenario dropped before cleanup, spawning best-effort destroy"
        );

        handle.spawn(async move {
            let Armed {
                runner,
                destroy,
                timeout,
                workdir,
                scenario,
                run_id,
            } = armed;

            let destroyed = match tokio::time::timeout(timeout, runner.run(&destroy)).await {
                Ok(Ok(output)) if output.is_success() => {
                    info!(scenario = %scenario, run_id = %run_id, "best-effort destroy completed");
                    true
                }
                Ok(Ok(output)) => {
                    error!(
                        scenario = %scenario,
                        run_id = %run_id,
                        exit_code = output.exit_code,
                        "best-effort destroy failed"
                    );
                    false
                }
                Ok(Err(e)) => {
                    error!(scenario = %scenario, run_id = %run_id, error = %e, "best-effort destroy failed");
                    false
                }
                Err(_elapsed) => {
                    error!(scenario = %scenario, run_id = %run_id, "best-effort destroy timed out");
                    false
                }
            };

            // 임시 디렉토리는 destroy가 성공했을 때만 삭제
            if !destroyed {
                if let Some(dir) = workdir.retain() {
                    error!(
                        scenario = %scenario,
                        run_id = %run_id,
                        workdir = %dir.display(),
                        "isolated workdir retained for manual destroy"
                    );
                }
            }
        });
    }
}
