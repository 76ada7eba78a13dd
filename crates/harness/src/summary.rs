//! 변경 요약 파싱: 도구 출력에서 [`ResourceDelta`] 추출
//!
//! 인식하는 요약 줄:
//! - `Apply complete! Resources: N added, N changed, N destroyed.`
//! - `Destroy complete! Resources: N destroyed.`
//! - `Plan: N to add, N to change, N to destroy.` (뒤에 `, N to forget`이 붙을 수 있음)
//! - `No changes.` (변경 없음)
//!
//! 정규식은 파서 생성 시 한 번만 컴파일합니다.

use regex::Regex;

use converge_core::types::ResourceDelta;

use crate::error::HarnessError;

const ANSI_ESCAPE: &str = r"\x1b\[[0-9;]*[A-Za-z]";
const APPLY_SUMMARY: &str = r"Apply complete! Resources: (?:\d+ imported, )?(\d+) added, (\d+) changed, (\d+) destroyed(?:, \d+ forgotten)?\.";
const DESTROY_SUMMARY: &str = r"Destroy complete! Resources: (\d+) destroyed\.";
const PLAN_SUMMARY: &str =
    r"Plan: (?:\d+ to import, )?(\d+) to add, (\d+) to change, (\d+) to destroy(?:, \d+ to forget)?\.";
const NO_CHANGES: &str = r"(?m)^\s*No changes\.";

/// 요약 줄 파서
#[derive(Debug, Clone)]
pub struct SummaryParser {
    ansi: Regex,
    apply: Regex,
    destroy: Regex,
    plan: Regex,
    no_changes: Regex,
}

impl SummaryParser {
    pub fn new() -> Result<Self, HarnessError> {
        Ok(Self {
            ansi: compile(ANSI_ESCAPE)?,
            apply: compile(APPLY_SUMMARY)?,
            destroy: compile(DESTROY_SUMMARY)?,
            plan: compile(PLAN_SUMMARY)?,
            no_changes: compile(NO_CHANGES)?,
        })
    }

    /// 출력에서 변경량을 읽어냅니다.
    ///
    /// 여러 요약이 있으면 apply > destroy > plan > "No changes." 순으로 사용하고,
    /// 같은 종류가 여러 번 나오면 마지막 줄을 사용합니다.
    /// 인식 가능한 요약이 없으면 `None`을 반환합니다.
    pub fn parse(&self, output: &str) -> Option<ResourceDelta> {
        let clean = self.ansi.replace_all(output, "");

        if let Some(caps) = self.apply.captures_iter(&clean).last() {
            return Some(ResourceDelta::new(
                number(&caps, 1),
                number(&caps, 2),
                number(&caps, 3),
            ));
        }
        if let Some(caps) = self.destroy.captures_iter(&clean).last() {
            return Some(ResourceDelta::new(0, 0, number(&caps, 1)));
        }
        if let Some(caps) = self.plan.captures_iter(&clean).last() {
            return Some(ResourceDelta::new(
                number(&caps, 1),
                number(&caps, 2),
                number(&caps, 3),
            ));
        }
        if self.no_changes.is_match(&clean) {
            return Some(ResourceDelta::ZERO);
        }
        None
    }
}

fn compile(pattern: &str) -> Result<Regex, HarnessError> {
    Regex::new(pattern).map_err(|e| HarnessError::Config {
        field: "summary.pattern".to_owned(),
        reason: e.to_string(),
    })
}

fn number(caps: &regex::Captures<'_>, idx: usize) -> u64 {
    caps.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(u64::MAX)
}
