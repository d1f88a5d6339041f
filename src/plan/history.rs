//! History：已离开 InProgress 的 Step 的不可变快照 + 校验结论
//!
//! 只追加；对外只暴露 `&[HistoryStep]`，已写入的条目无法被修改。

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FailureNote, Step, StepStatus};

/// Validator 结论：`{"passed": bool, "reason": string}`，不允许多余字段
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Verdict {
    pub passed: bool,
    pub reason: String,
}

impl Verdict {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// 一次 Step 结算的快照
#[derive(Clone, Debug, Serialize)]
pub struct HistoryStep {
    /// 在 Plan 中的下标
    pub step_index: usize,
    pub tool_name: String,
    pub tool_lineage: Vec<String>,
    pub description: String,
    pub status: StepStatus,
    pub retry_count: u32,
    pub validation_failure_reason: Option<String>,
    /// 谱系内每一次校验失败（含换工具之前的）
    pub failures: Vec<FailureNote>,
    pub args: Option<serde_json::Value>,
    pub outcome: Option<String>,
    pub verdict: Verdict,
    /// 记录时仍可尝试的补救工具（声明的备选 + 失败原因中提到的已注册工具）
    pub remedies: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryStep {
    pub fn snapshot(step_index: usize, step: &Step, verdict: Verdict, remedies: Vec<String>) -> Self {
        Self {
            step_index,
            tool_name: step.tool_name.clone(),
            tool_lineage: step.lineage().to_vec(),
            description: step.description(),
            status: step.status,
            retry_count: step.retry_count,
            validation_failure_reason: step.validation_failure_reason.clone(),
            failures: step.failures().to_vec(),
            args: step.args.clone(),
            outcome: step.last_outcome.clone(),
            verdict,
            remedies,
            recorded_at: Utc::now(),
        }
    }
}

/// 只追加的 History
#[derive(Clone, Debug, Default, Serialize)]
pub struct History {
    entries: Vec<HistoryStep>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, entry: HistoryStep) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[HistoryStep] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 从第 start 条起的副本
    pub fn since(&self, start: usize) -> History {
        History {
            entries: self.entries.get(start..).map(<[_]>::to_vec).unwrap_or_default(),
        }
    }

    pub fn last(&self) -> Option<&HistoryStep> {
        self.entries.last()
    }

    /// 最后一条是 Failed，或没有任何成功的 Step
    pub fn ends_in_failure(&self) -> bool {
        let no_success = !self.entries.iter().any(|e| e.status == StepStatus::Success);
        no_success || self.last().is_some_and(|e| e.status == StepStatus::Failed)
    }

    /// History 中所有 Step 持有过的工具
    pub fn attempted_tools(&self) -> HashSet<&str> {
        self.entries
            .iter()
            .flat_map(|e| e.tool_lineage.iter().map(String::as_str))
            .collect()
    }

    /// 被提到过、但在整个 History 中从未尝试过的补救工具（按首次出现顺序）
    pub fn untried_remedies(&self) -> Vec<String> {
        let attempted = self.attempted_tools();
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .flat_map(|e| e.remedies.iter())
            .filter(|r| !attempted.contains(r.as_str()))
            .filter(|r| seen.insert(r.as_str()))
            .cloned()
            .collect()
    }

    /// 已失败的尝试：(工具谱系, 失败原因)
    pub fn exhausted_attempts(&self) -> Vec<(Vec<String>, String)> {
        self.entries
            .iter()
            .filter(|e| e.status == StepStatus::Failed)
            .map(|e| {
                (
                    e.tool_lineage.clone(),
                    e.validation_failure_reason
                        .clone()
                        .unwrap_or_else(|| e.verdict.reason.clone()),
                )
            })
            .collect()
    }
}
