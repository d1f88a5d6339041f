//! Step 与 Plan
//!
//! Step 的描述对外是一个字段（`description()`），内部拆为原始描述与失败批注，只在读取/派发时拼接；
//! 换工具时丢弃批注、保留原始描述。`tool_lineage` 记录该 Step 依次持有过的工具名，即「已尝试集合」。
//! `failures` 记录整个谱系内每一次校验失败（换工具也不清空），补救建议从这里收集。

use serde::Serialize;
use serde_json::Value;

/// Step 生命周期状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Plan,
    InProgress,
    Submitted,
    Success,
    Failed,
}

impl StepStatus {
    /// Success / Failed 为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Failed)
    }
}

/// 谱系内的一次校验失败
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailureNote {
    pub tool: String,
    pub reason: String,
}

const RETRY_NOTE: &str =
    "Note: the previous attempt failed validation for the following reason, please improve:";

/// 一次工具调用尝试及其重试/校验生命周期
#[derive(Clone, Debug, Serialize)]
pub struct Step {
    /// 当前持有的工具（规范名；直答时为哨兵 llm_tool）
    pub tool_name: String,
    original_description: String,
    failure_annotations: Vec<String>,
    /// Planner 给出的可行性说明
    pub feasibility: String,
    pub status: StepStatus,
    /// 该 Step 谱系内累计的校验失败次数（换工具不清零）
    pub retry_count: u32,
    pub validation_failure_reason: Option<String>,
    tool_lineage: Vec<String>,
    failures: Vec<FailureNote>,
    /// Submitted 期间的异步任务 id
    pub job_id: Option<String>,
    /// 最近一次生成的工具参数
    pub args: Option<Value>,
    /// 最近一次工具结果（文本）
    pub last_outcome: Option<String>,
}

impl Step {
    pub fn new(
        tool_name: impl Into<String>,
        description: impl Into<String>,
        feasibility: impl Into<String>,
    ) -> Self {
        let tool_name = tool_name.into();
        Self {
            tool_lineage: vec![tool_name.clone()],
            tool_name,
            original_description: description.into(),
            failure_annotations: Vec::new(),
            failures: Vec::new(),
            feasibility: feasibility.into(),
            status: StepStatus::Plan,
            retry_count: 0,
            validation_failure_reason: None,
            job_id: None,
            args: None,
            last_outcome: None,
        }
    }

    /// 对外的描述：原始描述 + 每次失败的批注
    pub fn description(&self) -> String {
        let mut out = self.original_description.clone();
        for reason in &self.failure_annotations {
            out.push_str("\n\n");
            out.push_str(RETRY_NOTE);
            out.push(' ');
            out.push_str(reason);
        }
        out
    }

    pub fn failure_annotations(&self) -> &[String] {
        &self.failure_annotations
    }

    /// 谱系内全部校验失败，按发生顺序
    pub fn failures(&self) -> &[FailureNote] {
        &self.failures
    }

    /// 依次持有过的工具名（首个为 Planner 选定的工具）
    pub fn lineage(&self) -> &[String] {
        &self.tool_lineage
    }

    pub fn original_tool(&self) -> &str {
        self.tool_lineage
            .first()
            .map(String::as_str)
            .unwrap_or(self.tool_name.as_str())
    }

    pub fn has_tried(&self, tool: &str) -> bool {
        self.tool_lineage.iter().any(|t| t == tool)
    }

    pub(crate) fn mark_in_progress(&mut self) {
        self.status = StepStatus::InProgress;
    }

    pub(crate) fn mark_submitted(&mut self, job_id: impl Into<String>) {
        self.status = StepStatus::Submitted;
        self.job_id = Some(job_id.into());
    }

    /// 异步任务结束：回到 InProgress，等待校验
    pub(crate) fn resume_from_job(&mut self) {
        self.status = StepStatus::InProgress;
        self.job_id = None;
    }

    /// 记一次校验失败（不改状态）
    pub(crate) fn record_failure(&mut self, reason: &str) {
        self.retry_count += 1;
        self.validation_failure_reason = Some(reason.to_string());
        self.failures.push(FailureNote {
            tool: self.tool_name.clone(),
            reason: reason.to_string(),
        });
    }

    /// 同一工具重试：把失败原因原样追加到描述
    pub(crate) fn annotate_failure(&mut self, reason: &str) {
        self.failure_annotations.push(reason.to_string());
        self.status = StepStatus::InProgress;
    }

    /// 换成备选工具：批注丢弃，描述回到原始值，计数与失败记录不清零
    pub(crate) fn swap_tool(&mut self, tool: impl Into<String>) {
        let tool = tool.into();
        self.tool_lineage.push(tool.clone());
        self.tool_name = tool;
        self.failure_annotations.clear();
        self.args = None;
        self.status = StepStatus::InProgress;
    }

    pub(crate) fn mark_success(&mut self) {
        self.status = StepStatus::Success;
        self.validation_failure_reason = None;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.status = StepStatus::Failed;
    }
}

/// 一次或多次规划得到的有序 Step 列表
///
/// `floor` 之前的 Step 已被重规划跳过；当前 Step 为 floor 之后第一个非终态 Step，
/// 若先遇到 Failed 则没有当前 Step（不自动越过失败，只有重规划能继续）。
#[derive(Clone, Debug, Default, Serialize)]
pub struct Plan {
    steps: Vec<Step>,
    floor: usize,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub(crate) fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.steps.get_mut(index)
    }

    /// 当前 Step 下标
    pub fn current_index(&self) -> Option<usize> {
        for (i, step) in self.steps.iter().enumerate().skip(self.floor) {
            match step.status {
                StepStatus::Success => continue,
                StepStatus::Failed => return None,
                _ => return Some(i),
            }
        }
        None
    }

    pub fn current(&self) -> Option<&Step> {
        self.current_index().and_then(|i| self.steps.get(i))
    }

    /// floor 之后是否停在一个 Failed Step 上
    pub fn is_blocked(&self) -> bool {
        self.steps
            .iter()
            .skip(self.floor)
            .find(|s| s.status != StepStatus::Success)
            .map(|s| s.status == StepStatus::Failed)
            .unwrap_or(false)
    }

    /// 追加一次规划结果：尚未开始的旧 Step 被丢弃，新 Step 从此处开始成为当前候选
    pub(crate) fn extend(&mut self, new_steps: Vec<Step>) {
        let keep = self
            .steps
            .iter()
            .rposition(|s| s.status != StepStatus::Plan)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.steps.truncate(keep);
        self.floor = self.steps.len();
        self.steps.extend(new_steps);
    }
}
