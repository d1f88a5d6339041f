//! 编排过程事件：用于前端/日志展示规划、工具调用、校验、重试、换工具与判定

use serde::Serialize;
use tokio::sync::mpsc;

use crate::plan::Step;

/// 本次派发属于哪种执行：首次 / 同工具重试 / 换工具后
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    Fresh,
    Retry,
    SwitchedTool,
}

impl ExecutionKind {
    pub fn of(step: &Step) -> Self {
        if step.retry_count == 0 {
            ExecutionKind::Fresh
        } else if step.lineage().len() > 1 && step.failure_annotations().is_empty() {
            ExecutionKind::SwitchedTool
        } else {
            ExecutionKind::Retry
        }
    }
}

/// 单个过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// 得到新计划（首次或重规划）
    PlanReady { tools: Vec<String>, replan: bool },
    /// 即将调用工具
    ToolStarting {
        step: usize,
        tool: String,
        kind: ExecutionKind,
    },
    /// 工具返回异步任务，本轮结束
    JobSubmitted {
        step: usize,
        tool: String,
        job_id: String,
    },
    Validation {
        step: usize,
        tool: String,
        passed: bool,
        reason: String,
    },
    /// 同工具重试
    Retry {
        step: usize,
        tool: String,
        retry_count: u32,
    },
    /// 换成备选工具
    ToolSwitched { step: usize, from: String, to: String },
    StepFailed {
        step: usize,
        tool: String,
        reason: String,
    },
    Judged {
        finished: bool,
        category: String,
        reason: String,
    },
    /// 带失败上下文重新规划
    Replanning { reason: String },
    /// 提前截断（评测钩子）
    Truncated { mode: String },
    Error { text: String },
}

/// 可选的事件发送端；接收方关闭时静默丢弃
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<FlowEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<FlowEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: FlowEvent) {
        if let Some(ref tx) = self.tx {
            let _ = tx.send(event);
        }
    }
}
