//! Step 派发器
//!
//! 派发时把 Step 的当前工具解析为执行器（经能力表的 executor 字段），加超时调用并输出结构化审计日志（JSON）。
//! 已是 Submitted 的 Step 直接短路，不再调用工具。
//! 执行器缺失、超时、报错都折叠为 DispatchOutcome::Error，与「结果不对」走同一条失败路径。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::capability::CapabilityRegistry;
use crate::core::FlowError;
use crate::flow::{preview, EventSink, ExecutionKind, FlowEvent};
use crate::plan::{Step, StepStatus};
use crate::tools::{Executor, ExecutorRegistry, JobStatus, ToolOutcome, ToolResult};

/// 派发结果
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Completed(ToolResult),
    /// 新提交的异步任务
    Submitted { job_id: String },
    /// Step 已在等待异步任务，未调用工具
    AlreadySubmitted { job_id: String },
    Error(String),
}

pub struct Dispatcher {
    capabilities: Arc<CapabilityRegistry>,
    executors: Arc<ExecutorRegistry>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        capabilities: Arc<CapabilityRegistry>,
        executors: Arc<ExecutorRegistry>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            capabilities,
            executors,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 工具 -> 当前执行器（每次派发重新解析）
    pub fn resolve(&self, tool: &str) -> Result<Arc<dyn Executor>, String> {
        let entry = self
            .capabilities
            .get(tool)
            .ok_or_else(|| format!("Unknown tool: {tool}"))?;
        self.executors.get(&entry.executor).ok_or_else(|| {
            format!(
                "Executor '{}' for tool '{}' is not available (registered: {})",
                entry.executor,
                entry.name,
                self.executors.names().join(", ")
            )
        })
    }

    /// 派发一个 Step，返回 (结果, 新状态)；只有取消会返回 Err
    pub async fn dispatch(
        &self,
        step_index: usize,
        step: &Step,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<(DispatchOutcome, StepStatus), FlowError> {
        if step.status == StepStatus::Submitted {
            let job_id = step.job_id.clone().unwrap_or_default();
            tracing::debug!(step = step_index, tool = %step.tool_name, job_id = %job_id, "step already submitted, skip dispatch");
            return Ok((DispatchOutcome::AlreadySubmitted { job_id }, StepStatus::Submitted));
        }
        if cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        let kind = ExecutionKind::of(step);
        tracing::info!(step = step_index, tool = %step.tool_name, kind = ?kind, "starting tool");
        events.emit(FlowEvent::ToolStarting {
            step: step_index,
            tool: step.tool_name.clone(),
            kind,
        });

        let executor = match self.resolve(&step.tool_name) {
            Ok(e) => e,
            Err(e) => {
                audit(&step.tool_name, "-", false, "unresolved", 0, &Value::Null);
                return Ok((DispatchOutcome::Error(e), StepStatus::InProgress));
            }
        };

        let args = step.args.clone().unwrap_or_else(|| Value::Object(Default::default()));
        let start = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(FlowError::Cancelled),
            r = timeout(self.timeout, executor.invoke(&step.tool_name, args.clone())) => r,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let (ok, outcome_label) = match &result {
            Ok(Ok(ToolOutcome::Completed(_))) => (true, "ok"),
            Ok(Ok(ToolOutcome::Submitted { .. })) => (true, "submitted"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        audit(&step.tool_name, executor.name(), ok, outcome_label, duration_ms, &args);

        Ok(match result {
            Ok(Ok(ToolOutcome::Completed(r))) => (DispatchOutcome::Completed(r), StepStatus::InProgress),
            Ok(Ok(ToolOutcome::Submitted { job_id, status })) => {
                tracing::info!(step = step_index, tool = %step.tool_name, job_id = %job_id, status = %status, "job submitted");
                (DispatchOutcome::Submitted { job_id }, StepStatus::Submitted)
            }
            Ok(Err(e)) => (
                DispatchOutcome::Error(format!("Tool '{}' failed: {}", step.tool_name, e)),
                StepStatus::InProgress,
            ),
            Err(_) => (
                DispatchOutcome::Error(format!(
                    "Tool '{}' timed out after {}s",
                    step.tool_name,
                    self.timeout.as_secs()
                )),
                StepStatus::InProgress,
            ),
        })
    }

    /// 查询 Submitted Step 的异步任务状态（不对任务本身设超时，只对查询调用设超时）
    pub async fn job_status(
        &self,
        step: &Step,
        cancel: &CancellationToken,
    ) -> Result<Result<JobStatus, String>, FlowError> {
        let Some(job_id) = step.job_id.as_deref() else {
            return Ok(Err("step has no job id".to_string()));
        };
        let executor = match self.resolve(&step.tool_name) {
            Ok(e) => e,
            Err(e) => return Ok(Err(e)),
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(FlowError::Cancelled),
            r = timeout(self.timeout, executor.job_status(job_id)) => Ok(match r {
                Ok(status) => status,
                Err(_) => Err(format!("job status query for '{job_id}' timed out")),
            }),
        }
    }
}

fn audit(tool: &str, executor: &str, ok: bool, outcome: &str, duration_ms: u64, args: &Value) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "executor": executor,
        "ok": ok,
        "outcome": outcome,
        "duration_ms": duration_ms,
        "args_preview": preview(&args.to_string(), 200),
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}
