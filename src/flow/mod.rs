//! 决策层：Planner / 参数生成 / Validator / 重试替换控制器 / Judge，以及过程事件
//!
//! 每一次模型调用都经过 CallGuard：带超时、可被会话取消，且不重试。

pub mod args;
pub mod controller;
pub mod events;
pub mod judge;
pub mod planner;
pub mod validator;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::FlowError;
use crate::llm::LlmClient;
use crate::memory::Message;

pub use args::ArgsComposer;
pub use controller::{ControllerDecision, RetryController};
pub use events::{EventSink, ExecutionKind, FlowEvent};
pub use judge::{Judge, JudgeCategory, Judgement};
pub use planner::{PlanRequest, Planner};
pub use validator::Validator;

/// 各类 system prompt 的首行标记，用于区分调用类型（Mock / 测试据此分流）
pub mod markers {
    pub const PLAN: &str = "You are the task planner of a tool orchestrator.";
    pub const ARGS: &str = "You are the argument composer of a tool orchestrator.";
    pub const VALIDATE: &str = "You are the result validator of a tool orchestrator.";
    pub const JUDGE: &str = "You are the goal-completion judge of a tool orchestrator.";
    pub const ANSWER: &str = "You are a knowledgeable assistant answering directly without tools.";
}

/// 单次决策调用的护栏：会话取消 + 调用超时
#[derive(Clone, Debug)]
pub struct CallGuard {
    pub cancel: CancellationToken,
    pub timeout: Duration,
}

impl CallGuard {
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self { cancel, timeout }
    }

    /// 调用模型；取消与超时立即返回，不重试
    pub async fn complete(
        &self,
        llm: &dyn LlmClient,
        messages: &[Message],
    ) -> Result<String, FlowError> {
        if self.cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(FlowError::Cancelled),
            res = tokio::time::timeout(self.timeout, llm.complete(messages)) => match res {
                Ok(Ok(text)) => Ok(text),
                Ok(Err(e)) => Err(FlowError::LlmError(e)),
                Err(_) => Err(FlowError::DecisionTimeout(self.timeout.as_secs())),
            },
        }
    }
}

/// 从模型输出中取出 JSON 对象文本（```json 代码块或首个 `{` 到最后一个 `}`）
///
/// 只用于 Planner 与参数生成；Validator / Judge 要求严格输出，不做提取。
pub fn extract_json_block(output: &str) -> &str {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// 截断过长文本（日志、事件与 prompt 预览）
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    }
}
