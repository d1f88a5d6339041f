//! 错误恢复引擎
//!
//! 根据 FlowError 类型返回 RecoveryAction，供 Planner 与编排器决定是重试、并入校验失败、上报还是终止。
//! 取消与超时永远不重试。

use crate::core::{FlowError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &FlowError) -> RecoveryAction {
        match err {
            FlowError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous output could not be used: {raw}. \
                Output ONLY one JSON object of the form \
                {{\"steps\": [{{\"tool_name\": <string or null>, \"description\": <string>, \"feasibility\": <string>, \"status\": \"plan\"}}]}}. \
                Use only tool names from the available list, or null. No Markdown, no extra text."
            )),
            FlowError::ToolDispatchError(msg) => RecoveryAction::FoldIntoValidation(format!(
                "Tool dispatch failed: {msg}"
            )),
            FlowError::PlannerMalformedOutput { .. }
            | FlowError::ValidatorSchemaViolation(_)
            | FlowError::JudgeSchemaViolation(_)
            | FlowError::UnknownJob(_)
            | FlowError::Config(_)
            | FlowError::LlmError(_) => RecoveryAction::Surface(err.to_string()),
            FlowError::Cancelled | FlowError::DecisionTimeout(_) => RecoveryAction::Abort,
        }
    }
}
