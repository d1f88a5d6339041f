//! 编排错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 FlowError 决定 RetryWithPrompt / FoldIntoValidation / Surface / Abort。
//! 校验不通过不是错误（见 flow::validator 的 Verdict），只有真正需要中断或上报的情况才走这里。

use thiserror::Error;

/// 编排过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    /// Planner 输出格式错误（单次解析失败，可重试）
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    /// Planner 重试耗尽仍无法得到可用计划，对会话是致命的
    #[error("Planner output unusable after {attempts} attempts: {detail}")]
    PlannerMalformedOutput { attempts: u32, detail: String },

    #[error("Validator output violates schema: {0}")]
    ValidatorSchemaViolation(String),

    #[error("Judge output violates schema: {0}")]
    JudgeSchemaViolation(String),

    /// 工具不可用 / 超时 / 报错；与「结果不对」走同一条校验失败路径
    #[error("Tool dispatch failed: {0}")]
    ToolDispatchError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    /// 编排器自身的决策调用超时（不作用于异步任务）
    #[error("Decision call timed out after {0}s")]
    DecisionTimeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("Job '{0}' does not belong to the current submitted step")]
    UnknownJob(String),

    #[error("Config error: {0}")]
    Config(String),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让 LLM 重试（Planner 输出格式错误）
    RetryWithPrompt(String),
    /// 并入校验失败路径，由重试/替换控制器处理
    FoldIntoValidation(String),
    /// 直接上报给调用方，不做任何默认
    Surface(String),
    /// 终止当前轮
    Abort,
}
