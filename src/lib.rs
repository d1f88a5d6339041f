//! Toolflow - 工具编排引擎
//!
//! 模块划分：
//! - **capability**: 能力注册表（工具规范名、所属执行器、备选工具、名称归一化）与检索收窄
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、会话状态、会话监管、编排器主循环、会话 actor
//! - **eval**: 截断模式下的工具名 / 参数一致性校验
//! - **flow**: Planner、参数生成、Validator、重试/替换控制器、目标完成判定、过程事件
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 发给 LLM 的消息结构
//! - **observability**: 日志初始化
//! - **plan**: Step / Plan / 只追加的 History
//! - **tools**: 执行器抽象、执行器注册表、Step 分发器、内置直答执行器

pub mod capability;
pub mod config;
pub mod core;
pub mod eval;
pub mod flow;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod plan;
pub mod tools;

pub use capability::{CapabilityEntry, CapabilityRegistry};
pub use core::{FlowError, Orchestrator, SessionState, TurnOutcome, TurnReport};
pub use plan::{History, HistoryStep, Plan, Step, StepStatus};
