//! 能力层：工具能力表与检索收窄
//!
//! - registry：规范名 -> CapabilityEntry（所属执行器、备选工具、是否自检、文件 I/O 标记），名称归一化查找
//! - retriever：把检索层返回的候选工具收窄为 Planner 可见的能力列表

pub mod registry;
pub mod retriever;

pub use registry::{
    CapabilityEntry, CapabilityRegistry, CapabilitySummary, DIRECT_ANSWER_EXECUTOR,
    DIRECT_ANSWER_TOOL,
};
pub use retriever::{RegistryRetriever, RetrievedTool, ToolRetriever};
