//! 评测钩子：提前截断模式与一致性报告
//!
//! - PlanOnly：首次得到计划后立即停止，只比对工具名
//! - FirstCall：首个 Step 的工具与参数确定后、调用前停止，比对工具名与参数

pub mod conformance;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use conformance::{check_tool_calls, check_tool_names, ArgRules, ConformanceReport, ToolCallRecord};

/// 会话级截断开关
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TruncationMode {
    PlanOnly {
        expected_tools: Vec<String>,
    },
    FirstCall {
        expected_tools: Vec<String>,
        #[serde(default)]
        expected_args: HashMap<String, ArgRules>,
    },
}

impl TruncationMode {
    pub fn label(&self) -> &'static str {
        match self {
            TruncationMode::PlanOnly { .. } => "plan_only",
            TruncationMode::FirstCall { .. } => "first_call",
        }
    }
}
