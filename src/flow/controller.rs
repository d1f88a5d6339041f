//! 重试 / 替换控制器（Step 状态机核心）
//!
//! ```text
//! InProgress --校验通过--> Success
//! InProgress --校验失败, retry_count < MAX--> InProgress  [retry_count+=1; 描述追加失败原因]
//! InProgress --校验失败, retry_count >= MAX, 有未尝试备选--> InProgress [换工具; 描述回到原始]
//! InProgress --校验失败, retry_count >= MAX, 无备选--> Failed
//! ```
//!
//! retry_count 先自增再与 MAX 比较；计数按 Step 谱系累计，换工具不清零。
//! 备选顺序：原始工具声明的备选在前，其后是谱系中后续工具各自声明的备选；谱系中已持有过的跳过。

use std::collections::HashSet;

use crate::capability::CapabilityRegistry;
use crate::plan::{Step, Verdict};

/// 控制器对一次校验结论的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerDecision {
    Success,
    /// 同工具重试
    Retry { retry_count: u32 },
    /// 换成备选工具
    Substitute { from: String, to: String },
    /// Step 终态失败，不自动推进
    Fail { reason: String },
}

#[derive(Debug, Clone)]
pub struct RetryController {
    max_retries: u32,
}

impl RetryController {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// 应用一次校验结论到 Step
    pub fn apply(
        &self,
        step: &mut Step,
        verdict: &Verdict,
        registry: &CapabilityRegistry,
    ) -> ControllerDecision {
        if verdict.passed {
            step.mark_success();
            return ControllerDecision::Success;
        }

        step.record_failure(&verdict.reason);
        if step.retry_count < self.max_retries {
            step.annotate_failure(&verdict.reason);
            return ControllerDecision::Retry {
                retry_count: step.retry_count,
            };
        }

        if let Some(next) = untried_alternatives(step, registry).into_iter().next() {
            let from = step.tool_name.clone();
            step.swap_tool(next.clone());
            return ControllerDecision::Substitute { from, to: next };
        }

        step.mark_failed();
        ControllerDecision::Fail {
            reason: verdict.reason.clone(),
        }
    }
}

/// 该 Step 谱系尚未尝试、且已注册的备选工具（按尝试顺序）
pub fn untried_alternatives(step: &Step, registry: &CapabilityRegistry) -> Vec<String> {
    let mut seen: HashSet<String> = step.lineage().iter().cloned().collect();
    let mut out = Vec::new();
    for held in step.lineage() {
        for alt in registry.alternatives(held) {
            if registry.contains(&alt) && seen.insert(alt.clone()) {
                out.push(alt);
            }
        }
    }
    out
}
