//! 单轮结果与面向用户的文本

use serde::Serialize;

use crate::eval::ConformanceReport;
use crate::flow::JudgeCategory;

/// 一轮结束的原因
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Judge 判定停止：已完成，或确认无法完成
    Finished { category: JudgeCategory, reason: String },
    /// 当前 Step 在等待异步任务
    Waiting { step: usize, tool: String, job_id: String },
    /// Step 失败且重规划次数用尽
    Blocked { step: usize, tool: String, reason: String },
    /// 计划走完或达到单轮步数上限，但 Judge 认为尚未完成
    Incomplete { reason: String },
    /// 评测截断
    Truncated { mode: String, report: ConformanceReport },
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub session_id: String,
    pub outcome: TurnOutcome,
    /// 最近一个成功 Step 的输出
    pub answer: Option<String>,
    /// 已失败的尝试：(工具谱系, 失败原因)
    pub exhausted: Vec<(Vec<String>, String)>,
}

impl TurnReport {
    pub fn is_finished(&self) -> bool {
        matches!(self.outcome, TurnOutcome::Finished { .. })
    }

    pub fn category(&self) -> Option<JudgeCategory> {
        match &self.outcome {
            TurnOutcome::Finished { category, .. } => Some(*category),
            _ => None,
        }
    }

    /// 面向用户的文本；「无法完成」必须说明未完成、原因与已用尽的补救
    pub fn render(&self) -> String {
        match &self.outcome {
            TurnOutcome::Finished {
                category: JudgeCategory::Unachievable,
                reason,
            } => {
                let mut out = format!(
                    "The goal was NOT completed and cannot be completed.\nReason: {reason}\nExhausted remedies:"
                );
                if self.exhausted.is_empty() {
                    out.push_str("\n- no tool attempt succeeded");
                }
                for (lineage, why) in &self.exhausted {
                    out.push_str(&format!("\n- tried {}: {}", lineage.join(" -> "), why));
                }
                out
            }
            TurnOutcome::Finished { reason, .. } => match &self.answer {
                Some(answer) => format!("{answer}\n\n(Goal satisfied: {reason})"),
                None => format!("Goal satisfied: {reason}"),
            },
            TurnOutcome::Waiting { tool, job_id, .. } => format!(
                "Job {job_id} submitted by '{tool}' is still running. Poll again later to continue."
            ),
            TurnOutcome::Blocked { step, tool, reason } => format!(
                "Step {} ('{}') failed: {}\nThe goal was NOT completed.",
                step + 1,
                tool,
                reason
            ),
            TurnOutcome::Incomplete { reason } => {
                format!("Stopped before the goal was reached: {reason}")
            }
            TurnOutcome::Truncated { mode, report } => format!(
                "Truncated ({mode}): {} - {}",
                if report.passed { "passed" } else { "failed" },
                report.reason
            ),
        }
    }
}
