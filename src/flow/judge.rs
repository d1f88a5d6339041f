//! Goal-Completion Judge：History + 产物 -> 是否停止
//!
//! 每个 Step 进入终态（Success / Failed）后调用一次，与剩余计划步数无关。
//! 偏向继续：只要 History 中还有被提到但从未尝试的补救工具，「无法完成」一律改判为继续。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::FlowError;
use crate::flow::{markers, preview, CallGuard};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::plan::History;

/// 判定类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeCategory {
    /// 目标已完成
    Satisfied,
    /// 未完成但仍可推进
    Continue,
    /// 未完成且所有补救都已尝试失败
    Unachievable,
}

impl JudgeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            JudgeCategory::Satisfied => "satisfied",
            JudgeCategory::Continue => "continue",
            JudgeCategory::Unachievable => "unachievable",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JudgeWire {
    finished: bool,
    reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Judgement {
    pub finished: bool,
    pub reason: String,
    pub category: JudgeCategory,
    /// 模型给出「无法完成」但被改判为继续
    pub overridden: bool,
}

impl Judgement {
    fn from_wire(wire: JudgeWire) -> Self {
        let category = if !wire.finished {
            JudgeCategory::Continue
        } else if states_unachievable(&wire.reason) {
            JudgeCategory::Unachievable
        } else {
            JudgeCategory::Satisfied
        };
        Self {
            finished: wire.finished,
            reason: wire.reason,
            category,
            overridden: false,
        }
    }

    /// 措辞之外再看证据：History 以失败收尾（或没有任何成功）时，「已完成」按「无法完成」处理
    pub fn reconcile(self, history: &History) -> Self {
        if self.category != JudgeCategory::Satisfied || !history.ends_in_failure() {
            return self;
        }
        tracing::warn!(reason = %self.reason, "judge finished on a failed history, treating as unachievable");
        Self {
            category: JudgeCategory::Unachievable,
            ..self
        }
    }

    /// 还有未尝试的补救时，「无法完成」改判为继续
    pub fn enforce_caution(self, history: &History) -> Self {
        if self.category != JudgeCategory::Unachievable {
            return self;
        }
        let untried = history.untried_remedies();
        if untried.is_empty() {
            return self;
        }
        tracing::warn!(untried = ?untried, "judge declared unachievable with untried remedies, continuing");
        Self {
            finished: false,
            reason: format!(
                "{} (overridden: remedies not yet attempted: {})",
                self.reason,
                untried.join(", ")
            ),
            category: JudgeCategory::Continue,
            overridden: true,
        }
    }
}

fn states_unachievable(reason: &str) -> bool {
    let low = reason.to_lowercase();
    ["not completed", "unachievable", "cannot be completed"]
        .iter()
        .any(|k| low.contains(k))
}

/// 严格解析 `{"finished": bool, "reason": string}`
pub fn parse_judgement(raw: &str) -> Result<Judgement, FlowError> {
    let wire: JudgeWire = serde_json::from_str(raw.trim())
        .map_err(|e| FlowError::JudgeSchemaViolation(format!("{}: {}", e, preview(raw, 200))))?;
    if wire.reason.trim().is_empty() {
        return Err(FlowError::JudgeSchemaViolation("empty reason".to_string()));
    }
    Ok(Judgement::from_wire(wire))
}

pub struct Judge {
    llm: Arc<dyn LlmClient>,
}

impl Judge {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn judge(
        &self,
        request: &str,
        history: &History,
        artifacts: &[String],
        guard: &CallGuard,
    ) -> Result<Judgement, FlowError> {
        let history_json = serde_json::to_string_pretty(&history_view(history))
            .map_err(|e| FlowError::JudgeSchemaViolation(e.to_string()))?;
        let files_json =
            serde_json::to_string_pretty(artifacts).unwrap_or_else(|_| "[]".to_string());
        let user = format!(
            "user_request:\n{}\n\nhistory_steps (JSON):\n{}\n\nsession_files (JSON):\n{}",
            request, history_json, files_json
        );
        let raw = guard
            .complete(
                self.llm.as_ref(),
                &[Message::system(JUDGE_PROMPT.replace("{marker}", markers::JUDGE)), Message::user(user)],
            )
            .await?;
        let judgement = parse_judgement(&raw)?
            .reconcile(history)
            .enforce_caution(history);
        tracing::info!(
            finished = judgement.finished,
            category = judgement.category.as_str(),
            "judged"
        );
        Ok(judgement)
    }
}

/// Judge 看到的 History 视图：suggestion 为失败原因，untried_remedies 为当时仍可尝试的工具
fn history_view(history: &History) -> Vec<serde_json::Value> {
    history
        .entries()
        .iter()
        .enumerate()
        .map(|(i, e)| {
            serde_json::json!({
                "index": i,
                "tool_name": e.tool_name,
                "tools_tried": e.tool_lineage,
                "status": e.status,
                "description": e.description,
                "output": e.outcome.as_deref().map(|o| preview(o, 2000)),
                "passed": e.verdict.passed,
                "suggestion": e.validation_failure_reason.clone().unwrap_or_else(|| e.verdict.reason.clone()),
                "failures": e.failures,
                "untried_remedies": e.remedies,
            })
        })
        .collect()
}

const JUDGE_PROMPT: &str = r#"{marker}
Decide whether the user's overall final objective has been completed as of now, based ONLY on history_steps and session_files.
"finished" means the session should STOP now:
- goal completed: finished=true.
- goal NOT completed but still achievable with further actions: finished=false.
- goal NOT completed AND blocked: finished=true, and the reason MUST say it is NOT completed and cannot be completed.

Rules:
1. Judge only the final goal, not whether every intermediate step ran.
2. If the request asks for several items, finished=true only when ALL are done.
3. Explicit numeric or parameter constraints are mandatory; each must be evidenced in history_steps.
4. Require session_files only when a file is the expected deliverable.
5. Contradictions: prefer later entries; if still unclear, finished=false and explain.
6. history_steps[*].suggestion, history_steps[*].failures and history_steps[*].untried_remedies are PRIMARY evidence of achievability.
   If ANY actionable suggestion or remedy has not been attempted and exhausted in later history_steps, finished=false.
   Never treat "a suggestion was not acted upon" as evidence of unachievability.
7. finished=true for an unachievable goal ONLY if every actionable remedy was tried and still failed and no viable next action remains.
   The reason must then contain "NOT completed", "cannot be completed", and the specific exhausted attempts.

Output ONLY one JSON object exactly:
{"finished": true|false, "reason": "brief, specific explanation citing evidence"}
No Markdown, no code fences, no extra keys."#;
