//! Planner：目标 + 能力列表 (+ 失败上下文) -> Step 列表
//!
//! 输出格式错误时带着解析错误重试（次数由 orchestrator.plan_attempts 决定），仍不可用则对会话致命；
//! 绝不静默返回空计划。tool_name 为空/null 时替换为直答哨兵。

use std::sync::Arc;

use serde::Deserialize;

use crate::capability::{CapabilityRegistry, CapabilitySummary, DIRECT_ANSWER_TOOL};
use crate::core::{FlowError, RecoveryAction, RecoveryEngine};
use crate::flow::{extract_json_block, markers, CallGuard};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::plan::Step;

/// 一次规划请求
#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub goal: &'a str,
    pub capabilities: &'a [CapabilitySummary],
    /// 上一次失败的说明（重规划时）
    pub prior_failure: Option<&'a str>,
    /// 用户是否上传了文件
    pub upload_file: bool,
}

#[derive(Debug, Deserialize)]
struct PlanWire {
    steps: Vec<StepWire>,
}

#[derive(Debug, Deserialize)]
struct StepWire {
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    feasibility: String,
}

/// Planner：持有 LLM 与恢复引擎
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    attempts: u32,
    recovery: RecoveryEngine,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, attempts: u32) -> Self {
        Self {
            llm,
            attempts: attempts.max(1),
            recovery: RecoveryEngine::new(),
        }
    }

    pub async fn plan(
        &self,
        req: &PlanRequest<'_>,
        registry: &CapabilityRegistry,
        guard: &CallGuard,
    ) -> Result<Vec<Step>, FlowError> {
        let mut messages = vec![
            Message::system(build_plan_prompt(req.capabilities, req.upload_file)),
            Message::user(build_user_message(req)),
        ];
        let mut last_detail = String::new();

        for attempt in 1..=self.attempts {
            let raw = guard.complete(self.llm.as_ref(), &messages).await?;
            match parse_plan(&raw, req.capabilities, registry) {
                Ok(steps) => {
                    tracing::info!(attempt, steps = steps.len(), "plan produced");
                    return Ok(steps);
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "planner output malformed");
                    last_detail = err.to_string();
                    match self.recovery.handle(&err) {
                        RecoveryAction::RetryWithPrompt(hint) => {
                            messages.push(Message::assistant(raw));
                            messages.push(Message::user(hint));
                        }
                        _ => return Err(err),
                    }
                }
            }
        }

        tracing::error!(attempts = self.attempts, detail = %last_detail, "planner gave up");
        Err(FlowError::PlannerMalformedOutput {
            attempts: self.attempts,
            detail: last_detail,
        })
    }
}

/// 解析并校验 Planner 输出；任何不合格都记为 JsonParseError
fn parse_plan(
    raw: &str,
    offered: &[CapabilitySummary],
    registry: &CapabilityRegistry,
) -> Result<Vec<Step>, FlowError> {
    let json = extract_json_block(raw);
    let wire: PlanWire = serde_json::from_str(json)
        .map_err(|e| FlowError::JsonParseError(format!("{}: {}", e, crate::flow::preview(json, 200))))?;
    if wire.steps.is_empty() {
        return Err(FlowError::JsonParseError("plan has no steps".to_string()));
    }

    let mut steps = Vec::with_capacity(wire.steps.len());
    for (i, s) in wire.steps.into_iter().enumerate() {
        if s.description.trim().is_empty() {
            return Err(FlowError::JsonParseError(format!(
                "step {} has an empty description",
                i + 1
            )));
        }
        let tool = match s.tool_name.as_deref().map(str::trim) {
            None | Some("") => DIRECT_ANSWER_TOOL.to_string(),
            Some(name) => {
                let canonical = registry.normalize(name);
                let allowed = canonical == DIRECT_ANSWER_TOOL
                    || offered.iter().any(|c| c.name == canonical);
                if !allowed {
                    return Err(FlowError::JsonParseError(format!(
                        "step {} uses tool '{}' which is not in the available tools",
                        i + 1,
                        name
                    )));
                }
                canonical
            }
        };
        steps.push(Step::new(tool, s.description.trim(), s.feasibility));
    }
    Ok(steps)
}

fn build_user_message(req: &PlanRequest<'_>) -> String {
    match req.prior_failure {
        Some(failure) => format!(
            "User request:\n{}\n\nErrors from previous steps (re-plan to resolve them):\n{}",
            req.goal, failure
        ),
        None => format!("User request:\n{}", req.goal),
    }
}

fn build_plan_prompt(capabilities: &[CapabilitySummary], upload_file: bool) -> String {
    let tools = serde_json::to_string_pretty(capabilities).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"{marker}
Analyze the user's intent and any error logs from previous steps, and break the request into sequential steps.

<User Upload File>
upload_file == {upload_file}

<Available Tools With Info>
{tools}

### TOOL I/O DEPENDENCY RULE
Each tool has needs_file_input and generates_file_output.
If a step uses a tool with needs_file_input == true, then either upload_file == true or a preceding step uses a tool with generates_file_output == true.
If neither holds, still create the step but set tool_name to null, and explain the missing input in description and feasibility.

### RE-PLANNING
If the input contains errors from previous steps, adjust the plan to resolve them (fix parameters or change tools) and mention the fix in the description.

Return ONLY one JSON object:
{{
  "steps": [
    {{
      "tool_name": <string or null>,
      "description": <string>,
      "feasibility": <string>,
      "status": "plan"
    }}
  ]
}}

Rules:
1. Create a step for every discrete action in the request. Embed configuration parameters in the step that uses them.
2. Use only tool names from the available list; use null when no listed tool fits.
3. Never invent tools.
4. Steps are executed strictly in order, one at a time."#,
        marker = markers::PLAN,
    )
}
