//! Result Validator：(请求, Step 描述, 工具结果) -> {passed, reason}
//!
//! 输出必须是严格的 `{"passed": bool, "reason": string}`，不接受代码块或多余字段；违反即硬错误。
//! 异步任务（Submitted）从不进入这里。

use std::sync::Arc;

use crate::capability::CapabilityEntry;
use crate::core::FlowError;
use crate::flow::{markers, preview, CallGuard};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::plan::{Step, Verdict};

pub struct Validator {
    llm: Arc<dyn LlmClient>,
}

impl Validator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn validate(
        &self,
        request: &str,
        step: &Step,
        outcome: &str,
        entry: Option<&CapabilityEntry>,
        alternatives: &[String],
        guard: &CallGuard,
    ) -> Result<Verdict, FlowError> {
        let self_check = entry.map(|e| e.requires_self_check).unwrap_or(false);
        let system = build_validate_prompt(alternatives, self_check);
        let user = format!(
            "User request:\n{}\n\n## Step ({})\n{}\n\n## Tool outcome\n{}",
            request,
            step.tool_name,
            step.description(),
            outcome
        );
        let raw = guard
            .complete(self.llm.as_ref(), &[Message::system(system), Message::user(user)])
            .await?;
        let verdict = parse_verdict(&raw)?;
        tracing::debug!(tool = %step.tool_name, passed = verdict.passed, "validated");
        Ok(verdict)
    }
}

/// 严格解析；失败时 reason 不能为空（它会被原样注入下一次重试的描述）
pub fn parse_verdict(raw: &str) -> Result<Verdict, FlowError> {
    let verdict: Verdict = serde_json::from_str(raw.trim()).map_err(|e| {
        FlowError::ValidatorSchemaViolation(format!("{}: {}", e, preview(raw, 200)))
    })?;
    if !verdict.passed && verdict.reason.trim().is_empty() {
        return Err(FlowError::ValidatorSchemaViolation(
            "failed verdict without a reason".to_string(),
        ));
    }
    Ok(verdict)
}

fn build_validate_prompt(alternatives: &[String], self_check: bool) -> String {
    let alts = if alternatives.is_empty() {
        "(none)".to_string()
    } else {
        alternatives.join(", ")
    };
    let mut prompt = format!(
        "{}\nDecide whether the tool outcome accomplishes the current step in service of the user's request.\n\
        Check that explicit parameters and numeric constraints in the step were respected.\n\
        If it failed, the reason is shown verbatim to the next attempt: say concretely what is wrong and how to fix it.\n\
        When switching tools could help, name the tool. Declared alternatives for this tool: {}.",
        markers::VALIDATE,
        alts
    );
    if self_check {
        prompt.push_str(
            "\n\nSELF-CHECK: this tool requires a consistency check of its returned data. \
            Verify that the values are internally consistent (units, counts, and ranges match each other and the request). \
            Any inconsistency means passed=false.",
        );
    }
    prompt.push_str(
        "\n\nOutput ONLY one JSON object exactly:\n{\"passed\": true|false, \"reason\": \"...\"}\nNo Markdown, no code fences, no extra keys.",
    );
    prompt
}
