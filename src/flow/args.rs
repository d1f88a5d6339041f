//! 参数生成：Step 描述 + 能力说明 -> 工具参数（JSON 对象）
//!
//! 直答哨兵不经模型，参数固定为 `{"prompt": 描述}`。模型输出不是 JSON 对象时，本次尝试按派发错误处理。

use std::sync::Arc;

use serde_json::{json, Value};

use crate::capability::{CapabilityEntry, DIRECT_ANSWER_TOOL};
use crate::core::FlowError;
use crate::flow::{extract_json_block, markers, preview, CallGuard};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::plan::Step;

pub struct ArgsComposer {
    llm: Arc<dyn LlmClient>,
}

impl ArgsComposer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 生成参数。Err(ToolDispatchError) 表示输出不可用，其余错误（取消/超时/模型错误）直接上抛
    pub async fn compose(
        &self,
        request: &str,
        step: &Step,
        entry: Option<&CapabilityEntry>,
        prior_outputs: &str,
        guard: &CallGuard,
    ) -> Result<Value, FlowError> {
        if step.tool_name == DIRECT_ANSWER_TOOL {
            return Ok(json!({ "prompt": step.description() }));
        }

        let (tool_desc, hint) = entry
            .map(|e| (e.description.as_str(), e.args_hint.as_deref().unwrap_or("(none)")))
            .unwrap_or(("(unknown tool)", "(none)"));
        let system = format!(
            "{}\nProduce the arguments for exactly one call of the tool below.\n\
            Output ONLY one JSON object with the arguments. No Markdown, no extra text.\n\n\
            ## Tool\n{}\n{}\n\n## Argument hints\n{}",
            markers::ARGS,
            step.tool_name,
            tool_desc,
            hint
        );
        let user = format!(
            "User request:\n{}\n\n## Current step\n{}\n\n## Previous step outputs (summary)\n{}",
            request,
            step.description(),
            if prior_outputs.is_empty() { "(none)" } else { prior_outputs }
        );
        let raw = guard
            .complete(self.llm.as_ref(), &[Message::system(system), Message::user(user)])
            .await?;

        let parsed: Value = serde_json::from_str(extract_json_block(&raw)).map_err(|e| {
            FlowError::ToolDispatchError(format!(
                "could not compose arguments for '{}': {} ({})",
                step.tool_name,
                e,
                preview(&raw, 120)
            ))
        })?;
        if !parsed.is_object() {
            return Err(FlowError::ToolDispatchError(format!(
                "arguments for '{}' must be a JSON object, got: {}",
                step.tool_name,
                preview(&parsed.to_string(), 120)
            )));
        }
        Ok(parsed)
    }
}
