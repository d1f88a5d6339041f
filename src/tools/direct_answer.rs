//! 内置直答执行器：为直答哨兵 `llm_tool` 提供服务，直接用语言模型回答

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::capability::DIRECT_ANSWER_EXECUTOR;
use crate::flow::markers;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::{Executor, ToolOutcome, ToolResult};

pub struct DirectAnswerExecutor {
    llm: Arc<dyn LlmClient>,
}

impl DirectAnswerExecutor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Executor for DirectAnswerExecutor {
    fn name(&self) -> &str {
        DIRECT_ANSWER_EXECUTOR
    }

    async fn invoke(&self, _tool: &str, args: Value) -> Result<ToolOutcome, String> {
        let prompt = args
            .get("prompt")
            .and_then(|v| v.as_str())
            .ok_or("missing 'prompt' argument")?;
        let system = format!(
            "{}\nAnswer the task below completely. If the task cannot be done without a tool or missing input, say exactly what is missing.",
            markers::ANSWER
        );
        let answer = self
            .llm
            .complete(&[Message::system(system), Message::user(prompt)])
            .await?;
        Ok(ToolOutcome::Completed(ToolResult::text(answer)))
    }
}
