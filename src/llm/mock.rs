//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：按 prompt 类型给出固定的合法回复，便于本地跑通整条编排流程
//! - ScriptedLlmClient：按 prompt 类型排队回放预设回复，并记录调用次数，供测试断言

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::flow::markers;
use crate::llm::LlmClient;
use crate::memory::message::last_user_content;
use crate::memory::{Message, Role};

/// 根据 system prompt 中的标记识别是哪一类决策调用
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Plan,
    Args,
    Validate,
    Judge,
    Answer,
    Other,
}

impl PromptKind {
    pub fn detect(messages: &[Message]) -> Self {
        let text: String = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if text.contains(markers::PLAN) {
            PromptKind::Plan
        } else if text.contains(markers::ARGS) {
            PromptKind::Args
        } else if text.contains(markers::VALIDATE) {
            PromptKind::Validate
        } else if text.contains(markers::JUDGE) {
            PromptKind::Judge
        } else if text.contains(markers::ANSWER) {
            PromptKind::Answer
        } else {
            PromptKind::Other
        }
    }
}

/// Mock 客户端：规划为单个直答步骤、参数为空对象、校验通过、判定完成
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = last_user_content(messages).unwrap_or("(no input)");
        let reply = match PromptKind::detect(messages) {
            PromptKind::Plan => serde_json::json!({
                "steps": [{
                    "tool_name": null,
                    "description": last_user,
                    "feasibility": "answered directly by the mock model",
                    "status": "plan"
                }]
            })
            .to_string(),
            PromptKind::Args => "{}".to_string(),
            PromptKind::Validate => {
                r#"{"passed": true, "reason": "Mock validator approves every result."}"#.to_string()
            }
            PromptKind::Judge => {
                r#"{"finished": true, "reason": "Mock judge: the request was answered."}"#.to_string()
            }
            PromptKind::Answer | PromptKind::Other => format!("Echo from Mock: {}", last_user),
        };
        Ok(reply)
    }
}

/// 按 prompt 类型排队回放的客户端；队列耗尽时返回 Err
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    queues: Mutex<HashMap<PromptKind, VecDeque<Result<String, String>>>>,
    calls: Mutex<Vec<(PromptKind, Vec<Message>)>>,
    stalled: Mutex<HashSet<PromptKind>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为某类调用追加一条成功回复
    pub fn push(self, kind: PromptKind, reply: impl Into<String>) -> Self {
        self.enqueue(kind, Ok(reply.into()));
        self
    }

    /// 为某类调用追加一条失败回复
    pub fn push_err(self, kind: PromptKind, err: impl Into<String>) -> Self {
        self.enqueue(kind, Err(err.into()));
        self
    }

    /// 某类调用永不返回（用于取消与超时）
    pub fn stall(self, kind: PromptKind) -> Self {
        if let Ok(mut stalled) = self.stalled.lock() {
            stalled.insert(kind);
        }
        self
    }

    pub fn on_plan(self, reply: impl Into<String>) -> Self {
        self.push(PromptKind::Plan, reply)
    }

    pub fn on_args(self, reply: impl Into<String>) -> Self {
        self.push(PromptKind::Args, reply)
    }

    pub fn on_validate(self, reply: impl Into<String>) -> Self {
        self.push(PromptKind::Validate, reply)
    }

    pub fn on_judge(self, reply: impl Into<String>) -> Self {
        self.push(PromptKind::Judge, reply)
    }

    pub fn enqueue(&self, kind: PromptKind, reply: Result<String, String>) {
        if let Ok(mut queues) = self.queues.lock() {
            queues.entry(kind).or_default().push_back(reply);
        }
    }

    /// 某类调用已发生的次数
    pub fn calls(&self, kind: PromptKind) -> usize {
        self.calls
            .lock()
            .map(|c| c.iter().filter(|(k, _)| *k == kind).count())
            .unwrap_or(0)
    }

    /// 某类调用的全部 prompt（按调用顺序，每次调用拼成一段文本）
    pub fn prompts(&self, kind: PromptKind) -> Vec<String> {
        self.calls
            .lock()
            .map(|c| {
                c.iter()
                    .filter(|(k, _)| *k == kind)
                    .map(|(_, msgs)| {
                        msgs.iter()
                            .map(|m| m.content.as_str())
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let kind = PromptKind::detect(messages);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((kind, messages.to_vec()));
        }
        let stalled = self.stalled.lock().map(|s| s.contains(&kind)).unwrap_or(false);
        if stalled {
            std::future::pending::<()>().await;
        }
        let next = self
            .queues
            .lock()
            .map_err(|e| e.to_string())?
            .get_mut(&kind)
            .and_then(|q| q.pop_front());
        next.unwrap_or_else(|| Err(format!("script exhausted for {:?}", kind)))
    }
}
