//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete 把消息列表变成一段文本。
//! 编排器只把它当作不透明的 text -> text 函数使用。

use async_trait::async_trait;
use serde::Serialize;

use crate::memory::Message;

/// 累计用量快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；错误以字符串返回，由调用方包装为 FlowError::LlmError
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 不统计用量的后端返回全零
    fn usage(&self) -> UsageSnapshot {
        UsageSnapshot::default()
    }
}
