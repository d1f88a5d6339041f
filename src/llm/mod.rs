//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::AppConfig;

pub use mock::{MockLlmClient, PromptKind, ScriptedLlmClient};
pub use openai::OpenAiClient;
pub use traits::{LlmClient, UsageSnapshot};

/// DeepSeek 的 OpenAI 兼容端点
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

/// 根据配置与环境变量选择 LLM 后端；provider 为 mock 或缺少 API key 时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient);
    }

    let key = match provider.as_str() {
        "deepseek" => std::env::var("DEEPSEEK_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok(),
        _ => std::env::var("OPENAI_API_KEY").ok(),
    };
    let Some(key) = key else {
        tracing::warn!("No API key set for provider '{}', using Mock LLM", provider);
        return Arc::new(MockLlmClient);
    };

    let base_url = cfg
        .llm
        .base_url
        .clone()
        .or_else(|| (provider == "deepseek").then(|| DEEPSEEK_BASE_URL.to_string()));
    let client = OpenAiClient::new(base_url.as_deref(), &cfg.llm.model, &key)
        .with_request_timeout(cfg.llm.timeouts.request);
    tracing::info!("Using {} LLM ({})", provider, client.model());
    Arc::new(client)
}
