//! 检索收窄：查询 -> 排序后的候选工具 -> Planner 能力列表
//!
//! 检索层本身是外部协作方（RAG 等），这里只定义接口与默认实现（返回全部已注册能力）。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CapabilityRegistry, CapabilitySummary, DIRECT_ANSWER_TOOL};

/// 检索层返回的候选工具
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// 检索层接口：query -> 按相关性排序的候选工具
#[async_trait]
pub trait ToolRetriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedTool>, String>;
}

/// 默认检索：不做收窄，返回注册表中全部能力
pub struct RegistryRetriever {
    registry: Arc<CapabilityRegistry>,
}

impl RegistryRetriever {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolRetriever for RegistryRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<RetrievedTool>, String> {
        Ok(self
            .registry
            .capability_list()
            .into_iter()
            .map(|c| RetrievedTool {
                name: c.name,
                description: c.description,
            })
            .collect())
    }
}

impl CapabilityRegistry {
    /// 按检索排序收窄能力列表：名称归一化、丢弃未注册与哨兵、去重
    pub fn narrow(&self, retrieved: &[RetrievedTool]) -> Vec<CapabilitySummary> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for tool in retrieved {
            let Some(entry) = self.get(&tool.name) else {
                tracing::debug!(tool = %tool.name, "retrieved tool is not registered, dropped");
                continue;
            };
            if entry.name == DIRECT_ANSWER_TOOL || !seen.insert(entry.name.clone()) {
                continue;
            }
            out.push(CapabilitySummary::from(entry));
        }
        out
    }
}
