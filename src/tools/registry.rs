//! 执行器注册表
//!
//! 每个远程工具服务（或内置直答）实现 Executor trait，按执行器名注册到 ExecutorRegistry。
//! 能力表只记录「工具 -> 执行器名」，派发时才解析到具体执行器，从不缓存在 Step 上。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// 同步完成的工具结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub output: Value,
    /// 产物链接（文件、结构等）
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl ToolResult {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: Value::String(output.into()),
            artifacts: Vec::new(),
        }
    }

    pub fn json(output: Value) -> Self {
        Self {
            output,
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifacts<I, S>(mut self, artifacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.artifacts = artifacts.into_iter().map(Into::into).collect();
        self
    }

    /// 给 Validator / Judge 看的文本
    pub fn render(&self) -> String {
        let mut out = match &self.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !self.artifacts.is_empty() {
            out.push_str("\nartifacts: ");
            out.push_str(&self.artifacts.join(", "));
        }
        out
    }
}

/// 一次调用的返回：同步结果，或已提交的异步任务
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Completed(ToolResult),
    Submitted { job_id: String, status: String },
}

/// 异步任务状态
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Running,
    Completed(ToolResult),
    Failed(String),
}

/// 执行器 trait：名称、调用、异步任务查询
#[async_trait]
pub trait Executor: Send + Sync {
    /// 执行器名（能力表中 `executor` 字段）
    fn name(&self) -> &str;

    /// 调用某个工具
    async fn invoke(&self, tool: &str, args: Value) -> Result<ToolOutcome, String>;

    /// 查询异步任务；不支持异步任务的执行器返回 Err
    async fn job_status(&self, job_id: &str) -> Result<JobStatus, String> {
        Err(format!(
            "executor '{}' does not support asynchronous jobs ({job_id})",
            self.name()
        ))
    }
}

/// 执行器注册表：按名称存储 Arc<dyn Executor>
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: impl Executor + 'static) {
        self.register_arc(Arc::new(executor));
    }

    pub fn register_arc(&mut self, executor: Arc<dyn Executor>) {
        let name = executor.name().to_string();
        self.executors.insert(name, executor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.executors.keys().cloned().collect();
        names.sort();
        names
    }
}
