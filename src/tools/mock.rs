//! Mock 执行器（测试与本地演示用）
//!
//! 按工具名排队回放预设结果，记录每次调用；异步任务状态可按 job_id 排队。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Executor, JobStatus, ToolOutcome};

pub struct MockExecutor {
    name: String,
    outcomes: Mutex<HashMap<String, VecDeque<Result<ToolOutcome, String>>>>,
    jobs: Mutex<HashMap<String, VecDeque<JobStatus>>>,
    invocations: Mutex<Vec<(String, Value)>>,
    status_queries: Mutex<Vec<String>>,
    stalled: Mutex<HashSet<String>>,
}

impl MockExecutor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcomes: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
            status_queries: Mutex::new(Vec::new()),
            stalled: Mutex::new(HashSet::new()),
        }
    }

    /// 为某个工具追加一次调用结果
    pub fn push(&self, tool: &str, outcome: Result<ToolOutcome, String>) {
        if let Ok(mut map) = self.outcomes.lock() {
            map.entry(tool.to_string()).or_default().push_back(outcome);
        }
    }

    /// 该工具的调用永不返回
    pub fn stall(&self, tool: &str) {
        if let Ok(mut stalled) = self.stalled.lock() {
            stalled.insert(tool.to_string());
        }
    }

    /// 为某个异步任务追加一次状态查询结果
    pub fn push_job_status(&self, job_id: &str, status: JobStatus) {
        if let Ok(mut map) = self.jobs.lock() {
            map.entry(job_id.to_string()).or_default().push_back(status);
        }
    }

    /// 全部调用记录 (工具, 参数)
    pub fn invocations(&self) -> Vec<(String, Value)> {
        self.invocations.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn invocation_count(&self, tool: &str) -> usize {
        self.invocations
            .lock()
            .map(|v| v.iter().filter(|(t, _)| t == tool).count())
            .unwrap_or(0)
    }

    pub fn status_queries(&self) -> Vec<String> {
        self.status_queries.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, tool: &str, args: Value) -> Result<ToolOutcome, String> {
        if let Ok(mut v) = self.invocations.lock() {
            v.push((tool.to_string(), args));
        }
        let stalled = self.stalled.lock().map(|s| s.contains(tool)).unwrap_or(false);
        if stalled {
            std::future::pending::<()>().await;
        }
        self.outcomes
            .lock()
            .map_err(|e| e.to_string())?
            .get_mut(tool)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| Err(format!("no scripted outcome for '{tool}'")))
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, String> {
        if let Ok(mut v) = self.status_queries.lock() {
            v.push(job_id.to_string());
        }
        let mut jobs = self.jobs.lock().map_err(|e| e.to_string())?;
        match jobs.get_mut(job_id) {
            Some(q) if q.len() > 1 => q.pop_front().ok_or_else(|| "empty".to_string()),
            // 最后一个状态保持不变，便于重复查询
            Some(q) => q.front().cloned().ok_or_else(|| format!("unknown job '{job_id}'")),
            None => Err(format!("unknown job '{job_id}'")),
        }
    }
}
