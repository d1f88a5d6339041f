//! 会话状态与快照投影
//!
//! SessionState 只由持有该会话的编排器修改；观察者只拿到轻量、可序列化的 SessionSnapshot。

use serde::Serialize;

use crate::eval::TruncationMode;
use crate::plan::{History, Plan, StepStatus};

/// 会话开关
#[derive(Debug, Clone, Default)]
pub struct SessionFlags {
    /// 提前截断（评测钩子）
    pub truncation: Option<TruncationMode>,
}

/// 单个会话的完整状态：一个 Plan、一份 History、产物与计数
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: String,
    /// 当前目标（最近一次用户请求）
    pub request: String,
    pub plan: Plan,
    pub history: History,
    /// 工具产物链接（按出现顺序，去重）
    pub artifacts: Vec<String>,
    /// 用户是否上传了文件
    pub upload_file: bool,
    pub flags: SessionFlags,
    /// 本次请求已发生的重规划次数
    pub replans: u32,
    /// 本次请求开始时 History 的长度；Judge 只看此后的条目
    pub history_floor: usize,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request: String::new(),
            plan: Plan::new(),
            history: History::new(),
            artifacts: Vec::new(),
            upload_file: false,
            flags: SessionFlags::default(),
            replans: 0,
            history_floor: 0,
        }
    }

    pub fn with_upload_file(mut self, upload_file: bool) -> Self {
        self.upload_file = upload_file;
        self
    }

    pub fn with_truncation(mut self, mode: TruncationMode) -> Self {
        self.flags.truncation = Some(mode);
        self
    }

    /// 当前是否有在等待的异步任务
    pub fn waiting_job(&self) -> Option<(usize, &str)> {
        let idx = self.plan.current_index()?;
        let step = self.plan.step(idx)?;
        match (step.status, step.job_id.as_deref()) {
            (StepStatus::Submitted, Some(job)) => Some((idx, job)),
            _ => None,
        }
    }

    /// 本次请求的 History
    pub fn request_history(&self) -> History {
        self.history.since(self.history_floor)
    }

    /// 开始一个新请求：计数清零，History 继续保留但 Judge 不再看到旧条目
    pub(crate) fn begin_request(&mut self, request: &str) {
        self.request = request.to_string();
        self.replans = 0;
        self.history_floor = self.history.len();
    }

    pub(crate) fn add_artifacts(&mut self, artifacts: &[String]) {
        for a in artifacts {
            if !self.artifacts.contains(a) {
                self.artifacts.push(a.clone());
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let current = self.plan.current_index();
        SessionSnapshot {
            session_id: self.id.clone(),
            request: self.request.clone(),
            steps: self
                .plan
                .steps()
                .iter()
                .enumerate()
                .map(|(i, s)| StepView {
                    index: i,
                    tool_name: s.tool_name.clone(),
                    status: s.status,
                    retry_count: s.retry_count,
                    current: current == Some(i),
                })
                .collect(),
            history_len: self.history.len(),
            artifacts: self.artifacts.clone(),
            waiting_job: self.waiting_job().map(|(_, j)| j.to_string()),
        }
    }
}

/// 观察者看到的投影
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub request: String,
    pub steps: Vec<StepView>,
    pub history_len: usize,
    pub artifacts: Vec<String>,
    pub waiting_job: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepView {
    pub index: usize,
    pub tool_name: String,
    pub status: StepStatus,
    pub retry_count: u32,
    pub current: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Step;

    #[test]
    fn test_snapshot_marks_current_and_waiting_job() {
        let mut state = SessionState::new();
        state.plan.extend(vec![Step::new("a", "1", ""), Step::new("b", "2", "")]);
        state.plan.step_mut(0).unwrap().mark_success();
        state.plan.step_mut(1).unwrap().mark_submitted("job-9");
        let snap = state.snapshot();
        assert!(!snap.steps[0].current);
        assert!(snap.steps[1].current);
        assert_eq!(snap.waiting_job.as_deref(), Some("job-9"));
    }

    #[test]
    fn test_artifacts_are_deduplicated() {
        let mut state = SessionState::new();
        state.add_artifacts(&["x".to_string(), "y".to_string()]);
        state.add_artifacts(&["y".to_string()]);
        assert_eq!(state.artifacts, vec!["x", "y"]);
    }
}
