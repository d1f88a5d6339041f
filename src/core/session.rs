//! 会话运行时：每个会话一个后台任务
//!
//! 命令通道（Submit / Poll / CompleteJob / Cancel / Quit）-> 编排器；每条命令处理完后
//! 通过 watch 通道发布 SessionSnapshot，并把本轮结果发到结果通道。
//! 取消作用于整个会话：正在进行的工具调用或模型调用立即返回 Cancelled，随后会话结束。

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::core::{FlowError, Orchestrator, SessionState, SessionSnapshot, SessionSupervisor, TurnContext, TurnReport};
use crate::flow::EventSink;
use crate::tools::JobStatus;

/// 发往会话的命令
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// 提交用户输入
    Submit(String),
    /// 查询当前异步任务
    Poll,
    /// 外部推送异步任务结果
    CompleteJob { job_id: String, status: JobStatus },
    /// 取消会话
    Cancel,
    Quit,
}

/// 会话句柄：命令发送端、快照接收端、结果接收端
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    reports: mpsc::UnboundedReceiver<Result<TurnReport, FlowError>>,
    supervisor: Arc<SessionSupervisor>,
}

impl SessionHandle {
    fn send(&self, cmd: SessionCommand) -> Result<(), FlowError> {
        self.commands.send(cmd).map_err(|_| FlowError::Cancelled)
    }

    pub fn submit(&self, input: impl Into<String>) -> Result<(), FlowError> {
        self.send(SessionCommand::Submit(input.into()))
    }

    pub fn poll(&self) -> Result<(), FlowError> {
        self.send(SessionCommand::Poll)
    }

    pub fn complete_job(&self, job_id: impl Into<String>, status: JobStatus) -> Result<(), FlowError> {
        self.send(SessionCommand::CompleteJob {
            job_id: job_id.into(),
            status,
        })
    }

    /// 立即取消（不必等当前命令处理完）
    pub fn cancel(&self) {
        self.supervisor.cancel();
        let _ = self.commands.send(SessionCommand::Cancel);
    }

    pub fn quit(&self) {
        let _ = self.commands.send(SessionCommand::Quit);
    }

    /// 等待下一条结果；会话结束后返回 None
    pub async fn next_report(&mut self) -> Option<Result<TurnReport, FlowError>> {
        self.reports.recv().await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }
}

/// 启动会话后台任务
pub fn spawn_session(
    orchestrator: Arc<Orchestrator>,
    state: SessionState,
    events: EventSink,
) -> SessionHandle {
    let supervisor = Arc::new(SessionSupervisor::new());
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<SessionCommand>();
    let (snap_tx, snap_rx) = watch::channel(state.snapshot());
    let (report_tx, report_rx) = mpsc::unbounded_channel();

    let ctx = TurnContext::new(supervisor.child_token()).with_events(events);
    let sup = supervisor.clone();
    tokio::spawn(async move {
        let mut state = state;
        while let Some(cmd) = cmd_rx.recv().await {
            let result = match cmd {
                SessionCommand::Submit(input) => orchestrator.run_turn(&mut state, &input, &ctx).await,
                SessionCommand::Poll => orchestrator.poll(&mut state, &ctx).await,
                SessionCommand::CompleteJob { job_id, status } => {
                    orchestrator.complete_job(&mut state, &job_id, status, &ctx).await
                }
                SessionCommand::Cancel => {
                    sup.cancel();
                    break;
                }
                SessionCommand::Quit => break,
            };
            if let Err(ref e) = result {
                tracing::warn!(session = %state.id, error = %e, "turn ended with error");
            }
            let _ = snap_tx.send(state.snapshot());
            let _ = report_tx.send(result);
            if sup.is_cancelled() {
                break;
            }
        }
        tracing::info!(session = %state.id, "session closed");
    });

    SessionHandle {
        commands: cmd_tx,
        snapshots: snap_rx,
        reports: report_rx,
        supervisor,
    }
}
