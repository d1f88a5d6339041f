//! 核心编排层：错误与恢复、会话状态与快照、会话监管、主控循环与会话运行时

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod report;
pub mod session;
pub mod session_supervisor;
pub mod state;

pub use error::{FlowError, RecoveryAction};
pub use orchestrator::{Orchestrator, TurnContext};
pub use recovery::RecoveryEngine;
pub use report::{TurnOutcome, TurnReport};
pub use session::{spawn_session, SessionCommand, SessionHandle};
pub use session_supervisor::SessionSupervisor;
pub use state::{SessionFlags, SessionSnapshot, SessionState, StepView};
