//! 工具层：执行器抽象、派发器、内置直答执行器与 Mock

pub mod direct_answer;
pub mod dispatcher;
pub mod mock;
pub mod registry;

pub use direct_answer::DirectAnswerExecutor;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use mock::MockExecutor;
pub use registry::{Executor, ExecutorRegistry, JobStatus, ToolOutcome, ToolResult};
