//! 计划存储：Step / Plan（可变、按序）与 History（只追加）
//!
//! Plan 与 History 只由持有会话的编排器修改；History 一旦写入永不编辑，Judge 只读它。

pub mod history;
pub mod step;

pub use history::{History, HistoryStep, Verdict};
pub use step::{FailureNote, Plan, Step, StepStatus};
