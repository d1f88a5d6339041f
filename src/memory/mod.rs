//! 发给 LLM 的消息结构（角色 + 文本）

pub mod message;

pub use message::{Message, Role};
