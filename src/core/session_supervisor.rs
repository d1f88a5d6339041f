//! 会话监管：取消令牌
//!
//! 每个会话持有一个 CancellationToken；取消会在工具调用与模型调用两个挂起点立即生效，且永不重试。
//! 每轮使用子 token，便于单轮结束后丢弃而不影响会话本身。

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理
#[derive(Debug, Default)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 取消整个会话
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 创建子 token（用于单轮）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}
