//! 会话监管：每会话一把互斥锁 + 取消令牌
//!
//! 同一会话的 turn 必须串行：SessionHandle 用 tokio Mutex 包住 ConversationState，
//! 调用方拿到锁才能跑 turn。每次 turn 开始时从根 token 派生子 token，cancel_current 只取消当前 turn，
//! shutdown 取消根 token（之后的 turn 一开始即被取消）。

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::memory::ConversationState;

/// 会话级生命周期管理：根取消令牌与当前 turn 的子令牌
#[derive(Debug)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
    current: std::sync::Mutex<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        let cancel_token = CancellationToken::new();
        let current = std::sync::Mutex::new(cancel_token.child_token());
        Self {
            cancel_token,
            current,
        }
    }

    /// 为新 turn 派生子 token，并记为当前 token
    pub fn begin_turn(&self) -> CancellationToken {
        let token = self.cancel_token.child_token();
        if let Ok(mut current) = self.current.lock() {
            *current = token.clone();
        }
        token
    }

    /// 取消当前 turn（用户中断）
    pub fn cancel_current(&self) {
        if let Ok(current) = self.current.lock() {
            current.cancel();
        }
    }

    /// 取消整个会话
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// 会话句柄：ID + 受锁保护的状态 + 监管器；可 clone 后跨任务共享
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    state: Arc<Mutex<ConversationState>>,
    supervisor: Arc<SessionSupervisor>,
}

impl SessionHandle {
    pub fn new(id: impl Into<String>, state: ConversationState) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(Mutex::new(state)),
            supervisor: Arc::new(SessionSupervisor::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 获取会话锁；持锁期间其它 turn 等待
    pub async fn lock(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().await
    }

    /// 非阻塞尝试获取锁，已有 turn 在跑时返回 None
    pub fn try_lock(&self) -> Option<MutexGuard<'_, ConversationState>> {
        self.state.try_lock().ok()
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }
}
