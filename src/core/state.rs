//! 工具调用循环的状态机
//!
//! Idle → AwaitingModel → (Final | ExecutingTools) → AwaitingModel → … → Final | RoundExceeded | Failed | Cancelled；
//! 转移由纯函数给出，轮次上限与终止条件可以脱离 provider 单独测试。

use serde::Serialize;

use crate::llm::{LlmError, ModelReply, ToolInvocation};

/// 循环状态
#[derive(Clone, Debug, PartialEq)]
pub enum LoopState {
    Idle,
    AwaitingModel,
    /// 模型要求执行工具；text 为随调用给出的文本
    ExecutingTools {
        text: String,
        invocations: Vec<ToolInvocation>,
    },
    Final(String),
    RoundExceeded,
    Failed(LlmError),
    Cancelled,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopState::Final(_) | LoopState::RoundExceeded | LoopState::Failed(_) | LoopState::Cancelled
        )
    }

    /// 日志用的状态名
    pub fn name(&self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::AwaitingModel => "awaiting_model",
            LoopState::ExecutingTools { .. } => "executing_tools",
            LoopState::Final(_) => "final",
            LoopState::RoundExceeded => "round_exceeded",
            LoopState::Failed(_) => "failed",
            LoopState::Cancelled => "cancelled",
        }
    }
}

/// 发起下一次模型往返前的检查：已取消或已用尽轮次时给出终止状态，否则返回 None 继续
pub fn begin_exchange(exchanges: usize, budget: usize, cancelled: bool) -> Option<LoopState> {
    if cancelled {
        Some(LoopState::Cancelled)
    } else if exchanges >= budget {
        Some(LoopState::RoundExceeded)
    } else {
        None
    }
}

/// 根据一次模型回复决定下一状态：无工具调用即 Final，否则进入 ExecutingTools
pub fn after_reply(reply: ModelReply) -> LoopState {
    if reply.invocations.is_empty() {
        LoopState::Final(reply.text)
    } else {
        LoopState::ExecutingTools {
            text: reply.text,
            invocations: reply.invocations,
        }
    }
}

/// 一次 turn 的终止方式
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    /// 轮次用尽，仍视为正常完成
    RoundBudgetExhausted,
    Failed { error: String },
    Cancelled,
}

impl TurnStatus {
    /// 会话是否应持久化（只有正常完成的 turn 才落盘）
    pub fn is_success(&self) -> bool {
        matches!(self, TurnStatus::Completed | TurnStatus::RoundBudgetExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn begin_exchange_enforces_budget_and_cancellation() {
        assert_eq!(begin_exchange(0, 12, false), None);
        assert_eq!(begin_exchange(11, 12, false), None);
        assert_eq!(begin_exchange(12, 12, false), Some(LoopState::RoundExceeded));
        assert_eq!(begin_exchange(0, 0, false), Some(LoopState::RoundExceeded));
        assert_eq!(begin_exchange(3, 12, true), Some(LoopState::Cancelled));
    }

    #[test]
    fn text_only_reply_is_final() {
        let state = after_reply(ModelReply::text("done"));
        assert_eq!(state, LoopState::Final("done".into()));
        assert!(state.is_terminal());
    }

    #[test]
    fn reply_with_invocations_executes_tools() {
        let reply = ModelReply::tool_calls(vec![ToolInvocation::new("a", Map::new())]);
        let state = after_reply(reply);
        assert!(matches!(&state, LoopState::ExecutingTools { invocations, .. } if invocations.len() == 1));
        assert!(!state.is_terminal());
        assert_eq!(state.name(), "executing_tools");
    }

    #[test]
    fn only_completed_turns_persist() {
        assert!(TurnStatus::Completed.is_success());
        assert!(TurnStatus::RoundBudgetExhausted.is_success());
        assert!(!TurnStatus::Cancelled.is_success());
        assert!(!TurnStatus::Failed { error: "x".into() }.is_success());
    }
}
