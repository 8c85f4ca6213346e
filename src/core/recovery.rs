//! 历史修复（HistoryRepair）
//!
//! provider 失败后把 ConversationState 恢复到下一次 turn 可以直接提交的形状：
//! 总是丢弃开头的非 user Turn；若失败属于「历史过大」类，先截断到最近 N 条再做一次首条约束。
//! 修复后的状态不会自动持久化，是否落盘由调用方在下一次成功 turn 后决定。

use crate::core::AgentError;
use crate::memory::ConversationState;

/// 一次修复的结果摘要（用于日志与事件）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// 因上下文过大而截断掉的 Turn 条数
    pub truncated: usize,
    /// 丢弃的开头非 user Turn 条数
    pub dropped_leading: usize,
    pub size_class: bool,
}

#[derive(Debug, Clone)]
pub struct HistoryRepair {
    keep_recent: usize,
}

impl HistoryRepair {
    pub fn new(keep_recent: usize) -> Self {
        Self {
            keep_recent: keep_recent.max(1),
        }
    }

    pub fn keep_recent(&self) -> usize {
        self.keep_recent
    }

    pub fn repair(&self, state: &mut ConversationState, err: &AgentError) -> RepairReport {
        let mut report = RepairReport {
            size_class: err.is_size_class(),
            ..RepairReport::default()
        };
        report.dropped_leading = state.ensure_user_first();
        if report.size_class {
            report.truncated = state.truncate_to_recent(self.keep_recent);
            report.dropped_leading += state.ensure_user_first();
        }
        tracing::warn!(
            error = %err,
            truncated = report.truncated,
            dropped_leading = report.dropped_leading,
            remaining = state.len(),
            "history repaired after provider failure"
        );
        report
    }
}

impl Default for HistoryRepair {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::memory::{Role, Turn};

    fn history(pattern: &str) -> ConversationState {
        let turns = pattern
            .chars()
            .enumerate()
            .map(|(i, c)| match c {
                'u' => Turn::user(format!("u{i}")),
                _ => Turn::model(format!("m{i}")),
            })
            .collect();
        ConversationState::restore(100, turns)
    }

    fn assert_user_first(state: &ConversationState) {
        if let Some(first) = state.turns().first() {
            assert_eq!(first.role, Role::User);
        }
    }

    #[test]
    fn leading_model_turns_are_dropped_for_any_error() {
        let mut state = history("mmumu");
        let report = HistoryRepair::default().repair(&mut state, &AgentError::Cancelled);
        assert_eq!(report.dropped_leading, 2);
        assert_eq!(report.truncated, 0);
        assert_eq!(state.len(), 3);
        assert_user_first(&state);
    }

    #[test]
    fn size_class_failure_truncates_then_restores_user_first() {
        // 31 条交替历史，保留最近 10 条后首条是 model，需要再丢一条
        let mut state = history(&format!("u{}", "mu".repeat(15)));
        let err = AgentError::Provider(LlmError::ContextTooLarge("too many tokens".into()));
        let report = HistoryRepair::new(10).repair(&mut state, &err);
        assert!(report.size_class);
        assert_eq!(report.truncated, 21);
        assert_eq!(report.dropped_leading, 1);
        assert_eq!(state.len(), 9);
        assert_user_first(&state);
    }

    #[test]
    fn textual_quota_error_counts_as_size_class() {
        let mut state = history(&"um".repeat(15));
        let err = AgentError::Provider(LlmError::Api("Request payload too large".into()));
        HistoryRepair::new(10).repair(&mut state, &err);
        assert!(state.len() <= 10);
    }

    #[test]
    fn non_size_errors_keep_length() {
        let mut state = history(&"um".repeat(15));
        HistoryRepair::new(10).repair(&mut state, &AgentError::Provider(LlmError::Timeout));
        assert_eq!(state.len(), 30);
    }

    #[test]
    fn any_history_ends_empty_or_user_first() {
        let patterns = ["", "m", "mmm", "u", "mu", "umum", "mmmmmmmmmmmmu", "uuuummmm"];
        let errors = [
            AgentError::Cancelled,
            AgentError::Provider(LlmError::QuotaExceeded("quota".into())),
            AgentError::Provider(LlmError::Network("reset".into())),
        ];
        for p in patterns {
            for err in &errors {
                let mut state = history(p);
                HistoryRepair::new(2).repair(&mut state, err);
                assert_user_first(&state);
            }
        }
    }
}
