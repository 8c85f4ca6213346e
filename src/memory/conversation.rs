//! 短期记忆：会话 Turn 历史
//!
//! 保留最近 N 条 Turn，超出时从最旧处淘汰，淘汰后重新保证首条为 user；
//! 会话级的用量计数与情绪信号（vitals）随历史一起存放在 ConversationState 中。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{SessionVitals, UsageCounters};

/// 模型未产出文本时代替最终回复写入历史的占位内容
pub const TOOL_ONLY_PLACEHOLDER: &str = "(tool execution completed)";

/// Turn 角色（与 provider 的 user / model 对应）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// 单条 Turn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// 会话状态：有序 Turn 历史 + 用量计数 + vitals
#[derive(Clone, Debug)]
pub struct ConversationState {
    turns: Vec<Turn>,
    max_turns: usize,
    pub usage: UsageCounters,
    pub vitals: SessionVitals,
}

impl ConversationState {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns: max_turns.max(1),
            usage: UsageCounters::default(),
            vitals: SessionVitals::default(),
        }
    }

    /// 用已有 Turn 列表构造（如从外部存储恢复），不做裁剪
    pub fn restore(max_turns: usize, turns: Vec<Turn>) -> Self {
        Self {
            turns,
            ..Self::new(max_turns)
        }
    }

    /// 追加 user Turn，并执行长度上限与首条为 user 的约束
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::user(content));
        self.enforce_cap();
    }

    /// 追加 model Turn；空文本以占位内容代替
    pub fn push_model(&mut self, content: impl Into<String>) {
        let content = content.into();
        let content = if content.trim().is_empty() {
            TOOL_ONLY_PLACEHOLDER.to_string()
        } else {
            content
        };
        self.turns.push(Turn::model(content));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// 用户显式重置用量计数（loop 本身从不调用）
    pub fn reset_usage(&mut self) {
        self.usage = UsageCounters::default();
    }

    /// 超出上限时淘汰最旧 Turn，然后保证首条为 user
    pub fn enforce_cap(&mut self) {
        if self.turns.len() > self.max_turns {
            let excess = self.turns.len() - self.max_turns;
            self.turns.drain(..excess);
        }
        self.ensure_user_first();
    }

    /// 丢弃开头的非 user Turn；返回丢弃条数
    pub fn ensure_user_first(&mut self) -> usize {
        let leading = self
            .turns
            .iter()
            .take_while(|t| t.role != Role::User)
            .count();
        if leading > 0 {
            self.turns.drain(..leading);
        }
        leading
    }

    /// 只保留最近 keep 条 Turn；返回丢弃条数
    pub fn truncate_to_recent(&mut self, keep: usize) -> usize {
        if self.turns.len() <= keep {
            return 0;
        }
        let excess = self.turns.len() - keep;
        self.turns.drain(..excess);
        excess
    }

    /// 提交给 provider 的历史：跳过开头的非 user Turn，相邻同角色 Turn 合并为一条，保证严格交替
    pub fn eligible_history(&self) -> Vec<Turn> {
        let mut out: Vec<Turn> = Vec::with_capacity(self.turns.len());
        for turn in self.turns.iter().skip_while(|t| t.role != Role::User) {
            match out.last_mut() {
                Some(last) if last.role == turn.role => {
                    last.content.push_str("\n\n");
                    last.content.push_str(&turn.content);
                }
                _ => out.push(turn.clone()),
            }
        }
        out
    }
}
