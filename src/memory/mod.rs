//! 记忆层：会话 Turn 历史、用量计数、vitals、快照持久化

pub mod conversation;
pub mod persistence;
pub mod usage;
pub mod vitals;

pub use conversation::{ConversationState, Role, Turn, TOOL_ONLY_PLACEHOLDER};
pub use persistence::{SessionSnapshot, SnapshotStore};
pub use usage::{ExchangeUsage, UsageCounters};
pub use vitals::{SessionVitals, ToolFailureStreak};
