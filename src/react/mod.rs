//! 认知层：工具调用主循环及其过程事件

pub mod events;
pub mod loop_;

pub use events::LoopEvent;
pub use loop_::{ToolCallLoop, TurnOutcome, DEFAULT_ROUND_BUDGET};
