//! 核心编排层：错误、历史修复、循环状态机、会话监管

pub mod error;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use error::AgentError;
pub use recovery::{HistoryRepair, RepairReport};
pub use session_supervisor::{SessionHandle, SessionSupervisor};
pub use state::{after_reply, begin_exchange, LoopState, TurnStatus};
