//! Agent 错误类型
//!
//! provider 失败是 turn 内不可恢复的错误，交给 HistoryRepair 修复会话后以失败结果返回；
//! 工具失败不在此列，由路由器转成 succeeded=false 的 ToolOutcome 交还给模型。

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误（provider、取消、配置、路径逃逸、持久化等）
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("Provider error: {0}")]
    Provider(#[from] LlmError),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl AgentError {
    /// 是否属于「历史过大」类 provider 失败
    pub fn is_size_class(&self) -> bool {
        matches!(self, AgentError::Provider(e) if e.is_size_class())
    }
}
