//! 模型 provider 抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / 脚本化）实现 ModelProvider：给定 Turn 历史、声明的工具 schema
//! 与本轮已执行的工具批次，返回最终文本或一组 ToolInvocation，并附带本次往返的用量。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::memory::{ExchangeUsage, Turn};
use crate::tools::{ToolOutcome, ToolSchema};

/// 上下文过大 / 配额类错误的已知特征子串（小写）
const SIZE_CLASS_MARKERS: &[&str] = &[
    "context length",
    "context_length",
    "maximum context",
    "too large",
    "too long",
    "token limit",
    "quota",
    "resource_exhausted",
    "request entity too large",
    "payload too large",
];

/// provider 层错误：模型往返本身未能完成
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Context too large: {0}")]
    ContextTooLarge(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl LlmError {
    /// 是否属于「历史过大」类失败（需要截断历史后再试）
    pub fn is_size_class(&self) -> bool {
        match self {
            LlmError::ContextTooLarge(_) | LlmError::QuotaExceeded(_) => true,
            LlmError::Api(message) | LlmError::Network(message) | LlmError::Malformed(message) => {
                contains_size_marker(message)
            }
            LlmError::Timeout | LlmError::RateLimited { .. } => false,
        }
    }

    /// 将端点返回的错误消息归类为 LlmError；兼容端点的错误码并不统一，按消息特征判断
    pub fn from_api_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("quota") || lower.contains("resource_exhausted") {
            LlmError::QuotaExceeded(truncate(message, 300))
        } else if contains_size_marker(&lower) {
            LlmError::ContextTooLarge(truncate(message, 300))
        } else if lower.contains("rate limit") || lower.contains("rate_limit") {
            LlmError::RateLimited {
                retry_after_ms: None,
            }
        } else {
            LlmError::Api(truncate(message, 300))
        }
    }
}

fn contains_size_marker(message: &str) -> bool {
    let lower = message.to_lowercase();
    SIZE_CLASS_MARKERS.iter().any(|m| lower.contains(m))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 模型在一轮中发出的工具调用；arguments 对 loop 不透明，只由 handler 解释
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// provider 分配的调用 ID（用于把结果配对回调用）
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// 一轮已执行的工具批次：模型随调用给出的文本、调用列表、按同序排列的结果
#[derive(Debug, Clone)]
pub struct ToolRound {
    pub text: String,
    pub invocations: Vec<ToolInvocation>,
    pub outcomes: Vec<ToolOutcome>,
}

/// 一次模型往返的请求
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    /// 已满足「首条为 user、角色交替」的会话历史
    pub history: &'a [Turn],
    pub tools: &'a [ToolSchema],
    /// 本次用户输入内已完成的工具批次，按时间顺序整体重新提交
    pub rounds: &'a [ToolRound],
}

/// 一次模型往返的结果：invocations 为空时 text 即最终回复
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub text: String,
    pub invocations: Vec<ToolInvocation>,
    pub usage: ExchangeUsage,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn tool_calls(invocations: Vec<ToolInvocation>) -> Self {
        Self {
            invocations,
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: ExchangeUsage) -> Self {
        self.usage = usage;
        self
    }
}

/// 模型 provider trait
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// provider 标识（日志与会商结果中使用）
    fn id(&self) -> &str;

    async fn exchange(&self, request: ModelRequest<'_>) -> Result<ModelReply, LlmError>;
}
