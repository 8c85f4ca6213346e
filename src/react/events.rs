//! 工具调用循环的过程事件：供流式前端展示轮次、工具调用、结果、修复与最终回复

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

/// 工具结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 第几次模型往返
    RoundStarted { exchange: usize, budget: usize },
    ToolCall { tool: String, args: Value },
    /// 工具返回（预览，避免过长）
    ToolResult {
        tool: String,
        succeeded: bool,
        preview: String,
    },
    /// provider 失败后的历史修复
    Repair {
        truncated: usize,
        dropped_leading: usize,
        size_class: bool,
    },
    Final { text: String },
    Error { text: String },
}

impl LoopEvent {
    pub fn tool_result(tool: &str, succeeded: bool, text: &str) -> Self {
        let preview = if text.chars().count() > RESULT_PREVIEW_CHARS {
            format!("{}...", text.chars().take(RESULT_PREVIEW_CHARS).collect::<String>())
        } else {
            text.to_string()
        };
        LoopEvent::ToolResult {
            tool: tool.to_string(),
            succeeded,
            preview,
        }
    }
}

/// 发送事件；没有接收方或接收方已关闭时忽略
pub(crate) fn send_event(tx: Option<&UnboundedSender<LoopEvent>>, ev: LoopEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
