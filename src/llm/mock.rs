//! Mock provider（用于测试与离线运行，无需 API）
//!
//! MockProvider 回显最后一条 user Turn；ScriptedProvider 按预设脚本依次返回回复或错误，
//! 并记录每次收到的请求概要，便于断言 loop 的往返次数与批次重提交。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmError, ModelProvider, ModelReply, ModelRequest};
use crate::memory::{ExchangeUsage, Role};

/// Mock：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn id(&self) -> &str {
        "mock"
    }

    async fn exchange(&self, request: ModelRequest<'_>) -> Result<ModelReply, LlmError> {
        let last_user = request
            .history
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .unwrap_or("(no input)");
        Ok(ModelReply::text(format!("Echo from Mock: {}", last_user))
            .with_usage(ExchangeUsage::new(last_user.len() as u64, 4)))
    }
}

/// ScriptedProvider 每次收到请求时记录的概要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub history_len: usize,
    pub first_role: Option<Role>,
    pub rounds: usize,
    /// 最后一个批次中的结果条数
    pub last_batch_len: usize,
    pub tool_count: usize,
}

/// 脚本化 provider：按顺序弹出预设结果，脚本耗尽后返回 Malformed
#[derive(Debug)]
pub struct ScriptedProvider {
    id: String,
    script: Mutex<VecDeque<Result<ModelReply, LlmError>>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ModelReply, LlmError>>) -> Self {
        Self::with_id("scripted", script)
    }

    pub fn with_id(id: impl Into<String>, script: Vec<Result<ModelReply, LlmError>>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 已收到的请求概要
    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exchange(&self, request: ModelRequest<'_>) -> Result<ModelReply, LlmError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(SeenRequest {
                history_len: request.history.len(),
                first_role: request.history.first().map(|t| t.role),
                rounds: request.rounds.len(),
                last_batch_len: request.rounds.last().map(|r| r.outcomes.len()).unwrap_or(0),
                tool_count: request.tools.len(),
            });
        }
        let next = self
            .script
            .lock()
            .map_err(|_| LlmError::Malformed("script lock poisoned".to_string()))?
            .pop_front();
        next.unwrap_or_else(|| Err(LlmError::Malformed("script exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Turn;

    #[tokio::test]
    async fn mock_echoes_last_user_turn() {
        let history = vec![Turn::user("hello"), Turn::model("hi"), Turn::user("again")];
        let reply = MockProvider
            .exchange(ModelRequest {
                history: &history,
                tools: &[],
                rounds: &[],
            })
            .await
            .unwrap();
        assert_eq!(reply.text, "Echo from Mock: again");
        assert!(reply.invocations.is_empty());
    }

    #[tokio::test]
    async fn scripted_pops_in_order_then_reports_exhaustion() {
        let provider = ScriptedProvider::new(vec![
            Ok(ModelReply::text("one")),
            Err(LlmError::Timeout),
        ]);
        let history = vec![Turn::user("q")];
        let req = ModelRequest {
            history: &history,
            tools: &[],
            rounds: &[],
        };
        assert_eq!(provider.exchange(req).await.unwrap().text, "one");
        assert_eq!(provider.exchange(req).await.unwrap_err(), LlmError::Timeout);
        assert!(matches!(
            provider.exchange(req).await,
            Err(LlmError::Malformed(_))
        ));
        assert_eq!(provider.calls(), 3);
        assert_eq!(provider.seen()[0].first_role, Some(Role::User));
    }
}
