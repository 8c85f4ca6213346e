//! Responder：fan-out 的一个分支，每个包装一个独立配置的外部 provider

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ResponderEntry;
use crate::llm::{LlmError, ModelProvider, ModelRequest, OpenAiCompatProvider};
use crate::memory::Turn;

#[async_trait]
pub trait Responder: Send + Sync {
    fn id(&self) -> &str;

    /// 回答问题；Err 为该 responder 的失败原因
    async fn answer(&self, question: &str) -> Result<String, String>;
}

/// 用 ModelProvider 单轮回答（不带工具）
pub struct LlmResponder {
    provider: Arc<dyn ModelProvider>,
}

impl LlmResponder {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    /// 从配置项构建 OpenAI 兼容 responder；API key 从 api_key_env 指定的环境变量读取
    pub fn from_entry(entry: &ResponderEntry, timeout_secs: u64) -> Result<Self, LlmError> {
        let api_key = std::env::var(&entry.api_key_env).ok();
        let provider = OpenAiCompatProvider::new(
            &entry.id,
            entry.base_url.as_deref(),
            &entry.model,
            api_key.as_deref(),
            timeout_secs,
        )?;
        Ok(Self::new(Arc::new(provider)))
    }
}

#[async_trait]
impl Responder for LlmResponder {
    fn id(&self) -> &str {
        self.provider.id()
    }

    async fn answer(&self, question: &str) -> Result<String, String> {
        let history = [Turn::user(question)];
        let request = ModelRequest {
            history: &history,
            tools: &[],
            rounds: &[],
        };
        let reply = self.provider.exchange(request).await.map_err(|e| e.to_string())?;
        let text = reply.text.trim();
        if text.is_empty() {
            Err("empty answer".to_string())
        } else {
            Ok(text.to_string())
        }
    }
}
