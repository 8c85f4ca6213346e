//! 多模型并发问答（ConsensusFanout）
//!
//! 同一问题并发发给所有 responder，等待全部结束（settle-all）：单个 responder 失败、超时或 panic
//! 只记录为该 responder 的错误答案，不影响其它 responder。responder 列表为空时返回 NoResponders，
//! 与「有人被问但都失败」区分开。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::consensus::Responder;

/// 单个 responder 的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Text(String),
    Error(String),
}

/// 一个 responder 的回答（或错误）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsensusAnswer {
    pub provider_id: String,
    pub outcome: AnswerOutcome,
}

impl ConsensusAnswer {
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, AnswerOutcome::Text(_))
    }
}

/// 一次 fan-out 的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "answers", rename_all = "snake_case")]
pub enum ConsensusResult {
    /// 没有可询问的 responder
    NoResponders,
    /// 每个 responder 一条，顺序与传入顺序一致
    Answers(Vec<ConsensusAnswer>),
}

impl ConsensusResult {
    pub fn answers(&self) -> &[ConsensusAnswer] {
        match self {
            ConsensusResult::NoResponders => &[],
            ConsensusResult::Answers(a) => a,
        }
    }

    /// 渲染为交给主模型综合的文本
    pub fn render(&self) -> String {
        match self {
            ConsensusResult::NoResponders => "No other responders available.".to_string(),
            ConsensusResult::Answers(answers) => answers
                .iter()
                .map(|a| match &a.outcome {
                    AnswerOutcome::Text(t) => format!("[{}]\n{}", a.provider_id, t),
                    AnswerOutcome::Error(e) => format!("[{}] (error) {}", a.provider_id, e),
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// 并发问答器；每个 responder 单独限时
#[derive(Debug, Clone)]
pub struct ConsensusFanout {
    responder_timeout: Duration,
}

impl ConsensusFanout {
    pub fn new(responder_timeout_secs: u64) -> Self {
        Self {
            responder_timeout: Duration::from_secs(responder_timeout_secs.max(1)),
        }
    }

    pub fn responder_timeout(&self) -> Duration {
        self.responder_timeout
    }

    pub async fn ask(
        &self,
        question: &str,
        responders: &[Arc<dyn Responder>],
        cancel: &CancellationToken,
    ) -> ConsensusResult {
        if responders.is_empty() {
            tracing::info!("consensus requested with no responders");
            return ConsensusResult::NoResponders;
        }

        let branches = responders.iter().map(|r| self.ask_one(r.as_ref(), question, cancel));
        let answers = join_all(branches).await;

        let ok = answers.iter().filter(|a| a.is_ok()).count();
        tracing::info!(asked = answers.len(), ok, "consensus fan-out settled");
        ConsensusResult::Answers(answers)
    }

    async fn ask_one(
        &self,
        responder: &dyn Responder,
        question: &str,
        cancel: &CancellationToken,
    ) -> ConsensusAnswer {
        let provider_id = responder.id().to_string();
        let start = Instant::now();
        let call = AssertUnwindSafe(responder.answer(question)).catch_unwind();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => AnswerOutcome::Error("cancelled".to_string()),
            r = timeout(self.responder_timeout, call) => match r {
                Ok(Ok(Ok(text))) => AnswerOutcome::Text(text),
                Ok(Ok(Err(e))) => AnswerOutcome::Error(e),
                Ok(Err(_)) => AnswerOutcome::Error("responder panicked".to_string()),
                Err(_) => AnswerOutcome::Error(format!(
                    "timed out after {}s",
                    self.responder_timeout.as_secs()
                )),
            },
        };
        tracing::debug!(
            provider = %provider_id,
            ok = matches!(outcome, AnswerOutcome::Text(_)),
            duration_ms = start.elapsed().as_millis() as u64,
            "consensus responder finished"
        );
        ConsensusAnswer { provider_id, outcome }
    }
}
