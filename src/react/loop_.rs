//! 工具调用主循环（ToolCallLoop）
//!
//! 一次 turn：追加 user Turn → 提交历史与工具 schema → 模型回复纯文本则结束，
//! 回复工具调用则按模型给出的顺序逐个经路由器执行，把整批结果作为一个 ToolRound 重新提交，直到最终文本。
//! 模型往返次数不超过 round_budget，用尽时以已有文本正常结束；provider 失败时交给 HistoryRepair，
//! 不追加 model Turn。用量与工具失败序列随 TurnOutcome 返回，由调用方并入会话。
//! 可选 event_tx：向前端推送 RoundStarted / ToolCall / ToolResult / Repair / Final / Error。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{after_reply, begin_exchange, AgentError, HistoryRepair, LoopState, TurnStatus};
use crate::llm::{ModelProvider, ModelRequest, ToolRound};
use crate::memory::{ConversationState, ToolFailureStreak, UsageCounters, TOOL_ONLY_PLACEHOLDER};
use crate::react::events::send_event;
use crate::react::LoopEvent;
use crate::tools::ToolExecutionRouter;

/// 单次 turn 默认最多模型往返次数
pub const DEFAULT_ROUND_BUDGET: usize = 12;

/// runTurn 的结果
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    /// 返回给用户的文本（失败与取消时也有内容）
    pub text: String,
    /// 按执行顺序记录的工具名
    pub tools_used: Vec<String>,
    /// 本 turn 的用量增量
    pub usage: UsageCounters,
    /// 实际发生的模型往返次数
    pub exchanges: usize,
    pub tool_failures: ToolFailureStreak,
    pub status: TurnStatus,
}

/// 工具调用循环：provider + 路由器 + 修复策略 + 轮次上限；本身无会话状态，可在会话间共享
pub struct ToolCallLoop {
    provider: Arc<dyn ModelProvider>,
    router: Arc<ToolExecutionRouter>,
    repair: HistoryRepair,
    round_budget: usize,
}

impl ToolCallLoop {
    pub fn new(provider: Arc<dyn ModelProvider>, router: Arc<ToolExecutionRouter>) -> Self {
        Self {
            provider,
            router,
            repair: HistoryRepair::default(),
            round_budget: DEFAULT_ROUND_BUDGET,
        }
    }

    pub fn with_round_budget(mut self, budget: usize) -> Self {
        self.round_budget = budget.max(1);
        self
    }

    pub fn with_repair(mut self, repair: HistoryRepair) -> Self {
        self.repair = repair;
        self
    }

    pub fn round_budget(&self) -> usize {
        self.round_budget
    }

    pub fn router(&self) -> &ToolExecutionRouter {
        &self.router
    }

    /// 跑一次 turn；调用方需保证同一会话的 turn 不重叠（持有会话锁）
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        user_text: &str,
        cancel: &CancellationToken,
        event_tx: Option<&UnboundedSender<LoopEvent>>,
    ) -> TurnOutcome {
        state.push_user(user_text);

        let schemas = self.router.schemas();
        let mut usage = UsageCounters::default();
        let mut streak = ToolFailureStreak::default();
        let mut tools_used: Vec<String> = Vec::new();
        let mut rounds: Vec<ToolRound> = Vec::new();
        let mut exchanges = 0usize;
        let mut last_text = String::new();

        let mut loop_state = LoopState::Idle;
        let terminal = loop {
            tracing::debug!(state = loop_state.name(), exchanges, "tool loop transition");
            loop_state = match loop_state {
                LoopState::Idle | LoopState::AwaitingModel => {
                    match begin_exchange(exchanges, self.round_budget, cancel.is_cancelled()) {
                        Some(stop) => stop,
                        None => {
                            exchanges += 1;
                            send_event(
                                event_tx,
                                LoopEvent::RoundStarted {
                                    exchange: exchanges,
                                    budget: self.round_budget,
                                },
                            );
                            let history = state.eligible_history();
                            let request = ModelRequest {
                                history: &history,
                                tools: &schemas,
                                rounds: &rounds,
                            };
                            let result = tokio::select! {
                                _ = cancel.cancelled() => None,
                                r = self.provider.exchange(request) => Some(r),
                            };
                            match result {
                                None => LoopState::Cancelled,
                                Some(Ok(reply)) => {
                                    usage.record(&reply.usage);
                                    after_reply(reply)
                                }
                                Some(Err(e)) => LoopState::Failed(e),
                            }
                        }
                    }
                }
                LoopState::ExecutingTools { text, invocations } => {
                    if !text.trim().is_empty() {
                        last_text = text.clone();
                    }
                    let mut outcomes = Vec::with_capacity(invocations.len());
                    let mut interrupted = false;
                    for inv in &invocations {
                        if cancel.is_cancelled() {
                            interrupted = true;
                            break;
                        }
                        send_event(
                            event_tx,
                            LoopEvent::ToolCall {
                                tool: inv.name.clone(),
                                args: serde_json::Value::Object(inv.arguments.clone()),
                            },
                        );
                        // 取消时丢弃正在执行的工具，不等待它自行结束
                        let outcome = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            o = self.router.execute(&inv.name, &inv.arguments, cancel) => Some(o),
                        };
                        let Some(outcome) = outcome else {
                            tracing::info!(tool = %inv.name, "tool interrupted by cancellation");
                            interrupted = true;
                            break;
                        };
                        tools_used.push(inv.name.clone());
                        streak.record(outcome.succeeded);
                        send_event(
                            event_tx,
                            LoopEvent::tool_result(&inv.name, outcome.succeeded, &outcome.result_text),
                        );
                        outcomes.push(outcome);
                    }
                    if interrupted {
                        LoopState::Cancelled
                    } else {
                        rounds.push(ToolRound {
                            text,
                            invocations,
                            outcomes,
                        });
                        LoopState::AwaitingModel
                    }
                }
                done => break done,
            };
        };

        let (text, status) = match terminal {
            LoopState::Final(text) => {
                let text = pick_text(text, last_text);
                state.push_model(text.clone());
                (text, TurnStatus::Completed)
            }
            LoopState::RoundExceeded => {
                tracing::warn!(budget = self.round_budget, tools = tools_used.len(), "round budget exhausted");
                let text = pick_text(String::new(), last_text);
                state.push_model(text.clone());
                (text, TurnStatus::RoundBudgetExhausted)
            }
            LoopState::Failed(e) => {
                let err = AgentError::Provider(e);
                let report = self.repair.repair(state, &err);
                send_event(
                    event_tx,
                    LoopEvent::Repair {
                        truncated: report.truncated,
                        dropped_leading: report.dropped_leading,
                        size_class: report.size_class,
                    },
                );
                send_event(event_tx, LoopEvent::Error { text: err.to_string() });
                (
                    format!("Model request failed: {}", err),
                    TurnStatus::Failed {
                        error: err.to_string(),
                    },
                )
            }
            LoopState::Cancelled => {
                tracing::info!(exchanges, "turn cancelled");
                send_event(event_tx, LoopEvent::Error { text: "Cancelled".to_string() });
                ("Turn cancelled.".to_string(), TurnStatus::Cancelled)
            }
            other => {
                // 循环只会以终止状态退出
                let text = format!("Turn ended in unexpected state {}", other.name());
                (text.clone(), TurnStatus::Failed { error: text })
            }
        };

        if status.is_success() {
            send_event(event_tx, LoopEvent::Final { text: text.clone() });
        }
        tracing::info!(
            exchanges,
            tools = tools_used.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            status = ?status,
            "turn finished"
        );
        TurnOutcome {
            text,
            tools_used,
            usage,
            exchanges,
            tool_failures: streak,
            status,
        }
    }
}

/// 最终文本：优先本次回复，其次最近一次随工具调用给出的文本，都为空时用占位
fn pick_text(text: String, last_text: String) -> String {
    if !text.trim().is_empty() {
        text
    } else if !last_text.trim().is_empty() {
        last_text
    } else {
        TOOL_ONLY_PLACEHOLDER.to_string()
    }
}
