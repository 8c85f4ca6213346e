//! Headless Agent 运行时
//!
//! 供 stdin / HTTP 等前端调用的无界面逻辑：
//! create_agent_components 按配置构建 provider、工具路由器（filesystem → jobs → consensus → plugin）与 ToolCallLoop；
//! Agent::open_session 读取会话快照（strain 按半衰期衰减）；
//! Agent::run_turn 持会话锁跑一次 turn，把返回的用量与失败序列并入会话，成功时写快照。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::{AppConfig, LlmSection};
use crate::consensus::{ConsensusFanout, LlmResponder, Responder};
use crate::core::{AgentError, HistoryRepair, SessionHandle};
use crate::jobs::{AsyncJobPoller, HttpJobService, JobService, PollOptions};
use crate::llm::{MockProvider, ModelProvider, OpenAiCompatProvider};
use crate::memory::{ConversationState, SessionSnapshot, SnapshotStore};
use crate::react::{LoopEvent, ToolCallLoop, TurnOutcome};
use crate::tools::{
    consensus_category, filesystem_category, jobs_category, plugin_category, ToolExecutionRouter,
};

const SYSTEM_PROMPT: &str = "You are a personal assistant with access to tools. \
Use tools when they help answer the request, read tool results carefully, \
and reply with a concise final answer once you have what you need.";

/// 预构建的 Agent 组件，可多会话共享
pub struct AgentComponents {
    pub tool_loop: ToolCallLoop,
    pub snapshots: SnapshotStore,
    pub max_history_turns: usize,
    pub strain_half_life_secs: u64,
}

/// 按 [llm] 段创建 provider：openai（OpenAI 兼容接口）或 mock
pub fn build_provider(llm: &LlmSection) -> Result<Arc<dyn ModelProvider>, AgentError> {
    match llm.provider.as_str() {
        "mock" => Ok(Arc::new(MockProvider)),
        "openai" => {
            let api_key = std::env::var(&llm.api_key_env).ok();
            let provider = OpenAiCompatProvider::new(
                "openai",
                llm.base_url.as_deref(),
                &llm.model,
                api_key.as_deref(),
                llm.request_timeout_secs,
            )?
            .with_system_prompt(SYSTEM_PROMPT);
            Ok(Arc::new(provider))
        }
        other => Err(AgentError::ConfigError(format!("unknown llm provider: {}", other))),
    }
}

/// 构建工具路由器；分类按优先级加入，插件分类兜底
pub fn build_router(cfg: &AppConfig) -> Result<ToolExecutionRouter, AgentError> {
    let workspace = cfg.app.workspace();
    std::fs::create_dir_all(&workspace).map_err(|e| {
        AgentError::ConfigError(format!("cannot create workspace {}: {}", workspace.display(), e))
    })?;

    let mut router = ToolExecutionRouter::new(cfg.tools.tool_timeout_secs)
        .with_category(Arc::new(filesystem_category(&workspace)));

    if let Some(base_url) = cfg.jobs.base_url.as_deref() {
        let service: Arc<dyn JobService> = Arc::new(
            HttpJobService::new(base_url, cfg.jobs.poll_timeout_secs)
                .map_err(|e| AgentError::ConfigError(format!("job service: {}", e)))?,
        );
        let options = PollOptions::from_secs(cfg.jobs.interval_secs, cfg.jobs.deadline_secs)
            .with_request_timeout(cfg.jobs.poll_timeout_secs)
            .with_top_findings(cfg.jobs.top_findings);
        router = router.with_category(Arc::new(jobs_category(service, AsyncJobPoller::new(options))));
    }

    let mut responders: Vec<Arc<dyn Responder>> = Vec::new();
    for entry in &cfg.consensus.responders {
        match LlmResponder::from_entry(entry, cfg.consensus.responder_timeout_secs) {
            Ok(r) => responders.push(Arc::new(r)),
            Err(e) => tracing::warn!(responder = %entry.id, error = %e, "skipping consensus responder"),
        }
    }
    let fanout = ConsensusFanout::new(cfg.consensus.responder_timeout_secs);
    router = router.with_category(Arc::new(consensus_category(fanout, responders)));

    if !cfg.tools.plugins.is_empty() {
        router = router.with_plugin_fallback(Arc::new(plugin_category(
            &cfg.tools.plugins,
            &workspace,
            cfg.tools.tool_timeout_secs,
        )));
    }

    tracing::info!(categories = ?router.category_names(), "tool router ready");
    Ok(router)
}

/// 用给定 provider 与路由器组装组件（测试与嵌入场景可直接注入）
pub fn assemble_components(
    cfg: &AppConfig,
    provider: Arc<dyn ModelProvider>,
    router: ToolExecutionRouter,
) -> AgentComponents {
    let tool_loop = ToolCallLoop::new(provider, Arc::new(router))
        .with_round_budget(cfg.agent.round_budget)
        .with_repair(HistoryRepair::new(cfg.agent.repair_keep_turns));
    AgentComponents {
        tool_loop,
        snapshots: SnapshotStore::new(cfg.app.state_dir()),
        max_history_turns: cfg.app.max_history_turns,
        strain_half_life_secs: cfg.agent.strain_half_life_secs,
    }
}

/// 创建 Agent 组件：从配置加载 provider、工具分类、轮次上限与修复策略
pub fn create_agent_components(cfg: &AppConfig) -> Result<AgentComponents, AgentError> {
    let provider = build_provider(&cfg.llm)?;
    let router = build_router(cfg)?;
    Ok(assemble_components(cfg, provider, router))
}

/// 无头 Agent
pub struct Agent {
    components: AgentComponents,
}

impl Agent {
    pub fn new(components: AgentComponents) -> Self {
        Self { components }
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        Ok(Self::new(create_agent_components(cfg)?))
    }

    pub fn components(&self) -> &AgentComponents {
        &self.components
    }

    /// 打开会话：恢复上次成功 turn 后保存的用量与 vitals（历史本身不落盘）
    pub fn open_session(&self, session_id: &str) -> SessionHandle {
        let mut state = ConversationState::new(self.components.max_history_turns);
        match self
            .components
            .snapshots
            .load(session_id, self.components.strain_half_life_secs)
        {
            Ok(Some(snapshot)) => {
                state.usage = snapshot.usage;
                state.vitals = snapshot.vitals;
                tracing::info!(session = %session_id, requests = snapshot.usage.requests, "session snapshot restored");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "failed to load session snapshot, starting fresh")
            }
        }
        SessionHandle::new(session_id, state)
    }

    /// 处理单条用户消息（无事件流）
    pub async fn run_turn(&self, session: &SessionHandle, user_input: &str) -> TurnOutcome {
        self.run_turn_with_events(session, user_input, None).await
    }

    /// 处理单条用户消息；event_tx 推送 RoundStarted / ToolCall / ToolResult / Final 等事件
    pub async fn run_turn_with_events(
        &self,
        session: &SessionHandle,
        user_input: &str,
        event_tx: Option<&UnboundedSender<LoopEvent>>,
    ) -> TurnOutcome {
        let mut state = session.lock().await;
        let cancel = session.supervisor().begin_turn();
        let outcome = self
            .components
            .tool_loop
            .run_turn(&mut state, user_input, &cancel, event_tx)
            .await;

        state.usage.merge(&outcome.usage);
        state.vitals.fold(outcome.tool_failures);

        if outcome.status.is_success() {
            let snapshot = SessionSnapshot {
                session_id: session.id().to_string(),
                usage: state.usage,
                vitals: state.vitals,
                saved_at: chrono::Utc::now(),
            };
            if let Err(e) = self.components.snapshots.save(&snapshot) {
                tracing::warn!(session = %session.id(), error = %e, "failed to persist session snapshot");
            }
        }
        outcome
    }

    /// 用户显式清零用量计数
    pub async fn reset_usage(&self, session: &SessionHandle) {
        session.lock().await.reset_usage();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.app.workspace_root = Some(dir.join("ws"));
        cfg.llm.provider = "mock".to_string();
        cfg
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let mut llm = LlmSection::default();
        llm.provider = "carrier-pigeon".to_string();
        assert!(matches!(build_provider(&llm), Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn router_order_without_jobs_or_plugins() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(&config_in(dir.path())).unwrap();
        assert_eq!(router.category_names(), vec!["filesystem", "consensus"]);
    }

    #[test]
    fn router_order_with_jobs_and_plugins() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_in(dir.path());
        cfg.jobs.base_url = Some("http://127.0.0.1:9/api".to_string());
        cfg.tools.plugins.push(crate::config::PluginEntry {
            name: "word_count".into(),
            description: "count words".into(),
            program: "wc".into(),
            args: vec!["-w".into(), "{{path}}".into()],
        });
        let router = build_router(&cfg).unwrap();
        assert_eq!(
            router.category_names(),
            vec!["filesystem", "jobs", "consensus", "plugin"]
        );
        let names: Vec<String> = router.schemas().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"start_security_scan".to_string()));
        assert!(names.contains(&"word_count".to_string()));
    }

    #[tokio::test]
    async fn mock_agent_round_trip_persists_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let agent = Agent::from_config(&cfg).unwrap();
        let session = agent.open_session("cli");
        let out = agent.run_turn(&session, "ping").await;
        assert_eq!(out.text, "Echo from Mock: ping");

        let reopened = agent.open_session("cli");
        assert_eq!(reopened.lock().await.usage.requests, 1);
    }
}
