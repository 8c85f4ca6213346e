//! 工具执行路由器
//!
//! 按固定优先级依次询问各 handler 分类，第一个认领名字的分类负责执行；插件分类永远最后兜底。
//! 每次分派施加超时并隔离 panic，结果统一为 ToolOutcome（succeeded + 文本），错误从不逃逸；
//! 每次调用输出结构化审计日志（JSON）。路由器不持有会话状态，可在所有会话间共享。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::tools::ToolSchema;

/// handler 分类的分派结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 已处理，附带结果文本
    Handled(String),
    /// 名字不属于本分类，交给下一个分类
    Unrecognized,
    /// 已认领但执行失败
    Failed(String),
}

/// handler 分类：对一组工具名负责
#[async_trait]
pub trait HandlerCategory: Send + Sync {
    fn name(&self) -> &str;

    /// 本分类声明的工具 schema
    fn schemas(&self) -> Vec<ToolSchema>;

    /// cancel 为当前 turn 的取消令牌；长任务类 handler 应在其触发时尽快返回
    async fn handle(
        &self,
        name: &str,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Outcome;

    /// 本分类的分派超时；None 时使用路由器默认值（长任务类分类需要更长的上限）
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// 一次工具执行的归一化结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutcome {
    pub name: String,
    pub result_text: String,
    pub succeeded: bool,
}

impl ToolOutcome {
    pub fn success(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result_text: text.into(),
            succeeded: true,
        }
    }

    pub fn failure(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result_text: text.into(),
            succeeded: false,
        }
    }
}

/// 工具执行路由器：有序分类列表 + 插件兜底 + 单次超时
pub struct ToolExecutionRouter {
    categories: Vec<Arc<dyn HandlerCategory>>,
    plugin: Option<Arc<dyn HandlerCategory>>,
    timeout: Duration,
}

impl ToolExecutionRouter {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            categories: Vec::new(),
            plugin: None,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// 按优先级追加分类（先加入的先被询问）
    pub fn with_category(mut self, category: Arc<dyn HandlerCategory>) -> Self {
        self.categories.push(category);
        self
    }

    /// 设置插件兜底分类，无论何时加入都在最后询问
    pub fn with_plugin_fallback(mut self, plugin: Arc<dyn HandlerCategory>) -> Self {
        self.plugin = Some(plugin);
        self
    }

    fn ordered(&self) -> impl Iterator<Item = &Arc<dyn HandlerCategory>> {
        self.categories.iter().chain(self.plugin.iter())
    }

    pub fn category_names(&self) -> Vec<String> {
        self.ordered().map(|c| c.name().to_string()).collect()
    }

    /// 所有分类的 schema；同名工具只保留优先级最高的一份
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for category in self.ordered() {
            for schema in category.schemas() {
                if seen.insert(schema.name.clone()) {
                    out.push(schema);
                }
            }
        }
        out
    }

    /// 执行指定工具；未知名字、失败、超时、panic 都转为 succeeded=false 的 ToolOutcome。
    /// cancel 原样交给认领的分类，由其决定如何提前结束
    pub async fn execute(
        &self,
        name: &str,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> ToolOutcome {
        let start = Instant::now();
        let (outcome, claimed_by, kind) = self.dispatch(name, args, cancel).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = audit_record(name, claimed_by, kind, duration_ms, args);
        tracing::info!(audit = %audit.to_string(), "tool");
        outcome
    }

    /// 询问各分类并执行；返回结果、认领的分类名与审计分类
    async fn dispatch(
        &self,
        name: &str,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> (ToolOutcome, Option<&str>, AuditOutcome) {
        for category in self.ordered() {
            let limit = category.timeout().unwrap_or(self.timeout);
            let dispatch = AssertUnwindSafe(category.handle(name, args, cancel)).catch_unwind();
            let (result, result_kind) = match timeout(limit, dispatch).await {
                Ok(Ok(Outcome::Unrecognized)) => continue,
                Ok(Ok(Outcome::Handled(text))) => (ToolOutcome::success(name, text), AuditOutcome::Ok),
                Ok(Ok(Outcome::Failed(reason))) => (
                    ToolOutcome::failure(name, format!("Tool error: {}", reason)),
                    AuditOutcome::Failed,
                ),
                Ok(Err(_)) => (
                    ToolOutcome::failure(name, format!("Tool error: handler for {} panicked", name)),
                    AuditOutcome::Panic,
                ),
                Err(_) => (
                    ToolOutcome::failure(
                        name,
                        format!("Tool error: {} timed out after {}s", name, limit.as_secs()),
                    ),
                    AuditOutcome::Timeout,
                ),
            };
            return (result, Some(category.name()), result_kind);
        }
        (
            ToolOutcome::failure(name, format!("Unknown tool: {}", name)),
            None,
            AuditOutcome::Unknown,
        )
    }
}

/// 审计记录中的分派结果分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Ok,
    Failed,
    Timeout,
    Panic,
    /// 没有分类认领该名字
    Unknown,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditOutcome::Ok => "ok",
            AuditOutcome::Failed => "failed",
            AuditOutcome::Timeout => "timeout",
            AuditOutcome::Panic => "panic",
            AuditOutcome::Unknown => "unknown",
        }
    }
}

fn audit_record(
    name: &str,
    category: Option<&str>,
    kind: AuditOutcome,
    duration_ms: u64,
    args: &Map<String, Value>,
) -> Value {
    serde_json::json!({
        "event": "tool_audit",
        "tool": name,
        "category": category,
        "ok": kind == AuditOutcome::Ok,
        "outcome": kind.as_str(),
        "duration_ms": duration_ms,
        "args_preview": args_preview(args),
    })
}

fn args_preview(args: &Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 认领固定名字集合的测试分类，记录被询问次数
    struct Fixed {
        label: &'static str,
        names: &'static [&'static str],
        reply: Outcome,
        asked: AtomicUsize,
    }

    impl Fixed {
        fn new(label: &'static str, names: &'static [&'static str], reply: Outcome) -> Arc<Self> {
            Arc::new(Self {
                label,
                names,
                reply,
                asked: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl HandlerCategory for Fixed {
        fn name(&self) -> &str {
            self.label
        }

        fn schemas(&self) -> Vec<ToolSchema> {
            self.names
                .iter()
                .map(|n| ToolSchema {
                    name: n.to_string(),
                    description: self.label.to_string(),
                    parameters: serde_json::json!({"type": "object"}),
                })
                .collect()
        }

        async fn handle(
            &self,
            name: &str,
            _args: &Map<String, Value>,
            _cancel: &CancellationToken,
        ) -> Outcome {
            self.asked.fetch_add(1, Ordering::SeqCst);
            if self.names.contains(&name) {
                self.reply.clone()
            } else {
                Outcome::Unrecognized
            }
        }
    }

    struct Panicky;

    #[async_trait]
    impl HandlerCategory for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        fn schemas(&self) -> Vec<ToolSchema> {
            Vec::new()
        }

        async fn handle(
            &self,
            _name: &str,
            _args: &Map<String, Value>,
            _cancel: &CancellationToken,
        ) -> Outcome {
            panic!("boom");
        }
    }

    struct Slow;

    #[async_trait]
    impl HandlerCategory for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn schemas(&self) -> Vec<ToolSchema> {
            Vec::new()
        }

        async fn handle(
            &self,
            _name: &str,
            _args: &Map<String, Value>,
            _cancel: &CancellationToken,
        ) -> Outcome {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Outcome::Handled("late".into())
        }
    }

    #[tokio::test]
    async fn first_recognizing_category_wins() {
        let memory = Fixed::new("memory", &["remember"], Outcome::Handled("m".into()));
        let fs = Fixed::new("filesystem", &["read_file", "remember"], Outcome::Handled("f".into()));
        let router = ToolExecutionRouter::new(5)
            .with_category(memory.clone())
            .with_category(fs.clone());

        let out = router.execute("read_file", &Map::new(), &CancellationToken::new()).await;
        assert!(out.succeeded);
        assert_eq!(out.result_text, "f");

        let out = router.execute("remember", &Map::new(), &CancellationToken::new()).await;
        assert_eq!(out.result_text, "m");
        assert_eq!(fs.asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn plugin_fallback_is_consulted_last() {
        let plugin = Fixed::new("plugin", &["x"], Outcome::Handled("plugin".into()));
        let web = Fixed::new("web", &["x"], Outcome::Handled("web".into()));
        let router = ToolExecutionRouter::new(5)
            .with_plugin_fallback(plugin.clone())
            .with_category(web);
        assert_eq!(router.category_names(), vec!["web", "plugin"]);
        assert_eq!(router.execute("x", &Map::new(), &CancellationToken::new()).await.result_text, "web");
        assert_eq!(plugin.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_name_is_failed_outcome_every_time() {
        let router = ToolExecutionRouter::new(5)
            .with_category(Fixed::new("a", &["known"], Outcome::Handled("ok".into())));
        for _ in 0..3 {
            let out = router.execute("nope", &Map::new(), &CancellationToken::new()).await;
            assert!(!out.succeeded);
            assert_eq!(out.result_text, "Unknown tool: nope");
        }
    }

    #[tokio::test]
    async fn failed_handler_is_reported_as_tool_error() {
        let router = ToolExecutionRouter::new(5)
            .with_category(Fixed::new("fs", &["read_file"], Outcome::Failed("permission denied".into())));
        let out = router.execute("read_file", &Map::new(), &CancellationToken::new()).await;
        assert!(!out.succeeded);
        assert_eq!(out.result_text, "Tool error: permission denied");
    }

    #[tokio::test]
    async fn panicking_handler_does_not_escape() {
        let router = ToolExecutionRouter::new(5).with_category(Arc::new(Panicky));
        let out = router.execute("anything", &Map::new(), &CancellationToken::new()).await;
        assert!(!out.succeeded);
        assert!(out.result_text.contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let router = ToolExecutionRouter::new(2).with_category(Arc::new(Slow));
        let out = router.execute("anything", &Map::new(), &CancellationToken::new()).await;
        assert!(!out.succeeded);
        assert!(out.result_text.contains("timed out after 2s"));
    }

    #[test]
    fn schemas_deduplicate_by_priority() {
        let a = Fixed::new("a", &["dup", "only_a"], Outcome::Unrecognized);
        let b = Fixed::new("b", &["dup"], Outcome::Unrecognized);
        let router = ToolExecutionRouter::new(5).with_category(a).with_category(b);
        let schemas = router.schemas();
        assert_eq!(schemas.len(), 2);
        let dup = schemas.iter().find(|s| s.name == "dup").unwrap();
        assert_eq!(dup.description, "a");
    }

    /// 等待取消令牌后返回的分类
    struct WaitsForCancel;

    #[async_trait]
    impl HandlerCategory for WaitsForCancel {
        fn name(&self) -> &str {
            "waits"
        }

        fn schemas(&self) -> Vec<ToolSchema> {
            Vec::new()
        }

        async fn handle(
            &self,
            _name: &str,
            _args: &Map<String, Value>,
            cancel: &CancellationToken,
        ) -> Outcome {
            cancel.cancelled().await;
            Outcome::Failed("cancelled".into())
        }

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_secs(3600))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn turn_token_reaches_the_handler() {
        let router = Arc::new(ToolExecutionRouter::new(5).with_category(Arc::new(WaitsForCancel)));
        let cancel = CancellationToken::new();
        let running = tokio::spawn({
            let (router, cancel) = (router.clone(), cancel.clone());
            async move { router.execute("scan", &Map::new(), &cancel).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        let started = tokio::time::Instant::now();
        cancel.cancel();
        let out = running.await.unwrap();
        assert!(!out.succeeded);
        assert_eq!(out.result_text, "Tool error: cancelled");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn audit_outcome_distinguishes_failure_kinds() {
        let cancel = CancellationToken::new();
        let router = ToolExecutionRouter::new(2)
            .with_category(Fixed::new("ok", &["good"], Outcome::Handled("fine".into())))
            .with_category(Fixed::new("bad", &["broken"], Outcome::Failed("nope".into())));
        let (_, category, kind) = router.dispatch("good", &Map::new(), &cancel).await;
        assert_eq!((category, kind), (Some("ok"), AuditOutcome::Ok));
        let (_, category, kind) = router.dispatch("broken", &Map::new(), &cancel).await;
        assert_eq!((category, kind), (Some("bad"), AuditOutcome::Failed));
        let (_, category, kind) = router.dispatch("missing", &Map::new(), &cancel).await;
        assert_eq!((category, kind), (None, AuditOutcome::Unknown));

        let router = ToolExecutionRouter::new(2).with_category(Arc::new(Slow));
        let (_, _, kind) = router.dispatch("x", &Map::new(), &cancel).await;
        assert_eq!(kind, AuditOutcome::Timeout);

        let router = ToolExecutionRouter::new(2).with_category(Arc::new(Panicky));
        let (_, _, kind) = router.dispatch("x", &Map::new(), &cancel).await;
        assert_eq!(kind, AuditOutcome::Panic);
    }

    #[test]
    fn audit_record_carries_outcome_label() {
        let record = audit_record("read_file", Some("fs"), AuditOutcome::Timeout, 12, &Map::new());
        assert_eq!(record["outcome"], "timeout");
        assert_eq!(record["ok"], false);
        assert_eq!(record["category"], "fs");
        let record = audit_record("nope", None, AuditOutcome::Unknown, 0, &Map::new());
        assert_eq!(record["outcome"], "unknown");
        assert!(record["category"].is_null());
    }
}
