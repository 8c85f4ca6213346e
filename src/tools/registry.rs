//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找；
//! 每个 ToolRegistry 就是一个命名的 handler 分类（filesystem、jobs、consensus …），
//! 对未注册的名字返回 Outcome::Unrecognized，路由器据此尝试下一个分类。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::tools::{HandlerCategory, Outcome};

/// 提交给 provider 的工具声明
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// 参数 JSON Schema
    pub parameters: Value,
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON 对象）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认表示无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；Err 为应用层失败原因（路径不存在、权限不足、参数错误等）。
    /// 耗时较长的工具在 cancel 触发后应尽快返回
    async fn execute(&self, args: Value, cancel: &CancellationToken) -> Result<String, String>;
}

/// 工具注册表：一个命名分类下的工具集合，纯查找、无状态
pub struct ToolRegistry {
    category: String,
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            tools: HashMap::new(),
            timeout: None,
        }
    }

    /// 覆盖路由器的默认分派超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(category = %self.category, tool = %name, "tool re-registered, replacing previous handler");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 按名称排序的工具名列表
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl HandlerCategory for ToolRegistry {
    fn name(&self) -> &str {
        &self.category
    }

    fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .iter()
            .map(|(name, tool)| ToolSchema {
                name: name.clone(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn handle(
        &self,
        name: &str,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Outcome {
        let Some(tool) = self.tools.get(name) else {
            return Outcome::Unrecognized;
        };
        match tool.execute(Value::Object(args.clone()), cancel).await {
            Ok(text) => Outcome::Handled(text),
            Err(reason) => Outcome::Failed(reason),
        }
    }
}
