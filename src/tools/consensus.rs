//! ask_other_models：把问题发给其它已配置的模型，返回各自的回答供主模型综合

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::consensus::{ConsensusFanout, Responder};
use crate::tools::schema::{parameters_schema, parse_args};
use crate::tools::{Tool, ToolRegistry};

#[derive(Debug, Deserialize, JsonSchema)]
struct AskArgs {
    /// 要请其它模型回答的问题（需自包含上下文）
    question: String,
}

pub struct AskOtherModelsTool {
    fanout: ConsensusFanout,
    responders: Vec<Arc<dyn Responder>>,
}

impl AskOtherModelsTool {
    pub fn new(fanout: ConsensusFanout, responders: Vec<Arc<dyn Responder>>) -> Self {
        Self { fanout, responders }
    }
}

#[async_trait]
impl Tool for AskOtherModelsTool {
    fn name(&self) -> &str {
        "ask_other_models"
    }

    fn description(&self) -> &str {
        "Ask the same question to the other configured models and get each answer (or error) back for comparison."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<AskArgs>()
    }

    async fn execute(&self, args: Value, cancel: &CancellationToken) -> Result<String, String> {
        let args: AskArgs = parse_args(self.name(), args)?;
        if args.question.trim().is_empty() {
            return Err("question must not be empty".to_string());
        }
        let result = self
            .fanout
            .ask(&args.question, &self.responders, cancel)
            .await;
        Ok(result.render())
    }
}

/// 构建 consensus 分类；分派超时比单个 responder 超时略长
pub fn consensus_category(fanout: ConsensusFanout, responders: Vec<Arc<dyn Responder>>) -> ToolRegistry {
    let limit = fanout.responder_timeout() + Duration::from_secs(5);
    let mut registry = ToolRegistry::new("consensus").with_timeout(limit);
    registry.register(AskOtherModelsTool::new(fanout, responders));
    registry
}
