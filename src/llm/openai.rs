//! OpenAI 兼容 API provider
//!
//! 基于 async-openai 调用任意 OpenAI 兼容端点（可配置 api_base）：
//! Turn 历史转为 user / assistant 消息，已执行的工具批次转为带 tool_calls 的 assistant 消息 + tool 消息，
//! 声明的工具 schema 转为 function tools；OpenAIError 按类型与消息归类为 LlmError。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionTools,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    FunctionCall, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::llm::{LlmError, ModelProvider, ModelReply, ModelRequest, ToolInvocation, ToolRound};
use crate::memory::{ExchangeUsage, Role};
use crate::tools::ToolSchema;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI 兼容 provider：持有 async-openai Client、模型名、请求超时与可选 system prompt
pub struct OpenAiCompatProvider {
    id: String,
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    system_prompt: Option<String>,
}

impl OpenAiCompatProvider {
    pub fn new(
        id: impl Into<String>,
        base_url: Option<&str>,
        model: &str,
        api_key: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self, LlmError> {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        let api_base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
        let config = OpenAIConfig::new()
            .with_api_base(api_base)
            .with_api_key(api_key);
        Ok(Self {
            id: id.into(),
            client: Client::with_config(config),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
            system_prompt: None,
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// 构造 chat completion 请求
    fn build_request(
        &self,
        request: &ModelRequest<'_>,
    ) -> Result<CreateChatCompletionRequest, LlmError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.as_str())
                    .build()
                    .map_err(invalid_request)?
                    .into(),
            );
        }
        for turn in request.history {
            let message: ChatCompletionRequestMessage = match turn.role {
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.content.as_str())
                    .build()
                    .map_err(invalid_request)?
                    .into(),
                Role::Model => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.content.as_str())
                    .build()
                    .map_err(invalid_request)?
                    .into(),
            };
            messages.push(message);
        }
        for round in request.rounds {
            round_messages(round, &mut messages)?;
        }

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.as_str()).messages(messages);
        if !request.tools.is_empty() {
            let tools = request
                .tools
                .iter()
                .map(function_tool)
                .collect::<Result<Vec<_>, _>>()?;
            args.tools(tools);
        }
        args.build().map_err(invalid_request)
    }
}

/// 一个工具批次：一条带全部 tool_calls 的 assistant 消息，随后按同序每个调用一条 tool 消息
fn round_messages(
    round: &ToolRound,
    messages: &mut Vec<ChatCompletionRequestMessage>,
) -> Result<(), LlmError> {
    let tool_calls: Vec<ChatCompletionMessageToolCalls> = round
        .invocations
        .iter()
        .map(|inv| {
            ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                id: inv.id.clone(),
                function: FunctionCall {
                    name: inv.name.clone(),
                    arguments: Value::Object(inv.arguments.clone()).to_string(),
                },
            })
        })
        .collect();
    let mut assistant = ChatCompletionRequestAssistantMessageArgs::default();
    assistant.tool_calls(tool_calls);
    if !round.text.is_empty() {
        assistant.content(round.text.as_str());
    }
    messages.push(assistant.build().map_err(invalid_request)?.into());

    for (inv, outcome) in round.invocations.iter().zip(&round.outcomes) {
        messages.push(
            ChatCompletionRequestToolMessageArgs::default()
                .content(outcome.result_text.as_str())
                .tool_call_id(inv.id.as_str())
                .build()
                .map_err(invalid_request)?
                .into(),
        );
    }
    Ok(())
}

fn function_tool(schema: &ToolSchema) -> Result<ChatCompletionTools, LlmError> {
    let function = FunctionObjectArgs::default()
        .name(schema.name.as_str())
        .description(schema.description.as_str())
        .parameters(schema.parameters.clone())
        .build()
        .map_err(invalid_request)?;
    Ok(ChatCompletionTools::Function(ChatCompletionTool { function }))
}

fn invalid_request(e: OpenAIError) -> LlmError {
    LlmError::Malformed(format!("invalid request: {}", e))
}

/// OpenAIError → LlmError
fn map_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::ApiError(api) => LlmError::from_api_message(&api.message),
        OpenAIError::Reqwest(e) if e.is_timeout() => LlmError::Timeout,
        OpenAIError::Reqwest(e) => LlmError::Network(e.to_string()),
        OpenAIError::JSONDeserialize(..) => LlmError::Malformed(e.to_string()),
        other => LlmError::Network(other.to_string()),
    }
}

/// 工具参数字符串转为对象；不是 JSON 对象时整体放入 {"raw": ...}，空串为 {}
fn parse_arguments(raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => return map,
        Ok(other) => other,
        Err(_) => Value::String(raw.to_string()),
    };
    let mut map = Map::new();
    map.insert("raw".to_string(), value);
    map
}

/// 解析响应为 ModelReply；只取第一个 choice
fn parse_reply(resp: CreateChatCompletionResponse) -> Result<ModelReply, LlmError> {
    let usage = resp
        .usage
        .map(|u| ExchangeUsage {
            input_tokens: u.prompt_tokens as u64,
            output_tokens: u.completion_tokens as u64,
            total_tokens: Some(u.total_tokens as u64),
        })
        .unwrap_or_default();
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Malformed("response has no choices".to_string()))?;
    let invocations = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|call| match call {
            ChatCompletionMessageToolCalls::Function(call) => {
                let arguments = parse_arguments(&call.function.arguments);
                let mut inv = ToolInvocation::new(call.function.name, arguments);
                if !call.id.is_empty() {
                    inv.id = call.id;
                }
                Some(inv)
            }
            other => {
                tracing::warn!(call = ?other, "ignoring non-function tool call");
                None
            }
        })
        .collect();
    Ok(ModelReply {
        text: choice.message.content.unwrap_or_default(),
        invocations,
        usage,
    })
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exchange(&self, request: ModelRequest<'_>) -> Result<ModelReply, LlmError> {
        let body = self.build_request(&request)?;
        tracing::debug!(
            provider = %self.id,
            history = request.history.len(),
            rounds = request.rounds.len(),
            "chat completion request"
        );
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(body))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(map_error)?;
        parse_reply(response)
    }
}
