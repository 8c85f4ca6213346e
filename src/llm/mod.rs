//! LLM 层：provider 抽象与实现（OpenAI 兼容 / Mock / 脚本化）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{MockProvider, ScriptedProvider, SeenRequest};
pub use openai::OpenAiCompatProvider;
pub use traits::{LlmError, ModelProvider, ModelReply, ModelRequest, ToolInvocation, ToolRound};
