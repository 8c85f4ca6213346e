//! Wren - 智能体编排核心
//!
//! 模块划分：
//! - **agent**: 无头 Agent 运行时（按配置组装、会话锁、快照持久化）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **consensus**: 同一问题并发问多个模型并汇总
//! - **core**: 错误、历史修复、循环状态机、会话监管
//! - **jobs**: 长任务（安全扫描）的启动与有界轮询
//! - **llm**: provider 抽象与实现（OpenAI 兼容 / Mock / 脚本化）
//! - **memory**: 会话 Turn 历史、用量计数、vitals、快照
//! - **observability**: tracing 初始化
//! - **react**: 工具调用主循环
//! - **tools**: 工具注册表、分类路由器与内置分类

pub mod agent;
pub mod config;
pub mod consensus;
pub mod core;
pub mod jobs;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::Agent;
pub use react::{ToolCallLoop, TurnOutcome};
