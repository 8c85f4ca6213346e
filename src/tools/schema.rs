//! 工具参数 JSON Schema 生成（schemars 自动生成内置工具的参数 Schema）
//!
//! 内置工具把参数定义为带 JsonSchema 的结构体，既用于声明 schema，也用于解析 LLM 传入的 args。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 生成参数结构体的 JSON Schema（去掉 $schema / title 等顶层元信息）
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| {
        serde_json::json!({ "type": "object", "properties": {} })
    });
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// 把 LLM 传入的 args 解析为参数结构体；失败时返回可读的错误文本
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("invalid arguments for {}: {}", tool, e))
}
