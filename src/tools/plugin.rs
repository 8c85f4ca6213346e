//! 插件分类：由配置 [[tools.plugins]] 注册，运行「程序 + 参数模板」实现动态扩展
//!
//! 参数模板中 {{workspace}} 替换为沙箱根路径，{{key}} 从 LLM 传入的 args 中取 key；
//! 模板中出现的 key 自动声明为必填字符串参数。执行时无 shell，直接 exec program + 替换后的参数。
//! 插件分类在路由器中永远最后被询问。

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::PluginEntry;
use crate::tools::{Tool, ToolRegistry};

const WORKSPACE_PLACEHOLDER: &str = "workspace";

/// 从模板中提取 {{key}} 占位名（去重、保持出现顺序）
fn placeholders(template: &[String]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for part in template {
        let mut rest = part.as_str();
        while let Some(start) = rest.find("{{") {
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else { break };
            let key = after[..end].trim().to_string();
            if !key.is_empty() && key != WORKSPACE_PLACEHOLDER && !keys.contains(&key) {
                keys.push(key);
            }
            rest = &after[end + 2..];
        }
    }
    keys
}

/// 按 args 替换模板；缺少必需的 key 时返回错误
fn render_args(
    template: &[String],
    workspace: &Path,
    args: &Map<String, Value>,
) -> Result<Vec<String>, String> {
    let workspace_str = workspace.to_string_lossy();
    let missing: Vec<String> = placeholders(template)
        .into_iter()
        .filter(|k| !args.contains_key(k))
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing argument(s): {}", missing.join(", ")));
    }
    Ok(template
        .iter()
        .map(|tpl| {
            let mut s = tpl.replace("{{workspace}}", &workspace_str);
            for (k, v) in args {
                let val = match v {
                    Value::String(x) => x.clone(),
                    other => other.to_string(),
                };
                s = s.replace(&format!("{{{{{}}}}}", k), &val);
            }
            s
        })
        .collect())
}

/// 从配置项构建的插件工具
pub struct PluginTool {
    entry: PluginEntry,
    workspace: PathBuf,
    timeout: Duration,
}

impl PluginTool {
    pub fn new(entry: PluginEntry, workspace: &Path, timeout_secs: u64) -> Self {
        Self {
            entry,
            workspace: workspace.to_path_buf(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }
}

#[async_trait]
impl Tool for PluginTool {
    fn name(&self) -> &str {
        &self.entry.name
    }

    fn description(&self) -> &str {
        &self.entry.description
    }

    fn parameters_schema(&self) -> Value {
        let keys = placeholders(&self.entry.args);
        let properties: Map<String, Value> = keys
            .iter()
            .map(|k| (k.clone(), json!({ "type": "string" })))
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": keys,
        })
    }

    async fn execute(&self, args: Value, cancel: &CancellationToken) -> Result<String, String> {
        let empty = Map::new();
        let obj = args.as_object().unwrap_or(&empty);
        let argv = render_args(&self.entry.args, &self.workspace, obj)?;
        tracing::info!(tool = %self.entry.name, program = %self.entry.program, "plugin tool invoke");
        let child = Command::new(&self.entry.program)
            .args(&argv)
            .current_dir(&self.workspace)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("plugin spawn failed: {}", e))?;
        // 取消或超时时 child 随 future 一起 drop，kill_on_drop 负责结束进程
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err("plugin cancelled".to_string()),
            res = tokio::time::timeout(self.timeout, child.wait_with_output()) => res
                .map_err(|_| format!("plugin timeout after {}s", self.timeout.as_secs()))?
                .map_err(|e| format!("plugin wait failed: {}", e))?,
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(format!(
                "exit {:?}: stderr {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        Ok(stdout.trim().to_string())
    }
}

/// 构建 plugin 分类
pub fn plugin_category(entries: &[PluginEntry], workspace: &Path, timeout_secs: u64) -> ToolRegistry {
    let mut registry = ToolRegistry::new("plugin");
    for entry in entries {
        registry.register(PluginTool::new(entry.clone(), workspace, timeout_secs));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn placeholders_skip_workspace_and_duplicates() {
        let t = template(&["{{workspace}}/{{path}}", "--n={{count}}", "{{path}}"]);
        assert_eq!(placeholders(&t), vec!["path", "count"]);
    }

    #[test]
    fn render_substitutes_strings_and_numbers() {
        let t = template(&["{{workspace}}/{{path}}", "-n", "{{count}}"]);
        let mut args = Map::new();
        args.insert("path".into(), json!("a.txt"));
        args.insert("count".into(), json!(3));
        let argv = render_args(&t, Path::new("/ws"), &args).unwrap();
        assert_eq!(argv, vec!["/ws/a.txt", "-n", "3"]);
    }

    #[test]
    fn render_reports_missing_keys() {
        let t = template(&["{{path}}"]);
        let err = render_args(&t, Path::new("/ws"), &Map::new()).unwrap_err();
        assert_eq!(err, "missing argument(s): path");
    }

    #[test]
    fn schema_declares_template_keys() {
        let entry = PluginEntry {
            name: "wc".into(),
            description: "count words".into(),
            program: "wc".into(),
            args: template(&["-w", "{{path}}"]),
        };
        let tool = PluginTool::new(entry, Path::new("."), 5);
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], json!(["path"]));
        assert_eq!(schema["properties"]["path"]["type"], "string");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_program_without_shell() {
        let dir = tempfile::tempdir().unwrap();
        let entry = PluginEntry {
            name: "say".into(),
            description: "echo".into(),
            program: "echo".into(),
            args: template(&["hello", "{{who}}"]),
        };
        let tool = PluginTool::new(entry, dir.path(), 5);
        let out = tool
            .execute(json!({"who": "wren"}), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "hello wren");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_turn_stops_running_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let entry = PluginEntry {
            name: "nap".into(),
            description: "sleep".into(),
            program: "sleep".into(),
            args: template(&["30"]),
        };
        let tool = PluginTool::new(entry, dir.path(), 60);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let err = tool.execute(json!({}), &cancel).await.unwrap_err();
        assert_eq!(err, "plugin cancelled");
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
