//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径经 resolve 校验必须在 root 下（禁止 ../ 逃逸）；
//! ListDirectoryTool / ReadFileTool 基于 SafeFs 提供 list_directory / read_file 能力。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::tools::schema::{parameters_schema, parse_args};
use crate::tools::{Tool, ToolRegistry};

/// read_file 返回内容的最大字符数
const MAX_READ_CHARS: usize = 16_000;

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    /// 检查路径是否在沙箱内；绝对路径按相对根目录处理
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let rel = path.trim_start_matches("./").trim_start_matches('/');
        if rel.is_empty() || rel == "." {
            return Ok(self.root_dir.clone());
        }
        let full = self.root_dir.join(rel);
        let canonical = full
            .canonicalize()
            .map_err(|_| AgentError::ToolExecutionFailed(format!("Path not found: {}", path)))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(AgentError::PathEscape(path.to_string()))
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {}", e)))
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>, AgentError> {
        let base = self.resolve(path)?;
        let mut entries = Vec::new();
        for e in std::fs::read_dir(&base)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("List failed: {}", e)))?
        {
            let e = e.map_err(|e| AgentError::ToolExecutionFailed(e.to_string()))?;
            let name = e.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') {
                let ty = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    "/"
                } else {
                    ""
                };
                entries.push(format!("{}{}", name, ty));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ListDirectoryArgs {
    /// 相对工作区的目录路径，默认 "."
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ReadFileArgs {
    /// 相对工作区的文件路径
    path: String,
}

/// list_directory：列出目录（隐藏文件除外，目录以 / 结尾）
pub struct ListDirectoryTool {
    fs: SafeFs,
}

impl ListDirectoryTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List a directory inside the workspace. Directories end with '/'."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<ListDirectoryArgs>()
    }

    async fn execute(&self, args: Value, _cancel: &CancellationToken) -> Result<String, String> {
        let args: ListDirectoryArgs = parse_args(self.name(), args)?;
        let path = args.path.unwrap_or_else(|| ".".to_string());
        tracing::info!(path = %path, "list_directory tool execute");
        let entries = self.fs.list_dir(&path).map_err(|e| e.to_string())?;
        if entries.is_empty() {
            Ok("(empty directory)".to_string())
        } else {
            Ok(entries.join("\n"))
        }
    }
}

/// read_file：读取文本文件，超长时截断
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file inside the workspace."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<ReadFileArgs>()
    }

    async fn execute(&self, args: Value, _cancel: &CancellationToken) -> Result<String, String> {
        let args: ReadFileArgs = parse_args(self.name(), args)?;
        tracing::info!(path = %args.path, "read_file tool execute");
        let content = self.fs.read_file(&args.path).map_err(|e| e.to_string())?;
        if content.chars().count() > MAX_READ_CHARS {
            let head: String = content.chars().take(MAX_READ_CHARS).collect();
            Ok(format!("{}\n...[truncated]", head))
        } else {
            Ok(content)
        }
    }
}

/// 构建 filesystem 分类
pub fn filesystem_category(root: impl AsRef<Path>) -> ToolRegistry {
    let fs = SafeFs::new(root);
    let mut registry = ToolRegistry::new("filesystem");
    registry.register(ListDirectoryTool::new(fs.clone()));
    registry.register(ReadFileTool::new(fs));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{HandlerCategory, Outcome};
    use serde_json::{json, Map};

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("notes")).unwrap();
        std::fs::write(dir.path().join("notes/todo.txt"), "buy milk").unwrap();
        std::fs::write(dir.path().join("readme.md"), "# hi").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        dir
    }

    #[tokio::test]
    async fn list_directory_hides_dotfiles_and_marks_dirs() {
        let dir = workspace();
        let cat = filesystem_category(dir.path());
        let out = cat.handle("list_directory", &Map::new(), &CancellationToken::new()).await;
        assert_eq!(out, Outcome::Handled("notes/\nreadme.md".into()));
    }

    #[tokio::test]
    async fn read_file_inside_workspace() {
        let dir = workspace();
        let cat = filesystem_category(dir.path());
        let out = cat
            .handle("read_file", &args(json!({"path": "notes/todo.txt"})), &CancellationToken::new())
            .await;
        assert_eq!(out, Outcome::Handled("buy milk".into()));
    }

    #[tokio::test]
    async fn escape_attempt_fails() {
        let dir = workspace();
        let cat = filesystem_category(dir.path().join("notes"));
        let out = cat
            .handle("read_file", &args(json!({"path": "../readme.md"})), &CancellationToken::new())
            .await;
        assert!(matches!(out, Outcome::Failed(ref r) if r.contains("Path escape")));
    }

    #[tokio::test]
    async fn missing_argument_fails_with_reason() {
        let dir = workspace();
        let cat = filesystem_category(dir.path());
        let out = cat.handle("read_file", &Map::new(), &CancellationToken::new()).await;
        assert!(matches!(out, Outcome::Failed(ref r) if r.contains("invalid arguments")));
    }
}
