//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WREN__*` 覆盖（双下划线表示嵌套，如 `WREN__LLM__PROVIDER=mock`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub consensus: ConsensusSection,
    #[serde(default)]
    pub jobs: JobsSection,
}

/// [app] 段：应用名、工作目录、状态目录、对话历史上限
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// 会话快照目录，未设置时用 <workspace>/.wren
    pub state_dir: Option<PathBuf>,
    /// 对话历史保留的 Turn 条数（超出时从最旧处淘汰）
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: None,
            state_dir: None,
            max_history_turns: default_max_history_turns(),
        }
    }
}

impl AppSection {
    pub fn workspace(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspace"))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.workspace().join(".wren"))
    }
}

fn default_max_history_turns() -> usize {
    50
}

/// [agent] 段：单次用户输入内的模型往返上限、失败修复保留条数、情绪衰减半衰期
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_round_budget")]
    pub round_budget: usize,
    /// 上下文过大类错误后保留的最近 Turn 条数
    #[serde(default = "default_repair_keep_turns")]
    pub repair_keep_turns: usize,
    #[serde(default = "default_strain_half_life_secs")]
    pub strain_half_life_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            round_budget: default_round_budget(),
            repair_keep_turns: default_repair_keep_turns(),
            strain_half_life_secs: default_strain_half_life_secs(),
        }
    }
}

fn default_round_budget() -> usize {
    12
}

fn default_repair_keep_turns() -> usize {
    10
}

fn default_strain_half_life_secs() -> u64 {
    3600
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点）/ mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

/// [tools] 段：工具超时与插件
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// [[tools.plugins]]：程序 + 参数模板
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            plugins: Vec::new(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// 单个插件工具：name / description / program / args（支持 {{workspace}} 与 {{key}} 占位）
#[derive(Debug, Clone, Deserialize)]
pub struct PluginEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// [consensus] 段：会商应答方与单方超时
#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusSection {
    #[serde(default = "default_responder_timeout_secs")]
    pub responder_timeout_secs: u64,
    #[serde(default)]
    pub responders: Vec<ResponderEntry>,
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            responder_timeout_secs: default_responder_timeout_secs(),
            responders: Vec::new(),
        }
    }
}

fn default_responder_timeout_secs() -> u64 {
    60
}

/// 会商应答方：一个独立配置的 OpenAI 兼容端点
#[derive(Debug, Clone, Deserialize)]
pub struct ResponderEntry {
    pub id: String,
    pub base_url: Option<String>,
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

/// [jobs] 段：安全扫描服务地址与轮询参数
#[derive(Debug, Clone, Deserialize)]
pub struct JobsSection {
    /// 未设置时不注册扫描工具
    pub base_url: Option<String>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_top_findings")]
    pub top_findings: usize,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            base_url: None,
            interval_secs: default_interval_secs(),
            deadline_secs: default_deadline_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            top_findings: default_top_findings(),
        }
    }
}

fn default_interval_secs() -> u64 {
    10
}

fn default_deadline_secs() -> u64 {
    600
}

fn default_poll_timeout_secs() -> u64 {
    15
}

fn default_top_findings() -> usize {
    5
}

/// 从 config 目录加载配置，环境变量 WREN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WREN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WREN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.max_history_turns, 50);
        assert_eq!(cfg.agent.round_budget, 12);
        assert_eq!(cfg.agent.repair_keep_turns, 10);
        assert_eq!(cfg.jobs.top_findings, 5);
        assert!(cfg.jobs.base_url.is_none());
        assert!(cfg.tools.plugins.is_empty());
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[agent]
round_budget = 4

[llm]
provider = "mock"

[[tools.plugins]]
name = "word_count"
program = "wc"
args = ["-w", "{{path}}"]
"#,
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.round_budget, 4);
        assert_eq!(cfg.agent.repair_keep_turns, 10);
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.tools.plugins.len(), 1);
        assert_eq!(cfg.tools.plugins[0].args, vec!["-w", "{{path}}"]);
    }

    #[test]
    fn state_dir_defaults_under_workspace() {
        let section = AppSection {
            workspace_root: Some(PathBuf::from("/srv/ws")),
            ..AppSection::default()
        };
        assert_eq!(section.state_dir(), PathBuf::from("/srv/ws/.wren"));
    }
}
