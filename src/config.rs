//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TOOLFLOW__*` 覆盖（双下划线表示嵌套，如 `TOOLFLOW__ORCHESTRATOR__MAX_TOOL_RETRIES=3`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

/// [app] 段：应用名、能力表路径
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 能力表（capabilities.toml）路径；未设置时只有内置直答能力
    pub capabilities_path: Option<PathBuf>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [orchestrator] 段：重试上限、规划重试次数、重规划次数、决策调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// 单个 Step 谱系内允许的校验失败次数，达到后换备选工具或判定 Failed
    #[serde(default = "default_max_tool_retries")]
    pub max_tool_retries: u32,
    /// Planner 输出格式错误时的总尝试次数
    #[serde(default = "default_plan_attempts")]
    pub plan_attempts: u32,
    /// 一次会话内带失败上下文重新规划的最大次数
    #[serde(default = "default_max_replans")]
    pub max_replans: u32,
    /// Planner / 参数生成 / Validator / Judge 单次模型调用超时（秒）；不作用于异步任务本身
    #[serde(default = "default_decision_timeout_secs")]
    pub decision_timeout_secs: u64,
    /// 单轮内最多推进的工具调用次数，防止死循环
    #[serde(default = "default_max_steps_per_turn")]
    pub max_steps_per_turn: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_tool_retries: default_max_tool_retries(),
            plan_attempts: default_plan_attempts(),
            max_replans: default_max_replans(),
            decision_timeout_secs: default_decision_timeout_secs(),
            max_steps_per_turn: default_max_steps_per_turn(),
        }
    }
}

fn default_max_tool_retries() -> u32 {
    2
}

fn default_plan_attempts() -> u32 {
    2
}

fn default_max_replans() -> u32 {
    2
}

fn default_decision_timeout_secs() -> u64 {
    120
}

fn default_max_steps_per_turn() -> usize {
    32
}

/// [tools] 段：同步工具调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次同步工具调用超时（秒）；提交成功的异步任务不受此限制
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    300
}

/// 从 config 目录加载配置，环境变量 TOOLFLOW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TOOLFLOW__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("TOOLFLOW")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
