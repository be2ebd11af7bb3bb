//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `THREADBEE__*` 覆盖（双下划线表示嵌套，如 `THREADBEE__AGENT__MAX_ITERATIONS=5`）。
//! 兼容旧部署的扁平变量（MODEL_NAME、API_TIMEOUT、DEBUG、ENABLE_SEARCH 等），设置时优先级最高。
//! 进程启动时加载一次并 `validate()`，之后只读。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::AgentError;

/// 请求整体期限上限（秒）
pub const MAX_REQUEST_DEADLINE_SECS: u64 = 3600;
/// 单次模型/工具调用超时上限（秒）
pub const MAX_CALL_TIMEOUT_SECS: u64 = 600;
pub const MAX_RETRIES: u32 = 10;
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub slack: SlackSection,
}

/// [app] 段：调试模式与面向用户的固定文案
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// 为 true 时在道歉文案后附带详细错误原因（默认关闭，避免泄露内部信息）
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_apology_message")]
    pub apology_message: String,
    #[serde(default = "default_empty_input_message")]
    pub empty_input_message: String,
}

fn default_apology_message() -> String {
    "抱歉，处理时出错了，请稍后再试。".to_string()
}

fn default_empty_input_message() -> String {
    "消息为空，请输入问题或指令。".to_string()
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            debug: false,
            apology_message: default_apology_message(),
            empty_input_message: default_empty_input_message(),
        }
    }
}

/// [llm] 段：模型、温度、单次调用超时与重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI 兼容端点，未设置时使用官方地址
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY；都没有时退回 Mock
    pub api_key: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    /// 单次模型调用超时（秒）
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// 首次失败后的重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
            api_key: None,
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            embedding_model: default_embedding_model(),
        }
    }
}

/// [agent] 段：循环上限、整体期限、解析策略、系统提示词
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 单次请求最多 Thinking 轮数
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// 整个请求的硬期限（秒）
    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: u64,
    /// 为 true 时任何一次工具选择解析失败都立即终止
    #[serde(default)]
    pub strict_tool_selection: bool,
    /// 系统提示词文件；不存在时使用内置提示词
    pub system_prompt_path: Option<PathBuf>,
    #[serde(default = "default_exhausted_message")]
    pub exhausted_message: String,
}

fn default_max_iterations() -> usize {
    3
}

fn default_request_deadline_secs() -> u64 {
    60
}

fn default_exhausted_message() -> String {
    "已达到最大推理轮数，未能得出最终答案。".to_string()
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            request_deadline_secs: default_request_deadline_secs(),
            strict_tool_selection: false,
            system_prompt_path: None,
            exhausted_message: default_exhausted_message(),
        }
    }
}

/// [tools] 段：默认超时/重试，及各工具开关
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default)]
    pub web_search: WebSearchSection,
    #[serde(default)]
    pub vector_search: VectorSearchSection,
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            web_search: WebSearchSection::default(),
            vector_search: VectorSearchSection::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// [tools.web_search] 段
#[derive(Debug, Clone, Deserialize)]
pub struct WebSearchSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    /// 覆盖 [tools].max_retries
    pub max_retries: Option<u32>,
}

fn default_search_endpoint() -> String {
    "https://html.duckduckgo.com/html/".to_string()
}

fn default_max_results() -> usize {
    5
}

fn default_max_result_chars() -> usize {
    4000
}

impl Default for WebSearchSection {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_search_endpoint(),
            max_results: default_max_results(),
            max_result_chars: default_max_result_chars(),
            max_retries: None,
        }
    }
}

/// [tools.vector_search] 段：预构建索引位置与检索条数
#[derive(Debug, Clone, Deserialize)]
pub struct VectorSearchSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_vector_description")]
    pub description: String,
    pub max_retries: Option<u32>,
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./vector_store/index.json")
}

fn default_k() -> usize {
    4
}

fn default_vector_description() -> String {
    "Search internal rules and documents. Use it for questions about company policies or internal documentation. Args: {\"query\": \"...\"}".to_string()
}

impl Default for VectorSearchSection {
    fn default() -> Self {
        Self {
            enabled: true,
            index_path: default_index_path(),
            k: default_k(),
            description: default_vector_description(),
            max_retries: None,
        }
    }
}

/// [slack] 段（仅 threadbee-slack 使用；凭据只从环境变量读取）
#[derive(Debug, Clone, Deserialize)]
pub struct SlackSection {
    /// Bot 的用户 ID（提及标记 `<@ID>` 中的 ID）
    #[serde(default)]
    pub bot_id: String,
    #[serde(default = "default_slack_api_base")]
    pub api_base: String,
    #[serde(default = "default_slack_port")]
    pub port: u16,
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_slack_port() -> u16 {
    3000
}

impl Default for SlackSection {
    fn default() -> Self {
        Self {
            bot_id: String::new(),
            api_base: default_slack_api_base(),
            port: default_slack_port(),
        }
    }
}

impl AppConfig {
    /// 校验取值范围；失败时返回 AgentError::Config
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.agent.max_iterations == 0 {
            return Err(AgentError::Config("agent.max_iterations must be >= 1".into()));
        }
        if self.agent.request_deadline_secs == 0 {
            return Err(AgentError::Config("agent.request_deadline_secs must be > 0".into()));
        }
        if self.agent.request_deadline_secs > MAX_REQUEST_DEADLINE_SECS {
            return Err(AgentError::Config(format!(
                "agent.request_deadline_secs must be <= {}",
                MAX_REQUEST_DEADLINE_SECS
            )));
        }
        if self.llm.timeout_secs == 0 || self.tools.timeout_secs == 0 {
            return Err(AgentError::Config("timeouts must be > 0".into()));
        }
        if self.llm.timeout_secs > MAX_CALL_TIMEOUT_SECS || self.tools.timeout_secs > MAX_CALL_TIMEOUT_SECS {
            return Err(AgentError::Config(format!("timeouts must be <= {}s", MAX_CALL_TIMEOUT_SECS)));
        }
        let retries = [
            self.llm.max_retries,
            self.tools.max_retries,
            self.tools.web_search.max_retries.unwrap_or(0),
            self.tools.vector_search.max_retries.unwrap_or(0),
        ];
        if retries.iter().any(|&r| r > MAX_RETRIES) {
            return Err(AgentError::Config(format!("max_retries must be <= {}", MAX_RETRIES)));
        }
        if self.llm.backoff_ms > MAX_BACKOFF_MS || self.tools.backoff_ms > MAX_BACKOFF_MS {
            return Err(AgentError::Config(format!("backoff_ms must be <= {}", MAX_BACKOFF_MS)));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(AgentError::Config(format!(
                "llm.temperature out of range: {}",
                self.llm.temperature
            )));
        }
        if self.tools.vector_search.k == 0 {
            return Err(AgentError::Config("tools.vector_search.k must be >= 1".into()));
        }
        Ok(())
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.agent.request_deadline_secs)
    }
}

/// 旧版扁平环境变量 -> 嵌套配置键
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("MODEL_NAME", "llm.model"),
    ("OPENAI_TIMEOUT", "llm.timeout_secs"),
    ("OPENAI_MAX_RETRIES", "llm.max_retries"),
    ("API_TIMEOUT", "agent.request_deadline_secs"),
    ("DEBUG", "app.debug"),
    ("ENABLE_SEARCH", "tools.web_search.enabled"),
    ("ENABLE_VECTOR", "tools.vector_search.enabled"),
    ("VECTOR_SEARCH_K", "tools.vector_search.k"),
    ("VECTOR_INDEX_PATH", "tools.vector_search.index_path"),
    ("SLACK_BOT_ID", "slack.bot_id"),
];

/// 从 config 目录加载配置，环境变量 THREADBEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 THREADBEE__*（双下划线表示嵌套键）
/// 4. 旧版扁平变量（见 LEGACY_ENV_KEYS）存在时作为最高优先级覆盖
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
        config::Environment::with_prefix("THREADBEE")
            .separator("__")
            .try_parsing(true),
    );

    for (var, key) in LEGACY_ENV_KEYS {
        let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
        builder = builder.set_override_option(*key, value.map(|v| v.to_lowercase_if_bool()))?;
    }

    builder.build()?.try_deserialize()
}

/// 旧版变量中的 "True"/"FALSE" 统一为小写，便于布尔解析
trait LowercaseBool {
    fn to_lowercase_if_bool(self) -> String;
}

impl LowercaseBool for String {
    fn to_lowercase_if_bool(self) -> String {
        match self.to_lowercase().as_str() {
            "true" | "false" => self.to_lowercase(),
            _ => self,
        }
    }
}

/// 加载并校验；二者任一失败都转为 AgentError::Config
pub fn load_validated(config_path: Option<PathBuf>) -> Result<AppConfig, AgentError> {
    let cfg = load_config(config_path).map_err(|e| AgentError::Config(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
}
