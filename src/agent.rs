//! Agent 组件装配
//!
//! create_agent_components 按配置构建 Planner / ToolExecutor / RecoveryEngine，
//! 组件只读，由 SessionRouter 以 Arc 在所有会话间共享。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::RecoveryEngine;
use crate::llm::{
    create_embedder_from_config, LlmClient, MockLlmClient, OpenAiClient, RetryConfig, RetryingLlmClient,
};
use crate::react::Planner;
use crate::tools::{build_executor, ToolExecutor};

/// 内置的基础 system prompt（未配置 agent.system_prompt_path 时使用）
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions inside a chat thread. \
Use the conversation history for context. Use a tool only when it is needed to answer; \
otherwise answer directly, concisely, in the language the user wrote in. Format answers in Markdown.";

/// 预构建的 Agent 组件，可多会话共享
pub struct AgentComponents {
    pub planner: Planner,
    pub executor: ToolExecutor,
    pub recovery: RecoveryEngine,
    pub max_iterations: usize,
    pub exhausted_message: String,
}

impl AgentComponents {
    /// 以默认循环参数组装（测试与嵌入场景）
    pub fn new(planner: Planner, executor: ToolExecutor, recovery: RecoveryEngine) -> Self {
        Self {
            planner,
            executor,
            recovery,
            max_iterations: crate::react::DEFAULT_MAX_ITERATIONS,
            exhausted_message: crate::config::AgentSection::default().exhausted_message,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// 有 API Key 时使用 OpenAI 兼容后端（外包超时与重试），否则使用 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let api_key = cfg
        .llm
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .filter(|k| !k.trim().is_empty());

    let Some(api_key) = api_key else {
        tracing::warn!("No API key set, using Mock LLM");
        return Arc::new(MockLlmClient::new());
    };

    tracing::info!(model = %cfg.llm.model, "Using OpenAI-compatible LLM");
    let inner: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(
        cfg.llm.base_url.as_deref(),
        &cfg.llm.model,
        Some(&api_key),
        cfg.llm.temperature,
    ));
    Arc::new(RetryingLlmClient::new(
        inner,
        RetryConfig {
            max_retries: cfg.llm.max_retries,
            timeout: Duration::from_secs(cfg.llm.timeout_secs),
            backoff: Duration::from_millis(cfg.llm.backoff_ms),
        },
    ))
}

/// 读取 system prompt：配置路径 > config/prompts/system.txt > 内置默认
pub fn load_system_prompt(cfg: &AppConfig) -> String {
    let configured = cfg.agent.system_prompt_path.as_ref().and_then(|p| {
        std::fs::read_to_string(p)
            .map_err(|e| tracing::warn!(path = %p.display(), error = %e, "system prompt unreadable, using default"))
            .ok()
    });
    configured
        .or_else(|| {
            ["config/prompts/system.txt", "../config/prompts/system.txt"]
                .into_iter()
                .find_map(|p| std::fs::read_to_string(p).ok())
        })
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

/// 创建 Agent 组件：LLM、工具目录、恢复策略、循环上限
pub fn create_agent_components(cfg: &AppConfig) -> AgentComponents {
    let llm = create_llm_from_config(cfg);
    create_agent_components_with_llm(cfg, llm)
}

/// 同上，但由调用方提供 LLM（测试中注入 Mock）
pub fn create_agent_components_with_llm(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> AgentComponents {
    let embedder = if cfg.tools.vector_search.enabled {
        create_embedder_from_config(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.embedding_model,
            cfg.llm.api_key.as_deref(),
        )
    } else {
        None
    };

    AgentComponents {
        planner: Planner::new(llm, load_system_prompt(cfg)),
        executor: build_executor(cfg, embedder),
        recovery: RecoveryEngine::strict(cfg.agent.strict_tool_selection),
        max_iterations: cfg.agent.max_iterations,
        exhausted_message: cfg.agent.exhausted_message.clone(),
    }
}
