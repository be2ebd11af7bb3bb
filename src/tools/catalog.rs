//! 按配置组装工具目录
//!
//! 只注册启用且可构造的工具：向量检索缺少嵌入服务或索引加载失败时记录告警并跳过，
//! 不影响其余工具与会话。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::llm::EmbeddingProvider;
use crate::memory::VectorIndex;
use crate::tools::{ToolExecutor, ToolPolicy, ToolRegistry, VectorSearchTool, WebSearchTool};

/// 根据 [tools] 配置构建执行器
pub fn build_executor(cfg: &AppConfig, embedder: Option<Arc<dyn EmbeddingProvider>>) -> ToolExecutor {
    let tools = &cfg.tools;
    let default_policy = ToolPolicy {
        timeout: Duration::from_secs(tools.timeout_secs),
        max_retries: tools.max_retries,
        backoff: Duration::from_millis(tools.backoff_ms),
    };

    let mut registry = ToolRegistry::new();
    let mut overrides: Vec<(&str, ToolPolicy)> = Vec::new();

    if tools.web_search.enabled {
        let ws = &tools.web_search;
        let tool = WebSearchTool::new(&ws.endpoint, tools.timeout_secs, ws.max_results, ws.max_result_chars);
        if let Err(e) = registry.register(tool) {
            tracing::warn!(error = %e, "web_search not registered");
        }
        if let Some(max_retries) = ws.max_retries {
            overrides.push(("web_search", ToolPolicy { max_retries, ..default_policy }));
        }
    }

    if tools.vector_search.enabled {
        let vs = &tools.vector_search;
        match embedder {
            None => tracing::warn!("vector_search disabled: no embedding provider configured"),
            Some(embedder) => match VectorIndex::load(&vs.index_path, embedder) {
                Ok(index) => {
                    let tool = VectorSearchTool::new(Arc::new(index), vs.k, vs.description.clone());
                    if let Err(e) = registry.register(tool) {
                        tracing::warn!(error = %e, "vector_search not registered");
                    }
                    if let Some(max_retries) = vs.max_retries {
                        overrides.push(("vector_search", ToolPolicy { max_retries, ..default_policy }));
                    }
                }
                Err(e) => tracing::warn!(
                    path = %vs.index_path.display(),
                    error = %e,
                    "vector_search disabled: index unavailable"
                ),
            },
        }
    }

    tracing::info!(tools = ?registry.tool_names(), "tool catalog ready");

    overrides
        .into_iter()
        .fold(ToolExecutor::new(registry, default_policy), |executor, (name, policy)| {
            executor.with_policy(name, policy)
        })
}
