//! 工具执行器
//!
//! 持有 ToolRegistry 与每个工具的超时/重试策略。invoke(tool_name, args) 在超时内调用工具，失败按策略重试，
//! 最终失败统一转为 ToolInvocationError（携带工具名与原因）；每次调用输出一条结构化审计日志（JSON）。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::ToolInvocationError;
use crate::tools::{ToolDescriptor, ToolRegistry};

/// 单个工具的超时与重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolPolicy {
    pub timeout: Duration,
    /// 首次失败后的重试次数
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// 工具执行器：对每次调用施加超时与重试，并将结果映射为 ToolInvocationError
pub struct ToolExecutor {
    registry: ToolRegistry,
    default_policy: ToolPolicy,
    overrides: HashMap<String, ToolPolicy>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, default_policy: ToolPolicy) -> Self {
        Self {
            registry,
            default_policy,
            overrides: HashMap::new(),
        }
    }

    /// 为指定工具设置独立策略
    pub fn with_policy(mut self, tool_name: impl Into<String>, policy: ToolPolicy) -> Self {
        self.overrides.insert(tool_name.into(), policy);
        self
    }

    pub fn policy_for(&self, tool_name: &str) -> ToolPolicy {
        self.overrides
            .get(tool_name)
            .copied()
            .unwrap_or(self.default_policy)
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.registry.list_tools()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行指定工具；超时或可重试错误按策略重试（参数错误直接返回），全部失败后返回 ToolInvocationError
    pub async fn invoke(&self, tool_name: &str, args: Value) -> Result<String, ToolInvocationError> {
        let Some(tool) = self.registry.get(tool_name) else {
            return Err(ToolInvocationError::new(tool_name, "unknown tool"));
        };
        let policy = self.policy_for(tool_name);
        let start = Instant::now();
        let preview = args_preview(&args);

        let mut attempt: u32 = 0;
        let (result, outcome) = loop {
            let (result, outcome, retryable) = match timeout(policy.timeout, tool.execute(args.clone())).await {
                Ok(Ok(content)) => (Ok(content), "ok", false),
                Ok(Err(e)) if e.is_retryable() => (Err(e.to_string()), "error", true),
                Ok(Err(e)) => (Err(e.to_string()), "invalid_args", false),
                Err(_) => (
                    Err(format!("timed out after {}s", policy.timeout.as_secs_f32())),
                    "timeout",
                    true,
                ),
            };
            if !retryable || attempt >= policy.max_retries {
                break (result, outcome);
            }
            attempt += 1;
            tracing::warn!(tool = tool_name, attempt, outcome, "tool call failed, retrying");
            tokio::time::sleep(policy.backoff.saturating_mul(attempt)).await;
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "attempts": attempt + 1,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result.map_err(|cause| ToolInvocationError::new(tool_name, cause))
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// 前 fail_times 次失败，之后成功
    struct Flaky {
        fail_times: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn description(&self) -> &str {
            "fails a few times"
        }

        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(ToolError::Failed(format!("connection reset #{}", n + 1)))
            } else {
                Ok("ok".to_string())
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "never finishes in time"
        }

        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    /// 缺少 query 时拒绝执行
    struct Strict {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Strict {
        fn name(&self) -> &str {
            "strict"
        }

        fn description(&self) -> &str {
            "requires a query"
        }

        async fn execute(&self, args: Value) -> Result<String, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match args.get("query").and_then(|v| v.as_str()) {
                Some(q) => Ok(q.to_string()),
                None => Err(ToolError::InvalidArgs("missing query".to_string())),
            }
        }
    }

    fn policy(max_retries: u32) -> ToolPolicy {
        ToolPolicy {
            timeout: Duration::from_millis(50),
            max_retries,
            backoff: Duration::ZERO,
        }
    }

    fn flaky_executor(fail_times: usize, max_retries: u32) -> (ToolExecutor, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry
            .register(Flaky {
                fail_times,
                calls: calls.clone(),
            })
            .unwrap();
        (ToolExecutor::new(registry, policy(max_retries)), calls)
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let (executor, calls) = flaky_executor(2, 3);
        assert_eq!(executor.invoke("flaky", Value::Null).await.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_carries_name_and_cause() {
        let (executor, calls) = flaky_executor(10, 1);
        let err = executor.invoke("flaky", Value::Null).await.unwrap_err();
        assert_eq!(err.tool, "flaky");
        assert_eq!(err.cause, "connection reset #2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_becomes_invocation_error() {
        let mut registry = ToolRegistry::new();
        registry.register(Slow).unwrap();
        let executor = ToolExecutor::new(registry, policy(0));
        let err = executor.invoke("slow", Value::Null).await.unwrap_err();
        assert_eq!(err.tool, "slow");
        assert!(err.cause.contains("timed out"));
    }

    #[tokio::test]
    async fn test_invalid_args_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Strict { calls: calls.clone() }).unwrap();
        let executor = ToolExecutor::new(
            registry,
            ToolPolicy {
                timeout: Duration::from_millis(50),
                max_retries: 3,
                backoff: Duration::from_secs(1),
            },
        );
        let started = Instant::now();
        let err = executor.invoke("strict", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.cause, "Invalid arguments: missing query");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let executor = ToolExecutor::new(ToolRegistry::new(), ToolPolicy::default());
        let err = executor.invoke("shell", Value::Null).await.unwrap_err();
        assert_eq!(err, ToolInvocationError::new("shell", "unknown tool"));
    }

    #[test]
    fn test_policy_override() {
        let custom = policy(7);
        let executor = ToolExecutor::new(ToolRegistry::new(), ToolPolicy::default())
            .with_policy("web_search", custom);
        assert_eq!(executor.policy_for("web_search"), custom);
        assert_eq!(executor.policy_for("vector_search"), ToolPolicy::default());
    }
}
