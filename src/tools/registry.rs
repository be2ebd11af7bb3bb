//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找。
//! 名称在进程生命周期内唯一且稳定：重复注册会被拒绝。
//! ToolExecutor 在调用时加超时与重试并统一转为 ToolInvocationError。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// 工具 trait：名称、描述（供 LLM 选择）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认空对象
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；参数错误返回 InvalidArgs（不重试），其余失败返回 Failed
    async fn execute(&self, args: Value) -> Result<String, ToolError>;
}

/// 工具执行错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// 参数缺失或不合法：重试不会改变结果
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::Failed(_))
    }
}

impl From<String> for ToolError {
    fn from(cause: String) -> Self {
        ToolError::Failed(cause)
    }
}

/// 工具描述符：供模型选择工具，也用于日志与调试输出
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Tool already registered: {0}")]
pub struct DuplicateToolError(pub String);

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), DuplicateToolError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), DuplicateToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(DuplicateToolError(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 按名称排序的工具名
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 全部描述符（按名称排序，保证 prompt 稳定）
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        let mut list: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test tool"
        }

        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Named("web_search")).unwrap();
        assert_eq!(
            registry.register(Named("web_search")),
            Err(DuplicateToolError("web_search".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_list_tools_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Named("web_search")).unwrap();
        registry.register(Named("vector_search")).unwrap();
        let names: Vec<String> = registry.list_tools().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["vector_search", "web_search"]);
        assert!(!registry.contains("shell"));
    }

    #[test]
    fn test_only_invalid_args_skip_retry() {
        assert!(!ToolError::InvalidArgs("missing query".into()).is_retryable());
        assert!(ToolError::from("HTTP 503".to_string()).is_retryable());
        assert_eq!(ToolError::InvalidArgs("missing query".into()).to_string(), "Invalid arguments: missing query");
    }
}
