//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：工具失败、单轮解析失败被吸收并反馈给下一轮推理；
//! 模型不可用、请求超时为终止错误，以分类结果返回调用方。

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// 工具调用失败：携带工具名与原因，由 ToolExecutor 统一产生
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{tool}: {cause}")]
pub struct ToolInvocationError {
    pub tool: String,
    pub cause: String,
}

impl ToolInvocationError {
    pub fn new(tool: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            cause: cause.into(),
        }
    }
}

/// 请求处理过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 去掉提及标记后为空，调用方回复固定文案
    #[error("Empty input")]
    EmptyInput,

    #[error("History unavailable: {0}")]
    HistoryUnavailable(String),

    #[error("Tool invocation failed: {0}")]
    ToolInvocation(#[from] ToolInvocationError),

    #[error("Malformed tool selection: {0}")]
    MalformedToolSelection(String),

    #[error("Model timeout")]
    ModelTimeout,

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// 非故障：轮数用尽时以尽力而为的结果结束
    #[error("Iteration budget exhausted after {0} steps")]
    LoopExhausted(usize),

    #[error("Request timed out after {0:?}")]
    RequestTimeout(Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

/// 面向调用方的错误分类（可序列化，不含内部细节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyInput,
    HistoryUnavailable,
    ToolInvocation,
    MalformedToolSelection,
    ModelTimeout,
    ModelUnavailable,
    LoopExhausted,
    RequestTimeout,
    Cancelled,
    Config,
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::EmptyInput => ErrorKind::EmptyInput,
            AgentError::HistoryUnavailable(_) => ErrorKind::HistoryUnavailable,
            AgentError::ToolInvocation(_) => ErrorKind::ToolInvocation,
            AgentError::MalformedToolSelection(_) => ErrorKind::MalformedToolSelection,
            AgentError::ModelTimeout => ErrorKind::ModelTimeout,
            AgentError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            AgentError::LoopExhausted(_) => ErrorKind::LoopExhausted,
            AgentError::RequestTimeout(_) => ErrorKind::RequestTimeout,
            AgentError::Cancelled => ErrorKind::Cancelled,
            AgentError::Config(_) => ErrorKind::Config,
        }
    }

    /// 是否终止当前请求（否则被吸收：记为观察、带提示重试或退化为空历史）
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            AgentError::ToolInvocation(_)
                | AgentError::MalformedToolSelection(_)
                | AgentError::HistoryUnavailable(_)
        )
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 记录失败步骤，并把纠正提示注入下一轮（如工具选择格式错误）
    RetryWithPrompt(String),
    /// 把失败当作一次观察结果继续推理（如工具调用失败）
    ContinueWithObservation(String),
    /// 终止当前请求
    Abort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(AgentError::ModelTimeout.kind(), ErrorKind::ModelTimeout);
        assert_eq!(
            AgentError::RequestTimeout(Duration::from_secs(1)).kind(),
            ErrorKind::RequestTimeout
        );
        let err: AgentError = ToolInvocationError::new("web_search", "HTTP 500").into();
        assert_eq!(err.kind(), ErrorKind::ToolInvocation);
        assert_eq!(err.to_string(), "Tool invocation failed: web_search: HTTP 500");
    }

    #[test]
    fn test_terminal_classification() {
        assert!(!AgentError::MalformedToolSelection("x".into()).is_terminal());
        assert!(!AgentError::from(ToolInvocationError::new("t", "c")).is_terminal());
        assert!(AgentError::ModelUnavailable("down".into()).is_terminal());
        assert!(AgentError::Cancelled.is_terminal());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let s = serde_json::to_string(&ErrorKind::MalformedToolSelection).unwrap();
        assert_eq!(s, "\"malformed_tool_selection\"");
    }
}
