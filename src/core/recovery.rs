//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供循环决定是带提示重试、当作观察继续，还是终止。
//! 解析失败是否立即致命是策略开关（strict），默认宽松：只有最后一轮才致命。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default, Clone)]
pub struct RecoveryEngine {
    strict_tool_selection: bool,
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(strict_tool_selection: bool) -> Self {
        Self {
            strict_tool_selection,
        }
    }

    /// last_iteration：当前是否为最后一轮允许的 Thinking
    pub fn handle(&self, err: &AgentError, last_iteration: bool) -> RecoveryAction {
        if err.is_terminal() {
            return RecoveryAction::Abort;
        }
        match err {
            AgentError::MalformedToolSelection(raw) => {
                if self.strict_tool_selection || last_iteration {
                    RecoveryAction::Abort
                } else {
                    RecoveryAction::RetryWithPrompt(format!(
                        "Your previous tool selection was invalid: {raw}. \
                        To call a tool, output exactly one JSON object of the form \
                        {{\"tool\": \"<registered tool name>\", \"args\": {{...}}}} and nothing else. \
                        To answer, reply with plain text or {{\"answer\": \"...\"}}."
                    ))
                }
            }
            AgentError::ToolInvocation(e) => {
                RecoveryAction::ContinueWithObservation(format!("tool failed: {}", e.cause))
            }
            // 历史不可用：以空历史继续
            other => RecoveryAction::ContinueWithObservation(other.to_string()),
        }
    }
}
