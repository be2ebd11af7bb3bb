//! 循环状态：阶段、草稿（scratch）与单次循环的临时记录
//!
//! LoopState 在循环开始时创建、结束时丢弃，不跨会话共享。

use serde::Serialize;

/// AgentLoop 阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Thinking,
    ToolSelected,
    ToolExecuted,
    Final,
    Exhausted,
    Failed,
}

impl LoopPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopPhase::Final | LoopPhase::Exhausted | LoopPhase::Failed)
    }
}

/// 单步结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum ScratchOutcome {
    /// 工具成功返回的观察结果
    Observation(String),
    /// 工具调用失败（已重试）
    ToolFailed(String),
    /// 模型的工具选择无法解析或指向未注册工具
    Malformed(String),
}

/// 草稿中的一步：第几轮、调用了什么、得到了什么
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScratchStep {
    pub iteration: usize,
    pub tool: Option<String>,
    pub args: serde_json::Value,
    pub outcome: ScratchOutcome,
}

impl ScratchStep {
    pub fn is_failure(&self) -> bool {
        !matches!(self.outcome, ScratchOutcome::Observation(_))
    }

    /// 反馈给模型的观察文本
    pub fn observation_text(&self) -> String {
        match &self.outcome {
            ScratchOutcome::Observation(text) => text.clone(),
            ScratchOutcome::ToolFailed(reason) => format!("tool failed: {}", reason),
            ScratchOutcome::Malformed(hint) => hint.clone(),
        }
    }
}

/// 一次循环内累计的工具动作与观察
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Scratch {
    steps: Vec<ScratchStep>,
}

impl Scratch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: ScratchStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[ScratchStep] {
        &self.steps
    }

    pub fn last(&self) -> Option<&ScratchStep> {
        self.steps.last()
    }

    pub fn failures(&self) -> usize {
        self.steps.iter().filter(|s| s.is_failure()).count()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// 循环内部状态
#[derive(Clone, Debug)]
pub struct LoopState {
    pub iteration: usize,
    pub phase: LoopPhase,
    pub scratch: Scratch,
}

impl LoopState {
    pub fn new() -> Self {
        Self {
            iteration: 0,
            phase: LoopPhase::Thinking,
            scratch: Scratch::new(),
        }
    }

    /// 进入下一轮 Thinking，返回新的轮次号（从 1 开始）
    pub fn begin_thinking(&mut self) -> usize {
        self.iteration += 1;
        self.phase = LoopPhase::Thinking;
        self.iteration
    }

    pub fn transition(&mut self, phase: LoopPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, iteration = self.iteration, "loop transition");
        self.phase = phase;
    }
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_text() {
        let ok = ScratchStep {
            iteration: 1,
            tool: Some("web_search".into()),
            args: serde_json::json!({"query": "rust"}),
            outcome: ScratchOutcome::Observation("result".into()),
        };
        let failed = ScratchStep {
            outcome: ScratchOutcome::ToolFailed("HTTP 503".into()),
            ..ok.clone()
        };
        assert_eq!(ok.observation_text(), "result");
        assert_eq!(failed.observation_text(), "tool failed: HTTP 503");
        assert!(!ok.is_failure());
        assert!(failed.is_failure());
    }

    #[test]
    fn test_begin_thinking_counts_from_one() {
        let mut state = LoopState::new();
        assert_eq!(state.begin_thinking(), 1);
        state.transition(LoopPhase::ToolSelected);
        assert_eq!(state.begin_thinking(), 2);
        assert_eq!(state.phase, LoopPhase::Thinking);
        assert!(!state.phase.is_terminal());
        assert!(LoopPhase::Exhausted.is_terminal());
    }
}
