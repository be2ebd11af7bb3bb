//! AgentLoop：有界的 Thinking -> ToolSelected -> ToolExecuted -> Thinking 状态机
//!
//! 每轮 Thinking 计数一次，超过 max_iterations 进入 Exhausted；工具失败记为观察继续推理，
//! 工具选择格式错误带纠正提示重试（最后一轮或 strict 策略下致命）；模型错误直接 Failed。
//! 每轮开始检查取消令牌，router 放弃请求后循环不再继续。

use tokio_util::sync::CancellationToken;

use crate::core::{
    AgentError, LoopPhase, LoopState, RecoveryAction, RecoveryEngine, Scratch, ScratchOutcome, ScratchStep,
};
use crate::history::Turn;
use crate::react::{build_messages, build_system_prompt, parse_llm_output, ModelDecision, Planner, ToolCall};
use crate::tools::ToolExecutor;

/// 默认最大 Thinking 轮数
pub const DEFAULT_MAX_ITERATIONS: usize = 3;

/// 循环的终止结果
#[derive(Debug)]
pub enum LoopOutcome {
    Final {
        output: String,
        scratch: Scratch,
        iterations: usize,
    },
    Exhausted {
        output: String,
        scratch: Scratch,
        iterations: usize,
    },
    Failed {
        error: AgentError,
        scratch: Scratch,
        iterations: usize,
    },
}

impl LoopOutcome {
    pub fn phase(&self) -> LoopPhase {
        match self {
            LoopOutcome::Final { .. } => LoopPhase::Final,
            LoopOutcome::Exhausted { .. } => LoopPhase::Exhausted,
            LoopOutcome::Failed { .. } => LoopPhase::Failed,
        }
    }

    pub fn scratch(&self) -> &Scratch {
        match self {
            LoopOutcome::Final { scratch, .. }
            | LoopOutcome::Exhausted { scratch, .. }
            | LoopOutcome::Failed { scratch, .. } => scratch,
        }
    }

    pub fn iterations(&self) -> usize {
        match self {
            LoopOutcome::Final { iterations, .. }
            | LoopOutcome::Exhausted { iterations, .. }
            | LoopOutcome::Failed { iterations, .. } => *iterations,
        }
    }
}

/// 单次请求的循环配置（只借用共享组件，状态全部在 run 内部）
pub struct AgentLoop<'a> {
    planner: &'a Planner,
    executor: &'a ToolExecutor,
    recovery: &'a RecoveryEngine,
    cancel_token: CancellationToken,
    max_iterations: usize,
    exhausted_message: &'a str,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        planner: &'a Planner,
        executor: &'a ToolExecutor,
        recovery: &'a RecoveryEngine,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            planner,
            executor,
            recovery,
            cancel_token,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            exhausted_message: "Reached the reasoning step limit without a final answer.",
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_exhausted_message(mut self, message: &'a str) -> Self {
        self.exhausted_message = message;
        self
    }

    /// 模型回复 -> 决策；指向未注册工具的调用同样是格式错误（附带调用本身写入 scratch）
    fn select(&self, reply: &str) -> Result<ModelDecision, (Option<ToolCall>, AgentError)> {
        match parse_llm_output(reply) {
            Ok(ModelDecision::ToolCall(call)) if !self.executor.contains(&call.tool) => {
                let err = AgentError::MalformedToolSelection(format!(
                    "unknown tool '{}' (available: {})",
                    call.tool,
                    self.executor.tool_names().join(", ")
                ));
                Err((Some(call), err))
            }
            Ok(decision) => Ok(decision),
            Err(e) => Err((None, e)),
        }
    }

    fn failed(state: LoopState, error: AgentError) -> LoopOutcome {
        tracing::warn!(iteration = state.iteration, error = %error, "agent loop failed");
        LoopOutcome::Failed {
            error,
            scratch: state.scratch,
            iterations: state.iteration,
        }
    }

    /// 尽力而为的说明：最后一步是成功的观察时附上它；失败原因不对外展示
    fn exhausted(&self, state: LoopState) -> LoopOutcome {
        let output = match state.scratch.last() {
            Some(step) if !step.is_failure() => format!("{}\n\n{}", self.exhausted_message, step.observation_text()),
            _ => self.exhausted_message.to_string(),
        };
        tracing::info!(
            reason = %AgentError::LoopExhausted(state.iteration),
            steps = state.scratch.len(),
            "returning best-effort answer"
        );
        LoopOutcome::Exhausted {
            output,
            scratch: state.scratch,
            iterations: state.iteration,
        }
    }

    /// 执行循环直至 Final / Exhausted / Failed
    pub async fn run(&self, history: &[Turn], input: &str) -> LoopOutcome {
        let system = build_system_prompt(self.planner.base_system_prompt(), self.executor);
        let mut state = LoopState::new();

        loop {
            if self.cancel_token.is_cancelled() {
                return Self::failed(state, AgentError::Cancelled);
            }
            if state.iteration >= self.max_iterations {
                state.transition(LoopPhase::Exhausted);
                return self.exhausted(state);
            }

            let iteration = state.begin_thinking();
            let last_iteration = iteration == self.max_iterations;
            let messages = build_messages(&system, history, input, &state.scratch);

            let reply = match self.planner.think(&messages).await {
                Ok(reply) => reply,
                Err(e) => {
                    state.transition(LoopPhase::Failed);
                    return Self::failed(state, e);
                }
            };

            match self.select(&reply) {
                Ok(ModelDecision::Final(output)) => {
                    state.transition(LoopPhase::Final);
                    tracing::info!(iteration, steps = state.scratch.len(), "final answer");
                    return LoopOutcome::Final {
                        output,
                        scratch: state.scratch,
                        iterations: iteration,
                    };
                }
                Ok(ModelDecision::ToolCall(call)) => {
                    state.transition(LoopPhase::ToolSelected);
                    tracing::info!(iteration, tool = %call.tool, "tool selected");

                    let outcome = match self.executor.invoke(&call.tool, call.args.clone()).await {
                        Ok(observation) => ScratchOutcome::Observation(observation),
                        Err(e) => {
                            let cause = e.cause.clone();
                            let err = AgentError::from(e);
                            match self.recovery.handle(&err, last_iteration) {
                                RecoveryAction::Abort => {
                                    state.transition(LoopPhase::Failed);
                                    return Self::failed(state, err);
                                }
                                _ => {
                                    tracing::warn!(iteration, tool = %call.tool, cause = %cause, "tool failed, continuing");
                                    ScratchOutcome::ToolFailed(cause)
                                }
                            }
                        }
                    };
                    state.scratch.push(ScratchStep {
                        iteration,
                        tool: Some(call.tool),
                        args: call.args,
                        outcome,
                    });
                    state.transition(LoopPhase::ToolExecuted);
                }
                Err((call, err)) => match self.recovery.handle(&err, last_iteration) {
                    RecoveryAction::RetryWithPrompt(hint) => {
                        tracing::warn!(iteration, error = %err, "malformed tool selection, retrying");
                        let (tool, args) = match call {
                            Some(c) => (Some(c.tool), c.args),
                            None => (None, serde_json::Value::Null),
                        };
                        state.scratch.push(ScratchStep {
                            iteration,
                            tool,
                            args,
                            outcome: ScratchOutcome::Malformed(hint),
                        });
                    }
                    _ => {
                        state.transition(LoopPhase::Failed);
                        return Self::failed(state, err);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::tools::{Tool, ToolError, ToolPolicy, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echoes the query"
        }

        async fn execute(&self, args: Value) -> Result<String, ToolError> {
            Ok(args["query"].as_str().unwrap_or_default().to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            Err(ToolError::Failed("HTTP 503".to_string()))
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Echo).unwrap();
        registry.register(Broken).unwrap();
        ToolExecutor::new(
            registry,
            ToolPolicy {
                timeout: Duration::from_secs(1),
                max_retries: 0,
                backoff: Duration::ZERO,
            },
        )
    }

    async fn run(mock: MockLlmClient, max_iterations: usize, recovery: RecoveryEngine) -> LoopOutcome {
        let planner = Planner::new(Arc::new(mock), "You are a test assistant.");
        let executor = executor();
        AgentLoop::new(&planner, &executor, &recovery, CancellationToken::new())
            .with_max_iterations(max_iterations)
            .with_exhausted_message("out of steps")
            .run(&[], "question")
            .await
    }

    #[tokio::test]
    async fn test_final_on_first_iteration() {
        let outcome = run(MockLlmClient::with_replies(["hi there"]), 3, RecoveryEngine::new()).await;
        match outcome {
            LoopOutcome::Final { output, scratch, iterations } => {
                assert_eq!(output, "hi there");
                assert!(scratch.is_empty());
                assert_eq!(iterations, 1);
            }
            other => panic!("expected Final, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tool_then_final() {
        let mock = MockLlmClient::with_replies([
            r#"{"tool": "echo", "args": {"query": "42"}}"#,
            "The answer is 42",
        ]);
        let outcome = run(mock, 3, RecoveryEngine::new()).await;
        assert_eq!(outcome.phase(), LoopPhase::Final);
        assert_eq!(outcome.iterations(), 2);
        let step = &outcome.scratch().steps()[0];
        assert_eq!(step.outcome, ScratchOutcome::Observation("42".into()));
    }

    #[tokio::test]
    async fn test_tool_failure_is_observation() {
        let mock = MockLlmClient::with_replies([r#"{"tool": "broken", "args": {}}"#, "sorry, no data"]);
        let outcome = run(mock, 3, RecoveryEngine::new()).await;
        assert_eq!(outcome.phase(), LoopPhase::Final);
        assert_eq!(outcome.scratch().failures(), 1);
        assert_eq!(
            outcome.scratch().steps()[0].observation_text(),
            "tool failed: HTTP 503"
        );
    }

    #[tokio::test]
    async fn test_always_failing_tool_exhausts() {
        let mock = MockLlmClient::repeating(r#"{"tool": "broken", "args": {}}"#);
        match run(mock, 3, RecoveryEngine::new()).await {
            LoopOutcome::Exhausted { output, scratch, iterations } => {
                assert_eq!(iterations, 3);
                assert_eq!(scratch.failures(), 3);
                assert_eq!(output, "out of steps");
                assert_eq!(scratch.last().map(|s| s.observation_text()).as_deref(), Some("tool failed: HTTP 503"));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exhausted_keeps_last_successful_observation() {
        let mock = MockLlmClient::repeating(r#"{"tool": "echo", "args": {"query": "partial result"}}"#);
        match run(mock, 2, RecoveryEngine::new()).await {
            LoopOutcome::Exhausted { output, iterations, .. } => {
                assert_eq!(iterations, 2);
                assert_eq!(output, "out of steps\n\npartial result");
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_on_last_iteration_fails() {
        let mock = MockLlmClient::repeating(r#"{"tool": "fake", "args": {}}"#);
        match run(mock, 1, RecoveryEngine::new()).await {
            LoopOutcome::Failed { error, iterations, .. } => {
                assert!(matches!(error, AgentError::MalformedToolSelection(_)));
                assert_eq!(iterations, 1);
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_adversarial_model_terminates() {
        let mock = Arc::new(MockLlmClient::repeating(r#"{"tool": "fake", "args": {}}"#));
        let planner = Planner::new(mock.clone(), "sys");
        let executor = executor();
        let recovery = RecoveryEngine::new();
        let outcome = AgentLoop::new(&planner, &executor, &recovery, CancellationToken::new())
            .with_max_iterations(4)
            .run(&[], "q")
            .await;
        assert_eq!(outcome.phase(), LoopPhase::Failed);
        assert_eq!(mock.calls(), 4);
        // 前三轮的错误选择都留在 scratch 中
        assert_eq!(outcome.scratch().len(), 3);
        assert_eq!(outcome.scratch().steps()[0].tool.as_deref(), Some("fake"));
    }

    #[tokio::test]
    async fn test_malformed_then_recovers() {
        let mock = MockLlmClient::with_replies([r#"{"tool": "echo", "args": "#, "fine, plain answer"]);
        let outcome = run(mock, 3, RecoveryEngine::new()).await;
        assert_eq!(outcome.phase(), LoopPhase::Final);
        assert!(matches!(outcome.scratch().steps()[0].outcome, ScratchOutcome::Malformed(_)));
    }

    #[tokio::test]
    async fn test_strict_policy_fails_immediately() {
        let mock = MockLlmClient::with_replies([r#"{"tool": "echo", "args": "#, "never reached"]);
        let outcome = run(mock, 3, RecoveryEngine::strict(true)).await;
        assert_eq!(outcome.phase(), LoopPhase::Failed);
        assert_eq!(outcome.iterations(), 1);
    }

    #[tokio::test]
    async fn test_model_error_fails() {
        let mock = MockLlmClient::with_results(vec![Err(LlmError::Timeout)]);
        match run(mock, 3, RecoveryEngine::new()).await {
            LoopOutcome::Failed { error, .. } => assert!(matches!(error, AgentError::ModelTimeout)),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let planner = Planner::new(Arc::new(MockLlmClient::new()), "sys");
        let executor = executor();
        let recovery = RecoveryEngine::new();
        let token = CancellationToken::new();
        token.cancel();
        let outcome = AgentLoop::new(&planner, &executor, &recovery, token).run(&[], "q").await;
        assert!(matches!(outcome, LoopOutcome::Failed { error: AgentError::Cancelled, .. }));
    }
}
