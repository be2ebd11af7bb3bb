//! SessionRouter：会话 -> 一次有截止时间的循环调用
//!
//! 每次请求：去掉提及标记并检查空输入 -> 重建历史 -> 运行 AgentLoop，整体受 request_deadline 约束。
//! 截止时间到达时触发取消令牌并丢弃进行中的 future，返回 RequestTimeout，不会返回部分输出。
//! 组件只读共享（Arc），每次请求拥有独立的 LoopState，不同会话互不阻塞。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::agent::AgentComponents;
use crate::config::{AppConfig, AppSection, MAX_REQUEST_DEADLINE_SECS};
use crate::core::{AgentError, ErrorKind, Scratch};
use crate::history::{load_history, reconstruct, strip_mention, BotIdentity, RawMessage, TranscriptSource, Turn};
use crate::react::{AgentLoop, LoopOutcome};

/// 返回给调用方的结果
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationResult {
    Answered {
        output: String,
        scratch: Scratch,
        iterations: usize,
    },
    /// 轮数用尽：非错误，output 为尽力而为的说明
    Exhausted {
        output: String,
        scratch: Scratch,
        iterations: usize,
    },
    EmptyInput {
        message: String,
    },
    /// message 面向用户；仅调试模式下附带具体原因
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

impl InvocationResult {
    /// 应发送给用户的文本
    pub fn output_text(&self) -> &str {
        match self {
            InvocationResult::Answered { output, .. } | InvocationResult::Exhausted { output, .. } => output,
            InvocationResult::EmptyInput { message } | InvocationResult::Failed { message, .. } => message,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            InvocationResult::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// 日志用分类：非错误的结束（空输入、轮数用尽）也有对应分类
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            InvocationResult::Answered { .. } => None,
            InvocationResult::Exhausted { .. } => Some(ErrorKind::LoopExhausted),
            InvocationResult::EmptyInput { .. } => Some(ErrorKind::EmptyInput),
            InvocationResult::Failed { kind, .. } => Some(*kind),
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, InvocationResult::Answered { .. })
    }
}

/// 会话路由器：廉价 Clone，可在每个事件的任务中使用
#[derive(Clone)]
pub struct SessionRouter {
    components: Arc<AgentComponents>,
    identity: Arc<BotIdentity>,
    deadline: Duration,
    messages: Arc<AppSection>,
}

impl SessionRouter {
    pub fn new(components: Arc<AgentComponents>, identity: BotIdentity) -> Self {
        Self {
            components,
            identity: Arc::new(identity),
            deadline: Duration::from_secs(60),
            messages: Arc::new(AppSection::default()),
        }
    }

    pub fn from_config(components: Arc<AgentComponents>, identity: BotIdentity, cfg: &AppConfig) -> Self {
        Self::new(components, identity)
            .with_deadline(cfg.request_deadline())
            .with_messages(cfg.app.clone())
    }

    /// 超过 MAX_REQUEST_DEADLINE_SECS 的期限按上限处理
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline.min(Duration::from_secs(MAX_REQUEST_DEADLINE_SECS));
        self
    }

    /// 道歉文案、空输入文案与 debug 开关
    pub fn with_messages(mut self, app: AppSection) -> Self {
        self.messages = Arc::new(app);
        self
    }

    pub fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    /// 以调用方提供的原始记录处理一条输入
    pub async fn handle(&self, session_id: &str, user_input: &str, raw_history: &[RawMessage]) -> InvocationResult {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("request", session_id = %session_id, request_id = %request_id);
        async {
            let started = Instant::now();
            let input = match self.normalize_input(user_input) {
                Ok(input) => input,
                Err(e) => return self.empty_input(e),
            };
            let deadline_at = tokio::time::Instant::now() + self.deadline;
            let history = reconstruct(raw_history, &self.identity);
            let result = self.run_until(deadline_at, &history, &input).await;
            self.log_done(&result, started);
            result
        }
        .instrument(span)
        .await
    }

    /// 从记录来源拉取历史后处理；拉取也计入截止时间，失败时退化为空历史
    pub async fn handle_from_source(
        &self,
        session_id: &str,
        user_input: &str,
        source: &dyn TranscriptSource,
    ) -> InvocationResult {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("request", session_id = %session_id, request_id = %request_id);
        async {
            let started = Instant::now();
            let input = match self.normalize_input(user_input) {
                Ok(input) => input,
                Err(e) => return self.empty_input(e),
            };
            let deadline_at = tokio::time::Instant::now() + self.deadline;
            let history = tokio::select! {
                history = load_history(source, session_id, &self.identity) => history,
                _ = tokio::time::sleep_until(deadline_at) => {
                    let result = self.failed(AgentError::RequestTimeout(self.deadline));
                    self.log_done(&result, started);
                    return result;
                }
            };
            let result = self.run_until(deadline_at, &history, &input).await;
            self.log_done(&result, started);
            result
        }
        .instrument(span)
        .await
    }

    fn normalize_input(&self, user_input: &str) -> Result<String, AgentError> {
        let input = strip_mention(user_input, Some(self.identity.as_ref()));
        if input.is_empty() {
            Err(AgentError::EmptyInput)
        } else {
            Ok(input)
        }
    }

    fn empty_input(&self, reason: AgentError) -> InvocationResult {
        tracing::info!(reason = %reason, "skipping model");
        InvocationResult::EmptyInput {
            message: self.messages.empty_input_message.clone(),
        }
    }

    async fn run_until(&self, deadline_at: tokio::time::Instant, history: &[Turn], input: &str) -> InvocationResult {
        let c = &self.components;
        let token = CancellationToken::new();
        let agent_loop = AgentLoop::new(&c.planner, &c.executor, &c.recovery, token.clone())
            .with_max_iterations(c.max_iterations)
            .with_exhausted_message(&c.exhausted_message);

        tokio::select! {
            outcome = agent_loop.run(history, input) => self.from_outcome(outcome),
            _ = tokio::time::sleep_until(deadline_at) => {
                token.cancel();
                self.failed(AgentError::RequestTimeout(self.deadline))
            }
        }
    }

    fn from_outcome(&self, outcome: LoopOutcome) -> InvocationResult {
        match outcome {
            LoopOutcome::Final { output, scratch, iterations } => InvocationResult::Answered {
                output,
                scratch,
                iterations,
            },
            LoopOutcome::Exhausted {
                mut output,
                scratch,
                iterations,
            } => {
                // 失败原因只在调试模式下展示
                if self.messages.debug {
                    if let Some(step) = scratch.last().filter(|s| s.is_failure()) {
                        output = format!("{}\n\n{}", output, step.observation_text());
                    }
                }
                InvocationResult::Exhausted {
                    output,
                    scratch,
                    iterations,
                }
            }
            LoopOutcome::Failed { error, .. } => self.failed(error),
        }
    }

    fn failed(&self, error: AgentError) -> InvocationResult {
        tracing::error!(kind = ?error.kind(), error = %error, "request failed");
        let message = if self.messages.debug {
            format!("{}\n\n{}", self.messages.apology_message, error)
        } else {
            self.messages.apology_message.clone()
        };
        InvocationResult::Failed {
            kind: error.kind(),
            message,
        }
    }

    fn log_done(&self, result: &InvocationResult, started: Instant) {
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            output_chars = result.output_text().chars().count(),
            kind = ?result.kind(),
            tokens_cumulative = self.components.planner.token_usage().2,
            "request done"
        );
    }
}
