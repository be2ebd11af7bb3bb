//! Planner：拼装模型输入、调用 LLM、解析回复
//!
//! 回复协议：去掉首尾空白后以 `{` 开头、或含 ```json 代码块的回复先取出其中的 JSON；
//! 带 `tool` 键的是工具调用 `{"tool": "...", "args": {...}}`，带 `answer` 键的是 `{"answer": "..."}`，
//! 其余回复（包括只是给用户看的 JSON 示例）原样作为最终答案。
//! build_messages 是纯函数：system + 历史 + 当前输入 + scratch（每步展开为 assistant/user 一对消息）。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{AgentError, Scratch, ScratchOutcome};
use crate::history::Turn;
use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;
use crate::tools::{tool_call_schema_json, ToolExecutor};

/// 模型请求调用的工具
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

/// 单轮 Thinking 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ModelDecision {
    /// 直接回复用户
    Final(String),
    /// 需要执行工具
    ToolCall(ToolCall),
}

/// 从回复中取出候选 JSON；既不以 `{` 开头也没有 ```json 代码块时返回 None
fn directive_body(trimmed: &str) -> Option<&str> {
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if trimmed.starts_with('{') {
        let end = trimmed.rfind('}').map(|i| i + 1).unwrap_or(trimmed.len());
        return Some(&trimmed[..end]);
    }
    None
}

/// 无法解析的 JSON 是否明显是在尝试发指令
fn looks_like_directive(json_str: &str) -> bool {
    json_str.contains("\"tool\"") || json_str.contains("\"answer\"")
}

fn malformed(reason: impl std::fmt::Display, json_str: &str) -> AgentError {
    AgentError::MalformedToolSelection(format!("{} in directive: {}", reason, preview(json_str, 200)))
}

/// 解析 LLM 输出
///
/// 候选 JSON 是含 `tool` 键的对象时必须是合法调用，含 `answer` 键时取其文本；
/// 其余情况（示例 JSON、普通对象）都是最终答案，原样返回。
/// 指令无法解析、tool 为空或 answer 不是字符串时返回 MalformedToolSelection。
pub fn parse_llm_output(output: &str) -> Result<ModelDecision, AgentError> {
    let trimmed = output.trim();
    let final_answer = || Ok(ModelDecision::Final(trimmed.to_string()));
    let Some(json_str) = directive_body(trimmed) else {
        return final_answer();
    };

    let value = match serde_json::from_str::<Value>(json_str) {
        Ok(value) => value,
        Err(e) if looks_like_directive(json_str) => {
            return Err(malformed(format!("unparseable JSON ({})", e), json_str));
        }
        Err(_) => return final_answer(),
    };
    let Some(object) = value.as_object() else {
        return final_answer();
    };

    if object.contains_key("tool") {
        let call: ToolCall = serde_json::from_value(value).map_err(|e| malformed(e, json_str))?;
        let tool = call.tool.trim();
        if tool.is_empty() {
            return Err(malformed("empty tool name", json_str));
        }
        if !call.args.is_object() {
            return Err(malformed("args must be an object", json_str));
        }
        return Ok(ModelDecision::ToolCall(ToolCall {
            tool: tool.to_string(),
            args: call.args,
        }));
    }
    match object.get("answer") {
        Some(Value::String(answer)) => Ok(ModelDecision::Final(answer.trim().to_string())),
        Some(_) => Err(malformed("answer must be a string", json_str)),
        None => final_answer(),
    }
}

fn preview(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 基础 prompt + 工具目录 + 调用格式
pub fn build_system_prompt(base: &str, executor: &ToolExecutor) -> String {
    let tools = executor.list_tools();
    if tools.is_empty() {
        return format!("{}\n\nNo tools are available. Answer the user directly in plain text.", base.trim_end());
    }

    let catalog = tools
        .iter()
        .map(|t| format!("- {}: {}\n  parameters: {}", t.name, t.description, t.parameters))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{}\n\n## Tools\n{}\n\n## Calling a tool\n\
        To call a tool, reply with exactly one JSON object and nothing else, matching this schema:\n{}\n\
        Example: {{\"tool\": \"{}\", \"args\": {{\"query\": \"...\"}}}}\n\
        When you can answer, reply in plain text (or {{\"answer\": \"...\"}}).",
        base.trim_end(),
        catalog,
        tool_call_schema_json(),
        tools[0].name
    )
}

/// 组装一次 Thinking 的完整消息序列
pub fn build_messages(system: &str, history: &[Turn], input: &str, scratch: &Scratch) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + scratch.len() * 2 + 2);
    messages.push(Message::system(system));
    messages.extend(history.iter().map(Turn::to_message));
    messages.push(Message::user(input));

    for step in scratch.steps() {
        if let Some(tool) = &step.tool {
            let call = serde_json::json!({ "tool": tool, "args": step.args });
            messages.push(Message::assistant(call.to_string()));
        }
        let feedback = match (&step.outcome, &step.tool) {
            (ScratchOutcome::Malformed(_), _) | (_, None) => step.observation_text(),
            (_, Some(tool)) => format!("Observation from {}: {}", tool, step.observation_text()),
        };
        messages.push(Message::user(feedback));
    }
    messages
}

/// Planner：持有 LLM 与基础 system prompt
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 调用模型；重试已在客户端内完成，这里只做错误分类
    pub async fn think(&self, messages: &[Message]) -> Result<String, AgentError> {
        self.llm.complete(messages).await.map_err(|e| match e {
            LlmError::Timeout => AgentError::ModelTimeout,
            other => AgentError::ModelUnavailable(other.to_string()),
        })
    }
}
