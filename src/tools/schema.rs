//! 模型回复格式的 JSON Schema（schemars 生成）
//!
//! 注入 system prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};

/// 调用工具：`{"tool": "...", "args": {...}}`
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 已注册的工具名，如 web_search、vector_search
    pub tool: String,
    /// 工具参数，结构见对应工具的 parameters
    pub args: serde_json::Value,
}

/// 返回工具调用的 JSON Schema 字符串
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_fields() {
        let tool = tool_call_schema_json();
        assert!(tool.contains("\"tool\""));
        assert!(tool.contains("\"args\""));
    }
}
