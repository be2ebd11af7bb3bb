//! 文档检索工具：在预构建向量索引中查找与 query 最相关的片段

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::memory::Retriever;
use crate::tools::{Tool, ToolError};

pub struct VectorSearchTool {
    retriever: Arc<dyn Retriever>,
    k: usize,
    description: String,
}

impl VectorSearchTool {
    pub fn new(retriever: Arc<dyn Retriever>, k: usize, description: impl Into<String>) -> Self {
        Self {
            retriever,
            k: k.max(1),
            description: description.into(),
        }
    }
}

#[async_trait]
impl Tool for VectorSearchTool {
    fn name(&self) -> &str {
        "vector_search"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "what to look up in the documents" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArgs("missing query".to_string()));
        }
        let hits = self
            .retriever
            .retrieve(query, self.k)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        if hits.is_empty() {
            return Ok("No relevant documents found.".to_string());
        }
        Ok(hits
            .into_iter()
            .map(|h| match h.source {
                Some(source) => format!("[{}]\n{}", source, h.text),
                None => h.text,
            })
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{RetrievalError, RetrievalResult};

    struct Fixed(Vec<RetrievalResult>);

    #[async_trait]
    impl Retriever for Fixed {
        async fn retrieve(&self, _query: &str, k: usize) -> Result<Vec<RetrievalResult>, RetrievalError> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
    }

    fn hit(text: &str, source: Option<&str>) -> RetrievalResult {
        RetrievalResult {
            text: text.into(),
            source: source.map(String::from),
            score: 0.9,
        }
    }

    #[tokio::test]
    async fn test_joins_chunks() {
        let tool = VectorSearchTool::new(
            Arc::new(Fixed(vec![
                hit("Annual leave is 20 days.", Some("handbook.md")),
                hit("Expenses are reimbursed monthly.", None),
                hit("unused", None),
            ])),
            2,
            "docs",
        );
        let out = tool
            .execute(serde_json::json!({"query": "leave"}))
            .await
            .unwrap();
        assert_eq!(
            out,
            "[handbook.md]\nAnnual leave is 20 days.\n\nExpenses are reimbursed monthly."
        );
    }

    #[tokio::test]
    async fn test_no_hits() {
        let tool = VectorSearchTool::new(Arc::new(Fixed(vec![])), 4, "docs");
        let out = tool.execute(serde_json::json!({"query": "x"})).await.unwrap();
        assert_eq!(out, "No relevant documents found.");
        assert!(matches!(
            tool.execute(serde_json::json!({})).await,
            Err(ToolError::InvalidArgs(_))
        ));
    }
}
