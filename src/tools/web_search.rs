//! Web 搜索工具：查询 DuckDuckGo HTML 端点，提取结果标题/摘要/链接
//!
//! GET 请求带超时与 User-Agent；解析不到结构化结果时退回 html2text 的纯文本；
//! 输出超过 max_result_chars 时截断并追加 ...[truncated]。

use std::sync::OnceLock;

use async_trait::async_trait;
use html2text::from_read;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;

use crate::tools::{Tool, ToolError};

static RESULT_LINK_RE: OnceLock<Regex> = OnceLock::new();
static RESULT_SNIPPET_RE: OnceLock<Regex> = OnceLock::new();
static TAG_RE: OnceLock<Regex> = OnceLock::new();

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub struct WebSearchTool {
    client: Client,
    endpoint: String,
    max_results: usize,
    max_result_chars: usize,
}

impl WebSearchTool {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64, max_results: usize, max_result_chars: usize) -> Self {
        const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            max_results,
            max_result_chars,
        }
    }

    async fn search(&self, query: &str) -> Result<String, String> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp.text().await.map_err(|e| format!("Read body: {}", e))?;

        let hits = extract_results(&body, self.max_results);
        let text = if hits.is_empty() {
            match from_read(body.as_bytes(), 120) {
                Ok(t) if !t.trim().is_empty() => t,
                _ => "No results found.".to_string(),
            }
        } else {
            format_hits(&hits)
        };
        Ok(truncate_chars(&text, self.max_result_chars))
    }
}

/// 去掉标签后交给 html2text 解码实体（含 `&#8217;` 这类数字实体），再折叠空白
fn strip_tags(s: &str) -> String {
    let re = TAG_RE.get_or_init(|| Regex::new(r"<[^>]*>").unwrap());
    let text = re.replace_all(s, "");
    decode_entities(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(s: &str) -> String {
    // 宽度只影响换行，调用方会折叠空白
    match from_read(s.as_bytes(), 1000) {
        Ok(decoded) => decoded.trim().to_string(),
        Err(_) => s.to_string(),
    }
}

/// DuckDuckGo 的结果链接是跳转地址（//duckduckgo.com/l/?uddg=<真实地址>），取出真实地址
fn resolve_link(href: &str) -> String {
    let href = decode_entities(href);
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.clone()
    };
    reqwest::Url::parse(&absolute)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "uddg")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or(href)
}

/// 从结果页 HTML 中提取最多 max 条结果
pub fn extract_results(html: &str, max: usize) -> Vec<SearchHit> {
    let link_re = RESULT_LINK_RE.get_or_init(|| {
        Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#).unwrap()
    });
    let snippet_re = RESULT_SNIPPET_RE.get_or_init(|| {
        Regex::new(r#"(?s)<[a-z]+[^>]*class="result__snippet"[^>]*>(.*?)</[a-z]+>"#).unwrap()
    });

    let snippets: Vec<String> = snippet_re
        .captures_iter(html)
        .map(|c| strip_tags(&c[1]))
        .collect();

    link_re
        .captures_iter(html)
        .enumerate()
        .map(|(i, c)| SearchHit {
            title: strip_tags(&c[2]),
            url: resolve_link(&c[1]),
            snippet: snippets.get(i).cloned().unwrap_or_default(),
        })
        .filter(|h| !h.title.is_empty())
        .take(max)
        .collect()
}

fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, h)| format!("{}. {}\n{}\n{}", i + 1, h.title, h.snippet, h.url))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        text.chars().take(max).collect::<String>() + "\n...[truncated]"
    } else {
        text.to_string()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns titles, snippets and links. Args: {\"query\": \"...\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "search keywords" }
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
        tracing::info!(query = %query, "web search");
        self.search(query).await.map_err(ToolError::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
<div class="result results_links results_links_deep web-result">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&amp;rut=abc">Rust <b>Programming</b> Language</a>
  </h2>
  <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">A language empowering everyone to build
     reliable &amp; efficient software.</a>
</div>
<div class="result">
  <a rel="nofollow" class="result__a" href="https://doc.rust-lang.org/book/">The Rust Book</a>
  <a class="result__snippet" href="#">Learn Rust.</a>
</div>
"##;

    #[test]
    fn test_extract_results() {
        let hits = extract_results(SAMPLE, 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Rust Programming Language");
        assert_eq!(hits[0].url, "https://www.rust-lang.org/");
        assert_eq!(
            hits[0].snippet,
            "A language empowering everyone to build reliable & efficient software."
        );
        assert_eq!(hits[1].url, "https://doc.rust-lang.org/book/");
    }

    #[test]
    fn test_snippet_entities_decoded() {
        assert_eq!(
            strip_tags("It&#8217;s <b>fast</b> &amp; safe &lt;3&nbsp;&quot;ok&quot;"),
            "It\u{2019}s fast & safe <3 \"ok\""
        );
        assert_eq!(
            resolve_link("//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fa&amp;rut=1"),
            "https://example.com/a"
        );
    }

    #[test]
    fn test_extract_respects_max() {
        assert_eq!(extract_results(SAMPLE, 1).len(), 1);
        assert!(extract_results("<html>nothing</html>", 5).is_empty());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate_chars("abcdef", 3), "abc\n...[truncated]");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }

    #[tokio::test]
    async fn test_missing_query_fails() {
        let tool = WebSearchTool::new("http://127.0.0.1:9", 1, 5, 100);
        assert_eq!(
            tool.execute(serde_json::json!({"query": "  "})).await,
            Err(ToolError::InvalidArgs("missing query".to_string()))
        );
    }
}
