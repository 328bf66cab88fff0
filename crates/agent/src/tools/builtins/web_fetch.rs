//! Fetch a URL and return its body as text.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::{Tool, ToolContext, ToolError};

const DEFAULT_MAX_BYTES: usize = 100_000;

pub struct WebFetchTool;

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch an http(s) URL and return the response body as text."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "URL to fetch."
                },
                "max_bytes": {
                    "type": "integer",
                    "description": "Truncate the body beyond this size.",
                    "default": 100000
                }
            },
            "required": ["url"]
        })
    }

    async fn run(&self, args: Value, _context: &ToolContext) -> Result<Value, ToolError> {
        let url = args
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidRequest("url is required".to_string()))?;
        let max_bytes = args
            .get("max_bytes")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_BYTES);

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidRequest(
                "only http(s) URLs are supported".to_string(),
            ));
        }

        let response = reqwest::get(url)
            .await
            .map_err(|e| ToolError::Other(anyhow::anyhow!("request failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Other(anyhow::anyhow!("failed to read body: {e}")))?;

        let truncated = body.len() > max_bytes;
        let content = if truncated {
            let mut end = max_bytes;
            while end > 0 && !body.is_char_boundary(end) {
                end -= 1;
            }
            body[..end].to_string()
        } else {
            body
        };

        Ok(json!({
            "type": "web_fetch_result",
            "url": url,
            "status": status,
            "content": content,
            "truncated": truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::tool_context;

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let (context, _workspace) = tool_context().await;
        let err = WebFetchTool
            .run(json!({"url": "file:///etc/passwd"}), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidRequest(_)));
    }
}
