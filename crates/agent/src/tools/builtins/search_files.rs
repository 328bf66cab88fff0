//! Regex search across workspace files.

use async_trait::async_trait;
use grep_regex::RegexMatcherBuilder;
use grep_searcher::SearcherBuilder;
use grep_searcher::sinks::UTF8;
use serde_json::{Value, json};

use crate::tools::{Tool, ToolContext, ToolError};

const DEFAULT_MAX_MATCHES: usize = 100;

pub struct SearchFilesTool;

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search workspace files for a regex pattern and return matching lines."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for."
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search; the project root when omitted."
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Ignore case when matching.",
                    "default": false
                },
                "max_matches": {
                    "type": "integer",
                    "description": "Upper bound on returned matches.",
                    "default": 100
                }
            },
            "required": ["pattern"]
        })
    }

    async fn run(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        let pattern = args
            .get("pattern")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidRequest("pattern is required".to_string()))?
            .to_string();
        let path_arg = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let case_insensitive = args
            .get("case_insensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let max_matches = args
            .get("max_matches")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_MATCHES);

        let (absolute, _relative) = context.resolve_path(path_arg)?;
        let restrictions = context.restrictions.clone();

        let (matches, truncated) = tokio::task::spawn_blocking(move || {
            let matcher = RegexMatcherBuilder::new()
                .case_insensitive(case_insensitive)
                .build(&pattern)
                .map_err(|e| ToolError::InvalidRequest(format!("bad pattern: {e}")))?;

            let mut searcher = SearcherBuilder::new().line_number(true).build();
            let mut matches = Vec::new();
            let mut truncated = false;

            let walker = ignore::WalkBuilder::new(&absolute)
                .hidden(false)
                .git_ignore(true)
                .git_global(false)
                .git_exclude(false)
                .build();

            'files: for entry in walker.flatten() {
                if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                    continue;
                }
                let rel = restrictions.relative(entry.path());
                if rel.starts_with('.') || rel.contains("/.") {
                    continue;
                }

                let mut over_limit = false;
                let result = searcher.search_path(
                    &matcher,
                    entry.path(),
                    UTF8(|line_number, line| {
                        if matches.len() >= max_matches {
                            over_limit = true;
                            return Ok(false);
                        }
                        matches.push(json!({
                            "path": rel,
                            "line": line_number,
                            "text": line.trim_end(),
                        }));
                        Ok(true)
                    }),
                );
                if let Err(e) = result {
                    log::debug!("search skipped {}: {}", rel, e);
                }
                if over_limit {
                    truncated = true;
                    break 'files;
                }
            }
            Ok::<_, ToolError>((matches, truncated))
        })
        .await
        .map_err(|e| ToolError::Other(anyhow::anyhow!("search task failed: {e}")))??;

        Ok(json!({
            "type": "search_files_result",
            "matches": matches,
            "truncated": truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::tool_context;
    use std::fs;

    #[tokio::test]
    async fn finds_matching_lines() {
        let (context, workspace) = tool_context().await;
        fs::write(
            workspace.path().join("a.rs"),
            "fn alpha() {}\nfn beta() {}\n",
        )
        .unwrap();

        let result = SearchFilesTool
            .run(json!({"pattern": "fn \\w+"}), &context)
            .await
            .unwrap();
        let matches = result["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0]["path"], "a.rs");
        assert_eq!(matches[0]["line"], 1);
    }

    #[tokio::test]
    async fn case_insensitive_search() {
        let (context, workspace) = tool_context().await;
        fs::write(workspace.path().join("a.txt"), "Hello\nworld\n").unwrap();

        let result = SearchFilesTool
            .run(
                json!({"pattern": "hello", "case_insensitive": true}),
                &context,
            )
            .await
            .unwrap();
        assert_eq!(result["matches"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_pattern_is_rejected() {
        let (context, _workspace) = tool_context().await;
        let err = SearchFilesTool
            .run(json!({"pattern": "(unclosed"}), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn respects_match_limit() {
        let (context, workspace) = tool_context().await;
        fs::write(workspace.path().join("a.txt"), "x\n".repeat(50)).unwrap();

        let result = SearchFilesTool
            .run(json!({"pattern": "x", "max_matches": 5}), &context)
            .await
            .unwrap();
        assert_eq!(result["matches"].as_array().unwrap().len(), 5);
        assert_eq!(result["truncated"], true);
    }
}
