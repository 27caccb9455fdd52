use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::fetch::{AttemptTrace, StrategyExecutor};
use crate::strategy::{SourceStrategy, StrategyDescriptor};

/// Terminal result of one acquisition. `html` is never empty.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FetchOutcome {
    pub html: String,
    pub source_strategy: SourceStrategy,
    pub rewritten: bool,
    /// Base for rebasing; the target itself for placeholders.
    pub source_url: String,
    pub attempts: Vec<AttemptTrace>,
}

impl FetchOutcome {
    pub fn is_placeholder(&self) -> bool {
        self.source_strategy == SourceStrategy::FallbackPlaceholder
    }
}

/// Ordered strategies driven strictly one at a time; first success wins.
#[derive(Clone)]
pub struct FallbackChain {
    strategies: Vec<StrategyDescriptor>,
    executor: Arc<dyn StrategyExecutor>,
}

impl FallbackChain {
    pub fn new(strategies: Vec<StrategyDescriptor>, executor: Arc<dyn StrategyExecutor>) -> Self {
        Self { strategies, executor }
    }

    pub fn strategies(&self) -> &[StrategyDescriptor] {
        &self.strategies
    }

    pub async fn acquire(&self, target_url: &str) -> FetchOutcome {
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for descriptor in &self.strategies {
            let result = self.executor.execute(descriptor, target_url).await;
            attempts.push(result.trace());

            match result.html {
                Some(html) if result.ok && !html.is_empty() => {
                    info!(
                        url = %target_url,
                        strategy = ?descriptor.id,
                        elapsed_ms = result.elapsed_ms,
                        "Acquired document"
                    );
                    return FetchOutcome {
                        html,
                        source_strategy: descriptor.id.into(),
                        rewritten: false,
                        source_url: result.source_url.unwrap_or_else(|| target_url.to_string()),
                        attempts,
                    };
                }
                _ => {
                    debug!(
                        url = %target_url,
                        strategy = ?descriptor.id,
                        error = ?result.error,
                        status = ?result.status_code,
                        "Strategy failed, advancing"
                    );
                }
            }
        }

        info!(url = %target_url, attempts = attempts.len(), "All strategies failed, serving placeholder");
        FetchOutcome {
            html: placeholder_document(target_url),
            source_strategy: SourceStrategy::FallbackPlaceholder,
            rewritten: false,
            source_url: target_url.to_string(),
            attempts,
        }
    }
}

/// Self-describing page served when nothing could be retrieved.
pub fn placeholder_document(target_url: &str) -> String {
    let text = html_escape::encode_text(target_url);
    let href = html_escape::encode_double_quoted_attribute(target_url);
    let js_url = serde_json::to_string(target_url).unwrap_or_else(|_| "\"\"".to_string());
    // Markup inside the JSON literal must not be able to close the script element.
    let js_url = js_url.replace('<', "\\u003c");

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Content unavailable</title>
<style>
  body {{ font-family: system-ui, sans-serif; margin: 0; display: flex; align-items: center; justify-content: center; min-height: 100vh; background: #f6f7f9; color: #222; }}
  .relay-unavailable {{ max-width: 36rem; padding: 2rem; text-align: center; }}
  .relay-unavailable code {{ word-break: break-all; }}
  .relay-unavailable a, .relay-unavailable button {{ display: inline-block; margin: .5rem; padding: .5rem 1rem; font-size: 1rem; }}
</style>
</head>
<body>
<div class="relay-unavailable">
  <h1>This page could not be retrieved</h1>
  <p>The relay was unable to load <code>{text}</code>. The site may be down, blocking automated access, or not archived.</p>
  <a href="{href}" target="_blank" rel="noopener noreferrer">Open original page</a>
  <button type="button" id="relay-retry">Retry</button>
</div>
<script>
  document.getElementById('relay-retry').addEventListener('click', function () {{
    var target = {js_url};
    if (window.parent && window.parent !== window) {{
      window.parent.postMessage({{ type: 'relay-retry', targetUrl: target }}, '*');
    }} else {{
      window.location.reload();
    }}
  }});
</script>
</body>
</html>"#
    )
}
