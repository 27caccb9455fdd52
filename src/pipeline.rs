use crate::chain::{FallbackChain, FetchOutcome};
use crate::readiness::{self, ReadinessConfig};
use crate::rewrite;

/// acquire → rewrite (real content only) → inject.
#[derive(Clone)]
pub struct ContentPipeline {
    chain: FallbackChain,
    readiness: ReadinessConfig,
}

impl ContentPipeline {
    pub fn new(chain: FallbackChain, readiness: ReadinessConfig) -> Self {
        Self { chain, readiness }
    }

    pub fn chain(&self) -> &FallbackChain {
        &self.chain
    }

    pub async fn render(&self, target_url: &str) -> FetchOutcome {
        let mut outcome = self.chain.acquire(target_url).await;

        if !outcome.is_placeholder() {
            outcome.html = rewrite::rewrite(&outcome.html, &outcome.source_url, outcome.source_strategy);
            outcome.rewritten = true;
        }
        outcome.html = readiness::inject(&outcome.html, &self.readiness);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::fetch::tests::{html_response, StubTransport};
    use crate::fetch::{HttpExecutor, RawResponse, Transport, TransportError};
    use crate::readiness::OVERLAY_ID;
    use crate::strategy::{default_chain, HeaderProfile, SourceStrategy};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    fn pipeline(transport: StubTransport) -> ContentPipeline {
        let chain = FallbackChain::new(
            default_chain(&RelayConfig::default()),
            Arc::new(HttpExecutor::new(transport)),
        );
        ContentPipeline::new(chain, ReadinessConfig::default())
    }

    #[tokio::test]
    async fn real_content_is_rewritten_and_instrumented() {
        let body = format!(
            "<html><head><title>t</title></head><body><a href=\"/docs\">docs</a>{}</body></html>",
            "y".repeat(200)
        );
        let outcome = pipeline(StubTransport::default().route("https://example.com", html_response(200, &body)))
            .render("https://example.com/page")
            .await;

        assert_eq!(outcome.source_strategy, SourceStrategy::Direct);
        assert!(outcome.rewritten);
        assert!(outcome.html.contains(r#"<a href="https://example.com/docs">"#));
        assert!(outcome.html.contains(r#"<base href="https://example.com/">"#));
        assert!(outcome.html.contains(OVERLAY_ID));
    }

    #[tokio::test]
    async fn live_page_keeps_archive_citations_and_static_assets() {
        let body = format!(
            "<html><head><link rel=\"stylesheet\" href=\"/_static/site.css\"></head><body><a href=\"https://web.archive.org/web/20200101000000/https://dead.example/\">cite</a>{}</body></html>",
            "w".repeat(200)
        );
        let outcome = pipeline(StubTransport::default().route("https://example.com", html_response(200, &body)))
            .render("https://example.com/page")
            .await;

        assert_eq!(outcome.source_strategy, SourceStrategy::Direct);
        assert!(outcome.html.contains(r#"href="https://example.com/_static/site.css""#));
        assert!(outcome
            .html
            .contains(r#"href="https://web.archive.org/web/20200101000000/https://dead.example/""#));
    }

    #[tokio::test]
    async fn placeholder_is_instrumented_but_not_rewritten() {
        let outcome = pipeline(StubTransport::default()).render("https://down.example/").await;
        assert_eq!(outcome.source_strategy, SourceStrategy::FallbackPlaceholder);
        assert!(!outcome.rewritten);
        assert!(!outcome.html.contains("<base"));
        assert!(outcome.html.contains(OVERLAY_ID));
        assert!(outcome.html.contains("https://down.example/"));
    }

    /// Hangs for the desktop identity, serves a 500-byte page to anything else.
    struct DesktopBlocked;

    #[async_trait]
    impl Transport for DesktopBlocked {
        async fn get(&self, url: &str, profile: &HeaderProfile) -> Result<RawResponse, TransportError> {
            if profile.user_agent == HeaderProfile::desktop().user_agent {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            let body = format!("<html><head></head><body>{}</body></html>", "m".repeat(461));
            Ok(RawResponse {
                final_url: url.to_string(),
                ..html_response(200, &body)
            })
        }
    }

    #[tokio::test]
    async fn mobile_identity_recovers_from_desktop_timeout() {
        let config = RelayConfig {
            desktop_timeout: Duration::from_millis(30),
            ..RelayConfig::default()
        };
        let chain = FallbackChain::new(default_chain(&config), Arc::new(HttpExecutor::new(DesktopBlocked)));
        let outcome = ContentPipeline::new(chain, ReadinessConfig::default())
            .render("https://example.com/page")
            .await;

        assert_eq!(outcome.source_strategy, SourceStrategy::AlternateIdentity);
        assert!(outcome.rewritten);
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].error.as_deref(), Some("timeout"));
    }
}
