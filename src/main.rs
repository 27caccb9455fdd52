mod api;
mod chain;
mod config;
mod fetch;
mod pipeline;
mod proxy;
mod readiness;
mod request_log;
mod rewrite;
mod strategy;

use axum::Router;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::chain::FallbackChain;
use crate::config::RelayConfig;
use crate::fetch::{HttpExecutor, ReqwestTransport};
use crate::pipeline::ContentPipeline;
use crate::proxy::ProxyClient;
use crate::request_log::{AtomicConnectionCounter, InMemoryRequestLog};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::fetch_content,
        api::proxy_request,
        api::list_logs,
        api::clear_logs,
        api::stats,
        api::health
    ),
    components(
        schemas(
            api::ContentRequest,
            api::ErrorBody,
            api::StatsResponse,
            api::ClearResponse,
            api::HealthResponse,
            crate::proxy::ProxyRequest,
            crate::request_log::RequestRecord,
            crate::strategy::StrategyId,
            crate::strategy::SourceStrategy
        )
    ),
    tags(
        (name = "relay", description = "Embeddable content acquisition"),
        (name = "proxy", description = "Plain pass-through proxy"),
        (name = "logs", description = "Request log and statistics")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("embed_relay=info,tower_http=info")),
        )
        .init();

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e);
        }
    };

    let strategies = strategy::default_chain(&config);
    let executor = HttpExecutor::new(ReqwestTransport::new()?);
    let chain = FallbackChain::new(strategies, Arc::new(executor));

    let state = Arc::new(api::AppState {
        pipeline: ContentPipeline::new(chain, config.readiness.clone()),
        proxy: ProxyClient::new(config.proxy_timeout)?,
        log: Arc::new(InMemoryRequestLog::new(config.log_capacity)),
        connections: Arc::new(AtomicConnectionCounter::default()),
    });

    let app = Router::new()
        .merge(SwaggerUi::new("/relay-swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api::router(state));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        addr = %listener.local_addr()?,
        archive = %config.archive_lookup_url,
        "Embed relay listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}
