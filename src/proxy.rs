use reqwest::{Method, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use utoipa::ToSchema;

// Never forwarded from caller-supplied headers.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "te",
    "trailer",
    "proxy-authorization",
    "proxy-connection",
];

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
    pub target_url: Option<String>,
    /// Defaults to GET.
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// Defaults to true.
    pub follow_redirects: Option<bool>,
    /// Accepted for compatibility; responses are never cached.
    pub enable_caching: Option<bool>,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid method: {0}")]
    InvalidMethod(String),
    #[error("invalid target url: {0}")]
    InvalidUrl(String),
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

#[derive(Debug)]
pub struct Relayed {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// One-shot relay of a single request/response pair. No fallback, no rewriting.
#[derive(Clone)]
pub struct ProxyClient {
    following: reqwest::Client,
    direct: reqwest::Client,
    timeout: Duration,
}

impl ProxyClient {
    pub fn new(timeout: Duration) -> Result<Self, ProxyError> {
        let following = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        let direct = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            following,
            direct,
            timeout,
        })
    }

    pub async fn relay(&self, target_url: &str, req: &ProxyRequest) -> Result<Relayed, ProxyError> {
        let url = Url::parse(target_url.trim()).map_err(|e| ProxyError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProxyError::InvalidUrl(format!("unsupported scheme {}", url.scheme())));
        }

        let method_name = req.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| ProxyError::InvalidMethod(method_name.clone()))?;

        if req.enable_caching == Some(true) {
            debug!(url = %url, "enableCaching requested; proxy responses are never cached");
        }

        let client = if req.follow_redirects.unwrap_or(true) {
            &self.following
        } else {
            &self.direct
        };

        let mut builder = client.request(method, url).timeout(self.timeout);
        for (name, value) in &req.headers {
            if HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await.map_err(|e| self.classify(e))?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = resp.bytes().await.map_err(|e| self.classify(e))?.to_vec();

        Ok(Relayed {
            status,
            content_type,
            body,
        })
    }

    fn classify(&self, error: reqwest::Error) -> ProxyError {
        if error.is_timeout() {
            ProxyError::Timeout(self.timeout)
        } else {
            ProxyError::Upstream(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::HeaderMap,
        response::{IntoResponse, Redirect},
        routing::{get, post},
        Router,
    };

    async fn spawn_upstream() -> String {
        let app = Router::new()
            .route("/hello", get(|| async { "hello" }))
            .route("/moved", get(|| async { Redirect::temporary("/hello") }))
            .route(
                "/echo",
                post(|headers: HeaderMap, body: String| async move {
                    let marker = headers
                        .get("x-marker")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    (axum::http::StatusCode::CREATED, format!("{}:{}", marker, body)).into_response()
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn request(method: Option<&str>) -> ProxyRequest {
        ProxyRequest {
            target_url: None,
            method: method.map(str::to_string),
            headers: HashMap::new(),
            body: None,
            follow_redirects: None,
            enable_caching: Some(true),
        }
    }

    #[tokio::test]
    async fn relays_method_headers_and_body() {
        let base = spawn_upstream().await;
        let client = ProxyClient::new(Duration::from_secs(5)).unwrap();
        let mut req = request(Some("post"));
        req.headers.insert("X-Marker".to_string(), "m1".to_string());
        req.headers.insert("Host".to_string(), "evil.example".to_string());
        req.body = Some("payload".to_string());

        let relayed = client.relay(&format!("{}/echo", base), &req).await.unwrap();
        assert_eq!(relayed.status, 201);
        assert_eq!(relayed.body, b"m1:payload");
    }

    #[tokio::test]
    async fn redirects_follow_only_when_asked() {
        let base = spawn_upstream().await;
        let client = ProxyClient::new(Duration::from_secs(5)).unwrap();

        let followed = client.relay(&format!("{}/moved", base), &request(None)).await.unwrap();
        assert_eq!(followed.status, 200);
        assert_eq!(followed.body, b"hello");

        let mut req = request(None);
        req.follow_redirects = Some(false);
        let direct = client.relay(&format!("{}/moved", base), &req).await.unwrap();
        assert_eq!(direct.status, 307);
    }

    #[tokio::test]
    async fn rejects_bad_input_before_sending() {
        let client = ProxyClient::new(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.relay("file:///etc/passwd", &request(None)).await,
            Err(ProxyError::InvalidUrl(_))
        ));
        assert!(matches!(
            client.relay("http://127.0.0.1:9/", &request(Some("BAD METHOD"))).await,
            Err(ProxyError::InvalidMethod(_))
        ));
    }
}
