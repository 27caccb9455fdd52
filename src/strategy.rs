use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

use crate::config::RelayConfig;

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";
const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1";

/// Identifies one entry of the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyId {
    Direct,
    AlternateIdentity,
    Archival,
}

/// Where the delivered document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SourceStrategy {
    Direct,
    AlternateIdentity,
    Archival,
    FallbackPlaceholder,
}

impl SourceStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStrategy::Direct => "direct",
            SourceStrategy::AlternateIdentity => "alternate-identity",
            SourceStrategy::Archival => "archival",
            SourceStrategy::FallbackPlaceholder => "fallback-placeholder",
        }
    }
}

impl From<StrategyId> for SourceStrategy {
    fn from(id: StrategyId) -> Self {
        match id {
            StrategyId::Direct => SourceStrategy::Direct,
            StrategyId::AlternateIdentity => SourceStrategy::AlternateIdentity,
            StrategyId::Archival => SourceStrategy::Archival,
        }
    }
}

/// Full request header set simulating one kind of client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderProfile {
    pub name: &'static str,
    pub user_agent: &'static str,
    pub accept: &'static str,
    pub accept_language: &'static str,
    pub cache_control: &'static str,
    pub pragma: &'static str,
}

impl HeaderProfile {
    pub fn desktop() -> Self {
        Self {
            name: "desktop-chrome",
            user_agent: DESKTOP_USER_AGENT,
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            accept_language: "en-US,en;q=0.9",
            cache_control: "no-cache",
            pragma: "no-cache",
        }
    }

    pub fn mobile() -> Self {
        Self {
            name: "mobile-safari",
            user_agent: MOBILE_USER_AGENT,
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            accept_language: "en-US,en;q=0.8",
            cache_control: "max-age=0",
            pragma: "no-cache",
        }
    }

    /// Header name/value pairs in the order they are sent.
    pub fn headers(&self) -> [(&'static str, &'static str); 5] {
        [
            ("user-agent", self.user_agent),
            ("accept", self.accept),
            ("accept-language", self.accept_language),
            ("cache-control", self.cache_control),
            ("pragma", self.pragma),
        ]
    }
}

/// How a strategy reaches the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyKind {
    /// Single GET against the target itself.
    Direct,
    /// Snapshot lookup, then GET of the closest snapshot.
    Archival { lookup_url: String },
}

/// One entry of the ordered fallback chain. Order is priority.
#[derive(Debug, Clone)]
pub struct StrategyDescriptor {
    pub id: StrategyId,
    pub kind: StrategyKind,
    pub header_profile: HeaderProfile,
    pub timeout: Duration,
    pub accepted_content_types: Vec<String>,
    pub min_acceptable_body_length: usize,
}

impl StrategyDescriptor {
    /// Whether `content_type` (raw header value, parameters allowed) is accepted.
    pub fn accepts_content_type(&self, content_type: &str) -> bool {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        self.accepted_content_types.iter().any(|accepted| *accepted == mime)
    }
}

fn html_types() -> Vec<String> {
    vec!["text/html".to_string(), "application/xhtml+xml".to_string()]
}

/// Canonical chain: desktop identity, mobile identity, archive snapshot.
pub fn default_chain(config: &RelayConfig) -> Vec<StrategyDescriptor> {
    vec![
        StrategyDescriptor {
            id: StrategyId::Direct,
            kind: StrategyKind::Direct,
            header_profile: HeaderProfile::desktop(),
            timeout: config.desktop_timeout,
            accepted_content_types: html_types(),
            min_acceptable_body_length: config.min_body_length,
        },
        StrategyDescriptor {
            id: StrategyId::AlternateIdentity,
            kind: StrategyKind::Direct,
            header_profile: HeaderProfile::mobile(),
            timeout: config.mobile_timeout,
            accepted_content_types: html_types(),
            min_acceptable_body_length: config.min_body_length,
        },
        StrategyDescriptor {
            id: StrategyId::Archival,
            kind: StrategyKind::Archival {
                lookup_url: config.archive_lookup_url.clone(),
            },
            header_profile: HeaderProfile::desktop(),
            timeout: config.archive_timeout,
            accepted_content_types: html_types(),
            min_acceptable_body_length: config.min_body_length,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chain_order_is_desktop_mobile_archive() {
        let chain = default_chain(&RelayConfig::default());
        let ids: Vec<_> = chain.iter().map(|d| d.id).collect();
        assert_eq!(
            ids,
            vec![StrategyId::Direct, StrategyId::AlternateIdentity, StrategyId::Archival]
        );
        assert_ne!(chain[0].header_profile, chain[1].header_profile);
        assert!(matches!(chain[2].kind, StrategyKind::Archival { .. }));
    }

    #[test]
    fn content_type_matching_ignores_parameters_and_case() {
        let descriptor = &default_chain(&RelayConfig::default())[0];
        assert!(descriptor.accepts_content_type("text/html; charset=UTF-8"));
        assert!(descriptor.accepts_content_type("Text/HTML"));
        assert!(!descriptor.accepts_content_type("application/json"));
    }

    #[test]
    fn source_strategy_serializes_kebab_case() {
        let json = serde_json::to_string(&SourceStrategy::FallbackPlaceholder).unwrap();
        assert_eq!(json, "\"fallback-placeholder\"");
        assert_eq!(SourceStrategy::from(StrategyId::AlternateIdentity).as_str(), "alternate-identity");
    }
}
