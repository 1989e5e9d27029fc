//! Shared domain types for AuthBridge: the immutable `Route` record, the
//! mutable `ExchangeConfig` snapshot, the `InboundPolicy`, and the
//! direction-marker constants carried across the proxy→filter boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header injected by the proxy's inbound listener, stripped by the
/// Filter before the request ever reaches the application.
pub const DIRECTION_HEADER: &str = "x-authbridge-direction";

/// The only meaningful direction-marker value; its absence means
/// "outbound".
pub const DIRECTION_INBOUND: &str = "inbound";

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid token endpoint url: {0}")]
    InvalidTokenEndpoint(String),
}

/// Policy for a destination host pattern. Immutable once constructed;
/// order within a route table is significant (first match wins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub host_pattern: String,
    #[serde(default)]
    pub target_audience: String,
    #[serde(default)]
    pub scopes: String,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub passthrough: bool,
    /// Reserved for future use (spec.md §9 Open Questions): parsed from
    /// the route file but not wired into any Filter decision.
    #[serde(default)]
    pub authorization_check: bool,
}

impl Route {
    pub fn new(host_pattern: impl Into<String>) -> Self {
        Self {
            host_pattern: host_pattern.into(),
            target_audience: String::new(),
            scopes: String::new(),
            token_endpoint: None,
            passthrough: false,
            authorization_check: false,
        }
    }
}

/// The parameters needed to mint a new token via RFC 8693 exchange.
/// Mutable at runtime via the Credential Bootstrap; readers see an
/// atomic snapshot (value semantics, copied out of the lock).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_endpoint: String,
    pub target_audience: String,
    pub scopes: String,
}

impl ExchangeConfig {
    /// Fully populated (all five fields non-empty) iff exchange should be
    /// attempted; otherwise outbound falls back to passthrough.
    pub fn is_complete(&self) -> bool {
        !self.client_id.is_empty()
            && !self.client_secret.is_empty()
            && !self.token_endpoint.is_empty()
            && !self.target_audience.is_empty()
            && !self.scopes.is_empty()
    }

    /// Returns a copy with the target audience, scopes, and token
    /// endpoint overridden by a resolved `Route`, leaving client
    /// credentials untouched. Used when the Resolver matches the
    /// destination host for this request only.
    pub fn overridden_by_route(&self, route: &Route) -> Self {
        let mut cfg = self.clone();
        if !route.target_audience.is_empty() {
            cfg.target_audience = route.target_audience.clone();
        }
        if !route.scopes.is_empty() {
            cfg.scopes = route.scopes.clone();
        }
        if let Some(endpoint) = &route.token_endpoint {
            cfg.token_endpoint = endpoint.clone();
        }
        cfg
    }
}

/// Immutable after startup: policy for validating inbound bearer tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPolicy {
    pub issuer: String,
    /// Empty string means "do not enforce audience".
    pub expected_audience: String,
    pub jwks_url: String,
}

impl InboundPolicy {
    /// Derives the JWKS URL from a token endpoint by stripping a
    /// trailing `/token` and appending `/certs` (spec.md §3).
    pub fn jwks_url_from_token_endpoint(token_url: &str) -> Result<String, CoreError> {
        let trimmed = token_url.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(CoreError::InvalidTokenEndpoint(token_url.to_string()));
        }
        let base = trimmed.strip_suffix("/token").unwrap_or(trimmed);
        Ok(format!("{base}/certs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_config_requires_all_five_fields() {
        let mut cfg = ExchangeConfig::default();
        assert!(!cfg.is_complete());
        cfg.client_id = "svc-a".to_string();
        cfg.client_secret = "secret".to_string();
        cfg.token_endpoint = "https://idp.example/token".to_string();
        cfg.target_audience = "svc-b".to_string();
        assert!(!cfg.is_complete());
        cfg.scopes = "openid".to_string();
        assert!(cfg.is_complete());
    }

    #[test]
    fn route_overrides_only_non_empty_fields() {
        let base = ExchangeConfig {
            client_id: "svc-a".to_string(),
            client_secret: "secret".to_string(),
            token_endpoint: "https://idp.example/token".to_string(),
            target_audience: "default-aud".to_string(),
            scopes: "openid".to_string(),
        };
        let mut route = Route::new("api.internal");
        route.target_audience = "svc-c".to_string();

        let overridden = base.overridden_by_route(&route);
        assert_eq!(overridden.target_audience, "svc-c");
        assert_eq!(overridden.scopes, "openid");
        assert_eq!(overridden.client_id, "svc-a");
    }

    #[test]
    fn jwks_url_strips_token_suffix() {
        let jwks = InboundPolicy::jwks_url_from_token_endpoint(
            "https://kc.example/realms/demo/protocol/openid-connect/token",
        )
        .unwrap();
        assert_eq!(
            jwks,
            "https://kc.example/realms/demo/protocol/openid-connect/certs"
        );
    }

    #[test]
    fn jwks_url_handles_endpoint_without_token_suffix() {
        let jwks = InboundPolicy::jwks_url_from_token_endpoint("https://kc.example/realms/demo")
            .unwrap();
        assert_eq!(jwks, "https://kc.example/realms/demo/certs");
    }

    #[test]
    fn jwks_url_rejects_empty_endpoint() {
        assert!(InboundPolicy::jwks_url_from_token_endpoint("").is_err());
    }
}
