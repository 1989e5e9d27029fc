//! Self-refreshing cache of JWT verification keys (spec.md §4.C).
//!
//! Structured like the teacher's `JwksProvider`
//! (`crates/openportio-server/src/auth.rs` in the retrieved pack):
//! an `RwLock`-guarded map of `kid` → key, a `last_refresh` timestamp,
//! and "serve cached keys on refresh failure" fallback. The fetch
//! client is `reqwest` instead of the teacher's blocking `ureq` because
//! this cache lives inside the Filter's async gRPC server, and refresh
//! runs on a background `tokio` task rather than lazily on `get`, so key
//! rotation propagates within a bounded window even on an idle route.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::RwLock;
use thiserror::Error;

/// Default bounded staleness window (spec.md §5 Timeouts).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// Finite timeout on the JWKS fetch HTTP call (spec.md §5 Timeouts).
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum JwksError {
    #[error("jwks endpoint {url} returned status {status}")]
    BadStatus { url: String, status: u16 },
    #[error("failed to fetch jwks from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid jwks payload from {url}: {source}")]
    InvalidPayload {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("jwks payload from {url} contains no usable keys")]
    NoUsableKeys { url: String },
    #[error("no cached keys available for {url} and initial fetch has not succeeded")]
    Uninitialized { url: String },
}

#[derive(Default)]
struct CacheState {
    keys: HashMap<String, (DecodingKey, Algorithm)>,
    last_refresh: Option<Instant>,
}

pub struct JwksCache {
    url: String,
    client: reqwest::Client,
    refresh_interval: Duration,
    state: RwLock<CacheState>,
}

impl JwksCache {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_refresh_interval(url, DEFAULT_REFRESH_INTERVAL)
    }

    pub fn with_refresh_interval(url: impl Into<String>, refresh_interval: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("reqwest client with a fixed timeout should always build");
        Self {
            url: url.into(),
            client,
            refresh_interval,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the decoding key and algorithm for `kid`, from whatever
    /// is currently cached. Does not fetch.
    pub fn get_key(&self, kid: &str) -> Option<(DecodingKey, Algorithm)> {
        self.state.read().keys.get(kid).cloned()
    }

    pub fn has_keys(&self) -> bool {
        !self.state.read().keys.is_empty()
    }

    fn is_stale(&self) -> bool {
        match self.state.read().last_refresh {
            Some(last) => last.elapsed() >= self.refresh_interval,
            None => true,
        }
    }

    /// Ensures at least one successful fetch has happened, refreshing if
    /// the cache is empty or past its staleness window. On refresh
    /// failure, cached keys (if any) are served instead of surfacing the
    /// error — callers only see a transient fetch error when there is
    /// nothing at all cached yet (spec.md §4.C).
    pub async fn get(&self) -> Result<(), JwksError> {
        if !self.is_stale() {
            return Ok(());
        }

        match self.refresh_now().await {
            Ok(()) => Ok(()),
            Err(err) => {
                if self.has_keys() {
                    tracing::warn!(url = %self.url, error = %err, "jwks refresh failed; serving cached keys");
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Unconditionally fetches and installs a fresh key set.
    pub async fn refresh_now(&self) -> Result<(), JwksError> {
        let jwk_set = self.fetch_jwk_set().await?;
        let mut keys = HashMap::new();

        for jwk in jwk_set.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                continue;
            };
            let algorithm = jwk
                .common
                .key_algorithm
                .and_then(algorithm_from_key_algorithm)
                .unwrap_or(Algorithm::RS256);
            match DecodingKey::from_jwk(&jwk) {
                Ok(key) => {
                    keys.insert(kid, (key, algorithm));
                }
                Err(err) => {
                    tracing::warn!(kid = %kid, error = %err, "failed to parse jwk; skipping");
                }
            }
        }

        if keys.is_empty() {
            return Err(JwksError::NoUsableKeys {
                url: self.url.clone(),
            });
        }

        let mut state = self.state.write();
        state.keys = keys;
        state.last_refresh = Some(Instant::now());
        Ok(())
    }

    async fn fetch_jwk_set(&self) -> Result<JwkSet, JwksError> {
        let response =
            self.client
                .get(&self.url)
                .send()
                .await
                .map_err(|source| JwksError::Fetch {
                    url: self.url.clone(),
                    source,
                })?;

        if !response.status().is_success() {
            return Err(JwksError::BadStatus {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await.map_err(|source| JwksError::Fetch {
            url: self.url.clone(),
            source,
        })?;

        serde_json::from_str(&body).map_err(|source| JwksError::InvalidPayload {
            url: self.url.clone(),
            source,
        })
    }

    /// Spawns the background refresh task. Intended to be called once
    /// per cache for the lifetime of the Filter process.
    pub fn spawn_background_refresh(
        self: std::sync::Arc<Self>,
    ) -> tokio::task::JoinHandle<()> {
        let interval = self.refresh_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it, startup already fetched once.
            loop {
                ticker.tick().await;
                if let Err(err) = self.refresh_now().await {
                    tracing::warn!(url = %self.url, error = %err, "background jwks refresh failed");
                }
            }
        })
    }
}

/// `KeyAlgorithm` (the `alg` a JWK advertises) and `Algorithm` (what
/// `jsonwebtoken` validates with) are distinct enums; map the subset
/// of key algorithms AuthBridge accepts rather than round-tripping
/// through a string.
fn algorithm_from_key_algorithm(alg: KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        _ => None,
    }
}

trait AlgorithmLenient {
    fn from_str_lenient(raw: &str) -> Option<Algorithm>;
}

impl AlgorithmLenient for Algorithm {
    fn from_str_lenient(raw: &str) -> Option<Algorithm> {
        match raw {
            "HS256" => Some(Algorithm::HS256),
            "HS384" => Some(Algorithm::HS384),
            "HS512" => Some(Algorithm::HS512),
            "RS256" => Some(Algorithm::RS256),
            "RS384" => Some(Algorithm::RS384),
            "RS512" => Some(Algorithm::RS512),
            "ES256" => Some(Algorithm::ES256),
            "ES384" => Some(Algorithm::ES384),
            "PS256" => Some(Algorithm::PS256),
            "PS384" => Some(Algorithm::PS384),
            "PS512" => Some(Algorithm::PS512),
            _ => None,
        }
    }
}
