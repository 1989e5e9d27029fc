//! Credential Bootstrap (spec.md §4.E): a file-based handshake with an
//! external registrar that publishes the client identity this process
//! exchanges tokens as.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use authbridge_core::ExchangeConfig;
use parking_lot::RwLock;

use crate::config::FilterConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const RELOAD_INTERVAL: Duration = Duration::from_secs(30);

/// Guards the Exchange Config Snapshot. Readers clone the value out
/// under the shared lock rather than holding it during token exchange.
#[derive(Default)]
pub struct ExchangeConfigHandle {
    inner: RwLock<ExchangeConfig>,
}

impl ExchangeConfigHandle {
    pub fn new(config: ExchangeConfig) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    pub fn snapshot(&self) -> ExchangeConfig {
        self.inner.read().clone()
    }

    pub fn replace(&self, config: ExchangeConfig) {
        *self.inner.write() = config;
    }
}

fn read_credential_file(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Polls both credential files with a bounded deadline. Returns the pair
/// once both are readable and non-empty, or `None` if the deadline
/// elapses first — at which point the caller falls back to environment
/// variables (spec.md §4.E Startup behaviour).
async fn wait_for_credentials(
    client_id_file: &Path,
    client_secret_file: &Path,
    deadline: Duration,
) -> Option<(String, String)> {
    let start = tokio::time::Instant::now();
    loop {
        if let (Some(client_id), Some(client_secret)) = (
            read_credential_file(client_id_file),
            read_credential_file(client_secret_file),
        ) {
            return Some((client_id, client_secret));
        }

        if start.elapsed() >= deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Runs the startup handshake and returns a handle holding the initial
/// Exchange Config Snapshot. File-sourced credentials take priority over
/// environment variables (spec.md §4.D.1 point 2).
pub async fn bootstrap(config: &FilterConfig) -> Arc<ExchangeConfigHandle> {
    let from_files = wait_for_credentials(
        &config.client_id_file,
        &config.client_secret_file,
        config.bootstrap_timeout,
    )
    .await;

    let (client_id, client_secret) = match from_files {
        Some((id, secret)) => (id, secret),
        None => {
            tracing::warn!(
                timeout_secs = config.bootstrap_timeout.as_secs(),
                "credential bootstrap deadline elapsed; falling back to environment"
            );
            (
                config.env_client_id.clone().unwrap_or_default(),
                config.env_client_secret.clone().unwrap_or_default(),
            )
        }
    };

    let exchange_config = ExchangeConfig {
        client_id,
        client_secret,
        token_endpoint: config.token_url.clone().unwrap_or_default(),
        target_audience: config.target_audience.clone(),
        scopes: config.target_scopes.clone(),
    };

    Arc::new(ExchangeConfigHandle::new(exchange_config))
}

/// Watches the credential files for changes and reloads the snapshot on
/// a fixed interval (spec.md §4.E Update behaviour — optional but kept
/// here so long-lived rotations don't require a pod restart).
pub fn spawn_reload_task(
    handle: Arc<ExchangeConfigHandle>,
    client_id_file: PathBuf,
    client_secret_file: PathBuf,
    token_endpoint: String,
    target_audience: String,
    scopes: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RELOAD_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let (Some(client_id), Some(client_secret)) = (
                read_credential_file(&client_id_file),
                read_credential_file(&client_secret_file),
            ) else {
                continue;
            };

            let current = handle.snapshot();
            if current.client_id == client_id && current.client_secret == client_secret {
                continue;
            }

            tracing::info!("credential files changed; reloading exchange config");
            handle.replace(ExchangeConfig {
                client_id,
                client_secret,
                token_endpoint: token_endpoint.clone(),
                target_audience: target_audience.clone(),
                scopes: scopes.clone(),
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn wait_for_credentials_returns_once_both_files_are_populated() {
        let dir = tempdir().unwrap();
        let id_path = dir.path().join("client-id.txt");
        let secret_path = dir.path().join("client-secret.txt");
        std::fs::write(&id_path, "svc-a\n").unwrap();
        std::fs::write(&secret_path, "s3cr3t\n").unwrap();

        let result = wait_for_credentials(&id_path, &secret_path, Duration::from_secs(5)).await;
        assert_eq!(result, Some(("svc-a".to_string(), "s3cr3t".to_string())));
    }

    #[tokio::test]
    async fn wait_for_credentials_times_out_when_files_absent() {
        let dir = tempdir().unwrap();
        let id_path = dir.path().join("client-id.txt");
        let secret_path = dir.path().join("client-secret.txt");

        let result =
            wait_for_credentials(&id_path, &secret_path, Duration::from_millis(50)).await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn bootstrap_falls_back_to_env_when_files_never_appear() {
        let dir = tempdir().unwrap();
        let config = FilterConfig {
            token_url: Some("https://kc.example/realms/demo/token".to_string()),
            issuer: Some("https://kc.example/realms/demo".to_string()),
            expected_audience: String::new(),
            env_client_id: Some("env-client".to_string()),
            env_client_secret: Some("env-secret".to_string()),
            target_audience: "svc-b".to_string(),
            target_scopes: "openid".to_string(),
            client_id_file: dir.path().join("missing-id.txt"),
            client_secret_file: dir.path().join("missing-secret.txt"),
            filter_port: 9090,
            bootstrap_timeout: Duration::from_millis(50),
            route_config_path: dir.path().join("routes.yaml"),
            stream_timeout: Duration::from_secs(30),
        };

        let handle = bootstrap(&config).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.client_id, "env-client");
        assert_eq!(snapshot.client_secret, "env-secret");
        assert!(snapshot.is_complete());
    }
}
