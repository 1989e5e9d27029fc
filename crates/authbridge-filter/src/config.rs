use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_FILTER_PORT: u16 = 9090;
const DEFAULT_CLIENT_ID_FILE: &str = "/shared/client-id.txt";
const DEFAULT_CLIENT_SECRET_FILE: &str = "/shared/client-secret.txt";
const DEFAULT_BOOTSTRAP_TIMEOUT_SECS: u64 = 60;
const DEFAULT_ROUTE_CONFIG_PATH: &str = "/etc/authbridge/routes.yaml";
const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 30;

/// Everything the Filter needs at startup, read once from the
/// environment per the §6 variable table.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub token_url: Option<String>,
    pub issuer: Option<String>,
    pub expected_audience: String,
    pub env_client_id: Option<String>,
    pub env_client_secret: Option<String>,
    pub target_audience: String,
    pub target_scopes: String,
    pub client_id_file: PathBuf,
    pub client_secret_file: PathBuf,
    pub filter_port: u16,
    pub bootstrap_timeout: Duration,
    pub route_config_path: PathBuf,
    pub stream_timeout: Duration,
}

impl FilterConfig {
    pub fn from_env() -> Self {
        Self {
            token_url: read_env_string("TOKEN_URL"),
            issuer: read_env_string("ISSUER"),
            expected_audience: read_env_string("EXPECTED_AUDIENCE").unwrap_or_default(),
            env_client_id: read_env_string("CLIENT_ID"),
            env_client_secret: read_env_string("CLIENT_SECRET"),
            target_audience: read_env_string("TARGET_AUDIENCE").unwrap_or_default(),
            target_scopes: read_env_string("TARGET_SCOPES").unwrap_or_default(),
            client_id_file: read_env_string("CLIENT_ID_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIENT_ID_FILE)),
            client_secret_file: read_env_string("CLIENT_SECRET_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIENT_SECRET_FILE)),
            filter_port: read_env("AUTHBRIDGE_FILTER_PORT").unwrap_or(DEFAULT_FILTER_PORT),
            bootstrap_timeout: Duration::from_secs(
                read_env("AUTHBRIDGE_BOOTSTRAP_TIMEOUT_SECS")
                    .unwrap_or(DEFAULT_BOOTSTRAP_TIMEOUT_SECS),
            ),
            route_config_path: read_env_string("ROUTE_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ROUTE_CONFIG_PATH)),
            stream_timeout: Duration::from_secs(
                read_env("AUTHBRIDGE_STREAM_TIMEOUT_SECS").unwrap_or(DEFAULT_STREAM_TIMEOUT_SECS),
            ),
        }
    }

    /// `ISSUER` and `TOKEN_URL` must both be set to enable inbound
    /// validation (§4.D.1 point 4); otherwise inbound passes through.
    pub fn inbound_enabled(&self) -> bool {
        self.issuer.is_some() && self.token_url.is_some()
    }
}

fn read_env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_env<T>(name: &str) -> Option<T>
where
    T: FromStr,
{
    env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable tests must not run concurrently with each
    // other (std::env is process-global state).
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        for var in ["TOKEN_URL", "ISSUER", "AUTHBRIDGE_FILTER_PORT"] {
            env::remove_var(var);
        }
        let config = FilterConfig::from_env();
        assert_eq!(config.filter_port, DEFAULT_FILTER_PORT);
        assert!(!config.inbound_enabled());
    }

    #[test]
    fn inbound_enabled_requires_both_issuer_and_token_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("ISSUER", "https://kc.example/realms/demo");
        env::remove_var("TOKEN_URL");
        assert!(!FilterConfig::from_env().inbound_enabled());

        env::set_var("TOKEN_URL", "https://kc.example/realms/demo/token");
        assert!(FilterConfig::from_env().inbound_enabled());

        env::remove_var("ISSUER");
        env::remove_var("TOKEN_URL");
    }

    #[test]
    fn blank_env_values_are_treated_as_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("EXPECTED_AUDIENCE", "   ");
        assert_eq!(FilterConfig::from_env().expected_audience, "");
        env::remove_var("EXPECTED_AUDIENCE");
    }
}
