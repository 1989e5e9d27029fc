use std::env;
use std::str::FromStr;

const DEFAULT_OUTBOUND_PORT: u16 = 15123;
const DEFAULT_INBOUND_PORT: u16 = 15124;
const DEFAULT_PROXY_UID: u32 = 1337;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorConfig {
    pub outbound_port: u16,
    pub inbound_port: u16,
    pub proxy_uid: u32,
    pub outbound_ports_exclude: Vec<u16>,
    pub inbound_ports_exclude: Vec<u16>,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            outbound_port: DEFAULT_OUTBOUND_PORT,
            inbound_port: DEFAULT_INBOUND_PORT,
            proxy_uid: DEFAULT_PROXY_UID,
            outbound_ports_exclude: Vec::new(),
            inbound_ports_exclude: Vec::new(),
        }
    }
}

impl InterceptorConfig {
    pub fn from_env() -> Self {
        Self {
            outbound_port: read_env("PROXY_PORT").unwrap_or(DEFAULT_OUTBOUND_PORT),
            inbound_port: read_env("INBOUND_PROXY_PORT").unwrap_or(DEFAULT_INBOUND_PORT),
            proxy_uid: read_env("PROXY_UID").unwrap_or(DEFAULT_PROXY_UID),
            outbound_ports_exclude: read_csv_ports("OUTBOUND_PORTS_EXCLUDE"),
            inbound_ports_exclude: read_csv_ports("INBOUND_PORTS_EXCLUDE"),
        }
    }
}

fn read_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}

fn read_csv_ports(name: &str) -> Vec<u16> {
    env::var(name)
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .filter_map(|p| p.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_spec() {
        let _guard = ENV_LOCK.lock().unwrap();
        for var in ["PROXY_PORT", "INBOUND_PROXY_PORT", "PROXY_UID"] {
            env::remove_var(var);
        }
        let config = InterceptorConfig::from_env();
        assert_eq!(config.outbound_port, 15123);
        assert_eq!(config.inbound_port, 15124);
        assert_eq!(config.proxy_uid, 1337);
    }

    #[test]
    fn parses_csv_excluded_ports() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("OUTBOUND_PORTS_EXCLUDE", "53, 123,5432");
        let config = InterceptorConfig::from_env();
        assert_eq!(config.outbound_ports_exclude, vec![53, 123, 5432]);
        env::remove_var("OUTBOUND_PORTS_EXCLUDE");
    }
}
