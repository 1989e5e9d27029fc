pub mod backend;
pub mod config;
pub mod rules;

use std::env;

use backend::{apply, Backend, RuleError};
use config::InterceptorConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InterceptorError {
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error("failed to enable localnet routing: {0}")]
    LocalnetRouting(#[from] std::io::Error),
}

/// Sets the kernel parameter that lets redirected packets keep their
/// original (non-loopback) source address survive post-NAT re-routing
/// (spec.md §4.A point 5). Exposed separately from `apply` so tests can
/// exercise the rule program without touching `/proc`.
pub fn enable_localnet_routing(dry_run: bool) -> std::io::Result<()> {
    if dry_run {
        tracing::info!("dry-run: would enable route_localnet on all interfaces");
        return Ok(());
    }

    for entry in std::fs::read_dir("/proc/sys/net/ipv4/conf")? {
        let entry = entry?;
        let path = entry.path().join("route_localnet");
        if path.exists() {
            std::fs::write(&path, b"1\n")?;
        }
    }
    Ok(())
}

pub fn is_dry_run() -> bool {
    env::var("AUTHBRIDGE_DRY_RUN")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Runs the full rule program against the detected backend. Returns the
/// number of ops executed, for a closing log line.
pub fn install(
    config: &InterceptorConfig,
    backend: &Backend,
    dry_run: bool,
) -> Result<usize, InterceptorError> {
    let ops = rules::rule_program(config, backend);
    apply(&ops, dry_run)?;
    enable_localnet_routing(dry_run)?;
    Ok(ops.len())
}
