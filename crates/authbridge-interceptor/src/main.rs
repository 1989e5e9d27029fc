use authbridge_interceptor::backend::Backend;
use authbridge_interceptor::config::InterceptorConfig;
use authbridge_interceptor::{install, is_dry_run};

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = InterceptorConfig::from_env();
    let backend = Backend::detect();
    let dry_run = is_dry_run();

    tracing::info!(
        outbound_port = config.outbound_port,
        inbound_port = config.inbound_port,
        proxy_uid = config.proxy_uid,
        backend = backend.binary(),
        dry_run,
        "installing firewall rules"
    );

    let installed = install(&config, &backend, dry_run)?;
    tracing::info!(rule_count = installed, "firewall rules installed");
    Ok(())
}
