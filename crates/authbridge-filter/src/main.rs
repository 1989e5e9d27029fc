use std::sync::Arc;

use authbridge_core::InboundPolicy;
use authbridge_filter::bootstrap::{self, spawn_reload_task};
use authbridge_filter::config::FilterConfig;
use authbridge_filter::service::FilterService;
use authbridge_jwks::JwksCache;
use authbridge_proto::ExternalProcessorServer;
use authbridge_resolver::Resolver;
use tonic::transport::Server;
use tower::timeout::TimeoutLayer;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = FilterConfig::from_env();

    let exchange_handle = bootstrap::bootstrap(&config).await;
    spawn_reload_task(
        exchange_handle.clone(),
        config.client_id_file.clone(),
        config.client_secret_file.clone(),
        config.token_url.clone().unwrap_or_default(),
        config.target_audience.clone(),
        config.target_scopes.clone(),
    );

    let inbound_policy = if config.inbound_enabled() {
        let token_url = config.token_url.clone().expect("checked by inbound_enabled");
        let jwks_url = InboundPolicy::jwks_url_from_token_endpoint(&token_url)?;
        Some(InboundPolicy {
            issuer: config.issuer.clone().expect("checked by inbound_enabled"),
            expected_audience: config.expected_audience.clone(),
            jwks_url,
        })
    } else {
        tracing::warn!("ISSUER/TOKEN_URL not both set; inbound validation disabled");
        None
    };

    let jwks = match &inbound_policy {
        Some(policy) => {
            let cache = Arc::new(JwksCache::new(policy.jwks_url.clone()));
            if let Err(err) = cache.refresh_now().await {
                tracing::warn!(error = %err, "initial jwks fetch failed; will retry in background");
            }
            cache.clone().spawn_background_refresh();
            Some(cache)
        }
        None => None,
    };

    let resolver = Arc::new(Resolver::from_file(&config.route_config_path)?);

    let service = FilterService::new(resolver, jwks, inbound_policy, exchange_handle);

    let addr: std::net::SocketAddr = format!("0.0.0.0:{}", config.filter_port).parse()?;
    tracing::info!(%addr, "authbridge-filter listening");

    Server::builder()
        .layer(TimeoutLayer::new(config.stream_timeout))
        .add_service(ExternalProcessorServer::new(service))
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received; draining in-flight streams");
        })
        .await?;

    Ok(())
}
