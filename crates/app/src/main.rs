mod auth;
mod domains;
mod mirror;
mod problem;
mod publish;
mod router;
mod storefront;
mod tap;
mod telemetry;
mod verification;

use std::{net::SocketAddr, sync::Arc};

use storefront_storage::Database;
use storefront_util::{load_env_file, AppConfig};
use tracing::info;

use crate::verification::{DomainVerifier, SimulatedVerifier, VerificationWorker};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_file = load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    if let Some(path) = env_file {
        info!(stage = "config", path = %path.display(), "loaded env file");
    }
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let tap_hub = tap::TapHub::new();
    if config.environment.is_development() {
        tap_hub.spawn_mock_publisher();
    }

    let resolver_config = storefront::resolver_config(&config.storefront);
    info!(
        stage = "resolver",
        strategies = resolver_config.strategies().len(),
        static_domains = resolver_config.mapping.len(),
        "resolver configured"
    );

    let verifier: Arc<dyn DomainVerifier> =
        Arc::new(SimulatedVerifier::new(config.dns_success_rate));
    let state = router::AppState::new(
        metrics,
        tap_hub.clone(),
        database,
        &resolver_config,
        &config.merchant_token_secret,
        verifier,
        &config.storefront.subdomain_root,
    );

    VerificationWorker::new(
        state.domains().clone(),
        tap_hub,
        state.clock().clone(),
        config.domain_recheck_interval,
    )
    .spawn();

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
