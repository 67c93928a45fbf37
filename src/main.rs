use std::sync::Arc;

use anyhow::Context;
use approved_secrets::{
    api::start_api_server,
    clock::SystemClock,
    identity::EntityIdentityResolver,
    notify::SlackNotifier,
    observability::{init_logging, log_config_info},
    secrets::VaultAdapter,
    services::Collaborators,
    storage, AppConfig, ApprovedSecretsBackend, APP_NAME, VERSION,
};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (optional - won't fail if missing)
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let config = AppConfig::from_env().context("loading configuration")?;
    init_logging(&config.observability).context("initializing logging")?;

    info!(app_name = APP_NAME, version = VERSION, "Starting approved-secrets backend");
    log_config_info(&config);

    let storage = storage::connect(&config.storage).await.context("connecting storage")?;

    let vault = Arc::new(VaultAdapter::new());
    let deps = Collaborators {
        resolver: Arc::new(EntityIdentityResolver::new()),
        source: vault.clone(),
        broker: vault.clone(),
        notifier: Arc::new(SlackNotifier::new()),
        clock: Arc::new(SystemClock),
    };

    let backend = Arc::new(ApprovedSecretsBackend::new(
        storage,
        deps,
        config.housekeeping.clone(),
        config.mount.clone(),
    ));

    match backend.config.load_optional().await {
        Ok(Some(_)) => {
            let service = backend.config.service_credentials().await?;
            if let Err(e) = vault.health(&service).await {
                warn!(error = %e, vault_addr = %service.vault_addr, "Vault is not healthy yet");
            }
        }
        Ok(None) => info!("Backend not configured yet; write /v1/config to finish setup"),
        Err(e) => warn!(error = %e, "Could not read backend configuration"),
    }

    backend.start().await;

    let result = start_api_server(&config.server, backend.clone(), shutdown_signal()).await;

    backend.stop().await;

    if let Err(e) = result {
        error!(error = %e, "API server terminated with error");
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
