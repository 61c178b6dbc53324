use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waypost::api;
use waypost::cli;
use waypost::gateway::{DirectGateway, Gateway};
use waypost::locator::Locator;
use waypost::storage::{GroupStorage, JsonGroupStorage, MemoryGroupStorage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,waypost=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let args = cli::Cli::parse();

    let storage: Arc<dyn GroupStorage> = match &args.groups_file {
        Some(path) => Arc::new(JsonGroupStorage::new(path)),
        None => Arc::new(MemoryGroupStorage::new()),
    };

    let gateway: Option<Arc<dyn Gateway>> = args
        .gateway
        .then(|| Arc::new(DirectGateway::new()) as Arc<dyn Gateway>);

    let settings = args.into_settings();
    let api_addr = settings.api_bind();
    let discovery = settings.multicast_group.is_some();

    let locator = Arc::new(Locator::new(settings, storage, gateway));

    locator.load_groups().await;

    if discovery {
        locator.connect().await?;
    }

    let listener = tokio::net::TcpListener::bind(api_addr).await?;

    info!("Starting Waypost on {}", api_addr);
    axum::serve(listener, api::api(locator.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    locator.disconnect();

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
