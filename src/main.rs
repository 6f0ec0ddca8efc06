//! Lookup Relay - Entry Point
//!
//! Loads the proxy pool, connects the bot transport and polls until shutdown.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lookup_relay::bot::{MessageHandler, Poller};
use lookup_relay::config::LogConfig;
use lookup_relay::lookup::{HttpLookupBackend, QueryClient};
use lookup_relay::proxy::{ConnectProbe, ProviderClient, ProxyPool, ProxyPoolManager};
use lookup_relay::services::{ProxyRefreshConfig, ProxyRefreshHandle, ProxyRefreshService};
use lookup_relay::supervisor::{ConnectionSupervisor, SupervisorConfig};
use lookup_relay::transport::TelegramFactory;
use lookup_relay::{Config, Result};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(&LogConfig::from_env());

    info!("Starting Lookup Relay");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");

    let (shutdown_tx, _) = watch::channel(false);

    // Build and load the proxy pool
    let manager = if config.use_proxy() {
        let source = Arc::new(ProviderClient::new(config.provider_config())?);
        let probe = Arc::new(ConnectProbe::from_url(&config.proxy.probe_url)?);
        let manager = Arc::new(ProxyPoolManager::new(
            source,
            probe,
            Arc::new(ProxyPool::new()),
            config.pool_manager_config(),
        ));

        let count = manager.load_initial().await;
        if count == 0 {
            warn!("No proxies available, connecting directly until a refresh succeeds");
        } else {
            info!("Loaded {} proxies for region {}", count, config.proxy.region);
        }
        Some(manager)
    } else {
        if config.proxy.enabled {
            warn!("USE_PROXY is set but WEBSHARE_API_KEY is empty, running without proxies");
        } else {
            info!("Proxy usage disabled");
        }
        None
    };

    // Bot transport under supervision
    let factory = Arc::new(TelegramFactory::new(config.telegram_config()));
    let supervisor = Arc::new(ConnectionSupervisor::connect(
        factory,
        manager.clone(),
        SupervisorConfig::default(),
        shutdown_tx.subscribe(),
    )?);

    // Lookup pipeline
    let backend = Arc::new(HttpLookupBackend::new(config.lookup_api_config())?);
    let client = Arc::new(QueryClient::new(
        backend,
        manager.as_ref().map(|m| m.pool().clone()),
        config.query_policy(),
    ));
    let handler = Arc::new(MessageHandler::new(
        supervisor.clone(),
        client,
        config.output.max_message_len,
        config.message_delay(),
    ));

    // Start proxy refresh service
    let refresh = manager.map(|manager| {
        let (handle, refresh_shutdown) = ProxyRefreshHandle::new();
        let service = ProxyRefreshService::new(
            manager,
            ProxyRefreshConfig {
                refresh_interval: config.refresh_interval(),
            },
        );
        let task = tokio::spawn(async move {
            service.run(refresh_shutdown).await;
        });
        (handle, task)
    });

    // Start polling
    let poller = Poller::new(supervisor.clone(), handler);
    let poll_shutdown = shutdown_tx.subscribe();
    let poll_task = tokio::spawn(async move {
        poller.run(poll_shutdown).await;
    });

    info!("Bot started");

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    // Send shutdown signal to all services
    let _ = shutdown_tx.send(true);
    let refresh_task = refresh.map(|(handle, task)| {
        handle.shutdown();
        task
    });

    // Wait for all tasks to complete
    let _ = poll_task.await;
    if let Some(task) = refresh_task {
        let _ = task.await;
    }
    supervisor.shutdown().await;

    info!("Lookup Relay stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lookup_relay={}", log.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
