// SpiritStream Failover
// Headless relay supervisor: starts auto-start channels and keeps them healthy

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

use spiritstream_failover::services::{
    init_logger, prune_logs, ChannelManager, ChannelStore, HealthMonitor, HttpRelayClient,
    LogEventSink, RelayClient, SettingsManager,
};

const DATA_DIR_ENV: &str = "SPIRITSTREAM_FAILOVER_DATA_DIR";

fn resolve_data_dir() -> PathBuf {
    env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .or_else(|| dirs_next::data_dir().map(|dir| dir.join("spiritstream-failover")))
        .unwrap_or_else(|| PathBuf::from("data"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("Shutdown signal received, stopping channels...");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = resolve_data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let settings_manager = SettingsManager::new(data_dir.clone());
    let settings = settings_manager.load()?;

    let log_dir = data_dir.join("logs");
    init_logger(&log_dir, settings.log_level_filter())?;
    match prune_logs(&log_dir, settings.log_retention_days) {
        Ok(0) => {}
        Ok(removed) => log::info!("Removed {removed} expired log files"),
        Err(e) => log::warn!("Log cleanup failed: {e}"),
    }
    log::info!("Data directory: {}", data_dir.display());

    // The blocking HTTP client must be built outside the async runtime
    let relay: Arc<dyn RelayClient> = Arc::new(HttpRelayClient::from_settings(&settings)?);
    log::info!("Relay endpoint: {}", settings.relay_base_url());

    let manager = Arc::new(
        ChannelManager::new(Some(relay))
            .with_default_failure_threshold(settings.default_failure_threshold),
    );
    let store = ChannelStore::new(data_dir.clone());
    let loaded = manager.load(&store)?;
    log::info!("Loaded {loaded} channels");

    let started = manager.start_all();
    log::info!("Started {started} auto-start channels");

    let tick = HealthMonitor::base_tick(&manager, settings.health_check_interval_secs);
    let monitor = Arc::new(HealthMonitor::new(manager.clone(), Arc::new(LogEventSink), tick));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor_task = tokio::spawn(monitor.run(shutdown_rx));

        shutdown_signal().await;

        let _ = shutdown_tx.send(true);
        if let Err(e) = monitor_task.await {
            log::error!("Health monitor task failed: {e}");
        }
    });
    drop(runtime);

    let stopped = manager.stop_all();
    log::info!("Stopped {stopped} channels");

    if let Err(e) = manager.save(&store, settings.encrypt_stream_keys) {
        log::error!("Failed to save channels: {e}");
    }
    manager.shutdown();

    log::info!("Shutdown complete");
    Ok(())
}
