use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use colored::Colorize;
use futures::future::join_all;
use quotagate::{
    Args, BANNER,
    config::{CONFIG_NAME, GatewayConfig, LOG_FILE_NAME, OPT_LOG_CONSUME_ENABLED},
    error::GatewayError,
    router::RouterBuilder,
    services::{Gateway, HttpProbeTransport, LogNotifier},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
};

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    #[cfg(windows)]
    let _ = enable_ansi_support::enable_ansi_support();
    let args = Args::parse();
    // set up logging time format
    let timer = ChronoLocal::new("%H:%M:%S%.3f".to_string());
    let file_appender = tracing_appender::rolling::daily(&args.log_dir, LOG_FILE_NAME);
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default()
        .with(filter)
        .with(
            fmt::Layer::default()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_timer(timer.clone()),
        )
        .with(
            fmt::Layer::default()
                .with_writer(std::io::stdout)
                .with_timer(timer),
        );

    tracing::subscriber::set_global_default(subscriber).expect("unable to set global subscriber");

    println!("{}", *BANNER);
    let config_path = args.config.unwrap_or_else(|| PathBuf::from(CONFIG_NAME));
    let config = GatewayConfig::load(Some(&config_path))?;
    if !config_path.exists() {
        match config.save(&config_path) {
            Ok(()) => info!("Default config written to {}", config_path.display()),
            Err(e) => warn!("Failed to write default config: {}", e),
        }
    }
    println!(
        "Config file: {}",
        config_path.display().to_string().blue()
    );
    println!("{}", config);

    let transport = Arc::new(HttpProbeTransport::new(config.probe_timeout())?);
    let gateway = Arc::new(Gateway::connect(config, Arc::new(LogNotifier), transport).await?);
    if let Err(e) = gateway.cache.sync().await {
        error!("Initial cache sync failed: {}", e);
    }
    let consume_enabled = gateway
        .cache
        .options()
        .bool_or(OPT_LOG_CONSUME_ENABLED, gateway.config.log_consume_enabled);
    gateway.logs.set_consume_enabled(consume_enabled);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = gateway.spawn_background(&shutdown_rx);

    let listener = tokio::net::TcpListener::bind(gateway.config.address()).await?;
    let router = RouterBuilder::new(gateway.clone())
        .with_default_setup()
        .build();
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    // loops flush their own buffers once more on the way out
    let _ = shutdown_tx.send(true);
    for result in join_all(handles).await {
        if let Err(e) = result {
            error!("Background loop ended abnormally: {}", e);
        }
    }
    let (deltas, logs) = gateway.flush().await;
    info!(
        deltas = deltas.applied,
        logs = logs.applied,
        "Shutdown complete"
    );
    Ok(())
}
