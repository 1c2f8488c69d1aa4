use dotenvy::dotenv;
use ftp2s3::Pipeline;
use ftp2s3::config::BridgeConfig;
use ftp2s3::infrastructure::storage;
use ftp2s3::services::sink::S3Sink;
use ftp2s3::services::staging::LocalStaging;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing with EnvFilter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ftp2s3=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting ftp2s3...");

    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "📂 Staging: {}, queue capacity {}, sweep every {:?}, stale after {:?}",
        config.cache_dir.display(),
        config.pipeline.queue_capacity,
        config.pipeline.reconcile_interval,
        config.pipeline.stale_after
    );

    let staging = Arc::new(LocalStaging::open_root(&config.cache_dir).await?);
    let client = storage::setup_s3_client(&config.s3).await;
    let sink = Arc::new(S3Sink::new(
        client,
        config.s3.bucket.clone(),
        config.s3.prefix.clone(),
    ));

    let pipeline = Pipeline::start(&config.pipeline, staging, sink);

    // Handed to the FTP protocol engine embedding this bridge.
    let _factory = pipeline.driver_factory(config.credentials.clone());
    info!("✅ Upload pipeline ready, FTP driver port {}", config.port);

    shutdown_signal().await;
    pipeline.shutdown().await;

    info!("🛑 ftp2s3 shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
