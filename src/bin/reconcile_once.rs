use clap::Parser;
use dotenvy::dotenv;
use ftp2s3::config::{BridgeConfig, WalkErrorPolicy};
use ftp2s3::infrastructure::storage;
use ftp2s3::services::migrator::Migrator;
use ftp2s3::services::reconciler::Reconciler;
use ftp2s3::services::sink::S3Sink;
use ftp2s3::services::staging::LocalStaging;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runs a single reconciliation sweep of the staging directory and exits.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Migrate every staged file regardless of age
    #[arg(long)]
    all: bool,

    /// Override the staleness threshold in seconds
    #[arg(long, conflicts_with = "all")]
    stale_after_secs: Option<u64>,

    /// Keep sweeping past unreadable entries
    #[arg(long)]
    skip_walk_errors: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reconcile_once=info,ftp2s3=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let stale_after = if args.all {
        Duration::ZERO
    } else {
        args.stale_after_secs
            .map(Duration::from_secs)
            .unwrap_or(config.pipeline.stale_after)
    };
    let walk_errors = if args.skip_walk_errors {
        WalkErrorPolicy::Skip
    } else {
        config.pipeline.walk_errors
    };

    info!(
        "🧹 Draining {} (stale after {:?})",
        config.cache_dir.display(),
        stale_after
    );

    let staging = Arc::new(LocalStaging::open_root(&config.cache_dir).await?);
    let client = storage::setup_s3_client(&config.s3).await;
    let sink = Arc::new(S3Sink::new(
        client,
        config.s3.bucket.clone(),
        config.s3.prefix.clone(),
    ));

    // Ctrl+C stops the drain after the file in flight.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("⌨️  Ctrl+C received, stopping after the current file...");
            let _ = shutdown_tx.send(true);
        }
    });

    let reconciler = Reconciler::new(
        staging.clone(),
        Migrator::new(staging, sink).with_upload_timeout(config.pipeline.upload_timeout),
        config.pipeline.reconcile_interval,
        stale_after,
        shutdown_rx,
    )
    .with_walk_errors(walk_errors);

    match reconciler.sweep().await {
        Ok(report) => {
            info!(
                "✅ Sweep done: {} scanned, {} migrated, {} orphaned, {} retained, {} fresh",
                report.scanned, report.migrated, report.orphaned, report.retained, report.fresh
            );
            if report.interrupted {
                info!("🛑 Sweep was interrupted; remaining files stay staged");
            }
            println!("{:#?}", report);
            Ok(())
        }
        Err(e) => {
            error!("❌ Sweep aborted: {}", e);
            std::process::exit(1);
        }
    }
}
