pub mod config;
pub mod error;
pub mod handlers;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::{Credentials, PipelineSettings};
use crate::handlers::ftp::BridgeDriverFactory;
use crate::services::migrator::Migrator;
use crate::services::queue::UploadQueue;
use crate::services::reconciler::Reconciler;
use crate::services::sink::DurableSink;
use crate::services::staging::StagingStore;
use crate::services::worker::UploadWorker;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The running staging-to-S3 pipeline: one upload worker fed by the
/// bounded queue and one reconciler sweeping the staging area. The two
/// only meet through the staging area itself.
pub struct Pipeline {
    queue: UploadQueue,
    staging: Arc<dyn StagingStore>,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
    reconciler: JoinHandle<()>,
}

impl Pipeline {
    /// Spawns the worker and reconciler on the current tokio runtime.
    pub fn start(
        settings: &PipelineSettings,
        staging: Arc<dyn StagingStore>,
        sink: Arc<dyn DurableSink>,
    ) -> Self {
        let (queue, receiver) = UploadQueue::bounded(settings.queue_capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let migrator =
            Migrator::new(staging.clone(), sink).with_upload_timeout(settings.upload_timeout);

        let worker = UploadWorker::new(migrator.clone(), receiver, shutdown_rx.clone());
        let reconciler = Reconciler::new(
            staging.clone(),
            migrator,
            settings.reconcile_interval,
            settings.stale_after,
            shutdown_rx,
        )
        .with_walk_errors(settings.walk_errors);

        Self {
            queue,
            staging,
            shutdown,
            worker: tokio::spawn(worker.run()),
            reconciler: tokio::spawn(reconciler.run()),
        }
    }

    pub fn queue(&self) -> &UploadQueue {
        &self.queue
    }

    /// Factory the protocol engine uses to build one driver per connection.
    pub fn driver_factory(&self, credentials: Credentials) -> BridgeDriverFactory {
        BridgeDriverFactory::new(self.staging.clone(), self.queue.clone(), credentials)
    }

    /// Stops both tasks after their current file. Queued paths stay staged
    /// and are recovered by the next startup sweep.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        if let Err(e) = self.worker.await {
            tracing::error!("Upload worker ended abnormally: {}", e);
        }
        if let Err(e) = self.reconciler.await {
            tracing::error!("Reconciler ended abnormally: {}", e);
        }

        let pending = self.queue.len();
        if pending > 0 {
            tracing::info!("{} queued uploads left staged for the next sweep", pending);
        }
    }
}
